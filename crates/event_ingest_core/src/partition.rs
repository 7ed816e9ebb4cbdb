use std::fmt;
use std::num::NonZeroU32;

use rand::Rng;

pub const EXPORT_PARTITION_PREFIX: &str = "EXPORT-";

/// Write-spreading shard label stored with each aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportPartitionShard(String);

impl ExportPartitionShard {
    pub fn new(index: u32) -> Self {
        Self(format!("{EXPORT_PARTITION_PREFIX}{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric suffix of the label.
    pub fn index(&self) -> Option<u32> {
        self.0.strip_prefix(EXPORT_PARTITION_PREFIX)?.parse().ok()
    }
}

impl fmt::Display for ExportPartitionShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Picks shards uniformly in `[0, partition_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportPartitioner {
    partition_count: NonZeroU32,
}

impl ExportPartitioner {
    pub fn new(partition_count: NonZeroU32) -> Self {
        Self { partition_count }
    }

    pub fn partition_count(&self) -> NonZeroU32 {
        self.partition_count
    }

    pub fn pick<R: Rng>(&self, rng: &mut R) -> ExportPartitionShard {
        ExportPartitionShard::new(rng.gen_range(0..self.partition_count.get()))
    }

    pub fn pick_random(&self) -> ExportPartitionShard {
        self.pick(&mut rand::thread_rng())
    }
}
