use std::num::NonZeroU32;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "DYNAMODB_TABLE_NAME")]
    pub table_name: NonEmptyString,

    #[envconfig(from = "CLIENT_TRACKING_PARTITION_COUNT")]
    pub export_partition_count: NonZeroU32,

    #[envconfig(from = "EVENTS_DLQ_URL")]
    pub dead_letter_queue_url: NonEmptyString,

    #[envconfig(from = "DEADLINE_MARGIN_MS", default = "500")]
    pub deadline_margin: EnvMsDuration,

    /// Fallback filter when `RUST_LOG` is unset.
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
