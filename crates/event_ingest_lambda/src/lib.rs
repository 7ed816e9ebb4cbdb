//! Lambda-side event ingestion: collaborator traits for the queue and the aggregate
//! store, the strategy dispatcher, the batch outcome handler and runtime setup.
//! Domain rules live in `event_ingest_core`; AWS clients are only touched by the
//! `ingest_runtime` binary.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod telemetry;
