//! Domain logic for queued event ingestion: envelope normalization, discriminator-based
//! decoding, the client-tracking event kind, aggregate rows and export partitioning.
//! Nothing here talks to AWS.

pub mod attributes;
pub mod contract;
pub mod envelope;
pub mod events;
pub mod partition;
pub mod queue_url;
pub mod registry;
