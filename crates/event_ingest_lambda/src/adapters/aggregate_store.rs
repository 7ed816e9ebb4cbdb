use async_trait::async_trait;
use event_ingest_core::attributes::Item;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("aggregate store write failed: {0}")]
pub struct StoreError(pub String);

#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn put_item(&self, table_name: &str, item: Item) -> Result<(), StoreError>;
}
