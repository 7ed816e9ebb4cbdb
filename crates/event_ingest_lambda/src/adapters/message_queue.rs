use async_trait::async_trait;
use event_ingest_core::contract::RawMessage;
use thiserror::Error;

/// HTTP-style status reported by the queue service. Only success is inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseStatus(pub u16);

impl ResponseStatus {
    pub const OK: Self = Self(200);

    pub fn is_ok(self) -> bool {
        (200..300).contains(&self.0)
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("cannot resolve queue for message: {0}")]
    QueueUrl(#[from] event_ingest_core::queue_url::QueueUrlError),
    #[error("queue request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Removes a consumed message from the queue it was delivered from.
    async fn delete_message(&self, message: &RawMessage) -> Result<ResponseStatus, QueueError>;

    async fn send_message(&self, queue_url: &str, body: &str)
        -> Result<ResponseStatus, QueueError>;
}
