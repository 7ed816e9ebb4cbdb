use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use event_ingest_core::contract::{OutcomeContext, OutcomeKind, ProcessingOutcome, RawMessage};
use event_ingest_core::registry::{Event, EventRegistry};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::message_queue::MessageQueue;
use crate::handlers::dispatch::{DispatchError, Dispatcher};

/// What happened to one message after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFate {
    Acknowledged { deleted: bool },
    DeadLettered { deleted: bool },
    /// The message stays on the source queue; redelivery is expected.
    LeftForRedelivery,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub received: usize,
    pub acknowledged: usize,
    pub dead_lettered: usize,
    pub left_for_redelivery: usize,
    pub delete_failures: usize,
    /// Ids of the messages that must be reported back as batch item failures.
    pub redelivery_message_ids: Vec<String>,
}

impl BatchSummary {
    fn record(&mut self, message_id: &str, fate: MessageFate) {
        self.received += 1;
        match fate {
            MessageFate::Acknowledged { deleted } => {
                self.acknowledged += 1;
                self.delete_failures += usize::from(!deleted);
            }
            MessageFate::DeadLettered { deleted } => {
                self.dead_lettered += 1;
                self.delete_failures += usize::from(!deleted);
            }
            MessageFate::LeftForRedelivery => {
                self.left_for_redelivery += 1;
                self.redelivery_message_ids.push(message_id.to_string());
            }
        }
    }
}

/// Runs each message of a batch through decode, dispatch and acknowledgement.
/// Failed messages are copied to the dead-letter queue before they are deleted.
pub struct BatchProcessor {
    registry: Arc<EventRegistry>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<dyn MessageQueue>,
    dead_letter_queue_url: String,
}

impl BatchProcessor {
    pub fn new(
        registry: Arc<EventRegistry>,
        dispatcher: Arc<Dispatcher>,
        queue: Arc<dyn MessageQueue>,
        dead_letter_queue_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            queue,
            dead_letter_queue_url: dead_letter_queue_url.into(),
        }
    }

    /// Processes messages one at a time in delivery order. Only a dispatch error
    /// stops the batch early.
    pub async fn process_batch(
        &self,
        messages: &[RawMessage],
        cancel: &CancellationToken,
    ) -> Result<BatchSummary, DispatchError> {
        let mut summary = BatchSummary::default();
        if messages.is_empty() {
            warn!("received an empty message batch");
            return Ok(summary);
        }

        info!(message_count = messages.len(), "processing message batch");
        for message in messages {
            match self.process_message(message, cancel).await {
                Ok(fate) => summary.record(&message.message_id, fate),
                Err(error) => {
                    error!(error = %error, message_id = %message.message_id, "aborting batch");
                    return Err(error);
                }
            }
        }

        info!(
            acknowledged = summary.acknowledged,
            dead_lettered = summary.dead_lettered,
            left_for_redelivery = summary.left_for_redelivery,
            delete_failures = summary.delete_failures,
            "message batch processed"
        );
        Ok(summary)
    }

    #[instrument(skip_all, fields(message_id = %message.message_id))]
    pub async fn process_message(
        &self,
        message: &RawMessage,
        cancel: &CancellationToken,
    ) -> Result<MessageFate, DispatchError> {
        let (outcome, event) = match self.registry.decode_body(&message.body) {
            Ok(event) => (self.run_strategy(event.as_ref(), cancel).await?, Some(event)),
            Err(error) => {
                warn!(error = %error, body_length = message.body.len(), "failed to decode message");
                let outcome = ProcessingOutcome::failed(
                    OutcomeKind::DecodeFailed,
                    format!("Failed to deserialize message: {error}"),
                    OutcomeContext::Empty,
                );
                (outcome, None)
            }
        };

        if outcome.is_success() {
            info!(outcome = %outcome.kind, detail = %outcome.detail, "message processed");
            return Ok(MessageFate::Acknowledged {
                deleted: self.delete(message, cancel).await,
            });
        }

        let body = dead_letter_body(event.as_deref(), message);
        Ok(self.dead_letter(message, &outcome, &body, cancel).await)
    }

    async fn run_strategy(
        &self,
        event: &dyn Event,
        cancel: &CancellationToken,
    ) -> Result<ProcessingOutcome, DispatchError> {
        match AssertUnwindSafe(self.dispatcher.dispatch(event, cancel))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!(subject = event.subject(), reason = %reason, "processing strategy panicked");
                Ok(ProcessingOutcome::failed(
                    OutcomeKind::StrategyPanicked,
                    format!("Strategy panicked: {reason}"),
                    OutcomeContext::Empty,
                ))
            }
        }
    }

    async fn dead_letter(
        &self,
        message: &RawMessage,
        outcome: &ProcessingOutcome,
        body: &str,
        cancel: &CancellationToken,
    ) -> MessageFate {
        error!(
            outcome = %outcome.kind,
            detail = %outcome.detail,
            "message processing failed, forwarding to dead-letter queue"
        );

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("dead-letter send cancelled, leaving message for redelivery");
                return MessageFate::LeftForRedelivery;
            }
            result = self.queue.send_message(&self.dead_letter_queue_url, body) => result,
        };

        match sent {
            Ok(status) if status.is_ok() => {}
            Ok(status) => {
                error!(status = %status, "dead-letter queue rejected message, leaving it for redelivery");
                return MessageFate::LeftForRedelivery;
            }
            Err(error) => {
                error!(error = %error, "failed to send to dead-letter queue, leaving message for redelivery");
                return MessageFate::LeftForRedelivery;
            }
        }

        MessageFate::DeadLettered {
            deleted: self.delete(message, cancel).await,
        }
    }

    /// Best-effort removal from the source queue. Failures are logged only.
    async fn delete(&self, message: &RawMessage, cancel: &CancellationToken) -> bool {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("message delete cancelled");
                return false;
            }
            result = self.queue.delete_message(message) => result,
        };

        match result {
            Ok(status) if status.is_ok() => {
                debug!("message deleted from source queue");
                true
            }
            Ok(status) => {
                warn!(status = %status, "source queue rejected message delete");
                false
            }
            Err(error) => {
                warn!(error = %error, "failed to delete message from source queue");
                false
            }
        }
    }
}

/// The decoded event's plain JSON, or the raw body when the message never decoded.
fn dead_letter_body(event: Option<&dyn Event>, message: &RawMessage) -> String {
    let Some(event) = event else {
        return message.body.clone();
    };
    event.to_json().unwrap_or_else(|error| {
        warn!(error = %error, "failed to serialize event for dead-letter queue, using raw body");
        message.body.clone()
    })
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        (*reason).to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
