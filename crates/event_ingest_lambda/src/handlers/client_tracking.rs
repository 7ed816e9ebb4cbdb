use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use event_ingest_core::attributes::aggregate_item;
use event_ingest_core::contract::{OutcomeContext, OutcomeKind, ProcessingOutcome};
use event_ingest_core::events::client_tracking::{
    build_aggregate_payload, ClientTrackingEvent, CLIENT_TRACKING_SUBJECT,
};
use event_ingest_core::partition::ExportPartitioner;
use event_ingest_core::registry::Event;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::aggregate_store::AggregateStore;
use crate::handlers::dispatch::EventStrategy;

pub const INVALID_EVENT_DETAIL: &str = "Invalid event, treating as success";
pub const SAVED_DETAIL: &str = "Client event saved";

/// Validates client-tracking events and writes one partitioned aggregate row each.
pub struct ClientTrackingStrategy {
    store: Arc<dyn AggregateStore>,
    table_name: String,
    partitioner: ExportPartitioner,
}

impl ClientTrackingStrategy {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        table_name: impl Into<String>,
        partitioner: ExportPartitioner,
    ) -> Self {
        Self {
            store,
            table_name: table_name.into(),
            partitioner,
        }
    }

    async fn persist(
        &self,
        event: &ClientTrackingEvent,
        cancel: &CancellationToken,
    ) -> ProcessingOutcome {
        let payload = match build_aggregate_payload(event, Utc::now()) {
            Ok(payload) => payload,
            Err(error) => {
                error!(error = %error, "failed to build client tracking aggregate");
                return ProcessingOutcome::failed(
                    OutcomeKind::PersistenceFailed,
                    format!("Error building aggregate: {error}"),
                    OutcomeContext::Empty,
                );
            }
        };

        let shard = self.partitioner.pick_random();
        let item = aggregate_item(&payload, &shard);
        debug!(
            table_name = %self.table_name,
            export_partition = %shard,
            property_count = payload.properties.len(),
            "writing client tracking aggregate"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(org_number = %payload.org_number, "aggregate write cancelled");
                ProcessingOutcome::failed(
                    OutcomeKind::Cancelled,
                    "Cancelled before the aggregate write completed",
                    OutcomeContext::Aggregate(payload),
                )
            }
            result = self.store.put_item(&self.table_name, item) => match result {
                Ok(()) => {
                    info!(
                        org_number = %payload.org_number,
                        export_partition = %shard,
                        "client tracking aggregate saved"
                    );
                    ProcessingOutcome::persisted(SAVED_DETAIL, payload)
                }
                Err(error) => {
                    error!(error = %error, org_number = %payload.org_number, "failed to save client event");
                    ProcessingOutcome::failed(
                        OutcomeKind::PersistenceFailed,
                        format!("Error saving aggregate: {error}"),
                        OutcomeContext::Aggregate(payload),
                    )
                }
            }
        }
    }
}

#[async_trait]
impl EventStrategy for ClientTrackingStrategy {
    fn subject(&self) -> &'static str {
        CLIENT_TRACKING_SUBJECT
    }

    async fn process(&self, event: &dyn Event, cancel: &CancellationToken) -> ProcessingOutcome {
        let Some(client_event) = event.as_any().downcast_ref::<ClientTrackingEvent>() else {
            error!(
                subject = event.subject(),
                "invalid event type for client tracking strategy"
            );
            return ProcessingOutcome::rejected(INVALID_EVENT_DETAIL, event_value(event));
        };

        // Malformed events are acknowledged and dropped.
        if let Err(error) = client_event.validate() {
            error!(
                error = %error,
                org_number = %client_event.org_number,
                mac_address = %client_event.mac_address,
                "client tracking event failed validation"
            );
            return ProcessingOutcome::rejected(INVALID_EVENT_DETAIL, event_value(event));
        }

        self.persist(client_event, cancel).await
    }
}

fn event_value(event: &dyn Event) -> Value {
    event.to_value().unwrap_or_else(|error| {
        warn!(
            error = %error,
            subject = event.subject(),
            "failed to serialize event for outcome context"
        );
        Value::Null
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::num::NonZeroU32;
    use std::sync::Mutex;

    use event_ingest_core::attributes::{AttributeValue, Item};
    use event_ingest_core::events::client_tracking;
    use event_ingest_core::registry::{EventKind, EventRegistry};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::adapters::aggregate_store::StoreError;

    #[derive(Default)]
    struct RecordingStore {
        writes: Mutex<Vec<(String, Item)>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl AggregateStore for RecordingStore {
        async fn put_item(&self, table_name: &str, item: Item) -> Result<(), StoreError> {
            self.writes
                .lock()
                .expect("lock should not be poisoned")
                .push((table_name.to_string(), item));
            match &self.fail_with {
                Some(message) => Err(StoreError(message.clone())),
                None => Ok(()),
            }
        }
    }

    fn strategy(store: Arc<RecordingStore>, partitions: u32) -> ClientTrackingStrategy {
        ClientTrackingStrategy::new(
            store,
            "client-tracking-aggregates",
            ExportPartitioner::new(NonZeroU32::new(partitions).expect("non-zero partitions")),
        )
    }

    fn decode(document: Value) -> Box<dyn Event> {
        let mut registry = EventRegistry::new();
        client_tracking::register(&mut registry);
        registry.decode(document).expect("event should decode")
    }

    fn valid_event() -> Box<dyn Event> {
        decode(json!({
            "Subject": "ClientTracking",
            "OrgNumber": "FO-640-74",
            "TimeZoneId": "Europe/Oslo",
            "MacAddress": "1EC42DEFCBGG",
            "MemberId": 261657
        }))
    }

    #[tokio::test]
    async fn valid_event_is_written_once_to_a_partition_in_range() {
        let store = Arc::new(RecordingStore::default());
        let strategy = strategy(store.clone(), 4);

        let outcome = strategy
            .process(valid_event().as_ref(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.kind, OutcomeKind::Persisted);
        assert_eq!(outcome.detail, SAVED_DETAIL);
        let payload = outcome.aggregate().expect("outcome should carry the payload");
        assert_eq!(payload.org_number, "FO-640-74");

        let writes = store.writes.lock().expect("lock should not be poisoned");
        assert_eq!(writes.len(), 1);
        let (table_name, item) = &writes[0];
        assert_eq!(table_name, "client-tracking-aggregates");
        assert_eq!(item["ExportedAt"], AttributeValue::Null);
        assert_eq!(item["OrgNumber"], AttributeValue::S("FO-640-74".into()));
        let AttributeValue::S(shard) = &item["ExportPartition"] else {
            panic!("export partition should be a string");
        };
        let index: u32 = shard
            .strip_prefix("EXPORT-")
            .expect("shard should carry the export prefix")
            .parse()
            .expect("shard suffix should be numeric");
        assert!(index < 4);
    }

    #[tokio::test]
    async fn event_missing_required_field_is_rejected_without_write() {
        let store = Arc::new(RecordingStore::default());
        let strategy = strategy(store.clone(), 2);
        let event = decode(json!({
            "Subject": "ClientTracking",
            "OrgNumber": "FO-640-74",
            "MacAddress": "1EC42DEFCBGG"
        }));

        let outcome = strategy
            .process(event.as_ref(), &CancellationToken::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.kind, OutcomeKind::Rejected);
        assert_eq!(outcome.detail, INVALID_EVENT_DETAIL);
        assert!(store
            .writes
            .lock()
            .expect("lock should not be poisoned")
            .is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_reported_with_payload() {
        let store = Arc::new(RecordingStore {
            fail_with: Some("ProvisionedThroughputExceeded".to_string()),
            ..RecordingStore::default()
        });
        let strategy = strategy(store.clone(), 2);

        let outcome = strategy
            .process(valid_event().as_ref(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.kind, OutcomeKind::PersistenceFailed);
        assert!(outcome.detail.contains("ProvisionedThroughputExceeded"));
        assert!(outcome.aggregate().is_some());
    }

    #[tokio::test]
    async fn cancelled_token_skips_the_write() {
        let store = Arc::new(RecordingStore::default());
        let strategy = strategy(store.clone(), 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = strategy.process(valid_event().as_ref(), &cancel).await;

        assert_eq!(outcome.kind, OutcomeKind::Cancelled);
        assert!(outcome.aggregate().is_some());
        assert!(store
            .writes
            .lock()
            .expect("lock should not be poisoned")
            .is_empty());
    }

    #[tokio::test]
    async fn null_required_field_is_rejected_without_write() {
        let store = Arc::new(RecordingStore::default());
        let strategy = strategy(store.clone(), 2);
        let event = decode(json!({
            "Subject": "ClientTracking",
            "OrgNumber": null,
            "TimeZoneId": "UTC",
            "MacAddress": "1EC42DEFCBGG"
        }));

        let outcome = strategy
            .process(event.as_ref(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.kind, OutcomeKind::Rejected);
        assert!(store
            .writes
            .lock()
            .expect("lock should not be poisoned")
            .is_empty());
    }

    #[tokio::test]
    async fn null_optional_field_is_persisted_as_empty_property() {
        let store = Arc::new(RecordingStore::default());
        let strategy = strategy(store.clone(), 2);
        let event = decode(json!({
            "Subject": "ClientTracking",
            "OrgNumber": "FO-640-74",
            "TimeZoneId": "UTC",
            "MacAddress": "1EC42DEFCBGG",
            "Scope": null
        }));

        let outcome = strategy
            .process(event.as_ref(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.kind, OutcomeKind::Persisted);
        let payload = outcome.aggregate().expect("outcome should carry the payload");
        assert_eq!(payload.properties["Scope"], "");
        assert_eq!(
            store
                .writes
                .lock()
                .expect("lock should not be poisoned")
                .len(),
            1
        );
    }

    /// Tuple keys cannot be written as JSON object keys.
    #[derive(Debug, Serialize, Deserialize)]
    struct UnserializableEvent {
        subject: String,
        pairs: BTreeMap<(u8, u8), u8>,
    }

    impl EventKind for UnserializableEvent {
        const SUBJECT: &'static str = "Unserializable";
        const FIELDS: &'static [&'static str] = &["subject", "pairs"];

        fn subject_field(&self) -> &str {
            &self.subject
        }
    }

    #[tokio::test]
    async fn foreign_event_that_cannot_serialize_is_rejected_with_null_context() {
        let store = Arc::new(RecordingStore::default());
        let strategy = strategy(store.clone(), 2);
        let event = UnserializableEvent {
            subject: "Unserializable".to_string(),
            pairs: BTreeMap::from([((1, 2), 3)]),
        };
        assert!(event.to_value().is_err());

        let outcome = strategy.process(&event, &CancellationToken::new()).await;

        assert_eq!(outcome.kind, OutcomeKind::Rejected);
        assert_eq!(outcome.context, OutcomeContext::Event(Value::Null));
        assert!(store
            .writes
            .lock()
            .expect("lock should not be poisoned")
            .is_empty());
    }
}
