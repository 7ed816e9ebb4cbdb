use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::types::AttributeValue as DynamoAttributeValue;
use envconfig::Envconfig;
use event_ingest_core::attributes::{AttributeValue, Item};
use event_ingest_core::contract::RawMessage;
use event_ingest_core::events::default_registry;
use event_ingest_core::partition::ExportPartitioner;
use event_ingest_core::queue_url::queue_url_from_source_arn;
use event_ingest_lambda::adapters::aggregate_store::{AggregateStore, StoreError};
use event_ingest_lambda::adapters::message_queue::{MessageQueue, QueueError, ResponseStatus};
use event_ingest_lambda::config::Config;
use event_ingest_lambda::handlers::batch::BatchProcessor;
use event_ingest_lambda::handlers::client_tracking::ClientTrackingStrategy;
use event_ingest_lambda::handlers::deadline::{
    deadline_from_epoch_ms, remaining_budget, DeadlineGuard,
};
use event_ingest_lambda::handlers::dispatch::{Dispatcher, EventStrategy};
use event_ingest_lambda::handlers::sqs_records::{
    decode_sqs_records, is_sqs_event, SqsBatchResponse,
};
use event_ingest_lambda::telemetry;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::info;

struct SqsMessageQueue {
    client: aws_sdk_sqs::Client,
}

#[async_trait]
impl MessageQueue for SqsMessageQueue {
    async fn delete_message(&self, message: &RawMessage) -> Result<ResponseStatus, QueueError> {
        let queue_url = queue_url_from_source_arn(&message.event_source_arn, &message.aws_region)?;
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .map(|_| ResponseStatus::OK)
            .map_err(|error| {
                QueueError::Request(aws_sdk_sqs::error::DisplayErrorContext(error).to_string())
            })
    }

    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
    ) -> Result<ResponseStatus, QueueError> {
        self.client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .send()
            .await
            .map(|_| ResponseStatus::OK)
            .map_err(|error| {
                QueueError::Request(aws_sdk_sqs::error::DisplayErrorContext(error).to_string())
            })
    }
}

struct DynamoAggregateStore {
    client: aws_sdk_dynamodb::Client,
}

#[async_trait]
impl AggregateStore for DynamoAggregateStore {
    async fn put_item(&self, table_name: &str, item: Item) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(table_name)
            .set_item(Some(to_dynamo_item(item)))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| {
                StoreError(aws_sdk_dynamodb::error::DisplayErrorContext(error).to_string())
            })
    }
}

fn to_dynamo_item(item: Item) -> HashMap<String, DynamoAttributeValue> {
    item.into_iter()
        .map(|(key, value)| (key, to_dynamo_value(value)))
        .collect()
}

fn to_dynamo_value(value: AttributeValue) -> DynamoAttributeValue {
    match value {
        AttributeValue::S(text) => DynamoAttributeValue::S(text),
        AttributeValue::N(number) => DynamoAttributeValue::N(number),
        AttributeValue::Null => DynamoAttributeValue::Null(true),
        AttributeValue::M(map) => DynamoAttributeValue::M(to_dynamo_item(map)),
    }
}

struct RuntimeDependencies {
    processor: BatchProcessor,
    deadline_margin: Duration,
}

async fn handle_request(
    deps: &RuntimeDependencies,
    event: LambdaEvent<Value>,
) -> Result<Value, Error> {
    if !is_sqs_event(&event.payload) {
        return Err(Error::from("unsupported invocation event: expected SQS records"));
    }
    let messages = decode_sqs_records(&event.payload)?;

    let budget = remaining_budget(
        deadline_from_epoch_ms(event.context.deadline),
        SystemTime::now(),
        deps.deadline_margin,
    );
    info!(
        request_id = %event.context.request_id,
        message_count = messages.len(),
        budget_ms = budget.as_millis() as u64,
        "invocation started"
    );

    let guard = DeadlineGuard::start(budget);
    let summary = deps.processor.process_batch(&messages, guard.token()).await?;
    let response = SqsBatchResponse::from_message_ids(summary.redelivery_message_ids);
    serde_json::to_value(response)
        .map_err(|error| Error::from(format!("failed to serialize batch response: {error}")))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::init_from_env()?;
    telemetry::init_logging(&config.log_level)?;

    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let queue = Arc::new(SqsMessageQueue {
        client: aws_sdk_sqs::Client::new(&aws_config),
    });
    let store = Arc::new(DynamoAggregateStore {
        client: aws_sdk_dynamodb::Client::new(&aws_config),
    });

    let registry = Arc::new(default_registry());
    let strategies: Vec<Arc<dyn EventStrategy>> = vec![Arc::new(ClientTrackingStrategy::new(
        store,
        config.table_name.as_str(),
        ExportPartitioner::new(config.export_partition_count),
    ))];
    let dispatcher = Arc::new(Dispatcher::new(&registry, strategies)?);

    info!(
        table_name = config.table_name.as_str(),
        export_partition_count = config.export_partition_count.get(),
        subjects = ?registry.subjects(),
        "ingest runtime initialized"
    );

    let deps = Arc::new(RuntimeDependencies {
        processor: BatchProcessor::new(
            registry,
            dispatcher,
            queue,
            config.dead_letter_queue_url.as_str(),
        ),
        deadline_margin: config.deadline_margin.0,
    });

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let deps = Arc::clone(&deps);
        async move { handle_request(&deps, event).await }
    }))
    .await
}
