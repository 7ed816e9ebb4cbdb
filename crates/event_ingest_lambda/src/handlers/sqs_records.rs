use event_ingest_core::contract::RawMessage;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const SQS_EVENT_SOURCE: &str = "aws:sqs";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SqsRecordError {
    #[error("SQS event must include Records array")]
    MissingRecords,
    #[error("SQS record {index} field {field} must be a string")]
    InvalidField { index: usize, field: &'static str },
}

pub fn is_sqs_event(event: &Value) -> bool {
    event
        .get("Records")
        .and_then(Value::as_array)
        .map(|records| {
            records.iter().all(|record| {
                record
                    .get("eventSource")
                    .and_then(Value::as_str)
                    .map(|source| source == SQS_EVENT_SOURCE)
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

/// Reads the queue records of an SQS invocation event into `RawMessage`s, in
/// delivery order. An empty `Records` array yields an empty batch.
pub fn decode_sqs_records(event: &Value) -> Result<Vec<RawMessage>, SqsRecordError> {
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .ok_or(SqsRecordError::MissingRecords)?;

    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let field = |field: &'static str| {
                record
                    .get(field)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or(SqsRecordError::InvalidField { index, field })
            };
            Ok(RawMessage {
                message_id: field("messageId")?,
                body: field("body")?,
                event_source_arn: field("eventSourceARN")?,
                receipt_handle: field("receiptHandle")?,
                aws_region: field("awsRegion")?,
            })
        })
        .collect()
}

/// Partial batch response for an event source mapping with
/// `ReportBatchItemFailures` enabled. Listed messages stay on the queue; the
/// rest of the batch is acknowledged.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SqsBatchResponse {
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemFailure {
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

impl SqsBatchResponse {
    pub fn from_message_ids<I, S>(message_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            batch_item_failures: message_ids
                .into_iter()
                .map(|id| BatchItemFailure {
                    item_identifier: id.into(),
                })
                .collect(),
        }
    }
}
