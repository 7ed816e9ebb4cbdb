use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One queued message as delivered in a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: String,
    pub body: String,
    pub event_source_arn: String,
    pub receipt_handle: String,
    pub aws_region: String,
}

/// Store-bound record derived from a validated event. `exported_at` stays `None`
/// until the downstream export job stamps it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AggregatePayload {
    pub event_name: String,
    pub org_number: String,
    pub properties: BTreeMap<String, String>,
    pub ready_to_export_utc: i64,
    pub exported_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Persisted,
    Rejected,
    DecodeFailed,
    PersistenceFailed,
    Cancelled,
    StrategyPanicked,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::Rejected => "rejected",
            Self::DecodeFailed => "decode_failed",
            Self::PersistenceFailed => "persistence_failed",
            Self::Cancelled => "cancelled",
            Self::StrategyPanicked => "strategy_panicked",
        }
    }

    /// Rejected events are permanently malformed, so they are acknowledged like
    /// persisted ones.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Persisted | Self::Rejected)
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeContext {
    Empty,
    Aggregate(AggregatePayload),
    Event(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOutcome {
    pub kind: OutcomeKind,
    pub detail: String,
    pub context: OutcomeContext,
}

impl ProcessingOutcome {
    pub fn persisted(detail: impl Into<String>, payload: AggregatePayload) -> Self {
        Self {
            kind: OutcomeKind::Persisted,
            detail: detail.into(),
            context: OutcomeContext::Aggregate(payload),
        }
    }

    pub fn rejected(detail: impl Into<String>, event: Value) -> Self {
        Self {
            kind: OutcomeKind::Rejected,
            detail: detail.into(),
            context: OutcomeContext::Event(event),
        }
    }

    pub fn failed(kind: OutcomeKind, detail: impl Into<String>, context: OutcomeContext) -> Self {
        debug_assert!(!kind.is_success(), "failed outcome built with {kind}");
        Self {
            kind,
            detail: detail.into(),
            context,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }

    pub fn aggregate(&self) -> Option<&AggregatePayload> {
        match &self.context {
            OutcomeContext::Aggregate(payload) => Some(payload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Flattens the top-level fields of a serialized event into a string map, skipping
/// `excluded` keys. Strings are kept verbatim, null becomes empty and everything else
/// uses its JSON rendering.
pub fn flatten_properties(document: &Value, excluded: &[&str]) -> BTreeMap<String, String> {
    let Some(object) = document.as_object() else {
        return BTreeMap::new();
    };

    object
        .iter()
        .filter(|(key, _)| !excluded.contains(&key.as_str()))
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(text) => text.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}
