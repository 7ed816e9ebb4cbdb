use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::envelope::{normalize, NormalizeError};

pub const DISCRIMINATOR_FIELD: &str = "Subject";

/// A concrete event shape bound to one discriminator value.
///
/// `FIELDS` lists the canonical top-level field names. Incoming keys that match one
/// of them case-insensitively are rebound to it before deserializing.
pub trait EventKind: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    const SUBJECT: &'static str;
    const FIELDS: &'static [&'static str];

    /// The discriminator value the event itself carries.
    fn subject_field(&self) -> &str;
}

/// Object-safe view over any decoded event.
pub trait Event: Debug + Send + Sync {
    fn subject(&self) -> &'static str;
    fn to_value(&self) -> Result<Value, serde_json::Error>;
    fn to_json(&self) -> Result<String, serde_json::Error>;
    fn as_any(&self) -> &dyn Any;
}

impl<E: EventKind> Event for E {
    fn subject(&self) -> &'static str {
        E::SUBJECT
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("Missing Subject")]
    MissingDiscriminator,
    #[error("Unknown Subject type: {0}")]
    UnknownDiscriminator(String),
    #[error("event does not match the {subject} shape: {source}")]
    InvalidShape {
        subject: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("decoded {expected} event carries subject {found:?}")]
    SubjectMismatch {
        expected: &'static str,
        found: String,
    },
}

type DecodeFn = fn(Value) -> Result<Box<dyn Event>, DecodeError>;

/// Discriminator to decoder table. Populated once at startup and read-only after.
#[derive(Debug, Default)]
pub struct EventRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: EventKind>(&mut self) -> &mut Self {
        self.decoders.insert(E::SUBJECT, decode_kind::<E>);
        self
    }

    pub fn is_registered(&self, subject: &str) -> bool {
        self.decoders.contains_key(subject)
    }

    /// Registered discriminator values, sorted.
    pub fn subjects(&self) -> Vec<&'static str> {
        let mut subjects: Vec<_> = self.decoders.keys().copied().collect();
        subjects.sort_unstable();
        subjects
    }

    pub fn decode(&self, document: Value) -> Result<Box<dyn Event>, DecodeError> {
        let subject = match document.get(DISCRIMINATOR_FIELD) {
            None | Some(Value::Null) => return Err(DecodeError::MissingDiscriminator),
            Some(Value::String(subject)) => subject.clone(),
            Some(other) => other.to_string(),
        };

        let decoder = self
            .decoders
            .get(subject.as_str())
            .ok_or(DecodeError::UnknownDiscriminator(subject))?;
        decoder(document)
    }

    /// Normalizes a raw message body and decodes the result.
    pub fn decode_body(&self, body: &str) -> Result<Box<dyn Event>, DecodeError> {
        let normalized = normalize(body)?;
        self.decode(normalized.document)
    }
}

fn decode_kind<E: EventKind>(document: Value) -> Result<Box<dyn Event>, DecodeError> {
    let event: E =
        serde_json::from_value(canonicalize_fields(document, E::FIELDS)).map_err(|source| {
            DecodeError::InvalidShape {
                subject: E::SUBJECT,
                source,
            }
        })?;

    if event.subject_field() != E::SUBJECT {
        return Err(DecodeError::SubjectMismatch {
            expected: E::SUBJECT,
            found: event.subject_field().to_string(),
        });
    }
    Ok(Box::new(event))
}

/// Rebinds top-level keys to their canonical spelling. A key spelled exactly like a
/// canonical field wins over any case variant of it. Unknown keys pass through.
pub fn canonicalize_fields(document: Value, fields: &[&str]) -> Value {
    let Value::Object(object) = document else {
        return document;
    };

    let mut canonical = Map::new();
    let mut exact = Vec::new();
    for (key, value) in object {
        if fields.contains(&key.as_str()) {
            exact.push((key, value));
            continue;
        }
        let name = fields
            .iter()
            .find(|field| field.eq_ignore_ascii_case(&key))
            .map_or(key, |field| (*field).to_string());
        canonical.entry(name).or_insert(value);
    }
    for (key, value) in exact {
        canonical.insert(key, value);
    }
    Value::Object(canonical)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "PascalCase", default)]
    struct Heartbeat {
        subject: String,
        device_id: String,
        uptime_seconds: u64,
    }

    impl EventKind for Heartbeat {
        const SUBJECT: &'static str = "Heartbeat";
        const FIELDS: &'static [&'static str] = &["Subject", "DeviceId", "UptimeSeconds"];

        fn subject_field(&self) -> &str {
            &self.subject
        }
    }

    fn registry() -> EventRegistry {
        let mut registry = EventRegistry::new();
        registry.register::<Heartbeat>();
        registry
    }

    fn downcast(event: &dyn Event) -> &Heartbeat {
        event
            .as_any()
            .downcast_ref::<Heartbeat>()
            .expect("event should be a heartbeat")
    }

    #[test]
    fn decodes_registered_subject_into_its_kind() {
        let event = registry()
            .decode(json!({"Subject": "Heartbeat", "DeviceId": "d-7", "UptimeSeconds": 42}))
            .expect("heartbeat should decode");

        assert_eq!(event.subject(), "Heartbeat");
        let heartbeat = downcast(event.as_ref());
        assert_eq!(heartbeat.device_id, "d-7");
        assert_eq!(heartbeat.uptime_seconds, 42);
    }

    #[test]
    fn missing_subject_is_reported() {
        let error = registry()
            .decode(json!({"DeviceId": "d-7"}))
            .expect_err("document without subject should fail");

        assert!(matches!(error, DecodeError::MissingDiscriminator));
        assert_eq!(error.to_string(), "Missing Subject");
    }

    #[test]
    fn null_subject_counts_as_missing() {
        let error = registry()
            .decode(json!({"Subject": null}))
            .expect_err("null subject should fail");

        assert!(matches!(error, DecodeError::MissingDiscriminator));
    }

    #[test]
    fn unknown_subject_is_reported_with_its_value() {
        let error = registry()
            .decode(json!({"Subject": "BillingChanged"}))
            .expect_err("unregistered subject should fail");

        match error {
            DecodeError::UnknownDiscriminator(subject) => assert_eq!(subject, "BillingChanged"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_string_subject_is_unknown() {
        let error = registry()
            .decode(json!({"Subject": 7}))
            .expect_err("numeric subject should fail");

        assert!(matches!(error, DecodeError::UnknownDiscriminator(ref value) if value == "7"));
    }

    #[test]
    fn discriminator_lookup_is_case_sensitive() {
        let error = registry()
            .decode(json!({"Subject": "heartbeat"}))
            .expect_err("differently cased subject should not resolve");

        assert!(matches!(error, DecodeError::UnknownDiscriminator(_)));
    }

    #[test]
    fn field_names_bind_case_insensitively() {
        let event = registry()
            .decode(json!({"Subject": "Heartbeat", "deviceid": "d-9", "UPTIMESECONDS": 3}))
            .expect("case variants should bind");

        let heartbeat = downcast(event.as_ref());
        assert_eq!(heartbeat.device_id, "d-9");
        assert_eq!(heartbeat.uptime_seconds, 3);
    }

    #[test]
    fn exact_field_name_wins_over_case_variant() {
        let canonical = canonicalize_fields(
            json!({"deviceId": "variant", "DeviceId": "exact", "Extra": 1}),
            Heartbeat::FIELDS,
        );

        assert_eq!(canonical, json!({"DeviceId": "exact", "Extra": 1}));
    }

    #[test]
    fn wrong_field_type_is_invalid_shape() {
        let error = registry()
            .decode(json!({"Subject": "Heartbeat", "UptimeSeconds": "soon"}))
            .expect_err("string uptime should fail");

        assert!(matches!(
            error,
            DecodeError::InvalidShape {
                subject: "Heartbeat",
                ..
            }
        ));
    }

    #[test]
    fn decode_body_unwraps_notification_envelope() {
        let inner = json!({"Subject": "Heartbeat", "DeviceId": "d-1"}).to_string();
        let body = json!({"Type": "Notification", "Message": inner}).to_string();

        let event = registry()
            .decode_body(&body)
            .expect("wrapped heartbeat should decode");

        assert_eq!(downcast(event.as_ref()).device_id, "d-1");
    }

    #[test]
    fn decode_body_surfaces_unparseable_bodies() {
        let error = registry()
            .decode_body("not json at all")
            .expect_err("garbage should fail");

        assert!(matches!(error, DecodeError::Normalize(_)));
    }

    #[test]
    fn event_serializes_to_plain_json() {
        let event = registry()
            .decode(json!({"Subject": "Heartbeat", "DeviceId": "d-2"}))
            .expect("heartbeat should decode");

        let value: Value = serde_json::from_str(&event.to_json().expect("event should serialize"))
            .expect("output should be JSON");
        assert_eq!(value, json!({"Subject": "Heartbeat", "DeviceId": "d-2", "UptimeSeconds": 0}));
    }

    #[test]
    fn subjects_lists_registrations() {
        let registry = registry();

        assert_eq!(registry.subjects(), vec!["Heartbeat"]);
        assert!(registry.is_registered("Heartbeat"));
        assert!(!registry.is_registered("ClientTracking"));
    }
}
