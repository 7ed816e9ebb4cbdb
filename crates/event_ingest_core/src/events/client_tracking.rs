use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::contract::{flatten_properties, AggregatePayload, ValidationError};
use crate::registry::{EventKind, EventRegistry};

pub const CLIENT_TRACKING_SUBJECT: &str = "ClientTracking";
pub const CLIENT_TRACKING_EVENT_NAME: &str = "ClientTracking";

/// Client session telemetry published on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClientTrackingEvent {
    #[serde(deserialize_with = "null_as_default")]
    pub origin: String,
    #[serde(deserialize_with = "null_as_default")]
    pub scope: String,
    #[serde(deserialize_with = "utc_or_naive")]
    pub date_time: DateTime<Utc>,
    pub gpns_enabled: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub schema_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub schema_version: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ip_address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub mac_address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub user_agent_raw: String,
    #[serde(deserialize_with = "null_as_default")]
    pub client_device_type_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub platform_type_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub browser_type_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub member_name: String,
    pub member_id: i32,
    #[serde(deserialize_with = "null_as_default")]
    pub member_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub org_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub zone_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub subject: String,
    #[serde(deserialize_with = "null_as_default")]
    pub change_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub auth_method: String,
    #[serde(deserialize_with = "null_as_default")]
    pub zone_plan_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub currency_code: String,
    pub price: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub time_zone_id: String,
}

impl Default for ClientTrackingEvent {
    fn default() -> Self {
        Self {
            origin: String::new(),
            scope: String::new(),
            date_time: Utc::now(),
            gpns_enabled: false,
            schema_name: String::new(),
            schema_version: String::new(),
            ip_address: String::new(),
            mac_address: String::new(),
            user_agent_raw: String::new(),
            client_device_type_id: String::new(),
            platform_type_id: String::new(),
            browser_type_id: String::new(),
            member_name: String::new(),
            member_id: 0,
            member_number: String::new(),
            org_number: String::new(),
            zone_type: String::new(),
            subject: String::new(),
            change_type: String::new(),
            auth_method: String::new(),
            zone_plan_name: String::new(),
            currency_code: String::new(),
            price: 0.0,
            time_zone_id: String::new(),
        }
    }
}

/// Reads `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339, then an offset-less date-time or bare date read as UTC.
/// `null` means now.
fn utc_or_naive<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(text) = Option::<String>::deserialize(deserializer)? else {
        return Ok(Utc::now());
    };
    parse_timestamp(&text).ok_or_else(|| {
        de::Error::custom(format!("`{text}` is not an ISO 8601 date-time"))
    })
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

impl EventKind for ClientTrackingEvent {
    const SUBJECT: &'static str = CLIENT_TRACKING_SUBJECT;
    const FIELDS: &'static [&'static str] = &[
        "Origin",
        "Scope",
        "DateTime",
        "GpnsEnabled",
        "SchemaName",
        "SchemaVersion",
        "IpAddress",
        "MacAddress",
        "UserAgentRaw",
        "ClientDeviceTypeId",
        "PlatformTypeId",
        "BrowserTypeId",
        "MemberName",
        "MemberId",
        "MemberNumber",
        "OrgNumber",
        "ZoneType",
        "Subject",
        "ChangeType",
        "AuthMethod",
        "ZonePlanName",
        "CurrencyCode",
        "Price",
        "TimeZoneId",
    ];

    fn subject_field(&self) -> &str {
        &self.subject
    }
}

impl ClientTrackingEvent {
    /// Checks the fields the aggregate row cannot be built without. Reports the first
    /// one that is empty after trimming.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("OrgNumber", &self.org_number),
            ("TimeZoneId", &self.time_zone_id),
            ("MacAddress", &self.mac_address),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::new(format!(
                    "Missing {name} in ClientTrackingEvent"
                )));
            }
        }
        Ok(())
    }
}

pub fn register(registry: &mut EventRegistry) {
    registry.register::<ClientTrackingEvent>();
}

/// Builds the store-bound record. Every field except `OrgNumber` lands in the
/// properties map.
pub fn build_aggregate_payload(
    event: &ClientTrackingEvent,
    now: DateTime<Utc>,
) -> Result<AggregatePayload, serde_json::Error> {
    let document = serde_json::to_value(event)?;
    Ok(AggregatePayload {
        event_name: CLIENT_TRACKING_EVENT_NAME.to_string(),
        org_number: event.org_number.clone(),
        properties: flatten_properties(&document, &["OrgNumber"]),
        ready_to_export_utc: now.timestamp(),
        exported_at: None,
    })
}
