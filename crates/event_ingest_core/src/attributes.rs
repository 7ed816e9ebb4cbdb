use std::collections::BTreeMap;

use crate::contract::AggregatePayload;
use crate::partition::ExportPartitionShard;

pub const EVENT_NAME_KEY: &str = "EventName";
pub const ORG_NUMBER_KEY: &str = "OrgNumber";
pub const EXPORT_PARTITION_KEY: &str = "ExportPartition";
pub const READY_TO_EXPORT_KEY: &str = "ReadyToExportUtc";
pub const EXPORTED_AT_KEY: &str = "ExportedAt";
pub const PROPERTIES_KEY: &str = "Properties";

/// Store-neutral attribute value. Numbers travel as their decimal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    S(String),
    N(String),
    Null,
    M(BTreeMap<String, AttributeValue>),
}

pub type Item = BTreeMap<String, AttributeValue>;

/// Builds the aggregate row. `Properties` is only written when there is at least one
/// property.
pub fn aggregate_item(payload: &AggregatePayload, shard: &ExportPartitionShard) -> Item {
    let mut item = Item::new();
    item.insert(
        EVENT_NAME_KEY.to_string(),
        AttributeValue::S(payload.event_name.clone()),
    );
    item.insert(
        ORG_NUMBER_KEY.to_string(),
        AttributeValue::S(payload.org_number.clone()),
    );
    item.insert(
        EXPORT_PARTITION_KEY.to_string(),
        AttributeValue::S(shard.as_str().to_string()),
    );
    item.insert(
        READY_TO_EXPORT_KEY.to_string(),
        AttributeValue::N(payload.ready_to_export_utc.to_string()),
    );
    item.insert(
        EXPORTED_AT_KEY.to_string(),
        payload
            .exported_at
            .map_or(AttributeValue::Null, |at| AttributeValue::N(at.to_string())),
    );

    if !payload.properties.is_empty() {
        let properties = payload
            .properties
            .iter()
            .map(|(key, value)| (key.clone(), AttributeValue::S(value.clone())))
            .collect();
        item.insert(PROPERTIES_KEY.to_string(), AttributeValue::M(properties));
    }
    item
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(properties: &[(&str, &str)]) -> AggregatePayload {
        AggregatePayload {
            event_name: "ClientTracking".to_string(),
            org_number: "FO-640-74".to_string(),
            properties: properties
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            ready_to_export_utc: 1_714_566_600,
            exported_at: None,
        }
    }

    #[test]
    fn item_carries_fixed_columns() {
        let item = aggregate_item(
            &payload(&[("MacAddress", "1EC42DEFCBGG")]),
            &ExportPartitionShard::new(2),
        );

        assert_eq!(item[EVENT_NAME_KEY], AttributeValue::S("ClientTracking".into()));
        assert_eq!(item[ORG_NUMBER_KEY], AttributeValue::S("FO-640-74".into()));
        assert_eq!(item[EXPORT_PARTITION_KEY], AttributeValue::S("EXPORT-2".into()));
        assert_eq!(item[READY_TO_EXPORT_KEY], AttributeValue::N("1714566600".into()));
        assert_eq!(item[EXPORTED_AT_KEY], AttributeValue::Null);

        let AttributeValue::M(properties) = &item[PROPERTIES_KEY] else {
            panic!("properties should be a map");
        };
        assert_eq!(properties["MacAddress"], AttributeValue::S("1EC42DEFCBGG".into()));
    }

    #[test]
    fn empty_properties_are_omitted() {
        let item = aggregate_item(&payload(&[]), &ExportPartitionShard::new(0));

        assert!(!item.contains_key(PROPERTIES_KEY));
        assert_eq!(item.len(), 5);
    }

    #[test]
    fn exported_timestamp_is_numeric_when_set() {
        let mut payload = payload(&[]);
        payload.exported_at = Some(1_714_570_000);

        let item = aggregate_item(&payload, &ExportPartitionShard::new(0));

        assert_eq!(item[EXPORTED_AT_KEY], AttributeValue::N("1714570000".into()));
    }
}
