use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub const NOTIFICATION_TYPE: &str = "Notification";

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub document: Value,
    pub from_notification: bool,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("message body is not valid JSON even after escape repair: {source}")]
    Unparseable {
        #[source]
        source: serde_json::Error,
    },
}

/// Unwraps a notification envelope when present and returns the JSON document the
/// decoder should see. Every parse attempt falls back to legacy escape repair once.
pub fn normalize(body: &str) -> Result<NormalizedMessage, NormalizeError> {
    let document = parse_with_repair(body)?;

    let Some(inner) = notification_message(&document) else {
        return Ok(NormalizedMessage {
            document,
            from_notification: false,
        });
    };

    debug!(
        inner_length = inner.len(),
        "detected notification envelope, decoding inner message"
    );
    Ok(NormalizedMessage {
        document: parse_with_repair(inner)?,
        from_notification: true,
    })
}

/// Parses `text` as a JSON object. A failed parse, or a top-level value that is not an
/// object (a double-encoded body parses as a plain string), is retried exactly once on
/// the repaired text.
pub fn parse_with_repair(text: &str) -> Result<Value, NormalizeError> {
    match serde_json::from_str::<Value>(text) {
        Ok(document @ Value::Object(_)) => return Ok(document),
        Ok(_) => debug!("body parsed to a non-object value, retrying with escape repair"),
        Err(error) => debug!(error = %error, "initial parse failed, retrying with escape repair"),
    }

    serde_json::from_str::<Value>(&repair_legacy_escaping(text))
        .map_err(|source| NormalizeError::Unparseable { source })
}

/// Undoes the over-escaping some legacy producers apply to message bodies.
pub fn repair_legacy_escaping(input: &str) -> String {
    let unicode_quotes = input.replace("\\u0022", "\"");

    let mut collapsed = String::with_capacity(unicode_quotes.len());
    let mut chars = unicode_quotes.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' && chars.peek() == Some(&'"') {
            continue;
        }
        collapsed.push(ch);
    }

    let repaired = collapsed
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
        .replace("\\/", "/");

    if repaired.len() >= 2 && repaired.starts_with('"') && repaired.ends_with('"') {
        repaired[1..repaired.len() - 1].to_string()
    } else {
        repaired
    }
}

fn notification_message(document: &Value) -> Option<&str> {
    let object = document.as_object()?;
    let kind = field_ignore_case(object, "Type")?.as_str()?;
    if kind != NOTIFICATION_TYPE {
        return None;
    }

    field_ignore_case(object, "Message")?
        .as_str()
        .filter(|message| !message.is_empty())
}

// Envelope fields are matched case-insensitively, the exact spelling wins.
fn field_ignore_case<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object.get(name).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}
