//! Adapter common utility functions

use chrono::{DateTime, Utc};
use contracts::StreamError;
use serde_json::{Map, Value};

/// Case-insensitive marker in `message` meaning the upstream has nothing to send
pub const NO_DATA_SENTINEL: &str = "no data available";

/// Keys consumed by the envelope itself, never part of `values`
pub const ENVELOPE_KEYS: [&str; 6] = ["timestamp", "source", "rows", "metadata", "error", "message"];

/// Source id used when the upstream omits `source`
pub const UNKNOWN_SOURCE: &str = "upstream";

/// Parse a frame into a JSON object
pub fn parse_object(feed_name: &str, frame: &str) -> Result<Map<String, Value>, StreamError> {
    match serde_json::from_str::<Value>(frame) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StreamError::protocol(
            feed_name,
            format!("expected JSON object, got {}", type_name(&other)),
        )),
        Err(e) => Err(StreamError::protocol(feed_name, format!("invalid JSON: {e}"))),
    }
}

/// Terminal signal carried by the envelope, if any
///
/// An `error` field wins over a `message` sentinel. Empty or zero-like
/// `error` values count as absent.
pub fn terminal_signal(map: &Map<String, Value>) -> Option<TerminalSignal> {
    match map.get("error") {
        Some(value) if is_blank(value) => {}
        Some(Value::String(s)) => return Some(TerminalSignal::UpstreamError(s.clone())),
        Some(other) => return Some(TerminalSignal::UpstreamError(other.to_string())),
        None => {}
    }

    match map.get("message") {
        Some(Value::String(msg)) if msg.to_lowercase().contains(NO_DATA_SENTINEL) => {
            Some(TerminalSignal::NoData(msg.clone()))
        }
        _ => None,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64().map_or(false, |f| f == 0.0),
        Value::Bool(true) | Value::Array(_) | Value::Object(_) => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalSignal {
    NoData(String),
    UpstreamError(String),
}

/// `timestamp` field, or receipt time when absent
pub fn timestamp(feed_name: &str, map: &Map<String, Value>) -> Result<DateTime<Utc>, StreamError> {
    match map.get("timestamp") {
        None | Some(Value::Null) => Ok(Utc::now()),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StreamError::protocol(feed_name, format!("bad timestamp '{s}': {e}"))),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| StreamError::protocol(feed_name, format!("bad timestamp {n}"))),
        Some(other) => Err(StreamError::protocol(
            feed_name,
            format!("timestamp must be a string or number, got {}", type_name(other)),
        )),
    }
}

pub fn source(map: &Map<String, Value>) -> String {
    map.get("source")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_SOURCE)
        .to_string()
}

pub fn metadata(
    feed_name: &str,
    map: &Map<String, Value>,
) -> Result<Option<Map<String, Value>>, StreamError> {
    match map.get("metadata") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(meta)) => Ok(Some(meta.clone())),
        Some(other) => Err(StreamError::protocol(
            feed_name,
            format!("metadata must be an object, got {}", type_name(other)),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
