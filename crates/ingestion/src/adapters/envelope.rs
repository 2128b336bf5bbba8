//! Generic envelope adapter
//!
//! `{timestamp?, source, rows | flat object, metadata?, error?, message?}`

use contracts::{FeedPoint, StreamError};
use serde_json::{Map, Value};

use super::common::{self, TerminalSignal, ENVELOPE_KEYS};
use crate::adapter::{DecodedFrame, FeedAdapter};

/// Accepts either a `rows` payload or a flat object of values
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeAdapter;

impl FeedAdapter for EnvelopeAdapter {
    fn name(&self) -> &'static str {
        "envelope"
    }

    fn decode(&self, feed_name: &str, frame: &str) -> Result<DecodedFrame, StreamError> {
        let map = common::parse_object(feed_name, frame)?;

        if let Some(signal) = common::terminal_signal(&map) {
            return Ok(match signal {
                TerminalSignal::NoData(msg) => DecodedFrame::NoData(msg),
                TerminalSignal::UpstreamError(msg) => DecodedFrame::UpstreamError(msg),
            });
        }

        let values = match map.get("rows") {
            Some(Value::Array(rows)) => {
                let mut values = Map::new();
                values.insert("rows".to_string(), Value::Array(rows.clone()));
                values
            }
            Some(Value::Object(rows)) => rows.clone(),
            Some(other) => {
                return Err(StreamError::protocol(
                    feed_name,
                    format!("rows must be an array or object, got {other}"),
                ))
            }
            None => map
                .iter()
                .filter(|(k, _)| !ENVELOPE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        if values.is_empty() {
            return Err(StreamError::protocol(feed_name, "frame carries no values"));
        }

        Ok(DecodedFrame::Point(FeedPoint {
            timestamp: common::timestamp(feed_name, &map)?,
            feed_name: feed_name.to_string(),
            source_id: common::source(&map),
            values,
            metadata: common::metadata(feed_name, &map)?,
        }))
    }
}
