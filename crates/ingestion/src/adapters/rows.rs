//! Strict tabular adapter: `rows` must be a non-empty array of objects

use contracts::{FeedPoint, StreamError};
use serde_json::{Map, Value};

use super::common::{self, TerminalSignal};
use crate::adapter::{DecodedFrame, FeedAdapter};

#[derive(Debug, Clone, Copy, Default)]
pub struct RowsAdapter;

impl FeedAdapter for RowsAdapter {
    fn name(&self) -> &'static str {
        "rows"
    }

    fn decode(&self, feed_name: &str, frame: &str) -> Result<DecodedFrame, StreamError> {
        let map = common::parse_object(feed_name, frame)?;

        if let Some(signal) = common::terminal_signal(&map) {
            return Ok(match signal {
                TerminalSignal::NoData(msg) => DecodedFrame::NoData(msg),
                TerminalSignal::UpstreamError(msg) => DecodedFrame::UpstreamError(msg),
            });
        }

        let rows = match map.get("rows") {
            Some(Value::Array(rows)) if !rows.is_empty() => rows,
            Some(Value::Array(_)) => return Err(StreamError::protocol(feed_name, "rows is empty")),
            Some(_) => return Err(StreamError::protocol(feed_name, "rows must be an array")),
            None => return Err(StreamError::protocol(feed_name, "missing rows")),
        };

        if let Some(idx) = rows.iter().position(|row| !row.is_object()) {
            return Err(StreamError::protocol(
                feed_name,
                format!("rows[{idx}] is not an object"),
            ));
        }

        let mut values = Map::new();
        values.insert("rows".to_string(), Value::Array(rows.clone()));
        values.insert("row_count".to_string(), Value::from(rows.len()));

        Ok(DecodedFrame::Point(FeedPoint {
            timestamp: common::timestamp(feed_name, &map)?,
            feed_name: feed_name.to_string(),
            source_id: common::source(&map),
            values,
            metadata: common::metadata(feed_name, &map)?,
        }))
    }
}
