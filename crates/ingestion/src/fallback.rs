//! Fallback 数据源
//!
//! 上游不可用时替代的合成数据。生成器是可替换的；默认的
//! `DailyProfileGenerator` 按小时负荷系数生成确定性的数值。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use contracts::{FeedPoint, FALLBACK_SOURCE_ID, MAX_TIMER_INTERVAL};
use serde_json::{Map, Value};

/// Produces synthetic values for a feed
pub trait SyntheticGenerator: Send + Sync {
    /// Generator name, stamped into point metadata
    fn name(&self) -> &'static str;

    /// Values for the `sequence`-th synthetic point of `feed_name` at `at`
    fn generate(&self, feed_name: &str, at: DateTime<Utc>, sequence: u64) -> Map<String, Value>;
}

/// Typical daily load shape: off-peak night, morning and evening peaks
pub const DEFAULT_HOURLY_FACTORS: [f64; 24] = [
    0.85, 0.82, 0.80, 0.78, 0.80, 0.85, // 0-5
    0.95, 1.10, 1.25, 1.20, 1.15, 1.10, // 6-11
    1.05, 1.00, 0.98, 0.95, 1.00, 1.15, // 12-17
    1.30, 1.35, 1.25, 1.10, 0.95, 0.88, // 18-23
];

/// Deterministic hour-of-day profile: `base_value × factor[hour]`
#[derive(Debug, Clone)]
pub struct DailyProfileGenerator {
    pub value_key: String,
    pub base_value: f64,
    pub hourly_factors: [f64; 24],
}

impl Default for DailyProfileGenerator {
    fn default() -> Self {
        Self {
            value_key: "value".to_string(),
            base_value: 78.45,
            hourly_factors: DEFAULT_HOURLY_FACTORS,
        }
    }
}

impl DailyProfileGenerator {
    pub fn new(value_key: impl Into<String>, base_value: f64) -> Self {
        Self {
            value_key: value_key.into(),
            base_value,
            ..Default::default()
        }
    }

    /// Profile value for an hour of day (0-23)
    pub fn value_at_hour(&self, hour: u32) -> f64 {
        let factor = self.hourly_factors[(hour % 24) as usize];
        (self.base_value * factor * 100.0).round() / 100.0
    }
}

impl SyntheticGenerator for DailyProfileGenerator {
    fn name(&self) -> &'static str {
        "daily_profile"
    }

    fn generate(&self, _feed_name: &str, at: DateTime<Utc>, sequence: u64) -> Map<String, Value> {
        let hour = at.hour();
        let mut values = Map::new();
        values.insert(self.value_key.clone(), Value::from(self.value_at_hour(hour)));
        values.insert("hour".to_string(), Value::from(hour));
        values.insert("sequence".to_string(), Value::from(sequence));
        values
    }
}

/// Synthetic source substituted for a failed live feed
///
/// Owned by the feed's connection task; it never reports a connecting
/// phase and emits nothing but data once engaged.
#[derive(Clone)]
pub struct FallbackSource {
    feed_name: String,
    generator: Arc<dyn SyntheticGenerator>,
    interval: Duration,
    sequence: u64,
}

impl FallbackSource {
    pub fn new(
        feed_name: impl Into<String>,
        generator: Arc<dyn SyntheticGenerator>,
        interval: Duration,
    ) -> Self {
        Self {
            feed_name: feed_name.into(),
            generator,
            interval: interval.clamp(Duration::from_millis(1), MAX_TIMER_INTERVAL),
            sequence: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Build the next synthetic point
    pub fn next_point(&mut self, at: DateTime<Utc>) -> FeedPoint {
        let sequence = self.sequence;
        self.sequence += 1;

        let mut metadata = Map::new();
        metadata.insert("synthetic".to_string(), Value::Bool(true));
        metadata.insert(
            "generator".to_string(),
            Value::from(self.generator.name()),
        );

        FeedPoint {
            timestamp: at,
            feed_name: self.feed_name.clone(),
            source_id: FALLBACK_SOURCE_ID.to_string(),
            values: self.generator.generate(&self.feed_name, at, sequence),
            metadata: Some(metadata),
        }
    }
}
