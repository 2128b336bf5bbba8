//! StreamingBlueprint - Config Loader output
//!
//! Runtime options for the feed/channel layer plus the declared feeds,
//! channels and upstream endpoints.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AdapterKind;

/// Longest accepted timer period (one day)
pub const MAX_TIMER_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest accepted cache TTL (one week)
pub const MAX_CACHE_TTL_MINUTES: f64 = 7.0 * 24.0 * 60.0;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete configuration blueprint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamingBlueprint {
    #[serde(default)]
    pub version: ConfigVersion,

    /// Runtime options
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Upstream endpoints
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Declared feeds
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,

    /// Declared channels
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Runtime options recognised by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StreamingConfig {
    /// Attempt live upstream links (otherwise go straight to fallback)
    pub enable_live_feed: bool,

    /// Open duplex channels
    pub enable_channel: bool,

    /// Substitute synthetic data when a live feed fails
    pub fallback_enabled: bool,

    /// Cache entry time-to-live
    pub cache_ttl_minutes: f64,

    /// Minimum spacing between live connection attempts per feed
    #[validate(range(max = 86_400_000))]
    pub rate_limit_ms: u64,

    /// Reconnect budget for channels
    pub max_reconnect_attempts: u32,

    /// Maximum cached points per feed
    #[validate(range(min = 1))]
    pub cache_max_points: usize,

    /// Connection establishment timeout
    #[validate(range(min = 1, max = 86_400_000))]
    pub connect_timeout_ms: u64,

    /// Channel heartbeat period; staleness window is three periods
    #[validate(range(min = 1, max = 86_400_000))]
    pub heartbeat_interval_ms: u64,

    /// First reconnect delay
    #[validate(range(min = 1, max = 86_400_000))]
    pub backoff_base_ms: u64,

    /// Reconnect delay ceiling
    #[validate(range(min = 1, max = 86_400_000))]
    pub backoff_cap_ms: u64,

    /// Period of synthetic points while in fallback
    #[validate(range(min = 1, max = 86_400_000))]
    pub fallback_interval_ms: u64,

    /// Period of the cache TTL sweeper
    #[validate(range(min = 1, max = 86_400_000))]
    pub cache_sweep_interval_ms: u64,

    /// Outbound command queue per channel
    #[validate(range(min = 1))]
    pub channel_queue_capacity: usize,

    /// Messages kept by consultation room consumers
    #[validate(range(min = 1))]
    pub recent_message_window: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enable_live_feed: false,
            enable_channel: false,
            fallback_enabled: true,
            cache_ttl_minutes: 5.0,
            rate_limit_ms: 1000,
            max_reconnect_attempts: 3,
            cache_max_points: 100,
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 15_000,
            backoff_base_ms: 1000,
            backoff_cap_ms: 30_000,
            fallback_interval_ms: 5000,
            cache_sweep_interval_ms: 30_000,
            channel_queue_capacity: 64,
            recent_message_window: 100,
        }
    }
}

impl StreamingConfig {
    /// Out-of-range values saturate instead of panicking
    pub fn cache_ttl(&self) -> Duration {
        Duration::try_from_secs_f64(self.cache_ttl_minutes.max(0.0) * 60.0).unwrap_or(Duration::MAX)
    }

    pub fn rate_limit(&self) -> Duration {
        timer_period(self.rate_limit_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        timer_period(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        timer_period(self.heartbeat_interval_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        timer_period(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        timer_period(self.backoff_cap_ms)
    }

    pub fn fallback_interval(&self) -> Duration {
        timer_period(self.fallback_interval_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        timer_period(self.cache_sweep_interval_ms)
    }
}

/// Millisecond setting as a timer period, clamped to [`MAX_TIMER_INTERVAL`]
fn timer_period(ms: u64) -> Duration {
    Duration::from_millis(ms).min(MAX_TIMER_INTERVAL)
}

/// Upstream endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL that feed endpoint paths are appended to
    #[serde(default)]
    pub feed_base_url: String,

    /// Duplex channel endpoint
    #[serde(default)]
    pub channel_url: String,

    /// Bearer token for both transports
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Declared feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub endpoint_path: String,
    #[serde(default)]
    pub adapter: AdapterKind,
}

/// Declared channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    /// Consultation id joined on open
    #[serde(default)]
    pub scope_id: Option<String>,
}
