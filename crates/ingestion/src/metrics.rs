//! Feed connection metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every feed connection of a registry
#[derive(Debug, Default)]
pub struct FeedMetrics {
    /// Live connection attempts
    pub live_attempts: AtomicU64,

    /// Points decoded from live upstreams
    pub points_received: AtomicU64,

    /// Synthetic points produced by fallback sources
    pub synthetic_points: AtomicU64,

    /// Frames that failed to decode
    pub protocol_errors: AtomicU64,

    /// Times a fallback source was engaged
    pub fallback_engagements: AtomicU64,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, feed: &str) {
        self.live_attempts.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("feed_live_attempts_total", "feed" => feed.to_string()).increment(1);
    }

    pub fn record_point(&self, feed: &str, synthetic: bool) {
        if synthetic {
            self.synthetic_points.fetch_add(1, Ordering::Relaxed);
        } else {
            self.points_received.fetch_add(1, Ordering::Relaxed);
        }
        ::metrics::counter!(
            "feed_points_total",
            "feed" => feed.to_string(),
            "synthetic" => if synthetic { "true" } else { "false" }
        )
        .increment(1);
    }

    pub fn record_protocol_error(&self, feed: &str) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("feed_protocol_errors_total", "feed" => feed.to_string()).increment(1);
    }

    pub fn record_fallback(&self, feed: &str) {
        self.fallback_engagements.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("feed_fallback_engagements_total", "feed" => feed.to_string())
            .increment(1);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            live_attempts: self.live_attempts.load(Ordering::Relaxed),
            points_received: self.points_received.load(Ordering::Relaxed),
            synthetic_points: self.synthetic_points.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            fallback_engagements: self.fallback_engagements.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub live_attempts: u64,
    pub points_received: u64,
    pub synthetic_points: u64,
    pub protocol_errors: u64,
    pub fallback_engagements: u64,
}
