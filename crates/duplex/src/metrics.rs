//! Channel statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every channel of a registry
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    connect_attempts: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    send_failures: AtomicU64,
    reconnects_scheduled: AtomicU64,
    stale_heartbeats: AtomicU64,
    abandoned: AtomicU64,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, channel: &str) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("channel_connect_attempts_total", "channel" => channel.to_string())
            .increment(1);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self, channel: &str) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("channel_send_failures_total", "channel" => channel.to_string())
            .increment(1);
    }

    pub fn record_reconnect(&self, channel: &str) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("channel_reconnects_total", "channel" => channel.to_string())
            .increment(1);
    }

    pub fn record_stale(&self, channel: &str) {
        self.stale_heartbeats.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("channel_stale_heartbeats_total", "channel" => channel.to_string())
            .increment(1);
    }

    pub fn record_abandoned(&self, channel: &str) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("channel_abandoned_total", "channel" => channel.to_string())
            .increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            stale_heartbeats: self.stale_heartbeats.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ChannelMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connect_attempts: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub reconnects_scheduled: u64,
    pub stale_heartbeats: u64,
    pub abandoned: u64,
}
