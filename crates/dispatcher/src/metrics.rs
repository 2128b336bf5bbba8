//! Dispatch metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every name of one dispatcher
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Events dispatched (one per `dispatch` call)
    event_count: AtomicU64,
    /// Successful callback invocations
    delivered_count: AtomicU64,
    /// Callbacks that panicked
    panicked_count: AtomicU64,
    /// Events dispatched to a name with no subscribers
    unobserved_count: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    pub fn inc_event_count(&self) {
        self.event_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count.load(Ordering::Relaxed)
    }

    pub fn inc_delivered_count(&self) {
        self.delivered_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn panicked_count(&self) -> u64 {
        self.panicked_count.load(Ordering::Relaxed)
    }

    pub fn inc_panicked_count(&self) {
        self.panicked_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unobserved_count(&self) -> u64 {
        self.unobserved_count.load(Ordering::Relaxed)
    }

    pub fn inc_unobserved_count(&self) {
        self.unobserved_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            event_count: self.event_count(),
            delivered_count: self.delivered_count(),
            panicked_count: self.panicked_count(),
            unobserved_count: self.unobserved_count(),
        }
    }
}

/// Snapshot of dispatch metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub event_count: u64,
    pub delivered_count: u64,
    pub panicked_count: u64,
    pub unobserved_count: u64,
}
