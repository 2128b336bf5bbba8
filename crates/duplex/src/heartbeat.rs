//! Channel liveness tracking

use std::time::Duration;

use tokio::time::Instant;

/// Heartbeat periods of silence tolerated before a channel is stale
pub const STALE_AFTER_INTERVALS: u32 = 3;

/// Tracks the last inbound message of a connected channel
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatMonitor {
    interval: Duration,
    last_seen: Instant,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_seen: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Silence longer than this means the link is stale
    pub fn staleness_window(&self) -> Duration {
        self.interval.saturating_mul(STALE_AFTER_INTERVALS)
    }

    /// Record an inbound message
    pub fn observe(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.silent_for(now) > self.staleness_window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_after_three_intervals() {
        let t0 = Instant::now();
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(15), t0);

        assert!(!monitor.is_stale(t0 + Duration::from_secs(45)));
        assert!(monitor.is_stale(t0 + Duration::from_secs(46)));

        monitor.observe(t0 + Duration::from_secs(40));
        assert!(!monitor.is_stale(t0 + Duration::from_secs(80)));
        assert_eq!(
            monitor.silent_for(t0 + Duration::from_secs(80)),
            Duration::from_secs(40)
        );
    }
}
