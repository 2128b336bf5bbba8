//! Reconnect backoff policy
//!
//! Independent of any transport so the schedule can be tested on its own.

use std::time::Duration;

use contracts::StreamingConfig;

/// Exponential backoff with a ceiling and a bounded attempt budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect
    pub base: Duration,
    /// Upper bound for any single delay
    pub cap: Duration,
    /// Reconnects allowed before the channel is abandoned
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    pub fn from_config(config: &StreamingConfig) -> Self {
        Self::new(
            config.backoff_base(),
            config.backoff_cap(),
            config.max_reconnect_attempts,
        )
    }

    /// Delay before reconnect number `attempt` (1-based)
    ///
    /// `base * 2^(attempt-1)`, capped. `None` once the budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let shift = (attempt - 1).min(31);
        let delay = self.base.saturating_mul(1u32 << shift);
        Some(delay.min(self.cap))
    }

    /// Whether reconnect number `attempt` is still within budget
    pub fn allows(&self, attempt: u32) -> bool {
        self.delay_for(attempt).is_some()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&StreamingConfig::default())
    }
}
