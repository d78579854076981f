use std::time::Duration;

use echolock_core::{RELAY_BACKOFF_CEILING_MS, RELAY_BACKOFF_INITIAL_MS, RELAY_UNHEALTHY_THRESHOLD};

/// Tracks consecutive failures for a single relay and computes the
/// exponential backoff before the next reconnect attempt.
#[derive(Debug, Clone)]
pub struct RelayHealth {
    pub url: String,
    consecutive_failures: u32,
}

impl RelayHealth {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            consecutive_failures: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// A relay with >= the unhealthy threshold of consecutive failures
    /// is demoted from the eligible set until a successful reconnect.
    pub fn is_eligible(&self) -> bool {
        self.consecutive_failures < RELAY_UNHEALTHY_THRESHOLD
    }

    /// Exponential backoff before the next reconnect attempt, capped at
    /// the configured ceiling.
    pub fn backoff(&self) -> Duration {
        let shift = self.consecutive_failures.min(20);
        let ms = RELAY_BACKOFF_INITIAL_MS
            .saturating_mul(1u64 << shift)
            .min(RELAY_BACKOFF_CEILING_MS);
        Duration::from_millis(ms)
    }
}
