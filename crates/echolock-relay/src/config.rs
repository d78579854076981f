use std::time::Duration;

use echolock_core::DEFAULT_MIN_RELAY_SUCCESS;

/// Configuration for the relay transport.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Pool of relay URLs to fan out to.
    pub urls: Vec<String>,
    /// Minimum accepting relays for a publish to succeed.
    pub min_success: usize,
    /// Per-connection dial timeout.
    pub connect_timeout: Duration,
    /// Overall deadline for a publish or retrieve call.
    pub deadline: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            min_success: DEFAULT_MIN_RELAY_SUCCESS,
            connect_timeout: Duration::from_secs(10),
            deadline: Duration::from_secs(20),
        }
    }
}

impl RelayConfig {
    pub fn from_urls(urls: Vec<String>) -> Self {
        Self {
            urls,
            ..Self::default()
        }
    }
}
