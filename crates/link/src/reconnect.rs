//! Linear-backoff reconnection policy for the bridge connection.
//!
//! After an abnormal close the manager waits `n * base_interval` before
//! reconnect attempt `n`, for at most `max_attempts` consecutive
//! attempts. A successful open resets the count.

use std::time::Duration;

use microbit_core::config::{LinkConfig, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL_MS};

/// Tunable parameters for the linear-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt; later attempts wait multiples of it.
    pub base_interval: Duration,
    /// Consecutive attempts allowed before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl From<&LinkConfig> for ReconnectPolicy {
    fn from(config: &LinkConfig) -> Self {
        Self {
            base_interval: config.reconnect_interval,
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_interval.saturating_mul(attempt)
    }

    /// Whether another attempt may be scheduled after `attempts_made`.
    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
