use std::time::Duration;

use crate::error::CoreError;

/// Default bridge endpoint used when `MICROBIT_WS_URL` is not set.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080/ws/microbit";

/// Number of consecutive reconnects attempted before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base unit of the linear reconnect backoff, in milliseconds.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3000;

/// Connection settings for the micro:bit bridge client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Bridge endpoint. `http`/`https` schemes are accepted and mapped to
    /// `ws`/`wss` by the WebSocket transport.
    pub endpoint: String,
    /// Reconnect budget after consecutive abnormal closures.
    pub max_reconnect_attempts: u32,
    /// Delay unit; attempt `n` waits `n * reconnect_interval`.
    pub reconnect_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
        }
    }
}

impl LinkConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                             |
    /// |-----------------------------------|-------------------------------------|
    /// | `MICROBIT_WS_URL`                 | `http://localhost:8080/ws/microbit` |
    /// | `MICROBIT_MAX_RECONNECT_ATTEMPTS` | `5`                                 |
    /// | `MICROBIT_RECONNECT_INTERVAL_MS`  | `3000`                              |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let endpoint = get("MICROBIT_WS_URL").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let max_reconnect_attempts = match get("MICROBIT_MAX_RECONNECT_ATTEMPTS") {
            Some(raw) => raw.parse::<u32>().map_err(|e| CoreError::Config {
                key: "MICROBIT_MAX_RECONNECT_ATTEMPTS",
                message: format!("{raw:?} is not a valid u32: {e}"),
            })?,
            None => DEFAULT_MAX_RECONNECT_ATTEMPTS,
        };

        let interval_ms = match get("MICROBIT_RECONNECT_INTERVAL_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| CoreError::Config {
                key: "MICROBIT_RECONNECT_INTERVAL_MS",
                message: format!("{raw:?} is not a valid u64: {e}"),
            })?,
            None => DEFAULT_RECONNECT_INTERVAL_MS,
        };

        Ok(Self {
            endpoint,
            max_reconnect_attempts,
            reconnect_interval: Duration::from_millis(interval_ms),
        })
    }
}
