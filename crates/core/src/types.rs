use serde::Serialize;

/// Lifecycle state of the bridge connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Consumer-facing view of the connection, as reported by
/// `connection_state()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
}
