//! Transport abstraction between the connection manager and the wire.
//!
//! A [`Connector`] opens a transport and hands back a
//! [`TransportHandle`]: an outbound command channel plus a stream of
//! [`TransportEvent`]s (open, message, error, close) in the order the
//! socket produced them. The WebSocket implementation lives in
//! [`crate::client`]; tests plug in an in-memory connector.

use tokio::sync::mpsc;

/// Close code for an intentional, clean shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when no close frame was received (reset, EOF).
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported when the peer sent a close frame without a code.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Lifecycle and data events produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed.
    Open,
    /// A text frame arrived.
    Message(String),
    /// A runtime error. A `Close` usually follows.
    Error(String),
    /// The transport is gone. Always the last event.
    Close { code: u16, reason: String },
}

/// Commands sent to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Manager-side ends of a freshly opened transport.
#[derive(Debug)]
pub struct TransportHandle {
    /// Identifier used to correlate log lines for one transport.
    pub session_id: String,
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Socket-side ends of a freshly opened transport.
pub struct TransportPeer {
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl TransportPeer {
    /// Forward an event to the manager.
    ///
    /// Returns `false` once the manager has dropped its end.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// Create the two ends of a transport.
pub fn channel() -> (TransportHandle, TransportPeer) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let handle = TransportHandle {
        session_id: uuid::Uuid::new_v4().to_string(),
        outbound: outbound_tx,
        events: event_rx,
    };
    let peer = TransportPeer {
        events: event_tx,
        outbound: outbound_rx,
    };
    (handle, peer)
}

/// Opens transports to a bridge endpoint.
///
/// `open` returns as soon as the transport is constructed; the outcome
/// of the handshake arrives later as [`TransportEvent::Open`] or
/// [`TransportEvent::Close`]. An `Err` means no transport exists at all
/// and no events will follow.
pub trait Connector: Send + Sync {
    fn open(&self, endpoint: &str) -> Result<TransportHandle, TransportError>;
}

/// Errors raised while constructing or driving a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be turned into a handshake request.
    #[error("Invalid endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    /// No Tokio runtime is available to drive the socket.
    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    /// The transport is closed and can no longer accept frames.
    #[error("Transport closed")]
    Closed,
}
