//! micro:bit bridge client library.
//!
//! Provides the transport abstraction and its WebSocket implementation,
//! typed bridge message parsing, frame dispatch onto the event bus,
//! linear-backoff reconnection, and the [`MicrobitService`] connection
//! manager that ties them together.

pub mod client;
pub mod dispatcher;
pub mod manager;
pub mod messages;
pub mod reconnect;
pub mod transport;

pub use manager::MicrobitService;
