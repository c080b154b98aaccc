//! Event types and the in-process listener registry for the micro:bit
//! link.
//!
//! - [`EventBus`] — synchronous multi-listener registry keyed by
//!   [`EventKind`], with a `tokio::sync::broadcast` side channel.
//! - [`LinkEvent`] — the typed events consumers receive.

pub mod bus;
pub mod event;

pub use bus::{listener, EventBus, Listener};
pub use event::{
    ButtonEvent, ConnectionEvent, ErrorEvent, EventKind, LinkEvent, MovementEvent,
    QuizStateEvent, StatusEvent, Timestamp,
};
