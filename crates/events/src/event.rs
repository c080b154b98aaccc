//! Events published to consumers of the micro:bit link.
//!
//! Each [`LinkEvent`] variant carries a typed payload whose JSON shape
//! matches what the UI layer expects (camelCase field names). The
//! [`EventKind`] of an event is its subscription key on the
//! [`EventBus`](crate::bus::EventBus).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Subscription key for [`LinkEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Transport opened or closed.
    Connection,
    /// The bridge reported the device (un)plugged.
    MicrobitStatus,
    /// Tilt/shake gesture from the device.
    MicrobitMovement,
    /// Button press on the device.
    MicrobitButton,
    /// Quiz progress pushed by the backend.
    QuizState,
    /// Non-fatal transport problem.
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Connection,
        EventKind::MicrobitStatus,
        EventKind::MicrobitMovement,
        EventKind::MicrobitButton,
        EventKind::QuizState,
        EventKind::Error,
    ];

    /// Wire name of the event, e.g. `"microbit_movement"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connection => "connection",
            EventKind::MicrobitStatus => "microbit_status",
            EventKind::MicrobitMovement => "microbit_movement",
            EventKind::MicrobitButton => "microbit_button",
            EventKind::QuizState => "quiz_state",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame timestamp as sent by the bridge: either epoch millis or an
/// ISO-8601 string. Passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Number(serde_json::Number),
    Text(String),
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Timestamp::Number(value.into())
    }
}

impl From<&str> for Timestamp {
    fn from(value: &str) -> Self {
        Timestamp::Text(value.to_string())
    }
}

/// Payload of [`EventKind::Connection`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionEvent {
    pub connected: bool,
    /// Close reason; absent on open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of [`EventKind::MicrobitStatus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub connected: bool,
    /// Serial port the device is attached to, when known.
    pub port_name: Option<String>,
    pub message: Option<String>,
    pub timestamp: Option<Timestamp>,
}

/// Payload of [`EventKind::MicrobitMovement`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementEvent {
    /// Directional token, e.g. `"LEFT"`.
    pub movement: String,
    /// Opaque quiz/question reference, interpreted by the UI only.
    pub quiz_context: serde_json::Value,
    pub timestamp: Option<Timestamp>,
}

/// Payload of [`EventKind::MicrobitButton`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonEvent {
    /// Button identifier, e.g. `"A"`.
    pub button: String,
    pub quiz_context: serde_json::Value,
    pub timestamp: Option<Timestamp>,
}

/// Payload of [`EventKind::QuizState`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizStateEvent {
    pub quiz_id: serde_json::Value,
    pub state: serde_json::Value,
    pub current_question: serde_json::Value,
    pub timestamp: Option<Timestamp>,
}

/// Payload of [`EventKind::Error`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    /// Human-readable description of what went wrong.
    pub message: String,
}

/// An event emitted by the link to its listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum LinkEvent {
    Connection(ConnectionEvent),
    MicrobitStatus(StatusEvent),
    MicrobitMovement(MovementEvent),
    MicrobitButton(ButtonEvent),
    QuizState(QuizStateEvent),
    Error(ErrorEvent),
}

impl LinkEvent {
    /// The subscription key this event is delivered under.
    pub fn kind(&self) -> EventKind {
        match self {
            LinkEvent::Connection(_) => EventKind::Connection,
            LinkEvent::MicrobitStatus(_) => EventKind::MicrobitStatus,
            LinkEvent::MicrobitMovement(_) => EventKind::MicrobitMovement,
            LinkEvent::MicrobitButton(_) => EventKind::MicrobitButton,
            LinkEvent::QuizState(_) => EventKind::QuizState,
            LinkEvent::Error(_) => EventKind::Error,
        }
    }

    pub fn connected() -> Self {
        LinkEvent::Connection(ConnectionEvent {
            connected: true,
            reason: None,
        })
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        LinkEvent::Connection(ConnectionEvent {
            connected: false,
            reason: Some(reason.into()),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        LinkEvent::Error(ErrorEvent {
            message: message.into(),
        })
    }
}
