//! Bridge WebSocket message types and parser.
//!
//! The bridge sends flat JSON objects tagged by a `"type"` field, e.g.
//! `{"type": "button", "button": "A", "quizContext": {...}, "timestamp": 1700000000000}`.
//! This module deserializes them into a strongly-typed [`InboundMessage`].

use microbit_events::Timestamp;
use serde::Deserialize;

/// All bridge message types.
///
/// Deserialized via the internally-tagged `"type"` field. Tags this
/// client does not know yet land in [`InboundMessage::Unknown`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// The bridge found a micro:bit on a serial port.
    #[serde(rename = "connected")]
    Connected(DeviceStatus),

    /// The micro:bit was unplugged or the port was lost.
    #[serde(rename = "disconnected")]
    Disconnected(DeviceStatus),

    /// Tilt gesture.
    #[serde(rename = "movement")]
    Movement(MovementData),

    /// Button press.
    #[serde(rename = "button")]
    Button(ButtonData),

    /// Quiz progress pushed by the backend.
    #[serde(rename = "quiz_state")]
    QuizState(QuizStateData),

    /// Any other tag, kept for peers newer than this client.
    #[serde(other)]
    Unknown,
}

/// Payload for `connected` / `disconnected` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// Explicit flag; when absent the message type decides.
    #[serde(default)]
    pub connected: Option<bool>,
    #[serde(default)]
    pub port_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Payload for `movement` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementData {
    pub movement: String,
    #[serde(default)]
    pub quiz_context: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Payload for `button` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonData {
    pub button: String,
    #[serde(default)]
    pub quiz_context: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Payload for `quiz_state` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizStateData {
    #[serde(default)]
    pub quiz_id: serde_json::Value,
    #[serde(default)]
    pub state: serde_json::Value,
    #[serde(default)]
    pub current_question: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Parse a bridge text frame into a typed enum.
///
/// Returns `Err` for malformed JSON, a missing `type`, or a known type
/// with missing required fields. Unknown types parse to
/// [`InboundMessage::Unknown`].
pub fn parse_message(text: &str) -> Result<InboundMessage, serde_json::Error> {
    serde_json::from_str(text)
}
