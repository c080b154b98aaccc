//! Inbound frame dispatch.
//!
//! Parses bridge text frames into [`InboundMessage`] variants and
//! re-publishes each as at most one [`LinkEvent`] on the bus. Nothing
//! here can fail the connection: bad frames are logged and dropped.

use microbit_events::{
    ButtonEvent, EventBus, EventKind, LinkEvent, MovementEvent, QuizStateEvent, StatusEvent,
};

use crate::messages::{parse_message, DeviceStatus, InboundMessage};

/// Reply some bridges send to the liveness probe. Not JSON.
const PONG: &str = "pong";

/// Map a parsed message onto the event consumers receive.
///
/// Returns `None` for [`InboundMessage::Unknown`].
pub fn to_event(message: InboundMessage) -> Option<LinkEvent> {
    let event = match message {
        InboundMessage::Connected(data) => LinkEvent::MicrobitStatus(status_event(data, true)),
        InboundMessage::Disconnected(data) => LinkEvent::MicrobitStatus(status_event(data, false)),
        InboundMessage::Movement(data) => LinkEvent::MicrobitMovement(MovementEvent {
            movement: data.movement,
            quiz_context: data.quiz_context,
            timestamp: data.timestamp,
        }),
        InboundMessage::Button(data) => LinkEvent::MicrobitButton(ButtonEvent {
            button: data.button,
            quiz_context: data.quiz_context,
            timestamp: data.timestamp,
        }),
        InboundMessage::QuizState(data) => LinkEvent::QuizState(QuizStateEvent {
            quiz_id: data.quiz_id,
            state: data.state,
            current_question: data.current_question,
            timestamp: data.timestamp,
        }),
        InboundMessage::Unknown => return None,
    };
    Some(event)
}

fn status_event(data: DeviceStatus, tag_connected: bool) -> StatusEvent {
    StatusEvent {
        connected: data.connected.unwrap_or(tag_connected),
        port_name: data.port_name,
        message: data.message,
        timestamp: data.timestamp,
    }
}

/// Handle one text frame: parse, classify, emit.
///
/// Returns the kind of the emitted event, or `None` when the frame was
/// dropped.
pub fn handle_frame(text: &str, bus: &EventBus) -> Option<EventKind> {
    let message = match parse_message(text) {
        Ok(message) => message,
        Err(_) if text.trim() == PONG => {
            tracing::trace!("Liveness probe acknowledged");
            return None;
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw_message = %text,
                "Failed to parse bridge message",
            );
            return None;
        }
    };

    match to_event(message) {
        Some(event) => {
            let kind = event.kind();
            tracing::debug!(event = %kind, "Dispatching bridge message");
            bus.emit(event);
            Some(kind)
        }
        None => {
            let tag = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_owned))
                .unwrap_or_default();
            tracing::warn!(message_type = %tag, "Unrecognized bridge message type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;
    use microbit_events::{listener, Timestamp};
    use serde_json::json;

    use super::*;

    /// Bus with a listener on every kind, recording what it sees.
    fn recording_bus() -> (EventBus, Arc<Mutex<Vec<LinkEvent>>>) {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let seen = Arc::clone(&seen);
            bus.on(kind, listener(move |e| seen.lock().unwrap().push(e.clone())));
        }
        (bus, seen)
    }

    #[test]
    fn movement_frame_emits_one_movement_event() {
        let (bus, seen) = recording_bus();
        let kind = handle_frame(
            r#"{"type":"movement","movement":"LEFT","quizContext":{"q":1},"timestamp":123}"#,
            &bus,
        );

        assert_eq!(kind, Some(EventKind::MicrobitMovement));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            LinkEvent::MicrobitMovement(MovementEvent {
                movement: "LEFT".into(),
                quiz_context: json!({"q": 1}),
                timestamp: Some(Timestamp::from(123_i64)),
            })
        );
    }

    #[test]
    fn movement_event_reaches_every_subscriber() {
        let bus = EventBus::default();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            bus.on(
                EventKind::MicrobitMovement,
                listener(move |_| *count.lock().unwrap() += 1),
            );
        }

        handle_frame(r#"{"type":"movement","movement":"RIGHT"}"#, &bus);

        assert_eq!(*count.lock().unwrap(), 3);
    }

    #[test]
    fn connected_and_disconnected_become_status_events() {
        let (bus, seen) = recording_bus();
        handle_frame(
            r#"{"type":"connected","connected":true,"portName":"COM3","message":"ready","timestamp":1}"#,
            &bus,
        );
        handle_frame(r#"{"type":"disconnected","message":"unplugged"}"#, &bus);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_matches!(
            &seen[0],
            LinkEvent::MicrobitStatus(s) if s.connected && s.port_name.as_deref() == Some("COM3")
        );
        assert_matches!(
            &seen[1],
            LinkEvent::MicrobitStatus(s) if !s.connected && s.port_name.is_none()
        );
    }

    #[test]
    fn explicit_connected_flag_wins_over_tag() {
        let event = to_event(InboundMessage::Connected(DeviceStatus {
            connected: Some(false),
            port_name: None,
            message: None,
            timestamp: None,
        }));
        assert_matches!(event, Some(LinkEvent::MicrobitStatus(s)) if !s.connected);
    }

    #[test]
    fn button_and_quiz_state_frames() {
        let (bus, seen) = recording_bus();
        handle_frame(r#"{"type":"button","button":"B","quizContext":null,"timestamp":"t"}"#, &bus);
        handle_frame(
            r#"{"type":"quiz_state","quizId":"quiz-9","state":"finished","currentQuestion":null}"#,
            &bus,
        );

        let seen = seen.lock().unwrap();
        assert_matches!(&seen[0], LinkEvent::MicrobitButton(b) if b.button == "B");
        assert_matches!(
            &seen[1],
            LinkEvent::QuizState(q) if q.quiz_id == json!("quiz-9") && q.state == json!("finished")
        );
    }

    #[test]
    fn unknown_type_emits_nothing() {
        let (bus, seen) = recording_bus();
        assert_eq!(handle_frame(r#"{"type":"unknown_type"}"#, &bus), None);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_json_emits_nothing() {
        let (bus, seen) = recording_bus();
        assert_eq!(handle_frame("{not json", &bus), None);
        assert_eq!(handle_frame("pong", &bus), None);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn frames_are_emitted_in_arrival_order() {
        let (bus, seen) = recording_bus();
        handle_frame(r#"{"type":"button","button":"A"}"#, &bus);
        handle_frame(r#"{"type":"movement","movement":"UP"}"#, &bus);
        handle_frame(r#"{"type":"button","button":"B"}"#, &bus);

        let kinds: Vec<EventKind> = seen.lock().unwrap().iter().map(LinkEvent::kind).collect();
        assert_eq!(
            kinds,
            [
                EventKind::MicrobitButton,
                EventKind::MicrobitMovement,
                EventKind::MicrobitButton
            ]
        );
    }
}
