//! WebSocket transport for the micro:bit bridge.
//!
//! [`WsConnector`] validates the endpoint synchronously, then spawns a
//! task that performs the handshake and shuttles frames between the
//! socket and the [`TransportPeer`](crate::transport::TransportPeer)
//! channels until either side closes.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::transport::{
    self, Connector, Outbound, TransportError, TransportEvent, TransportHandle, TransportPeer,
    ABNORMAL_CLOSURE, NO_STATUS_RECEIVED,
};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Map an `http(s)` endpoint onto the equivalent `ws(s)` URL.
///
/// Other schemes are returned unchanged.
pub fn websocket_url(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        endpoint.to_string()
    }
}

impl Connector for WsConnector {
    fn open(&self, endpoint: &str) -> Result<TransportHandle, TransportError> {
        let url = websocket_url(endpoint);
        let request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
        check_request_target(endpoint, &request)?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::NoRuntime(e.to_string()))?;

        let (handle, peer) = transport::channel();
        let session_id = handle.session_id.clone();

        runtime.spawn(async move {
            run_socket(request, url, session_id, peer).await;
        });

        Ok(handle)
    }
}

/// Reject targets a handshake can never reach: non-websocket schemes or
/// a missing host.
fn check_request_target(endpoint: &str, request: &Request) -> Result<(), TransportError> {
    let uri = request.uri();
    let invalid = |message: String| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        message,
    };

    match uri.scheme_str() {
        Some("ws" | "wss") => {}
        Some(other) => return Err(invalid(format!("unsupported scheme '{other}'"))),
        None => return Err(invalid("missing scheme".to_string())),
    }
    match uri.host() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(invalid("missing host".to_string())),
    }
}

/// Handshake, then pump frames until the socket or the manager closes.
async fn run_socket(request: Request, url: String, session_id: String, peer: TransportPeer) {
    let TransportPeer {
        events: peer_events,
        mut outbound,
    } = peer;

    let ws_stream = match connect_async(request).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            tracing::warn!(session_id = %session_id, url = %url, error = %e, "WebSocket handshake failed");
            let _ = peer_events.send(TransportEvent::Error(format!(
                "Failed to connect to {url}: {e}"
            )));
            let _ = peer_events.send(TransportEvent::Close {
                code: ABNORMAL_CLOSURE,
                reason: e.to_string(),
            });
            return;
        }
    };

    tracing::info!(session_id = %session_id, url = %url, "Connected to micro:bit bridge");
    let _ = peer_events.send(TransportEvent::Open);

    let close = drive_session(ws_stream, &session_id, &peer_events, &mut outbound).await;
    let _ = peer_events.send(close);
}

/// Relay frames in both directions; returns the terminal `Close` event.
async fn drive_session(
    ws_stream: WsStream,
    session_id: &str,
    events: &mpsc::UnboundedSender<TransportEvent>,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
) -> TransportEvent {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::warn!(session_id, error = %e, "WebSocket send failed");
                        let _ = events.send(TransportEvent::Error(format!("Send failed: {e}")));
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(session_id, error = %e, "Close frame not delivered");
                    }
                    let _ = sink.close().await;
                    return TransportEvent::Close { code, reason };
                }
                None => {
                    // Manager dropped its handle.
                    let _ = sink.close().await;
                    return TransportEvent::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: "transport handle dropped".to_string(),
                    };
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(session_id, ?frame, "Bridge closed WebSocket");
                    return match frame {
                        Some(frame) => TransportEvent::Close {
                            code: u16::from(frame.code),
                            reason: frame.reason.into_owned(),
                        },
                        None => TransportEvent::Close {
                            code: NO_STATUS_RECEIVED,
                            reason: String::new(),
                        },
                    };
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::trace!(session_id, "Ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Handled automatically by tungstenite.
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::error!(session_id, error = %e, "WebSocket receive error");
                    let _ = events.send(TransportEvent::Error(format!("WebSocket error: {e}")));
                    return TransportEvent::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: e.to_string(),
                    };
                }
                None => {
                    tracing::info!(session_id, "WebSocket stream exhausted");
                    return TransportEvent::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".to_string(),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn http_schemes_map_to_websocket_schemes() {
        assert_eq!(
            websocket_url("http://localhost:8080/ws/microbit"),
            "ws://localhost:8080/ws/microbit"
        );
        assert_eq!(websocket_url("https://quiz.example/ws"), "wss://quiz.example/ws");
        assert_eq!(websocket_url("ws://already:1/ws"), "ws://already:1/ws");
    }

    #[test]
    fn invalid_endpoint_fails_at_construction() {
        let result = WsConnector::new().open("not a url at all");
        assert_matches!(result, Err(TransportError::InvalidEndpoint { .. }));
    }

    #[test]
    fn non_websocket_scheme_fails_at_construction() {
        let result = WsConnector::new().open("ftp://127.0.0.1:9/ws/microbit");
        assert_matches!(
            result,
            Err(TransportError::InvalidEndpoint { message, .. }) if message.contains("ftp")
        );
    }

    #[test]
    fn open_without_runtime_is_reported() {
        let result = WsConnector::new().open("ws://localhost:9/ws/microbit");
        assert_matches!(result, Err(TransportError::NoRuntime(_)));
    }

    #[tokio::test]
    async fn unreachable_bridge_reports_error_then_abnormal_close() {
        // Port 9 (discard) is closed on CI hosts; the handshake fails fast.
        let mut handle = WsConnector::new()
            .open("ws://127.0.0.1:9/ws/microbit")
            .expect("construction should succeed");

        assert_matches!(handle.events.recv().await, Some(TransportEvent::Error(_)));
        assert_matches!(
            handle.events.recv().await,
            Some(TransportEvent::Close { code: ABNORMAL_CLOSURE, .. })
        );
    }
}
