//! Connection manager for the micro:bit bridge.
//!
//! [`MicrobitService`] owns the single transport to the bridge, drives
//! the `Disconnected -> Connecting -> Connected` lifecycle, schedules
//! linear-backoff reconnects after abnormal closes, and forwards
//! inbound frames to the [dispatcher](crate::dispatcher).
//!
//! Consumers register listeners on the shared [`EventBus`] through
//! [`MicrobitService::on`] / [`MicrobitService::off`], or take a
//! broadcast receiver via [`MicrobitService::subscribe`].
//!
//! Create one instance at the composition root and pass the `Arc`
//! around; the type holds no global state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use microbit_core::config::LinkConfig;
use microbit_core::types::{ConnectionSnapshot, ConnectionStatus};
use microbit_events::{EventBus, EventKind, LinkEvent, Listener};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::WsConnector;
use crate::dispatcher;
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Connector, Outbound, TransportEvent, TransportHandle, NORMAL_CLOSURE};

/// Liveness probe sent once after every successful open.
pub const PING_FRAME: &str = "ping";

/// Close reason used when the consumer calls [`MicrobitService::disconnect`].
pub const MANUAL_DISCONNECT_REASON: &str = "Manual disconnect";

/// Manages the persistent connection to the micro:bit bridge.
pub struct MicrobitService {
    endpoint: String,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    bus: Arc<EventBus>,
    state: Mutex<ConnectionState>,
    /// Handed to spawned tasks so they never keep the service alive.
    this: Weak<MicrobitService>,
}

/// Mutable connection bookkeeping. Only touched under the service lock.
struct ConnectionState {
    status: ConnectionStatus,
    reconnect_attempts: u32,
    /// Set by `disconnect()`, cleared by `connect()`.
    manual_disconnect: bool,
    transport: Option<ActiveTransport>,
    reconnect_timer: Option<ReconnectTimer>,
    /// Source of transport and timer ids.
    next_id: u64,
}

/// The one live transport.
struct ActiveTransport {
    id: u64,
    session_id: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    pump: JoinHandle<()>,
}

/// The one armed reconnect.
struct ReconnectTimer {
    id: u64,
    cancel: CancellationToken,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            manual_disconnect: false,
            transport: None,
            reconnect_timer: None,
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_current(&self, transport_id: u64) -> bool {
        self.transport.as_ref().is_some_and(|t| t.id == transport_id)
    }

    fn cancel_reconnect(&mut self) -> bool {
        match self.reconnect_timer.take() {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

impl MicrobitService {
    /// Build a service that opens transports through `connector` and
    /// publishes on `bus`.
    pub fn new(config: &LinkConfig, connector: Arc<dyn Connector>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            endpoint: config.endpoint.clone(),
            policy: ReconnectPolicy::from(config),
            connector,
            bus,
            state: Mutex::new(ConnectionState::new()),
            this: this.clone(),
        })
    }

    /// Build a service speaking WebSocket, with a fresh bus.
    pub fn with_websocket(config: &LinkConfig) -> Arc<Self> {
        Self::new(config, Arc::new(WsConnector::new()), Arc::new(EventBus::default()))
    }

    // ---- consumer API ----

    /// Open a transport unless one already exists.
    ///
    /// Also cancels a pending reconnect and lifts a previous manual
    /// disconnect. Construction failures are reported on the `error`
    /// event and leave the service `Disconnected`; they do not trigger
    /// a reconnect.
    pub fn connect(&self) {
        let mut failure = None;
        {
            let mut state = self.lock();
            state.manual_disconnect = false;

            if state.transport.is_some() {
                tracing::debug!(endpoint = %self.endpoint, "Transport already open, ignoring connect");
                return;
            }
            state.cancel_reconnect();

            match self.open_transport(&mut state) {
                Ok(()) => {}
                Err(message) => {
                    tracing::error!(endpoint = %self.endpoint, error = %message, "Failed to open transport");
                    state.status = ConnectionStatus::Disconnected;
                    failure = Some(LinkEvent::error(message));
                }
            }
        }

        if let Some(event) = failure {
            self.bus.emit(event);
        }
    }

    /// Close the transport and stop reconnecting.
    ///
    /// Idempotent. Resets the reconnect counter. Emits
    /// `connection {connected: false}` when a transport was live.
    pub fn disconnect(&self) {
        let closed = {
            let mut state = self.lock();
            state.manual_disconnect = true;

            if state.cancel_reconnect() {
                tracing::info!("Pending reconnect cancelled");
            }

            let closed = match state.transport.take() {
                Some(transport) => {
                    tracing::info!(session_id = %transport.session_id, "Disconnecting from micro:bit bridge");
                    let _ = transport.outbound.send(Outbound::Close {
                        code: NORMAL_CLOSURE,
                        reason: MANUAL_DISCONNECT_REASON.to_string(),
                    });
                    transport.pump.abort();
                    true
                }
                None => false,
            };

            state.reconnect_attempts = 0;
            state.status = ConnectionStatus::Disconnected;
            closed
        };

        if closed {
            self.bus.emit(LinkEvent::disconnected(MANUAL_DISCONNECT_REASON));
        }
    }

    /// Send the liveness probe on the live transport.
    ///
    /// Best effort: failures are logged and never change state.
    pub fn send_ping(&self) {
        let state = self.lock();
        match state.transport.as_ref() {
            Some(transport) => {
                if transport.outbound.send(Outbound::Text(PING_FRAME.to_string())).is_err() {
                    tracing::warn!(session_id = %transport.session_id, "Ping not sent: transport closed");
                } else {
                    tracing::trace!(session_id = %transport.session_id, "Ping sent");
                }
            }
            None => tracing::warn!("Ping not sent: no transport"),
        }
    }

    pub fn on(&self, kind: EventKind, listener: Listener) {
        self.bus.on(kind, listener);
    }

    pub fn off(&self, kind: EventKind, listener: &Listener) -> bool {
        self.bus.off(kind, listener)
    }

    /// Broadcast receiver for every event this service emits.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn is_connected(&self) -> bool {
        self.lock().status == ConnectionStatus::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        self.lock().status
    }

    pub fn connection_state(&self) -> ConnectionSnapshot {
        let state = self.lock();
        ConnectionSnapshot {
            connected: state.status == ConnectionStatus::Connected,
            reconnect_attempts: state.reconnect_attempts,
            max_reconnect_attempts: self.policy.max_attempts,
        }
    }

    /// Whether a reconnect is currently armed.
    pub fn reconnect_pending(&self) -> bool {
        self.lock().reconnect_timer.is_some()
    }

    // ---- private helpers ----

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the connector for a transport and start pumping its events.
    fn open_transport(&self, state: &mut ConnectionState) -> Result<(), String> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| format!("No async runtime available: {e}"))?;

        let TransportHandle {
            session_id,
            outbound,
            events,
        } = self
            .connector
            .open(&self.endpoint)
            .map_err(|e| format!("Failed to create connection: {e}"))?;

        let id = state.next_id();
        let this = self.this.clone();
        let pump = runtime.spawn(pump_events(this, id, events));

        tracing::info!(session_id = %session_id, endpoint = %self.endpoint, "Connecting to micro:bit bridge");

        state.status = ConnectionStatus::Connecting;
        state.transport = Some(ActiveTransport {
            id,
            session_id,
            outbound,
            pump,
        });
        Ok(())
    }

    /// Apply one event from transport `id`. Events from a transport
    /// that is no longer current are dropped.
    fn handle_transport_event(&self, id: u64, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(id),
            TransportEvent::Message(text) => {
                if !self.lock().is_current(id) {
                    return;
                }
                dispatcher::handle_frame(&text, &self.bus);
            }
            TransportEvent::Error(message) => {
                if !self.lock().is_current(id) {
                    return;
                }
                tracing::warn!(error = %message, "Transport error");
                self.bus.emit(LinkEvent::error(message));
            }
            TransportEvent::Close { code, reason } => self.on_close(id, code, reason),
        }
    }

    fn on_open(&self, id: u64) {
        {
            let mut state = self.lock();
            if !state.is_current(id) {
                return;
            }
            state.status = ConnectionStatus::Connected;
            state.reconnect_attempts = 0;
            if let Some(transport) = state.transport.as_ref() {
                tracing::info!(session_id = %transport.session_id, "micro:bit bridge connected");
            }
        }

        self.bus.emit(LinkEvent::connected());
        self.send_ping();
    }

    fn on_close(&self, id: u64, code: u16, reason: String) {
        let scheduled = {
            let mut state = self.lock();
            if !state.is_current(id) {
                return;
            }
            state.transport = None;
            state.status = ConnectionStatus::Disconnected;

            let abnormal = code != NORMAL_CLOSURE;
            if abnormal && !state.manual_disconnect && self.policy.allows(state.reconnect_attempts) {
                Some(self.schedule_reconnect(&mut state))
            } else {
                if abnormal && !state.manual_disconnect {
                    tracing::warn!(
                        attempts = state.reconnect_attempts,
                        "Reconnect budget exhausted, staying disconnected",
                    );
                }
                None
            }
        };

        tracing::info!(code, reason = %reason, "micro:bit bridge connection closed");

        let reason = if reason.is_empty() {
            format!("Connection closed (code {code})")
        } else {
            reason
        };
        self.bus.emit(LinkEvent::disconnected(reason));

        if let Some((attempt, delay)) = scheduled {
            tracing::info!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnect scheduled",
            );
        }
    }

    /// Count the attempt and arm a one-shot timer for it, replacing any
    /// timer already armed.
    fn schedule_reconnect(&self, state: &mut ConnectionState) -> (u32, Duration) {
        state.cancel_reconnect();
        state.reconnect_attempts += 1;

        let attempt = state.reconnect_attempts;
        let delay = self.policy.delay_for(attempt);
        let id = state.next_id();
        let cancel = CancellationToken::new();

        let deadline = tokio::time::Instant::now() + delay;
        let token = cancel.clone();
        let this = self.this.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(service) = this.upgrade() {
                        service.fire_reconnect(id);
                    }
                }
            }
        });

        state.reconnect_timer = Some(ReconnectTimer { id, cancel });
        (attempt, delay)
    }

    fn fire_reconnect(&self, timer_id: u64) {
        let attempt = {
            let mut state = self.lock();
            match state.reconnect_timer.as_ref() {
                Some(timer) if timer.id == timer_id => {}
                _ => return,
            }
            state.reconnect_timer = None;
            if state.manual_disconnect {
                return;
            }
            state.reconnect_attempts
        };

        tracing::info!(attempt, "Reconnecting to micro:bit bridge");
        self.connect();
    }
}

impl Drop for MicrobitService {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.cancel_reconnect();
        if let Some(transport) = state.transport.take() {
            let _ = transport.outbound.send(Outbound::Close {
                code: NORMAL_CLOSURE,
                reason: MANUAL_DISCONNECT_REASON.to_string(),
            });
            transport.pump.abort();
        }
    }
}

/// Feed transport events to the service in arrival order until the
/// transport closes or the service is dropped.
async fn pump_events(
    service: Weak<MicrobitService>,
    id: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(service) = service.upgrade() else {
            return;
        };
        let last = matches!(event, TransportEvent::Close { .. });
        service.handle_transport_event(id, event);
        if last {
            return;
        }
    }

    // Sender gone without a close event.
    if let Some(service) = service.upgrade() {
        service.handle_transport_event(
            id,
            TransportEvent::Close {
                code: crate::transport::ABNORMAL_CLOSURE,
                reason: "transport dropped".to_string(),
            },
        );
    }
}
