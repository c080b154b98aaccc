//! In-memory transport for driving `MicrobitService` from tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use microbit_core::config::LinkConfig;
use microbit_events::{listener, EventBus, EventKind, LinkEvent};
use microbit_link::transport::{
    self, Connector, Outbound, TransportError, TransportEvent, TransportHandle, TransportPeer,
    ABNORMAL_CLOSURE,
};
use microbit_link::MicrobitService;

/// Base reconnect interval used by the test config.
pub const BASE: Duration = Duration::from_millis(3000);

/// Socket side of one transport opened by [`MockConnector`].
pub struct MockSession {
    peer: Mutex<TransportPeer>,
}

impl MockSession {
    pub fn open(&self) {
        self.send(TransportEvent::Open);
    }

    pub fn message(&self, text: &str) {
        self.send(TransportEvent::Message(text.to_string()));
    }

    pub fn error(&self, message: &str) {
        self.send(TransportEvent::Error(message.to_string()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.send(TransportEvent::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Close without a close frame, as a dropped socket would.
    pub fn drop_abnormally(&self) {
        self.close(ABNORMAL_CLOSURE, "connection reset");
    }

    /// Everything the service has sent on this transport so far.
    pub fn sent(&self) -> Vec<Outbound> {
        let mut peer = self.peer.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(frame) = peer.outbound.try_recv() {
            out.push(frame);
        }
        out
    }

    fn send(&self, event: TransportEvent) {
        // The service may already have detached this transport.
        let _ = self.peer.lock().unwrap().emit(event);
    }
}

/// Connector that hands out in-memory transports and records them.
#[derive(Default)]
pub struct MockConnector {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    fail: AtomicBool,
}

impl MockConnector {
    /// Make subsequent `open` calls fail at construction.
    pub fn fail_construction(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock().unwrap()[index])
    }

    pub fn latest(&self) -> Arc<MockSession> {
        let sessions = self.sessions.lock().unwrap();
        Arc::clone(sessions.last().expect("no transport opened yet"))
    }
}

impl Connector for MockConnector {
    fn open(&self, endpoint: &str) -> Result<TransportHandle, TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                message: "rejected by test".to_string(),
            });
        }
        let (handle, peer) = transport::channel();
        self.sessions.lock().unwrap().push(Arc::new(MockSession {
            peer: Mutex::new(peer),
        }));
        Ok(handle)
    }
}

/// Service, its connector, and a log of every emitted event.
pub struct Harness {
    pub service: Arc<MicrobitService>,
    pub connector: Arc<MockConnector>,
    pub events: Arc<Mutex<Vec<LinkEvent>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: LinkConfig) -> Self {
        let connector = Arc::new(MockConnector::default());
        let bus = Arc::new(EventBus::default());
        let service = MicrobitService::new(&config, connector.clone(), bus);

        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let events = Arc::clone(&events);
            service.on(kind, listener(move |e| events.lock().unwrap().push(e.clone())));
        }

        Self {
            service,
            connector,
            events,
        }
    }

    pub fn take_events(&self) -> Vec<LinkEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<LinkEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }
}

pub fn test_config() -> LinkConfig {
    LinkConfig {
        endpoint: "ws://bridge.test/ws/microbit".to_string(),
        max_reconnect_attempts: 5,
        reconnect_interval: BASE,
    }
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock by `by`, then let woken tasks run.
pub async fn advance(by: Duration) {
    tokio::time::advance(by).await;
    settle().await;
}
