//! In-process event bus for [`LinkEvent`]s.
//!
//! [`EventBus`] keeps an ordered listener list per [`EventKind`] and
//! invokes the listeners synchronously on [`emit`](EventBus::emit).
//! Every emitted event is also forwarded to a `tokio::sync::broadcast`
//! channel for async consumers. It is designed to be shared via
//! `Arc<EventBus>`.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::event::{EventKind, LinkEvent};

/// A registered callback.
///
/// Listeners are compared by identity: [`EventBus::off`] removes the
/// entry that is the same `Arc` as the one passed in.
pub type Listener = Arc<dyn Fn(&LinkEvent) + Send + Sync>;

/// Wrap a closure into a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&LinkEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Multi-listener registry keyed by [`EventKind`].
///
/// # Usage
///
/// ```rust
/// use microbit_events::{listener, EventBus, EventKind, LinkEvent};
///
/// let bus = EventBus::default();
/// let on_error = listener(|event| println!("{event:?}"));
/// bus.on(EventKind::Error, on_error.clone());
///
/// bus.emit(LinkEvent::error("socket reset"));
/// bus.off(EventKind::Error, &on_error);
/// ```
pub struct EventBus {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
    sender: broadcast::Sender<LinkEvent>,
}

impl EventBus {
    /// Create a bus whose broadcast side buffers `capacity` events.
    ///
    /// Slow broadcast receivers observe `RecvError::Lagged`; callback
    /// listeners are unaffected.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            listeners: Mutex::new(HashMap::new()),
            sender,
        }
    }

    /// Register `listener` for `kind`.
    ///
    /// The same listener may be registered more than once; each
    /// registration is invoked.
    pub fn on(&self, kind: EventKind, listener: Listener) {
        let mut listeners = self.lock();
        let entries = listeners.entry(kind).or_default();
        entries.push(listener);
        tracing::trace!(event = %kind, count = entries.len(), "Listener registered");
    }

    /// Remove the first registration of `listener` for `kind`.
    ///
    /// Returns `false` when it was not registered.
    pub fn off(&self, kind: EventKind, listener: &Listener) -> bool {
        let mut listeners = self.lock();
        let Some(entries) = listeners.get_mut(&kind) else {
            return false;
        };
        let Some(pos) = entries.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        entries.remove(pos);
        if entries.is_empty() {
            listeners.remove(&kind);
        }
        tracing::trace!(event = %kind, "Listener removed");
        true
    }

    /// Deliver `event` to every listener registered for its kind, in
    /// registration order, then publish it on the broadcast channel.
    ///
    /// Listeners run on the calling thread against a snapshot of the
    /// registry, so they may call [`on`](Self::on)/[`off`](Self::off)
    /// themselves. A panicking listener is logged and skipped.
    pub fn emit(&self, event: LinkEvent) {
        let kind = event.kind();
        let snapshot: Vec<Listener> = self.lock().get(&kind).cloned().unwrap_or_default();

        tracing::trace!(event = %kind, listeners = snapshot.len(), "Emitting event");

        for (index, listener) in snapshot.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                tracing::error!(
                    event = %kind,
                    index,
                    panic = %panic_message(panic.as_ref()),
                    "Event listener panicked",
                );
            }
        }

        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to every event emitted on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.sender.subscribe()
    }

    /// Number of registrations currently held for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<Listener>>> {
        // Listeners never run under the lock, so poisoning carries no
        // half-applied state.
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
