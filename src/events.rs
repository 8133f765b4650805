//! Transport lifecycle and message events
//!
//! A small observer registry shared between a transport and the parties
//! interested in it. Two subscription modes:
//!
//! - `on` - fires on every matching event until removed
//! - `once` - fires on the next matching event, then deregisters itself
//!
//! Handlers run outside the registry lock, so a handler may register or
//! remove other listeners (the coordinator does exactly that on `Opened`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// An event raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket became ready to accept calls
    Opened,
    /// The socket closed (cleanly or not)
    Closed,
    /// The transport failed; carries whatever detail it had
    Error(String),
    /// A raw inbound text frame
    Message(String),
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Opened => EventKind::Opened,
            TransportEvent::Closed => EventKind::Closed,
            TransportEvent::Error(_) => EventKind::Error,
            TransportEvent::Message(_) => EventKind::Message,
        }
    }
}

/// Discriminant used when registering listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Opened,
    Closed,
    Error,
    Message,
}

/// Handle returned by registration, used to remove a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type PersistentHandler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;
type OnceHandler = Box<dyn FnOnce(&TransportEvent) + Send>;

enum Handler {
    Persistent(PersistentHandler),
    Once(OnceHandler),
}

struct Listener {
    id: ListenerId,
    kind: EventKind,
    handler: Handler,
}

/// Observer registry for transport events.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener that fires on every `kind` event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.register(kind, Handler::Persistent(Arc::new(handler)))
    }

    /// Register a listener that fires on the next `kind` event only.
    pub fn once<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: FnOnce(&TransportEvent) + Send + 'static,
    {
        self.register(kind, Handler::Once(Box::new(handler)))
    }

    /// Remove a listener. Returns false if it already fired or was removed.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Number of listeners currently registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().iter().filter(|l| l.kind == kind).count()
    }

    /// Deliver an event to every matching listener, in registration order.
    pub fn emit(&self, event: TransportEvent) {
        let kind = event.kind();

        // Snapshot under the lock: once-handlers are moved out, persistent
        // handlers are cloned. Order is preserved across both.
        let mut to_run: Vec<Handler> = Vec::new();
        {
            let mut listeners = self.lock();
            let mut kept = Vec::with_capacity(listeners.len());
            for listener in listeners.drain(..) {
                if listener.kind != kind {
                    kept.push(listener);
                    continue;
                }
                match listener.handler {
                    Handler::Persistent(f) => {
                        to_run.push(Handler::Persistent(Arc::clone(&f)));
                        kept.push(Listener {
                            handler: Handler::Persistent(f),
                            ..listener
                        });
                    }
                    Handler::Once(f) => to_run.push(Handler::Once(f)),
                }
            }
            *listeners = kept;
        }

        for handler in to_run {
            match handler {
                Handler::Persistent(f) => f(&event),
                Handler::Once(f) => f(&event),
            }
        }
    }

    fn register(&self, kind: EventKind, handler: Handler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Listener { id, kind, handler });
        id
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Listener>> {
        // Handlers never run under this lock
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.lock().len())
            .finish()
    }
}
