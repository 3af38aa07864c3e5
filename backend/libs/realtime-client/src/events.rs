//! Lifecycle and message events emitted by [`RealtimeClient`](crate::RealtimeClient)
//!
//! Listeners register per [`EventKind`]. Each listener runs in isolation: a
//! panicking handler is logged and the remaining handlers still run.

use crate::decode::InboundMessage;
use crate::error::TransportError;
use crate::transport::TransportKind;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Message,
    Notification,
    Error,
    Reconnect,
    Fallback,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Message => "message",
            EventKind::Notification => "notification",
            EventKind::Error => "error",
            EventKind::Reconnect => "reconnect",
            EventKind::Fallback => "fallback",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    UserInitiated,
    Error,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::UserInitiated => "user_initiated",
            DisconnectReason::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connect intent, emitted before the first transport attempt
    Connecting,
    Connected {
        transport: TransportKind,
    },
    Disconnected {
        reason: DisconnectReason,
        /// Transport that was active when the session ended
        transport: Option<TransportKind>,
        error: Option<TransportError>,
    },
    Message(InboundMessage),
    Notification(Value),
    Error {
        message: String,
        transport: Option<TransportKind>,
    },
    Reconnect {
        attempt: u32,
        delay: Duration,
    },
    Fallback {
        failed: TransportKind,
        next: TransportKind,
        error: TransportError,
    },
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connecting | ClientEvent::Connected { .. } => EventKind::Connect,
            ClientEvent::Disconnected { .. } => EventKind::Disconnect,
            ClientEvent::Message(_) => EventKind::Message,
            ClientEvent::Notification(_) => EventKind::Notification,
            ClientEvent::Error { .. } => EventKind::Error,
            ClientEvent::Reconnect { .. } => EventKind::Reconnect,
            ClientEvent::Fallback { .. } => EventKind::Fallback,
        }
    }
}

/// Handle returned by [`EventBus::on`]; pass to [`EventBus::off`] to detach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type EventHandler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, EventKind, EventHandler)>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: EventKind, handler: EventHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, kind, handler));
        id
    }

    /// Returns false if the listener was not registered
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener, _, _)| *listener != id);
        listeners.len() != before
    }

    pub fn emit(&self, event: &ClientEvent) {
        let kind = event.kind();
        // Handlers may call on/off, so they run outside the lock
        let handlers: Vec<(ListenerId, EventHandler)> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(id, _, handler)| (*id, Arc::clone(handler)))
            .collect();

        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(event = %kind, listener = id.0, "event listener panicked");
            }
        }
    }
}
