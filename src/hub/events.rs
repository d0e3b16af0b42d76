//! Hub event bus
//!
//! Handlers run synchronously, in subscription order, on the publishing
//! thread. The handler list is snapshotted before dispatch so a handler may
//! subscribe or publish without deadlocking.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::Session;
use crate::cluster::ServerDescriptor;
use crate::lock::{read, write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Started,
    ClientBound,
    ClientUnbound,
    ClientMessage,
    ServerAdded,
    ServerRemoved,
}

/// Events published by the hub
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// The hub was started
    Started { server_id: String },
    /// A client completed the bind handshake
    ClientBound { uid: u64, connection_id: u64 },
    /// A bound client was removed from the registry
    ClientUnbound { uid: u64 },
    /// A client action arrived, locally or forwarded by a frontend
    ClientMessage {
        session: Session,
        cmd_index: usize,
        command: String,
        body: Value,
    },
    /// A server joined the membership
    ServerAdded(ServerDescriptor),
    /// A server left the membership
    ServerRemoved(ServerDescriptor),
}

impl HubEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HubEvent::Started { .. } => EventKind::Started,
            HubEvent::ClientBound { .. } => EventKind::ClientBound,
            HubEvent::ClientUnbound { .. } => EventKind::ClientUnbound,
            HubEvent::ClientMessage { .. } => EventKind::ClientMessage,
            HubEvent::ServerAdded(_) => EventKind::ServerAdded,
            HubEvent::ServerRemoved(_) => EventKind::ServerRemoved,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&HubEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, handler: impl Fn(&HubEvent) + Send + Sync + 'static) {
        write(&self.handlers)
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Deliver an event; returns how many handlers saw it
    pub fn publish(&self, event: &HubEvent) -> usize {
        let handlers = read(&self.handlers)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        read(&self.handlers).get(&kind).map_or(0, Vec::len)
    }
}
