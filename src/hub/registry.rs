//! Client registry
//!
//! Bound clients of one frontend, keyed by uid. The registry is pure
//! bookkeeping: it never performs I/O beyond asking a connection handle to
//! close itself.

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Session;

/// Handle to a live client connection owned by the transport
pub trait ClientConnection: Send + Sync {
    /// Identifier unique among this process's connections
    fn id(&self) -> u64;

    /// Queue encoded bytes for delivery
    fn send(&self, data: Bytes);

    /// Ask the transport to close the connection
    fn close(&self);
}

/// A client that completed the bind handshake
#[derive(Clone)]
pub struct BoundClient {
    pub uid: u64,
    pub connection: Arc<dyn ClientConnection>,
    pub session: Session,
}

impl fmt::Debug for BoundClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundClient")
            .field("uid", &self.uid)
            .field("connection", &self.connection.id())
            .field("session", &self.session)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<u64, BoundClient>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bound client, replacing any entry for the same uid.
    ///
    /// The replaced connection is returned untouched; closing it is the
    /// caller's responsibility.
    pub fn bind(
        &mut self,
        uid: u64,
        connection: Arc<dyn ClientConnection>,
        mut session: Session,
    ) -> Option<BoundClient> {
        session.uid = Some(uid);
        self.clients.insert(
            uid,
            BoundClient {
                uid,
                connection,
                session,
            },
        )
    }

    /// Remove an entry; no-op if absent
    pub fn unbind(&mut self, uid: u64) -> Option<BoundClient> {
        self.clients.remove(&uid)
    }

    /// Remove an entry only if it still belongs to `connection_id`.
    ///
    /// A closing connection must not drop a newer bind of the same uid.
    pub fn unbind_if_current(&mut self, uid: u64, connection_id: u64) -> bool {
        match self.clients.get(&uid) {
            Some(client) if client.connection.id() == connection_id => {
                self.clients.remove(&uid);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, uid: u64) -> Option<&BoundClient> {
        self.clients.get(&uid)
    }

    pub fn contains(&self, uid: u64) -> bool {
        self.clients.contains_key(&uid)
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Ask the transport to close the uid's connection. Returns whether the uid was bound.
    pub fn close_by_uid(&self, uid: u64) -> bool {
        match self.clients.get(&uid) {
            Some(client) => {
                client.connection.close();
                true
            }
            None => false,
        }
    }

    /// Merge into a bound client's session. Returns whether the uid was bound.
    pub fn apply_session(&mut self, uid: u64, partial: HashMap<String, Value>) -> bool {
        match self.clients.get_mut(&uid) {
            Some(client) => {
                client.session.set_some(partial);
                true
            }
            None => false,
        }
    }

    pub fn connection(&self, uid: u64) -> Option<Arc<dyn ClientConnection>> {
        self.clients.get(&uid).map(|c| Arc::clone(&c.connection))
    }

    /// Connections bound right now, in no particular order
    pub fn snapshot(&self) -> Vec<Arc<dyn ClientConnection>> {
        self.clients.values().map(|c| Arc::clone(&c.connection)).collect()
    }

    pub fn uids(&self) -> Vec<u64> {
        self.clients.keys().copied().collect()
    }
}
