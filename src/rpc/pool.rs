//! RPC address pool
//!
//! Keeps at most one link per remote server id. Link establishment for a
//! given id is serialized: concurrent callers wait on the same attempt
//! instead of dialing twice. Calls over an established link are not
//! serialized.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OnceCell;

use super::{ConnectOptions, RpcChannel, RpcConnector, RpcError, RpcResult};
use crate::cluster::Membership;
use crate::lock::{lock, read, write};

type Slot = Arc<OnceCell<Arc<dyn RpcChannel>>>;

pub struct RpcPool {
    membership: Arc<dyn Membership>,
    connector: Arc<dyn RpcConnector>,
    options: RwLock<ConnectOptions>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl RpcPool {
    pub fn new(membership: Arc<dyn Membership>, connector: Arc<dyn RpcConnector>, options: ConnectOptions) -> Self {
        Self {
            membership,
            connector,
            options: RwLock::new(options),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Options used for links opened from now on
    pub fn set_options(&self, options: ConnectOptions) {
        *write(&self.options) = options;
    }

    pub fn options(&self) -> ConnectOptions {
        read(&self.options).clone()
    }

    /// Slot for a server id; a slot whose link died is replaced by a fresh one
    fn slot(&self, server_id: &str) -> Slot {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get(server_id) {
            let dead = slot.get().is_some_and(|channel| !channel.is_alive());
            if !dead {
                return Arc::clone(slot);
            }
            tracing::debug!("RPC link to {} is dead, reopening", server_id);
        }
        let slot: Slot = Arc::new(OnceCell::new());
        slots.insert(server_id.to_string(), Arc::clone(&slot));
        slot
    }

    /// Live link to a server, opened on first use.
    ///
    /// A failed open is returned to the caller; the next call tries again.
    pub async fn address_of(&self, server_id: &str) -> RpcResult<Arc<dyn RpcChannel>> {
        let target = self
            .membership
            .server_by_id(server_id)
            .ok_or_else(|| RpcError::Unavailable {
                server_id: server_id.to_string(),
                reason: "unknown server id".to_string(),
            })?;

        let slot = self.slot(server_id);
        let options = self.options();
        let channel = slot
            .get_or_try_init(|| async {
                tracing::debug!("Opening RPC link to {} at {}", target.id, target.rpc_addr());
                self.connector.connect(&target, &options).await
            })
            .await?;
        Ok(Arc::clone(channel))
    }

    /// Invoke a procedure on a remote server
    pub async fn invoke(&self, server_id: &str, procedure: &str, args: Vec<u8>) -> RpcResult<Vec<u8>> {
        let channel = self.address_of(server_id).await?;
        match channel.call(procedure, args).await {
            Err(RpcError::Closed) => {
                self.evict(server_id);
                Err(RpcError::Unavailable {
                    server_id: server_id.to_string(),
                    reason: "link closed".to_string(),
                })
            }
            other => other,
        }
    }

    /// Forget the link to a server
    pub fn evict(&self, server_id: &str) -> bool {
        lock(&self.slots).remove(server_id).is_some()
    }

    /// Ids with a live link
    pub fn connected(&self) -> Vec<String> {
        let slots = lock(&self.slots);
        let mut ids: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.get().is_some_and(|c| c.is_alive()))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
