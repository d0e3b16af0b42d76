//! Test doubles shared by the hub tests

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::ClientConnection;
use crate::cluster::ServerDescriptor;
use crate::protocol::RemotePushReply;
use crate::rpc::{ConnectOptions, RpcChannel, RpcConnector, RpcError, RpcResult, REMOTE_PUSH};

/// Connection that records what it was asked to do
pub struct RecordingConnection {
    id: u64,
    sent: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
    on_send: Mutex<Option<Box<dyn FnMut() + Send>>>,
}

impl RecordingConnection {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            on_send: Mutex::new(None),
        })
    }

    /// Run `hook` synchronously inside the next `send`
    pub fn on_next_send(&self, hook: impl FnMut() + Send + 'static) {
        *self.on_send.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ClientConnection for RecordingConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, data: Bytes) {
        self.sent.lock().unwrap().push(data);
        let hook = self.on_send.lock().unwrap().take();
        if let Some(mut hook) = hook {
            hook();
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Call observed by a [`ScriptedConnector`] channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedCall {
    pub server_id: String,
    pub procedure: String,
    pub args: Vec<u8>,
}

type Responder = Arc<dyn Fn(&str, &[u8]) -> RpcResult<Vec<u8>> + Send + Sync>;

/// Connector whose reachability and replies are scripted per server id
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    unreachable: Arc<Mutex<HashSet<String>>>,
    responders: Arc<Mutex<HashMap<String, Responder>>>,
    pub calls: Arc<Mutex<Vec<ObservedCall>>>,
    pub connects: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(&self, server_id: &str) {
        self.unreachable.lock().unwrap().insert(server_id.to_string());
    }

    pub fn respond(&self, server_id: &str, f: impl Fn(&str, &[u8]) -> RpcResult<Vec<u8>> + Send + Sync + 'static) {
        self.responders
            .lock()
            .unwrap()
            .insert(server_id.to_string(), Arc::new(f));
    }

    pub fn calls_to(&self, server_id: &str) -> Vec<ObservedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.server_id == server_id)
            .cloned()
            .collect()
    }

    pub fn connect_count(&self, server_id: &str) -> usize {
        self.connects.lock().unwrap().iter().filter(|s| *s == server_id).count()
    }
}

struct ScriptedChannel {
    server_id: String,
    connector: ScriptedConnector,
    alive: AtomicBool,
}

#[async_trait]
impl RpcChannel for ScriptedChannel {
    async fn call(&self, procedure: &str, args: Vec<u8>) -> RpcResult<Vec<u8>> {
        self.connector.calls.lock().unwrap().push(ObservedCall {
            server_id: self.server_id.clone(),
            procedure: procedure.to_string(),
            args: args.clone(),
        });
        let responder = self.connector.responders.lock().unwrap().get(&self.server_id).cloned();
        match responder {
            Some(f) => {
                let result = f(procedure, &args);
                if matches!(result, Err(RpcError::Closed)) {
                    self.alive.store(false, Ordering::SeqCst);
                }
                result
            }
            // A frontend with every target bound
            None if procedure == REMOTE_PUSH => Ok(bincode::serialize(&RemotePushReply::default())?),
            None => Ok(Vec::new()),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcConnector for ScriptedConnector {
    async fn connect(&self, target: &ServerDescriptor, _options: &ConnectOptions) -> RpcResult<Arc<dyn RpcChannel>> {
        self.connects.lock().unwrap().push(target.id.clone());
        tokio::task::yield_now().await;
        if self.unreachable.lock().unwrap().contains(&target.id) {
            return Err(RpcError::Unavailable {
                server_id: target.id.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(Arc::new(ScriptedChannel {
            server_id: target.id.clone(),
            connector: self.clone(),
            alive: AtomicBool::new(true),
        }))
    }
}
