//! RPC link client
//!
//! Dials another cluster member, performs the token handshake and carries
//! request/response traffic for the [`RpcPool`](crate::rpc::RpcPool).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use super::connection::{Connection, ConnectionError, ConnectionHandle};
use crate::cluster::ServerDescriptor;
use crate::lock::lock;
use crate::protocol::{RpcMessage, RpcOutcome};
use crate::rpc::{ConnectOptions, RpcChannel, RpcConnector, RpcError, RpcResult};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcOutcome>>>>;

/// Opens RPC links over TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpRpcConnector;

impl TcpRpcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RpcConnector for TcpRpcConnector {
    async fn connect(&self, target: &ServerDescriptor, options: &ConnectOptions) -> RpcResult<Arc<dyn RpcChannel>> {
        let unavailable = |reason: String| RpcError::Unavailable {
            server_id: target.id.clone(),
            reason,
        };

        let addr = super::resolve_host(&target.host, target.port)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        tracing::info!("Connecting to {} at {}", target.id, addr);

        let stream = match tokio::time::timeout(options.rpc.connect_timeout(), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(unavailable(e.to_string())),
            Err(_) => return Err(unavailable("connect timed out".to_string())),
        };
        let _ = stream.set_nodelay(true);

        let mut conn = Connection::new(stream, addr, options.rpc.max_frame_size);
        match conn.handshake_client(&options.local_id, &options.token).await {
            Ok(_) => {}
            Err(ConnectionError::HandshakeFailed(reason)) => return Err(RpcError::Rejected(reason)),
            Err(e) => return Err(unavailable(e.to_string())),
        }

        let channel: Arc<dyn RpcChannel> = TcpRpcChannel::spawn(
            conn,
            target.id.clone(),
            options.rpc.timeout(),
            options.rpc.heartbeat_interval(),
        );
        Ok(channel)
    }
}

/// An established link; calls are multiplexed by request id
pub struct TcpRpcChannel {
    server_id: String,
    handle: ConnectionHandle,
    pending: Pending,
    next_id: AtomicU64,
    timeout: Duration,
}

impl TcpRpcChannel {
    fn spawn(conn: Connection, server_id: String, timeout: Duration, heartbeat_interval: Duration) -> Arc<Self> {
        let (msg_tx, msg_rx) = mpsc::channel::<RpcMessage>(256);
        let handle = ConnectionHandle::new(msg_tx);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(run_link(
            conn,
            msg_rx,
            handle.clone(),
            Arc::clone(&pending),
            server_id.clone(),
            heartbeat_interval,
        ));

        Arc::new(Self {
            server_id,
            handle,
            pending,
            next_id: AtomicU64::new(1),
            timeout,
        })
    }

    /// Calls still waiting for a reply
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[async_trait]
impl RpcChannel for TcpRpcChannel {
    async fn call(&self, procedure: &str, args: Vec<u8>) -> RpcResult<Vec<u8>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(id, reply_tx);

        let request = RpcMessage::Request {
            id,
            procedure: procedure.to_string(),
            args,
        };
        if self.handle.send(request).await.is_err() {
            lock(&self.pending).remove(&id);
            return Err(RpcError::Closed);
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(outcome)) => into_result(outcome),
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(RpcError::Timeout {
                    server_id: self.server_id.clone(),
                })
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.handle.is_connected()
    }
}

fn into_result(outcome: RpcOutcome) -> RpcResult<Vec<u8>> {
    match outcome {
        RpcOutcome::Ok(reply) => Ok(reply),
        RpcOutcome::UnknownProcedure(name) => Err(RpcError::UnknownProcedure(name)),
        RpcOutcome::Failed(reason) => Err(RpcError::Remote(reason)),
    }
}

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

async fn run_link(
    mut conn: Connection,
    mut msg_rx: mpsc::Receiver<RpcMessage>,
    handle: ConnectionHandle,
    pending: Pending,
    server_id: String,
    heartbeat_interval: Duration,
) {
    let mut heartbeat_timer = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );

    let disconnect_reason = loop {
        tokio::select! {
            result = conn.recv() => {
                match result {
                    Ok(Some(frame)) => match frame.message {
                        RpcMessage::Response { id, outcome } => {
                            let waiter = lock(&pending).remove(&id);
                            match waiter {
                                Some(waiter) => {
                                    let _ = waiter.send(outcome);
                                }
                                None => tracing::debug!("Late reply {} from {}", id, server_id),
                            }
                        }
                        RpcMessage::Heartbeat { timestamp } => {
                            let _ = conn.send(&RpcMessage::HeartbeatAck { timestamp }).await;
                        }
                        RpcMessage::HeartbeatAck { .. } => {}
                        RpcMessage::Disconnect { reason } => break reason,
                        other => {
                            tracing::debug!("Unexpected message type {:#x} from {}", other.type_id(), server_id);
                        }
                    },
                    Ok(None) => break "Connection closed".to_string(),
                    Err(e) => break format!("Error: {}", e),
                }
            }

            Some(message) = msg_rx.recv() => {
                if let Err(e) = conn.send(&message).await {
                    break format!("Send error: {}", e);
                }
            }

            _ = heartbeat_timer.tick() => {
                if let Err(e) = conn.send(&RpcMessage::Heartbeat { timestamp: now_micros() }).await {
                    break format!("Heartbeat error: {}", e);
                }
            }
        }
    };

    handle.mark_disconnected();
    // Dropping the senders wakes every waiting call with `Closed`
    lock(&pending).clear();

    tracing::info!("RPC link to {} closed: {}", server_id, disconnect_reason);
    let _ = conn.close(&disconnect_reason).await;
}
