//! RPC listener
//!
//! Accepts links from other cluster members and dispatches their requests
//! to the local [`ProcedureTable`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

use super::connection::{Connection, ConnectionError, ConnectionHandle};
use crate::config::RpcConfig;
use crate::protocol::RpcMessage;
use crate::rpc::ProcedureTable;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the RPC server
#[derive(Debug, Clone)]
pub enum RpcServerEvent {
    Started { bind_addr: SocketAddr },
    PeerConnected { server_id: String, addr: SocketAddr },
    PeerDisconnected { server_id: String, reason: String },
    Stopped,
    Error { message: String },
}

/// A cluster member with an open link to us
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub server_id: String,
    pub addr: SocketAddr,
    pub handle: ConnectionHandle,
}

/// Shared state every peer task needs
#[derive(Clone)]
struct PeerContext {
    local_id: String,
    token: String,
    config: RpcConfig,
    procedures: Arc<ProcedureTable>,
    peers: Arc<RwLock<HashMap<SocketAddr, PeerInfo>>>,
    event_tx: mpsc::Sender<RpcServerEvent>,
}

pub struct RpcServer {
    context: PeerContext,
    event_rx: Option<mpsc::Receiver<RpcServerEvent>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    running: Arc<RwLock<bool>>,
}

impl RpcServer {
    pub fn new(local_id: impl Into<String>, token: impl Into<String>, config: RpcConfig, procedures: Arc<ProcedureTable>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            context: PeerContext {
                local_id: local_id.into(),
                token: token.into(),
                config,
                procedures,
                peers: Arc::new(RwLock::new(HashMap::new())),
                event_tx,
            },
            event_rx: Some(event_rx),
            shutdown_tx: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<RpcServerEvent>> {
        self.event_rx.take()
    }

    /// Start listening; returns the bound address (port 0 picks a free one)
    pub async fn start(&mut self, port: u16) -> ServerResult<SocketAddr> {
        if *self.running.read().await {
            return Err(ServerError::AlreadyRunning);
        }

        let bind_addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        tracing::info!("RPC server {} listening on {}", self.context.local_id, local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        *self.running.write().await = true;

        let _ = self
            .context
            .event_tx
            .try_send(RpcServerEvent::Started { bind_addr: local_addr });

        let context = self.context.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::debug!("New RPC connection from {}", addr);
                                let context = context.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_peer(stream, addr, context.clone()).await {
                                        tracing::warn!("RPC peer {} error: {}", addr, e);
                                        let _ = context.event_tx.try_send(RpcServerEvent::Error {
                                            message: e.to_string(),
                                        });
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("RPC server shutdown requested");
                        break;
                    }
                }
            }

            *running.write().await = false;
            let _ = context.event_tx.try_send(RpcServerEvent::Stopped);
        });

        Ok(local_addr)
    }

    /// Stop accepting and ask every peer link to close
    pub async fn stop(&mut self) -> ServerResult<()> {
        if !*self.running.read().await {
            return Err(ServerError::NotRunning);
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        let peers = self.context.peers.read().await;
        for peer in peers.values() {
            let _ = peer
                .handle
                .send(RpcMessage::Disconnect {
                    reason: "Server shutting down".to_string(),
                })
                .await;
        }

        Ok(())
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.context.peers.read().await.values().cloned().collect()
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Serve one peer link until it closes
async fn handle_peer(stream: TcpStream, addr: SocketAddr, context: PeerContext) -> Result<(), ConnectionError> {
    let _ = stream.set_nodelay(true);
    let mut conn = Connection::new(stream, addr, context.config.max_frame_size);

    let server_id = match tokio::time::timeout(
        context.config.connect_timeout(),
        conn.handshake_server(&context.local_id, &context.token),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => return Err(ConnectionError::Timeout),
    };

    let (msg_tx, mut msg_rx) = mpsc::channel::<RpcMessage>(256);
    let handle = ConnectionHandle::new(msg_tx);

    context.peers.write().await.insert(
        addr,
        PeerInfo {
            server_id: server_id.clone(),
            addr,
            handle: handle.clone(),
        },
    );
    let _ = context.event_tx.try_send(RpcServerEvent::PeerConnected {
        server_id: server_id.clone(),
        addr,
    });

    let disconnect_reason = loop {
        tokio::select! {
            result = conn.recv() => {
                match result {
                    Ok(Some(frame)) => match frame.message {
                        RpcMessage::Request { id, procedure, args } => {
                            // Calls run concurrently; replies may leave out of order
                            let procedures = Arc::clone(&context.procedures);
                            let handle = handle.clone();
                            let caller = server_id.clone();
                            tokio::spawn(async move {
                                let outcome = procedures.dispatch(&caller, &procedure, args).await;
                                if handle.send(RpcMessage::Response { id, outcome }).await.is_err() {
                                    tracing::debug!("Dropped reply {} to {}: link closed", id, caller);
                                }
                            });
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
                let closing = matches!(message, RpcMessage::Disconnect { .. });
                if let Err(e) = conn.send(&message).await {
                    break format!("Send error: {}", e);
                }
                if closing {
                    break "Server shutting down".to_string();
                }
            }
        }
    };

    handle.mark_disconnected();
    context.peers.write().await.remove(&addr);

    tracing::info!("RPC peer {} disconnected: {}", server_id, disconnect_reason);
    let _ = context.event_tx.try_send(RpcServerEvent::PeerDisconnected {
        server_id,
        reason: disconnect_reason,
    });

    let _ = conn.close("Session ended").await;

    Ok(())
}
