//! Client connector
//!
//! TCP listener a frontend exposes to game clients. Frames on the wire are
//! `len: u32 (BE) | payload`, where the payload is produced and consumed by
//! the hub's application [`Codec`](crate::protocol::Codec).

use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};

use super::server::{ServerError, ServerResult};
use crate::config::ConnectorConfig;
use crate::hub::{ClientConnection, Hub, Session};

enum Outbound {
    Frame(Bytes),
    Close,
}

/// Transport side of one client connection
pub struct TcpClientHandle {
    id: u64,
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: Notify,
}

impl TcpClientHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl ClientConnection for TcpClientHandle {
    fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, data: Bytes) {
        if self.outbound.send(Outbound::Frame(data)).is_err() {
            tracing::debug!("Dropped frame for closed client connection {}", self.id);
        }
    }

    fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
        self.closed.notify_one();
    }
}

/// Accepts client connections for a frontend hub
pub struct ClientConnector {
    hub: Arc<Hub>,
    config: ConnectorConfig,
    active: Arc<AtomicUsize>,
    next_connection_id: Arc<AtomicU64>,
    next_uid: Arc<AtomicU64>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl ClientConnector {
    pub fn new(hub: Arc<Hub>, config: ConnectorConfig) -> Self {
        Self {
            hub,
            config,
            active: Arc::new(AtomicUsize::new(0)),
            next_connection_id: Arc::new(AtomicU64::new(1)),
            next_uid: Arc::new(AtomicU64::new(1)),
            shutdown_tx: None,
        }
    }

    /// Open client connections, bound or not
    pub fn client_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Start listening; returns the bound address (port 0 picks a free one)
    pub async fn start(&mut self, port: u16) -> ServerResult<SocketAddr> {
        if self.shutdown_tx.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let bind_addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Client connector of {} listening on {}", self.hub.server_id(), local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let hub = Arc::clone(&self.hub);
        let config = self.config.clone();
        let active = Arc::clone(&self.active);
        let next_connection_id = Arc::clone(&self.next_connection_id);
        let next_uid = Arc::clone(&self.next_uid);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let (stream, addr) = match result {
                            Ok(accepted) => accepted,
                            Err(e) => {
                                tracing::error!("Client accept error: {}", e);
                                continue;
                            }
                        };

                        if active.load(Ordering::SeqCst) >= config.max_connections {
                            tracing::warn!(
                                "Refusing client {}: connection limit {} reached",
                                addr,
                                config.max_connections
                            );
                            drop(stream);
                            continue;
                        }
                        active.fetch_add(1, Ordering::SeqCst);

                        let id = next_connection_id.fetch_add(1, Ordering::SeqCst);
                        let uid = config
                            .auto_bind
                            .then(|| next_uid.fetch_add(1, Ordering::SeqCst));
                        let hub = Arc::clone(&hub);
                        let active = Arc::clone(&active);
                        let max_frame_size = config.max_frame_size;

                        tokio::spawn(async move {
                            serve_client(stream, addr, hub, id, uid, max_frame_size).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Client connector shutdown requested");
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Stop accepting new clients; open connections are left alone
    pub async fn stop(&mut self) -> ServerResult<()> {
        match self.shutdown_tx.take() {
            Some(tx) => {
                let _ = tx.send(()).await;
                Ok(())
            }
            None => Err(ServerError::NotRunning),
        }
    }
}

async fn serve_client(stream: TcpStream, addr: SocketAddr, hub: Arc<Hub>, id: u64, uid: Option<u64>, max_frame_size: usize) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

    let handle = Arc::new(TcpClientHandle {
        id,
        addr,
        outbound: outbound_tx,
        closed: Notify::new(),
    });

    let writer_task = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Frame(data) => {
                    if let Err(e) = write_frame(&mut writer, &data).await {
                        tracing::debug!("Client connection {} write error: {}", id, e);
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = writer.shutdown().await;
    });

    tracing::debug!("Client connection {} from {}", id, addr);

    if let Some(uid) = uid {
        let connection: Arc<dyn ClientConnection> = handle.clone();
        if let Err(e) = hub.bind(uid, connection, Session::new(hub.server_id())) {
            tracing::error!("Auto-bind of uid {} failed: {}", uid, e);
        }
    }

    loop {
        let payload = tokio::select! {
            result = read_frame(&mut reader, max_frame_size) => match result {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Client connection {} read error: {}", id, e);
                    break;
                }
            },
            _ = handle.closed.notified() => break,
        };

        let (cmd_index, body) = match hub.codec().proto_decode(&payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("Undecodable frame from client connection {}: {}", id, e);
                continue;
            }
        };

        let session = uid
            .and_then(|uid| hub.client_session(uid).ok())
            .unwrap_or_else(|| Session::new(hub.server_id()));
        if let Err(e) = hub.route_client_message(&session, cmd_index, body).await {
            tracing::debug!("Client message {} from connection {} not routed: {}", cmd_index, id, e);
        }
    }

    if let Some(uid) = uid {
        hub.unbind_if_current(uid, id);
    }
    handle.close();
    let _ = writer_task.await;
    tracing::debug!("Client connection {} closed", id);
}

/// Read one length-prefixed frame; `None` on a clean close
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_frame_size: usize) -> io::Result<Option<Vec<u8>>> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > max_frame_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit {}", len, max_frame_size),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one length-prefixed frame
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_u32(len).await?;
    writer.write_all(data).await?;
    writer.flush().await
}
