//! RPC link connection handling
//!
//! Manages one framed TCP link between two cluster members, including:
//! - Frame encoding/decoding
//! - The Hello/HelloAck handshake
//! - Connection state and statistics

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::protocol::{CodecError, Decoder, Encoder, Frame, RpcMessage, PROTOCOL_VERSION};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection closed")]
    Closed,

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },

    #[error("Connection timeout")]
    Timeout,

    #[error("Send channel closed")]
    SendChannelClosed,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connection established, awaiting handshake
    Connecting,
    /// Handshake complete, ready for calls
    Connected,
    /// Connection is closing gracefully
    Closing,
    /// Connection has been closed
    Closed,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// A framed RPC link to another cluster member
pub struct Connection {
    remote_addr: SocketAddr,
    stream: TcpStream,
    encoder: Encoder,
    decoder: Decoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    /// Remote server id (populated after handshake)
    remote_id: Option<String>,
    state: ConnectionState,
    last_activity: Instant,
    stats: ConnectionStats,
}

impl Connection {
    /// Wrap an established TCP stream
    pub fn new(stream: TcpStream, remote_addr: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            remote_addr,
            stream,
            encoder: Encoder::with_max_size(max_frame_size),
            decoder: Decoder::with_max_size(max_frame_size),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            remote_id: None,
            state: ConnectionState::Connecting,
            last_activity: Instant::now(),
            stats: ConnectionStats::default(),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Remote server id (if handshake completed)
    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Accept side of the handshake: check the caller's version and token
    pub async fn handshake_server(&mut self, local_id: &str, expected_token: &str) -> ConnectionResult<String> {
        let frame = self.recv().await?.ok_or_else(|| {
            ConnectionError::HandshakeFailed("Connection closed during handshake".to_string())
        })?;

        let (remote_version, remote_id, token) = match frame.message {
            RpcMessage::Hello {
                protocol_version,
                server_id,
                token,
            } => (protocol_version, server_id, token),
            _ => {
                return Err(ConnectionError::HandshakeFailed(
                    "Expected Hello message".to_string(),
                ));
            }
        };

        let rejection = if remote_version != PROTOCOL_VERSION {
            Some(format!(
                "Protocol version mismatch: expected {}, got {}",
                PROTOCOL_VERSION, remote_version
            ))
        } else if token != expected_token {
            Some("Invalid server token".to_string())
        } else {
            None
        };

        if let Some(reason) = rejection {
            self.send(&RpcMessage::HelloAck {
                protocol_version: PROTOCOL_VERSION,
                server_id: local_id.to_string(),
                accepted: false,
                reason: Some(reason.clone()),
            })
            .await?;

            if remote_version != PROTOCOL_VERSION {
                return Err(ConnectionError::VersionMismatch {
                    local: PROTOCOL_VERSION,
                    remote: remote_version,
                });
            }
            return Err(ConnectionError::HandshakeFailed(reason));
        }

        self.send(&RpcMessage::HelloAck {
            protocol_version: PROTOCOL_VERSION,
            server_id: local_id.to_string(),
            accepted: true,
            reason: None,
        })
        .await?;

        tracing::info!("RPC handshake complete with {} ({})", remote_id, self.remote_addr);
        self.remote_id = Some(remote_id.clone());
        self.state = ConnectionState::Connected;

        Ok(remote_id)
    }

    /// Dialing side of the handshake
    pub async fn handshake_client(&mut self, local_id: &str, token: &str) -> ConnectionResult<String> {
        self.send(&RpcMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            server_id: local_id.to_string(),
            token: token.to_string(),
        })
        .await?;

        let frame = self.recv().await?.ok_or_else(|| {
            ConnectionError::HandshakeFailed("Connection closed during handshake".to_string())
        })?;

        match frame.message {
            RpcMessage::HelloAck {
                protocol_version,
                server_id,
                accepted,
                reason,
            } => {
                if !accepted {
                    return Err(ConnectionError::HandshakeFailed(
                        reason.unwrap_or_else(|| "Connection rejected".to_string()),
                    ));
                }

                if protocol_version != PROTOCOL_VERSION {
                    return Err(ConnectionError::VersionMismatch {
                        local: PROTOCOL_VERSION,
                        remote: protocol_version,
                    });
                }

                tracing::info!("RPC handshake complete with {} ({})", server_id, self.remote_addr);
                self.remote_id = Some(server_id.clone());
                self.state = ConnectionState::Connected;

                Ok(server_id)
            }
            _ => Err(ConnectionError::HandshakeFailed(
                "Expected HelloAck message".to_string(),
            )),
        }
    }

    /// Send a message
    pub async fn send(&mut self, message: &RpcMessage) -> ConnectionResult<()> {
        self.write_buf.clear();
        self.encoder.encode(message, &mut self.write_buf)?;

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;
        self.last_activity = Instant::now();

        Ok(())
    }

    /// Receive a frame; `None` on a clean close
    pub async fn recv(&mut self) -> ConnectionResult<Option<Frame>> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.frames_received += 1;
                self.last_activity = Instant::now();
                return Ok(Some(frame));
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                } else {
                    return Err(ConnectionError::Closed);
                }
            }

            self.read_buf.extend_from_slice(&buf[..n]);
            self.stats.bytes_received += n as u64;
        }
    }

    /// Receive a frame with a timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> ConnectionResult<Option<Frame>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Close the connection gracefully
    pub async fn close(&mut self, reason: &str) -> ConnectionResult<()> {
        self.state = ConnectionState::Closing;

        self.send(&RpcMessage::Disconnect {
            reason: reason.to_string(),
        })
        .await?;

        self.stream.shutdown().await?;
        self.state = ConnectionState::Closed;

        Ok(())
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// A handle for queueing messages onto a connection's writer task
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<RpcMessage>,
    connected: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<RpcMessage>) -> Self {
        Self {
            sender,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Queue a message for sending
    pub async fn send(&self, message: RpcMessage) -> ConnectionResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }

        self.sender
            .send(message)
            .await
            .map_err(|_| ConnectionError::SendChannelClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
