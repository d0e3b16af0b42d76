//! RPC addressing
//!
//! One logical link per remote server id, opened lazily through an
//! [`RpcConnector`]. Retry policy belongs to the connector; the pool only
//! reports failures to its caller.

mod pool;
mod procedure;

pub use pool::*;
pub use procedure::*;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::cluster::ServerDescriptor;
use crate::config::RpcConfig;

/// Procedure a frontend exposes so backends can push to its bound clients
pub const REMOTE_PUSH: &str = "__remotePush";

/// Procedure a backend exposes to receive client actions routed to it
pub const FORWARD: &str = "__forward";

/// RPC errors
///
/// Cloneable so one link failure can be reported against every target it affected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("Server {server_id} unavailable: {reason}")]
    Unavailable { server_id: String, reason: String },

    #[error("Call to {server_id} timed out")]
    Timeout { server_id: String },

    #[error("Unknown procedure: {0}")]
    UnknownProcedure(String),

    #[error("Remote failure: {0}")]
    Remote(String),

    #[error("Link closed")]
    Closed,

    #[error("Handshake rejected: {0}")]
    Rejected(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

pub type RpcResult<T> = Result<T, RpcError>;

impl From<bincode::Error> for RpcError {
    fn from(e: bincode::Error) -> Self {
        RpcError::Codec(e.to_string())
    }
}

/// Settings a connector needs to open a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Id presented in the handshake
    pub local_id: String,
    pub rpc: RpcConfig,
    /// Shared server token presented in the handshake
    pub token: String,
}

/// An open link to one remote server
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Invoke a procedure and wait for its reply
    async fn call(&self, procedure: &str, args: Vec<u8>) -> RpcResult<Vec<u8>>;

    /// Whether the link can still carry calls
    fn is_alive(&self) -> bool;
}

/// Opens links to remote servers
#[async_trait]
pub trait RpcConnector: Send + Sync {
    async fn connect(&self, target: &ServerDescriptor, options: &ConnectOptions) -> RpcResult<Arc<dyn RpcChannel>>;
}
