use thiserror::Error;

use super::ServerRole;
use crate::config::ConfigError;
use crate::protocol::CodecError;
use crate::rpc::RpcError;

/// Hub errors
///
/// None of these are fatal: the hub stays usable after returning any of them.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("{operation} cannot be used on a {role} server")]
    WrongRole {
        operation: &'static str,
        role: ServerRole,
    },

    #[error("No such command: {0}")]
    UnknownCommand(String),

    #[error("No command at index {0}")]
    UnknownCommandIndex(usize),

    #[error("No route function registered for server type {0}")]
    RouteNotConfigured(String),

    #[error("No live server of type {0}")]
    NoCandidates(String),

    #[error("Route function for {server_type} selected {selected}, which is not a live candidate")]
    RouteSelectionInvalid {
        server_type: String,
        selected: String,
    },

    #[error("Uid {0} is not bound")]
    UidNotBound(u64),

    #[error("Hub already started")]
    AlreadyStarted,

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type HubResult<T> = Result<T, HubError>;
