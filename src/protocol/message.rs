//! RPC message definitions
//!
//! Defines all message types exchanged between cluster members over the
//! inter-server RPC link.

use serde::{Deserialize, Serialize};

/// Result of a remote procedure call as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcOutcome {
    /// The procedure ran and produced an encoded reply
    Ok(Vec<u8>),
    /// No procedure with this name is registered on the remote side
    UnknownProcedure(String),
    /// The procedure ran and failed
    Failed(String),
}

/// All possible RPC link messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcMessage {
    /// Handshake - sent by the dialing side on connection establishment
    Hello {
        protocol_version: u32,
        server_id: String,
        token: String,
    },

    /// Acknowledgment of Hello
    HelloAck {
        protocol_version: u32,
        server_id: String,
        accepted: bool,
        reason: Option<String>,
    },

    /// Invoke a named procedure on the remote side
    Request {
        id: u64,
        procedure: String,
        args: Vec<u8>,
    },

    /// Reply to a Request with the same id
    Response {
        id: u64,
        outcome: RpcOutcome,
    },

    /// Heartbeat to keep the link alive
    Heartbeat {
        timestamp: u64,
    },

    /// Response to heartbeat
    HeartbeatAck {
        timestamp: u64,
    },

    /// Graceful disconnect
    Disconnect {
        reason: String,
    },
}

impl RpcMessage {
    /// Get the message type identifier
    pub fn type_id(&self) -> u8 {
        match self {
            RpcMessage::Hello { .. } => 0x01,
            RpcMessage::HelloAck { .. } => 0x02,
            RpcMessage::Request { .. } => 0x10,
            RpcMessage::Response { .. } => 0x11,
            RpcMessage::Heartbeat { .. } => 0xF0,
            RpcMessage::HeartbeatAck { .. } => 0xF1,
            RpcMessage::Disconnect { .. } => 0xFE,
        }
    }

    /// Check if this message belongs to a procedure call
    pub fn is_call(&self) -> bool {
        matches!(self, RpcMessage::Request { .. } | RpcMessage::Response { .. })
    }
}

/// Arguments of the built-in remote push procedure.
///
/// A backend batches every uid bound on the same frontend into one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePushArgs {
    pub uids: Vec<u64>,
    /// Message already encoded by the sender's codec
    pub data: Vec<u8>,
}

/// Reply of the built-in remote push procedure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePushReply {
    /// Uids that were not bound on the frontend (skipped)
    pub not_bound: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_ids() {
        let msg = RpcMessage::Heartbeat { timestamp: 0 };
        assert_eq!(msg.type_id(), 0xF0);
        let msg = RpcMessage::Request {
            id: 1,
            procedure: "x".to_string(),
            args: Vec::new(),
        };
        assert_eq!(msg.type_id(), 0x10);
        assert!(msg.is_call());
    }

    #[test]
    fn test_remote_push_reply_default_is_empty() {
        assert!(RemotePushReply::default().not_bound.is_empty());
    }
}
