//! Protocol module - Defines the wire formats used by the hub
//!
//! The inter-server RPC link uses a simple binary frame:
//! - 4 bytes magic
//! - 1 byte message type
//! - 4 bytes payload length (big-endian)
//! - 4 bytes sequence number (big-endian)
//! - Variable length bincode payload
//!
//! Client-facing payloads go through the [`Codec`] trait.

mod app_codec;
mod codec;
mod message;

pub use app_codec::*;
pub use codec::*;
pub use message::*;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Default port for the inter-server RPC link
pub const DEFAULT_RPC_PORT: u16 = 4010;

/// Magic bytes for protocol identification
pub const MAGIC_BYTES: [u8; 4] = [0x43, 0x48, 0x55, 0x42]; // "CHUB"
