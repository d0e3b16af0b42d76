//! RPC frame codec
//!
//! Handles serialization and framing of RPC link messages.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use thiserror::Error;

use super::{RpcMessage, MAGIC_BYTES};

/// Default maximum frame payload size (10 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Header size: magic(4) + type(1) + length(4) + sequence(4) = 13 bytes
const HEADER_SIZE: usize = 13;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Message too large: {0} bytes (max: {1})")]
    MessageTooLarge(usize, usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Truncated payload: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("Command index {0} does not fit the wire format")]
    IndexOverflow(usize),
}

/// Message frame with metadata
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number for ordering
    pub sequence: u32,
    /// The actual message
    pub message: RpcMessage,
}

impl Frame {
    pub fn new(sequence: u32, message: RpcMessage) -> Self {
        Self { sequence, message }
    }
}

/// Encodes RPC messages into the wire format
pub struct Encoder {
    sequence: u32,
    max_size: usize,
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            sequence: 0,
            max_size,
        }
    }

    /// Encode a message into a buffer
    pub fn encode(&mut self, message: &RpcMessage, buf: &mut BytesMut) -> Result<(), CodecError> {
        let payload = bincode::serialize(message)?;

        if payload.len() > self.max_size {
            return Err(CodecError::MessageTooLarge(payload.len(), self.max_size));
        }

        buf.put_slice(&MAGIC_BYTES);
        buf.put_u8(message.type_id());
        buf.put_u32(payload.len() as u32);
        buf.put_u32(self.sequence);
        buf.put_slice(&payload);

        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes RPC messages from the wire format
pub struct Decoder {
    state: DecodeState,
    max_size: usize,
}

#[derive(Default)]
enum DecodeState {
    #[default]
    Header,
    Payload {
        length: usize,
        sequence: u32,
    },
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            state: DecodeState::Header,
            max_size,
        }
    }

    /// Attempt to decode a frame from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        loop {
            match &self.state {
                DecodeState::Header => {
                    if buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    if buf[0..4] != MAGIC_BYTES {
                        return Err(CodecError::InvalidMagic);
                    }

                    let length = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
                    let sequence = u32::from_be_bytes([buf[9], buf[10], buf[11], buf[12]]);

                    if length > self.max_size {
                        return Err(CodecError::MessageTooLarge(length, self.max_size));
                    }

                    buf.advance(HEADER_SIZE);

                    self.state = DecodeState::Payload { length, sequence };
                }
                DecodeState::Payload { length, sequence } => {
                    if buf.len() < *length {
                        return Ok(None);
                    }

                    let payload = buf.split_to(*length);
                    let message: RpcMessage = bincode::deserialize(&payload)?;
                    let seq = *sequence;

                    self.state = DecodeState::Header;

                    return Ok(Some(Frame::new(seq, message)));
                }
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
