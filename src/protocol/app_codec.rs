//! Application message codec
//!
//! Encodes client-facing pushes (`proto_*`) and the routing envelopes a
//! frontend forwards to backends (`msg_*`). The hub calls `proto_encode`
//! before every push and never writes an unencoded message to a connection.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::CodecError;

/// Envelope carrying a client action from a frontend to the backend chosen
/// by the route table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardEnvelope {
    /// Frontend the client is connected to
    pub sid: String,
    /// Bound uid, if the client has completed the bind handshake
    pub uid: Option<u64>,
    /// Snapshot of the client's session settings
    pub settings: HashMap<String, Value>,
    pub cmd_index: usize,
    pub body: Value,
}

/// Encoder/decoder pair used by the hub
pub trait Codec: Send + Sync {
    /// Encode a command index and message for delivery to a client
    fn proto_encode(&self, cmd_index: usize, msg: &Value) -> Result<Bytes, CodecError>;

    /// Decode a client frame payload into its command index and message
    fn proto_decode(&self, data: &[u8]) -> Result<(usize, Value), CodecError>;

    /// Encode a routing envelope
    fn msg_encode(&self, envelope: &ForwardEnvelope) -> Result<Vec<u8>, CodecError>;

    /// Decode a routing envelope
    fn msg_decode(&self, data: &[u8]) -> Result<ForwardEnvelope, CodecError>;
}

/// Two-byte big-endian command index followed by a JSON body.
///
/// An empty body decodes to `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodec;

const INDEX_SIZE: usize = 2;

impl Codec for DefaultCodec {
    fn proto_encode(&self, cmd_index: usize, msg: &Value) -> Result<Bytes, CodecError> {
        let index = u16::try_from(cmd_index).map_err(|_| CodecError::IndexOverflow(cmd_index))?;
        let body = serde_json::to_vec(msg)?;

        let mut buf = BytesMut::with_capacity(INDEX_SIZE + body.len());
        buf.put_u16(index);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    fn proto_decode(&self, data: &[u8]) -> Result<(usize, Value), CodecError> {
        if data.len() < INDEX_SIZE {
            return Err(CodecError::Truncated {
                need: INDEX_SIZE,
                got: data.len(),
            });
        }
        let index = u16::from_be_bytes([data[0], data[1]]) as usize;
        let body = &data[INDEX_SIZE..];
        let msg = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(body)?
        };
        Ok((index, msg))
    }

    // The body is a `Value`, which bincode cannot decode
    fn msg_encode(&self, envelope: &ForwardEnvelope) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn msg_decode(&self, data: &[u8]) -> Result<ForwardEnvelope, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_proto_layout() {
        let codec = DefaultCodec;
        let bytes = codec.proto_encode(258, &json!({"hp": 10})).unwrap();
        assert_eq!(&bytes[..2], &[0x01, 0x02]);

        let (index, msg) = codec.proto_decode(&bytes).unwrap();
        assert_eq!(index, 258);
        assert_eq!(msg["hp"], 10);
    }

    #[test]
    fn test_empty_body_is_null() {
        let (index, msg) = DefaultCodec.proto_decode(&[0, 3]).unwrap();
        assert_eq!(index, 3);
        assert!(msg.is_null());
    }

    #[test]
    fn test_truncated_payload() {
        assert!(matches!(
            DefaultCodec.proto_decode(&[1]),
            Err(CodecError::Truncated { need: 2, got: 1 })
        ));
    }

    #[test]
    fn test_index_overflow() {
        assert!(matches!(
            DefaultCodec.proto_encode(70_000, &Value::Null),
            Err(CodecError::IndexOverflow(70_000))
        ));
    }

    #[test]
    fn test_envelope_keeps_session_settings() {
        let mut settings = HashMap::new();
        settings.insert("room".to_string(), json!(4));
        let envelope = ForwardEnvelope {
            sid: "connector-1".to_string(),
            uid: Some(9),
            settings,
            cmd_index: 2,
            body: json!(["a"]),
        };
        let data = DefaultCodec.msg_encode(&envelope).unwrap();
        assert_eq!(DefaultCodec.msg_decode(&data).unwrap(), envelope);
    }

    #[test]
    fn test_envelope_is_json() {
        let envelope = ForwardEnvelope {
            sid: "connector-2".to_string(),
            uid: None,
            settings: HashMap::new(),
            cmd_index: 1,
            body: json!({"to": [1, 2], "text": "hi"}),
        };
        let data = DefaultCodec.msg_encode(&envelope).unwrap();
        let raw: Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(raw["sid"], "connector-2");
        assert_eq!(raw["body"]["text"], "hi");
        assert!(raw["uid"].is_null());
    }
}
