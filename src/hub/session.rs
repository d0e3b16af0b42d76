//! Client session
//!
//! Opaque key-value carrier attached to a client connection. The hub never
//! interprets the settings; it hands the session to route functions and
//! copies it into forwarded envelopes.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// Bound uid, set once the client completes the bind handshake
    pub uid: Option<u64>,
    /// Frontend holding the connection
    pub sid: String,
    settings: HashMap<String, Value>,
}

impl Session {
    pub fn new(sid: impl Into<String>) -> Self {
        Self {
            uid: None,
            sid: sid.into(),
            settings: HashMap::new(),
        }
    }

    /// Rebuild a session from a forwarded envelope
    pub fn from_parts(sid: impl Into<String>, uid: Option<u64>, settings: HashMap<String, Value>) -> Self {
        Self {
            uid,
            sid: sid.into(),
            settings,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.settings.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.settings.remove(key)
    }

    /// Merge a partial update; keys not present in `partial` are kept
    pub fn set_some(&mut self, partial: HashMap<String, Value>) {
        self.settings.extend(partial);
    }

    pub fn settings(&self) -> &HashMap<String, Value> {
        &self.settings
    }
}
