//! Typed settings store
//!
//! Every setting has a fixed key and a declared value kind. Unknown keys
//! are rejected when parsed from text, and a value of the wrong kind is
//! rejected on `set`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::{ConfigError, ConfigResult};

/// Known setting keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// Application name shown in logs and monitoring
    AppName,
    /// Deployment environment name
    Env,
    /// Log every outbound push at debug level
    PushLogging,
    /// Log every route selection at debug level
    RouteLogging,
    /// Warn about RPC calls that take at least this many milliseconds
    SlowRpcMs,
}

/// Value kind a key accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Text,
    Integer,
    Flag,
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingKind::Text => "text",
            SettingKind::Integer => "integer",
            SettingKind::Flag => "flag",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Text(String),
    Integer(i64),
    Flag(bool),
}

impl SettingValue {
    pub fn kind(&self) -> SettingKind {
        match self {
            SettingValue::Text(_) => SettingKind::Text,
            SettingValue::Integer(_) => SettingKind::Integer,
            SettingValue::Flag(_) => SettingKind::Flag,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SettingValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            SettingValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert a TOML value; tables, arrays and floats have no setting kind
    pub fn from_toml(value: &toml::Value) -> Option<Self> {
        match value {
            toml::Value::String(s) => Some(SettingValue::Text(s.clone())),
            toml::Value::Integer(i) => Some(SettingValue::Integer(*i)),
            toml::Value::Boolean(b) => Some(SettingValue::Flag(*b)),
            _ => None,
        }
    }
}

impl SettingKey {
    pub const ALL: [SettingKey; 5] = [
        SettingKey::AppName,
        SettingKey::Env,
        SettingKey::PushLogging,
        SettingKey::RouteLogging,
        SettingKey::SlowRpcMs,
    ];

    pub fn kind(&self) -> SettingKind {
        match self {
            SettingKey::AppName | SettingKey::Env => SettingKind::Text,
            SettingKey::PushLogging | SettingKey::RouteLogging => SettingKind::Flag,
            SettingKey::SlowRpcMs => SettingKind::Integer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::AppName => "app_name",
            SettingKey::Env => "env",
            SettingKey::PushLogging => "push_logging",
            SettingKey::RouteLogging => "route_logging",
            SettingKey::SlowRpcMs => "slow_rpc_ms",
        }
    }
}

impl FromStr for SettingKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownSetting(s.to_string()))
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings keyed by [`SettingKey`]
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    values: HashMap<SettingKey, SettingValue>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a `[settings]` table
    pub fn from_table<'a>(
        entries: impl IntoIterator<Item = (&'a String, &'a toml::Value)>,
    ) -> ConfigResult<Self> {
        let mut store = Self::new();
        for (name, raw) in entries {
            let key: SettingKey = name.parse()?;
            let value = SettingValue::from_toml(raw).ok_or_else(|| ConfigError::SettingType {
                key: key.to_string(),
                expected: key.kind(),
                found: raw.type_str().to_string(),
            })?;
            store.set(key, value)?;
        }
        Ok(store)
    }

    /// Store a value, returning the previous one
    pub fn set(&mut self, key: SettingKey, value: SettingValue) -> ConfigResult<Option<SettingValue>> {
        if value.kind() != key.kind() {
            return Err(ConfigError::SettingType {
                key: key.to_string(),
                expected: key.kind(),
                found: value.kind().to_string(),
            });
        }
        Ok(self.values.insert(key, value))
    }

    pub fn get(&self, key: SettingKey) -> Option<&SettingValue> {
        self.values.get(&key)
    }

    pub fn remove(&mut self, key: SettingKey) -> Option<SettingValue> {
        self.values.remove(&key)
    }

    /// Flag value, `false` when unset
    pub fn flag(&self, key: SettingKey) -> bool {
        self.get(key).and_then(SettingValue::as_flag).unwrap_or(false)
    }

    pub fn integer(&self, key: SettingKey) -> Option<i64> {
        self.get(key).and_then(SettingValue::as_integer)
    }
}
