//! Configuration module
//!
//! Handles loading and saving the cluster file and the typed configuration
//! variants a hub accepts at runtime.

mod settings;

pub use settings::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cluster::ServerDescriptor;
use crate::protocol::{Codec, DEFAULT_MAX_FRAME_SIZE};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Setting {key} expects a {expected} value, got {found}")]
    SettingType {
        key: String,
        expected: SettingKind,
        found: String,
    },

    #[error("Server id {0} is declared more than once")]
    DuplicateServer(String),

    #[error("Command {0} is declared more than once")]
    DuplicateCommand(String),

    #[error("Frontend server {0} has no client_port")]
    MissingClientPort(String),

    #[error("Unknown server id: {0}")]
    UnknownServer(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Cluster file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Deployment environment
    #[serde(default = "default_env")]
    pub env: String,

    /// Ordered command list; a command's position is its wire index
    #[serde(default)]
    pub commands: Vec<String>,

    /// Servers grouped by type
    #[serde(default)]
    pub servers: BTreeMap<String, Vec<ServerEntry>>,

    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub connector: ConnectorConfig,

    #[serde(default)]
    pub token: TokenConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    /// Typed settings, see [`SettingKey`]
    #[serde(default)]
    pub settings: toml::Table,
}

fn default_app_name() -> String {
    "clusterhub".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            env: default_env(),
            commands: Vec::new(),
            servers: BTreeMap::new(),
            rpc: RpcConfig::default(),
            connector: ConnectorConfig::default(),
            token: TokenConfig::default(),
            ssh: SshConfig::default(),
            settings: toml::Table::new(),
        }
    }
}

/// One `[[servers.<type>]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub frontend: bool,
    pub client_port: Option<u16>,
}

/// Inter-server RPC settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Per-call reply timeout in ms
    #[serde(default = "default_rpc_timeout")]
    pub timeout_ms: u64,
    /// Link establishment timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Heartbeat interval in ms
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Maximum frame payload size
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_rpc_timeout() -> u64 {
    10_000
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_rpc_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Client connector settings (frontends only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Maximum simultaneous client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum client frame size
    #[serde(default = "default_client_frame_size")]
    pub max_frame_size: usize,
    /// Bind every accepted connection to a sequential uid
    #[serde(default)]
    pub auto_bind: bool,
}

fn default_max_connections() -> usize {
    10_000
}

fn default_client_frame_size() -> usize {
    64 * 1024
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_frame_size: default_client_frame_size(),
            auto_bind: false,
        }
    }
}

/// Shared secrets checked during handshakes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Presented by servers when opening an RPC link
    #[serde(default)]
    pub server_token: String,
    /// Presented by command-line tools
    #[serde(default)]
    pub client_token: String,
}

/// Extra arguments used when launching remote servers over ssh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default)]
    pub args: Vec<String>,
}

/// Replacement application codec
#[derive(Clone)]
pub struct CodecConfig {
    pub codec: Arc<dyn Codec>,
}

impl fmt::Debug for CodecConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecConfig").finish_non_exhaustive()
    }
}

/// One configuration variant accepted by the hub's setter
#[derive(Debug, Clone)]
pub enum HubConfig {
    Rpc(RpcConfig),
    Connector(ConnectorConfig),
    Codec(CodecConfig),
    Ssh(SshConfig),
    Token(TokenConfig),
}

impl HubConfig {
    pub fn name(&self) -> &'static str {
        match self {
            HubConfig::Rpc(_) => "rpc",
            HubConfig::Connector(_) => "connector",
            HubConfig::Codec(_) => "codec",
            HubConfig::Ssh(_) => "ssh",
            HubConfig::Token(_) => "token",
        }
    }
}

impl ClusterConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: ClusterConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            Some(PathBuf::from("./clusterhub.toml")),
            dirs::config_dir().map(|p| p.join("clusterhub/cluster.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject duplicate ids, duplicate commands and frontends without a client port
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in self.servers.values().flatten() {
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::DuplicateServer(entry.id.clone()));
            }
            if entry.frontend && entry.client_port.is_none() {
                return Err(ConfigError::MissingClientPort(entry.id.clone()));
            }
        }

        let mut commands = std::collections::HashSet::new();
        for cmd in &self.commands {
            if !commands.insert(cmd.as_str()) {
                return Err(ConfigError::DuplicateCommand(cmd.clone()));
            }
        }
        Ok(())
    }

    /// Every declared server as a descriptor
    pub fn descriptors(&self) -> Vec<ServerDescriptor> {
        self.servers
            .iter()
            .flat_map(|(server_type, entries)| {
                entries.iter().map(move |entry| ServerDescriptor {
                    id: entry.id.clone(),
                    server_type: server_type.clone(),
                    host: entry.host.clone(),
                    port: entry.port,
                    client_port: entry.client_port,
                    frontend: entry.frontend,
                })
            })
            .collect()
    }

    /// Descriptor of one declared server
    pub fn server(&self, server_id: &str) -> ConfigResult<ServerDescriptor> {
        self.descriptors()
            .into_iter()
            .find(|s| s.id == server_id)
            .ok_or_else(|| ConfigError::UnknownServer(server_id.to_string()))
    }

    /// Parse the `[settings]` table
    pub fn settings_store(&self) -> ConfigResult<SettingsStore> {
        let mut store = SettingsStore::from_table(&self.settings)?;
        if store.get(SettingKey::AppName).is_none() {
            store.set(SettingKey::AppName, SettingValue::Text(self.app_name.clone()))?;
        }
        if store.get(SettingKey::Env).is_none() {
            store.set(SettingKey::Env, SettingValue::Text(self.env.clone()))?;
        }
        Ok(store)
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let mut servers = BTreeMap::new();
    servers.insert(
        "connector".to_string(),
        vec![ServerEntry {
            id: "connector-server-1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 4021,
            frontend: true,
            client_port: Some(4001),
        }],
    );
    servers.insert(
        "logic".to_string(),
        vec![
            ServerEntry {
                id: "logic-server-1".to_string(),
                host: "127.0.0.1".to_string(),
                port: 4101,
                frontend: false,
                client_port: None,
            },
            ServerEntry {
                id: "logic-server-2".to_string(),
                host: "127.0.0.1".to_string(),
                port: 4102,
                frontend: false,
                client_port: None,
            },
        ],
    );

    let config = ClusterConfig {
        app_name: "demo".to_string(),
        commands: vec![
            "connector.main.ping".to_string(),
            "logic.main.move".to_string(),
            "onMove".to_string(),
        ],
        servers,
        connector: ConnectorConfig {
            auto_bind: true,
            ..Default::default()
        },
        token: TokenConfig {
            server_token: "change-me".to_string(),
            client_token: "change-me-too".to_string(),
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
