//! Hub - the dispatch facade applications call into
//!
//! Combines:
//! - Command table (command name to wire index)
//! - Client registry (frontends only)
//! - Route table (frontends only)
//! - RPC address pool
//! - Event bus, typed settings and role-scoped activation

mod command;
mod error;
mod events;
mod registry;
mod role;
mod route;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use command::*;
pub use error::*;
pub use events::*;
pub use registry::*;
pub use role::*;
pub use route::*;
pub use session::*;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};

use crate::cluster::{Membership, ServerDescriptor};
use crate::config::{
    ClusterConfig, ConnectorConfig, HubConfig, RpcConfig, SettingKey, SettingValue, SettingsStore, SshConfig, TokenConfig,
};
use crate::lock::{read, write};
use crate::network::TcpRpcConnector;
use crate::protocol::{Codec, DefaultCodec, ForwardEnvelope, RemotePushArgs, RemotePushReply};
use crate::rpc::{ConnectOptions, Procedure, ProcedureTable, RpcConnector, RpcError, RpcPool, FORWARD, REMOTE_PUSH};

/// Severity passed to the application log sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Application log sink
pub type LogSink = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Application rows appended to the monitoring snapshot
pub type MonitorFn = Arc<dyn Fn() -> Vec<(String, String)> + Send + Sync>;

/// A client addressed through the frontend it is bound on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UidSid {
    pub uid: u64,
    pub sid: String,
}

impl UidSid {
    pub fn new(uid: u64, sid: impl Into<String>) -> Self {
        Self { uid, sid: sid.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFailure {
    pub target: UidSid,
    pub error: RpcError,
}

/// Outcome of a backend push, per target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Accepted by the frontend and written to the client
    pub delivered: Vec<UidSid>,
    /// Frontend reached, but the uid was not bound there
    pub not_bound: Vec<UidSid>,
    /// Frontend could not be reached
    pub failed: Vec<PushFailure>,
}

impl PushReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Transport options recorded through [`Hub::set_config`]
#[derive(Debug, Clone, Default)]
pub struct HubOptions {
    pub rpc: RpcConfig,
    pub connector: ConnectorConfig,
    pub token: TokenConfig,
    pub ssh: SshConfig,
}

impl From<&ClusterConfig> for HubOptions {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            rpc: config.rpc.clone(),
            connector: config.connector.clone(),
            token: config.token.clone(),
            ssh: config.ssh.clone(),
        }
    }
}

pub struct Hub {
    identity: ServerDescriptor,
    role: ServerRole,
    commands: CommandTable,
    registry: RwLock<ClientRegistry>,
    routes: RwLock<RouteTable>,
    membership: Arc<dyn Membership>,
    rpc: RpcPool,
    procedures: Arc<ProcedureTable>,
    events: EventBus,
    codec: RwLock<Arc<dyn Codec>>,
    options: RwLock<HubOptions>,
    settings: RwLock<SettingsStore>,
    log_sink: RwLock<Option<LogSink>>,
    monitor: RwLock<Option<MonitorFn>>,
    started_at: RwLock<Option<Instant>>,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("server_id", &self.identity.id)
            .field("server_type", &self.identity.server_type)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Hub`]
pub struct HubBuilder {
    identity: ServerDescriptor,
    commands: CommandTable,
    membership: Arc<dyn Membership>,
    connector: Option<Arc<dyn RpcConnector>>,
    codec: Arc<dyn Codec>,
    options: HubOptions,
    settings: SettingsStore,
}

impl HubBuilder {
    /// Connector used to open RPC links (TCP by default)
    pub fn connector(mut self, connector: Arc<dyn RpcConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn options(mut self, options: HubOptions) -> Self {
        self.options = options;
        self
    }

    pub fn settings(mut self, settings: SettingsStore) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Arc<Hub> {
        let role = ServerRole::from_frontend_flag(self.identity.frontend);
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpRpcConnector::new()));
        let connect_options = ConnectOptions {
            local_id: self.identity.id.clone(),
            rpc: self.options.rpc.clone(),
            token: self.options.token.server_token.clone(),
        };
        let rpc = RpcPool::new(Arc::clone(&self.membership), connector, connect_options);

        Arc::new_cyclic(|hub: &Weak<Hub>| {
            let procedures = Arc::new(ProcedureTable::new());
            match role {
                ServerRole::Frontend => {
                    procedures.register(REMOTE_PUSH, Arc::new(RemotePushProcedure { hub: hub.clone() }));
                }
                ServerRole::Backend => {
                    procedures.register(FORWARD, Arc::new(ForwardProcedure { hub: hub.clone() }));
                }
            }

            Hub {
                identity: self.identity,
                role,
                commands: self.commands,
                registry: RwLock::new(ClientRegistry::new()),
                routes: RwLock::new(RouteTable::new()),
                membership: self.membership,
                rpc,
                procedures,
                events: EventBus::new(),
                codec: RwLock::new(self.codec),
                options: RwLock::new(self.options),
                settings: RwLock::new(self.settings),
                log_sink: RwLock::new(None),
                monitor: RwLock::new(None),
                started_at: RwLock::new(None),
            }
        })
    }
}

impl Hub {
    /// Start building the hub of the server described by `identity`
    pub fn builder(identity: ServerDescriptor, commands: CommandTable, membership: Arc<dyn Membership>) -> HubBuilder {
        HubBuilder {
            identity,
            commands,
            membership,
            connector: None,
            codec: Arc::new(DefaultCodec),
            options: HubOptions::default(),
            settings: SettingsStore::new(),
        }
    }

    pub fn identity(&self) -> &ServerDescriptor {
        &self.identity
    }

    pub fn server_id(&self) -> &str {
        &self.identity.id
    }

    pub fn server_type(&self) -> &str {
        &self.identity.server_type
    }

    pub fn role(&self) -> ServerRole {
        self.role
    }

    pub fn is_frontend(&self) -> bool {
        self.role == ServerRole::Frontend
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn procedures(&self) -> Arc<ProcedureTable> {
        Arc::clone(&self.procedures)
    }

    pub fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&read(&self.codec))
    }

    // ---- lifecycle ----

    /// Mark the hub started. A second call fails and changes nothing.
    pub fn start(&self) -> HubResult<()> {
        {
            let mut started_at = write(&self.started_at);
            if started_at.is_some() {
                drop(started_at);
                self.log(LogLevel::Error, "the hub has already started");
                return Err(HubError::AlreadyStarted);
            }
            *started_at = Some(Instant::now());
        }
        self.log(
            LogLevel::Info,
            &format!(
                "{} server {} ({}) started",
                self.role, self.identity.id, self.identity.server_type
            ),
        );
        self.events.publish(&HubEvent::Started {
            server_id: self.identity.id.clone(),
        });
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        read(&self.started_at).is_some()
    }

    pub fn uptime(&self) -> Option<Duration> {
        read(&self.started_at).map(|t| t.elapsed())
    }

    // ---- configuration ----

    /// Apply one configuration variant
    pub fn set_config(&self, config: HubConfig) {
        tracing::debug!("Applying {} config", config.name());
        match config {
            HubConfig::Rpc(rpc) => {
                let mut options = self.rpc.options();
                options.rpc = rpc.clone();
                self.rpc.set_options(options);
                write(&self.options).rpc = rpc;
            }
            HubConfig::Token(token) => {
                let mut options = self.rpc.options();
                options.token = token.server_token.clone();
                self.rpc.set_options(options);
                write(&self.options).token = token;
            }
            HubConfig::Connector(connector) => write(&self.options).connector = connector,
            HubConfig::Ssh(ssh) => write(&self.options).ssh = ssh,
            HubConfig::Codec(codec) => *write(&self.codec) = codec.codec,
        }
    }

    pub fn options(&self) -> HubOptions {
        read(&self.options).clone()
    }

    /// Store a typed setting, returning the previous value
    pub fn set_setting(&self, key: SettingKey, value: SettingValue) -> HubResult<Option<SettingValue>> {
        Ok(write(&self.settings).set(key, value)?)
    }

    pub fn setting(&self, key: SettingKey) -> Option<SettingValue> {
        read(&self.settings).get(key).cloned()
    }

    pub fn remove_setting(&self, key: SettingKey) -> Option<SettingValue> {
        write(&self.settings).remove(key)
    }

    /// Run `init` now if this server's type matches `selector`.
    ///
    /// Accepts a parsed [`RoleSelector`] or a token: `"all"` or a
    /// `|`-separated list of server types. Returns whether `init` ran.
    pub fn activate_for_role(&self, selector: impl Into<RoleSelector>, init: impl FnOnce(&Hub)) -> bool {
        if selector.into().matches(&self.identity.server_type) {
            init(self);
            true
        } else {
            false
        }
    }

    /// Route hub diagnostics to an application sink as well as `tracing`
    pub fn on_log(&self, sink: impl Fn(LogLevel, &str) + Send + Sync + 'static) {
        *write(&self.log_sink) = Some(Arc::new(sink));
    }

    pub fn on_monitor(&self, f: impl Fn() -> Vec<(String, String)> + Send + Sync + 'static) {
        *write(&self.monitor) = Some(Arc::new(f));
    }

    /// Built-in monitoring rows followed by the application's rows
    pub fn monitor_snapshot(&self) -> Vec<(String, String)> {
        let app_name = self
            .setting(SettingKey::AppName)
            .and_then(|v| v.as_text().map(str::to_string))
            .unwrap_or_default();
        let mut rows = vec![
            ("appName".to_string(), app_name),
            ("serverId".to_string(), self.identity.id.clone()),
            ("serverType".to_string(), self.identity.server_type.clone()),
            ("role".to_string(), self.role.to_string()),
            ("boundClients".to_string(), self.bound_count().to_string()),
            (
                "uptime".to_string(),
                format!("{}s", self.uptime().map_or(0, |d| d.as_secs())),
            ),
            ("rpcLinks".to_string(), self.rpc.connected().join(",")),
        ];
        let monitor = read(&self.monitor).clone();
        if let Some(monitor) = monitor {
            rows.extend(monitor());
        }
        rows
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        let sink = read(&self.log_sink).clone();
        if let Some(sink) = sink {
            sink(level, message);
        }
    }

    fn require_role(&self, role: ServerRole, operation: &'static str) -> HubResult<()> {
        if self.role == role {
            return Ok(());
        }
        self.log(
            LogLevel::Error,
            &format!("{operation} cannot be used on {} server {}", self.role, self.identity.id),
        );
        Err(HubError::WrongRole {
            operation,
            role: self.role,
        })
    }

    fn command_index(&self, cmd: &str, operation: &str) -> HubResult<usize> {
        self.commands.resolve(cmd).ok_or_else(|| {
            self.log(LogLevel::Error, &format!("{operation}: no such command {cmd}"));
            HubError::UnknownCommand(cmd.to_string())
        })
    }

    fn encode_push(&self, cmd: &str, msg: &Value, operation: &str) -> HubResult<Bytes> {
        let cmd_index = self.command_index(cmd, operation)?;
        if read(&self.settings).flag(SettingKey::PushLogging) {
            tracing::debug!("{} {} (index {})", operation, cmd, cmd_index);
        }
        Ok(self.codec().proto_encode(cmd_index, msg)?)
    }

    // ---- membership ----

    /// Live servers of a type; empty when none
    pub fn servers_of_type(&self, server_type: &str) -> Vec<ServerDescriptor> {
        self.membership.servers_of_type(server_type)
    }

    pub fn server_by_id(&self, server_id: &str) -> Option<ServerDescriptor> {
        self.membership.server_by_id(server_id)
    }

    pub fn add_server(&self, server: ServerDescriptor) {
        tracing::info!("Server {} ({}) joined", server.id, server.server_type);
        if let Some(previous) = self.membership.add_server(server.clone()) {
            // Address may have changed
            self.rpc.evict(&previous.id);
        }
        self.events.publish(&HubEvent::ServerAdded(server));
    }

    pub fn remove_server(&self, server_id: &str) -> Option<ServerDescriptor> {
        let removed = self.membership.remove_server(server_id)?;
        tracing::info!("Server {} ({}) left", removed.id, removed.server_type);
        self.rpc.evict(server_id);
        self.events.publish(&HubEvent::ServerRemoved(removed.clone()));
        Some(removed)
    }

    // ---- routing (frontend) ----

    /// Register the route function for a backend type; the last registration wins
    pub fn route(
        &self,
        server_type: impl Into<String>,
        route: impl Fn(&Session, &str, &[ServerDescriptor]) -> String + Send + Sync + 'static,
    ) {
        let server_type = server_type.into();
        if write(&self.routes).register(server_type.clone(), Arc::new(route)) {
            tracing::debug!("Route function for {} replaced", server_type);
        }
    }

    /// Choose the backend of `server_type` that should handle this session's action
    pub fn resolve_route(&self, server_type: &str, session: &Session) -> HubResult<ServerDescriptor> {
        let candidates = self.membership.servers_of_type(server_type);
        let result = read(&self.routes).resolve(server_type, session, &candidates);
        match &result {
            Ok(target) => {
                if read(&self.settings).flag(SettingKey::RouteLogging) {
                    tracing::debug!("Routed {} action of uid {:?} to {}", server_type, session.uid, target.id);
                }
            }
            Err(e) => self.log(LogLevel::Warn, &format!("route to {server_type} failed: {e}")),
        }
        result
    }

    /// Handle a decoded client action: publish it locally when addressed to
    /// this server's type, otherwise forward it to the routed backend.
    pub async fn route_client_message(&self, session: &Session, cmd_index: usize, body: Value) -> HubResult<()> {
        self.require_role(ServerRole::Frontend, "route_client_message")?;
        let command = self
            .commands
            .name(cmd_index)
            .ok_or(HubError::UnknownCommandIndex(cmd_index))?;

        match target_server_type(command) {
            Some(server_type) if server_type != self.identity.server_type => {
                let target = self.resolve_route(server_type, session)?;
                let envelope = ForwardEnvelope {
                    sid: self.identity.id.clone(),
                    uid: session.uid,
                    settings: session.settings().clone(),
                    cmd_index,
                    body,
                };
                let data = self.codec().msg_encode(&envelope)?;
                if let Err(e) = self.rpc_call(&target.id, FORWARD, data).await {
                    self.log(LogLevel::Warn, &format!("forward of {command} to {} failed: {e}", target.id));
                    return Err(e.into());
                }
                Ok(())
            }
            _ => {
                self.events.publish(&HubEvent::ClientMessage {
                    session: session.clone(),
                    cmd_index,
                    command: command.to_string(),
                    body,
                });
                Ok(())
            }
        }
    }

    fn accept_forward(&self, caller: &str, data: &[u8]) -> HubResult<()> {
        let envelope = self.codec().msg_decode(data)?;
        let command = self
            .commands
            .name(envelope.cmd_index)
            .ok_or(HubError::UnknownCommandIndex(envelope.cmd_index))?
            .to_string();
        tracing::debug!("{} forwarded {} for uid {:?}", caller, command, envelope.uid);
        self.events.publish(&HubEvent::ClientMessage {
            session: Session::from_parts(envelope.sid, envelope.uid, envelope.settings),
            cmd_index: envelope.cmd_index,
            command,
            body: envelope.body,
        });
        Ok(())
    }

    // ---- client registry (frontend) ----

    /// Bind a uid to a connection.
    ///
    /// An existing bind of the uid is replaced and its connection returned
    /// unclosed; closing it is the caller's job.
    pub fn bind(
        &self,
        uid: u64,
        connection: Arc<dyn ClientConnection>,
        session: Session,
    ) -> HubResult<Option<Arc<dyn ClientConnection>>> {
        self.require_role(ServerRole::Frontend, "bind")?;
        let connection_id = connection.id();
        let replaced = write(&self.registry).bind(uid, connection, session);
        if replaced.is_some() {
            self.log(LogLevel::Warn, &format!("uid {uid} rebound; previous connection left open"));
        }
        self.events.publish(&HubEvent::ClientBound { uid, connection_id });
        Ok(replaced.map(|c| c.connection))
    }

    /// Remove a bind; no-op if absent
    pub fn unbind(&self, uid: u64) -> bool {
        let removed = write(&self.registry).unbind(uid).is_some();
        if removed {
            self.events.publish(&HubEvent::ClientUnbound { uid });
        }
        removed
    }

    /// Remove a bind only if it still belongs to `connection_id`
    pub fn unbind_if_current(&self, uid: u64, connection_id: u64) -> bool {
        let removed = write(&self.registry).unbind_if_current(uid, connection_id);
        if removed {
            self.events.publish(&HubEvent::ClientUnbound { uid });
        }
        removed
    }

    pub fn has_client(&self, uid: u64) -> bool {
        read(&self.registry).contains(uid)
    }

    pub fn bound_count(&self) -> usize {
        read(&self.registry).count()
    }

    /// Session of a bound client
    pub fn client_session(&self, uid: u64) -> HubResult<Session> {
        read(&self.registry)
            .get(uid)
            .map(|c| c.session.clone())
            .ok_or(HubError::UidNotBound(uid))
    }

    /// Ask the transport to close a bound client; no-op if unbound
    pub fn close_client(&self, uid: u64) {
        let connection = read(&self.registry).connection(uid);
        if let Some(connection) = connection {
            connection.close();
        }
    }

    /// Merge into a bound client's session; silently ignored if unbound
    pub fn apply_session(&self, uid: u64, partial: HashMap<String, Value>) {
        if !write(&self.registry).apply_session(uid, partial) {
            tracing::debug!("apply_session for unbound uid {}", uid);
        }
    }

    // ---- push ----

    /// Push to clients bound on this frontend. Unbound uids are skipped.
    ///
    /// Returns how many clients the message was written to.
    pub fn push_by_uid(&self, cmd: &str, msg: &Value, uids: &[u64]) -> HubResult<usize> {
        self.require_role(ServerRole::Frontend, "push_by_uid")?;
        let data = self.encode_push(cmd, msg, "push_by_uid")?;

        let connections: Vec<Arc<dyn ClientConnection>> = {
            let registry = read(&self.registry);
            uids.iter().filter_map(|uid| registry.connection(*uid)).collect()
        };
        for connection in &connections {
            connection.send(data.clone());
        }
        Ok(connections.len())
    }

    /// Push to every client bound when the call starts
    pub fn push_to_all(&self, cmd: &str, msg: &Value) -> HubResult<usize> {
        self.require_role(ServerRole::Frontend, "push_to_all")?;
        let data = self.encode_push(cmd, msg, "push_to_all")?;

        let connections = read(&self.registry).snapshot();
        for connection in &connections {
            connection.send(data.clone());
        }
        Ok(connections.len())
    }

    /// Push to clients bound on other frontends.
    ///
    /// Targets are grouped per frontend and each frontend is called once.
    /// An unreachable frontend fails its own targets without stopping the others.
    pub async fn push_by_uid_and_sid(&self, cmd: &str, msg: &Value, targets: &[UidSid]) -> HubResult<PushReport> {
        self.require_role(ServerRole::Backend, "push_by_uid_and_sid")?;
        let data = self.encode_push(cmd, msg, "push_by_uid_and_sid")?.to_vec();

        let mut groups: Vec<(&str, Vec<u64>)> = Vec::new();
        for target in targets {
            match groups.iter_mut().find(|(sid, _)| *sid == target.sid) {
                Some((_, uids)) => uids.push(target.uid),
                None => groups.push((target.sid.as_str(), vec![target.uid])),
            }
        }

        let calls = groups.iter().map(|(sid, uids)| self.remote_push(sid, uids, &data));
        let replies = futures::future::join_all(calls).await;

        let mut report = PushReport::default();
        for ((sid, uids), reply) in groups.iter().zip(replies) {
            match reply {
                Ok(reply) => {
                    for uid in uids {
                        let target = UidSid::new(*uid, *sid);
                        if reply.not_bound.contains(uid) {
                            report.not_bound.push(target);
                        } else {
                            report.delivered.push(target);
                        }
                    }
                }
                Err(error) => {
                    self.log(LogLevel::Warn, &format!("push to {sid} failed: {error}"));
                    report.failed.extend(uids.iter().map(|uid| PushFailure {
                        target: UidSid::new(*uid, *sid),
                        error: error.clone(),
                    }));
                }
            }
        }
        Ok(report)
    }

    async fn remote_push(&self, sid: &str, uids: &[u64], data: &[u8]) -> Result<RemotePushReply, RpcError> {
        let args = bincode::serialize(&RemotePushArgs {
            uids: uids.to_vec(),
            data: data.to_vec(),
        })?;
        let reply = self.rpc_call(sid, REMOTE_PUSH, args).await?;
        Ok(bincode::deserialize(&reply)?)
    }

    /// Write an already-encoded push to local clients, reporting unbound uids
    pub fn deliver_remote_push(&self, args: RemotePushArgs) -> RemotePushReply {
        let data = Bytes::from(args.data);
        let mut reply = RemotePushReply::default();
        let connections: Vec<Arc<dyn ClientConnection>> = {
            let registry = read(&self.registry);
            args.uids
                .iter()
                .filter_map(|uid| {
                    let connection = registry.connection(*uid);
                    if connection.is_none() {
                        reply.not_bound.push(*uid);
                    }
                    connection
                })
                .collect()
        };
        for connection in &connections {
            connection.send(data.clone());
        }
        reply
    }

    // ---- rpc ----

    /// Expose an application procedure on this server's RPC listener
    pub fn register_procedure(&self, name: impl Into<String>, procedure: Arc<dyn Procedure>) {
        let name = name.into();
        if self.procedures.register(name.clone(), procedure) {
            tracing::warn!("Procedure {} replaced", name);
        }
    }

    /// Invoke a procedure on another server
    pub async fn invoke(&self, server_id: &str, procedure: &str, args: Vec<u8>) -> HubResult<Vec<u8>> {
        self.rpc_call(server_id, procedure, args).await.map_err(|e| {
            self.log(LogLevel::Warn, &format!("rpc {procedure} on {server_id} failed: {e}"));
            HubError::from(e)
        })
    }

    async fn rpc_call(&self, server_id: &str, procedure: &str, args: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let started = Instant::now();
        let result = self.rpc.invoke(server_id, procedure, args).await;
        let slow_ms = read(&self.settings)
            .integer(SettingKey::SlowRpcMs)
            .and_then(|ms| u64::try_from(ms).ok());
        if let Some(slow_ms) = slow_ms {
            let elapsed = started.elapsed();
            if elapsed >= Duration::from_millis(slow_ms) {
                self.log(
                    LogLevel::Warn,
                    &format!("slow rpc {procedure} on {server_id}: {}ms", elapsed.as_millis()),
                );
            }
        }
        result
    }
}

/// `__remotePush`, exposed by frontends
struct RemotePushProcedure {
    hub: Weak<Hub>,
}

#[async_trait]
impl Procedure for RemotePushProcedure {
    async fn call(&self, caller: &str, args: Vec<u8>) -> Result<Vec<u8>, String> {
        let hub = self.hub.upgrade().ok_or("hub is shutting down")?;
        let args: RemotePushArgs = bincode::deserialize(&args).map_err(|e| e.to_string())?;
        tracing::trace!("{} pushes to {} uids", caller, args.uids.len());
        let reply = hub.deliver_remote_push(args);
        bincode::serialize(&reply).map_err(|e| e.to_string())
    }
}

/// `__forward`, exposed by backends
struct ForwardProcedure {
    hub: Weak<Hub>,
}

#[async_trait]
impl Procedure for ForwardProcedure {
    async fn call(&self, caller: &str, args: Vec<u8>) -> Result<Vec<u8>, String> {
        let hub = self.hub.upgrade().ok_or("hub is shutting down")?;
        hub.accept_forward(caller, &args).map_err(|e| e.to_string())?;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests;
