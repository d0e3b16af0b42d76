//! Cluster membership
//!
//! Describes the members of the cluster and answers the two questions the
//! hub asks of membership: which servers of a type are live, and where does
//! a given server id live.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::lock::{read, write};

/// Immutable description of one cluster member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Unique server identifier (the `sid` of frontends)
    pub id: String,
    /// Server type, e.g. "connector" or "logic"
    pub server_type: String,
    pub host: String,
    /// Port of the inter-server RPC listener
    pub port: u16,
    /// Port clients connect to (frontends only)
    pub client_port: Option<u16>,
    /// Whether this server terminates client connections
    pub frontend: bool,
}

impl ServerDescriptor {
    pub fn new(id: impl Into<String>, server_type: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            server_type: server_type.into(),
            host: host.into(),
            port,
            client_port: None,
            frontend: false,
        }
    }

    pub fn frontend(mut self, client_port: u16) -> Self {
        self.frontend = true;
        self.client_port = Some(client_port);
        self
    }

    /// `host:port` of the RPC listener
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Source of live cluster membership
pub trait Membership: Send + Sync {
    /// Live servers of a type; empty when none are known
    fn servers_of_type(&self, server_type: &str) -> Vec<ServerDescriptor>;

    fn server_by_id(&self, server_id: &str) -> Option<ServerDescriptor>;

    /// Add or replace a member. Returns the replaced descriptor, if any.
    fn add_server(&self, server: ServerDescriptor) -> Option<ServerDescriptor>;

    fn remove_server(&self, server_id: &str) -> Option<ServerDescriptor>;
}

/// Membership backed by an in-memory table, seeded from the cluster file
#[derive(Debug, Default)]
pub struct StaticMembership {
    servers: RwLock<HashMap<String, ServerDescriptor>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_servers(servers: impl IntoIterator<Item = ServerDescriptor>) -> Self {
        let membership = Self::new();
        for server in servers {
            membership.add_server(server);
        }
        membership
    }

    /// All members grouped by type, in id order
    pub fn by_type(&self) -> BTreeMap<String, Vec<ServerDescriptor>> {
        let mut grouped: BTreeMap<String, Vec<ServerDescriptor>> = BTreeMap::new();
        for server in read(&self.servers).values() {
            grouped
                .entry(server.server_type.clone())
                .or_default()
                .push(server.clone());
        }
        for servers in grouped.values_mut() {
            servers.sort_by(|a, b| a.id.cmp(&b.id));
        }
        grouped
    }
}

impl Membership for StaticMembership {
    fn servers_of_type(&self, server_type: &str) -> Vec<ServerDescriptor> {
        let mut servers: Vec<ServerDescriptor> = read(&self.servers)
            .values()
            .filter(|s| s.server_type == server_type)
            .cloned()
            .collect();
        // Stable candidate order so route functions see the same list on every process
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    fn server_by_id(&self, server_id: &str) -> Option<ServerDescriptor> {
        read(&self.servers).get(server_id).cloned()
    }

    fn add_server(&self, server: ServerDescriptor) -> Option<ServerDescriptor> {
        write(&self.servers).insert(server.id.clone(), server)
    }

    fn remove_server(&self, server_id: &str) -> Option<ServerDescriptor> {
        write(&self.servers).remove(server_id)
    }
}
