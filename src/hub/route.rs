//! Route table
//!
//! Per-server-type selection functions used by a frontend to pick the
//! backend instance that handles a client action.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{HubError, HubResult, Session};
use crate::cluster::ServerDescriptor;

/// Selects one candidate id for a client action.
///
/// Called with the client's session, the target server type and the live
/// candidates of that type (never empty).
pub type RouteFn = Arc<dyn Fn(&Session, &str, &[ServerDescriptor]) -> String + Send + Sync>;

#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<String, RouteFn>,
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("server_types", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the selector for a type; the last registration wins.
    /// Returns whether an earlier selector was replaced.
    pub fn register(&mut self, server_type: impl Into<String>, route: RouteFn) -> bool {
        self.routes.insert(server_type.into(), route).is_some()
    }

    pub fn contains(&self, server_type: &str) -> bool {
        self.routes.contains_key(server_type)
    }

    /// Run the selector for `server_type` and check its answer
    pub fn resolve(
        &self,
        server_type: &str,
        session: &Session,
        candidates: &[ServerDescriptor],
    ) -> HubResult<ServerDescriptor> {
        let route = self
            .routes
            .get(server_type)
            .ok_or_else(|| HubError::RouteNotConfigured(server_type.to_string()))?;

        if candidates.is_empty() {
            return Err(HubError::NoCandidates(server_type.to_string()));
        }

        let selected = route(session, server_type, candidates);
        candidates
            .iter()
            .find(|c| c.id == selected)
            .cloned()
            .ok_or(HubError::RouteSelectionInvalid {
                server_type: server_type.to_string(),
                selected,
            })
    }
}
