//! Process roles
//!
//! `ServerRole` is the frontend/backend split that guards the push paths.
//! `RoleSelector` is the parsed form of an activation token such as
//! `"all"` or `"gate|connector"`, matched against the server type.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    /// Terminates client connections and owns a client registry
    Frontend,
    /// Hosts business logic; reaches clients through frontends
    Backend,
}

impl ServerRole {
    pub fn from_frontend_flag(frontend: bool) -> Self {
        if frontend {
            ServerRole::Frontend
        } else {
            ServerRole::Backend
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Frontend => f.write_str("frontend"),
            ServerRole::Backend => f.write_str("backend"),
        }
    }
}

/// Wildcard accepted by [`RoleSelector`]
pub const ALL_ROLES: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSelector {
    All,
    Types(Vec<String>),
}

impl RoleSelector {
    pub fn parse(token: &str) -> Self {
        if token == ALL_ROLES {
            return RoleSelector::All;
        }
        RoleSelector::Types(token.split('|').map(|t| t.trim().to_string()).collect())
    }

    pub fn matches(&self, server_type: &str) -> bool {
        match self {
            RoleSelector::All => true,
            RoleSelector::Types(types) => types.iter().any(|t| t == server_type),
        }
    }
}

impl FromStr for RoleSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for RoleSelector {
    fn from(token: &str) -> Self {
        Self::parse(token)
    }
}

impl From<&RoleSelector> for RoleSelector {
    fn from(selector: &RoleSelector) -> Self {
        selector.clone()
    }
}
