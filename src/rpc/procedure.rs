//! Procedures a server exposes over its RPC listener

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::lock::{read, write};
use crate::protocol::RpcOutcome;

/// A named remote procedure
#[async_trait]
pub trait Procedure: Send + Sync {
    /// Handle one call from `caller` (the remote server id)
    async fn call(&self, caller: &str, args: Vec<u8>) -> Result<Vec<u8>, String>;
}

#[derive(Default)]
pub struct ProcedureTable {
    procedures: RwLock<HashMap<String, Arc<dyn Procedure>>>,
}

impl ProcedureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure, returning whether one was replaced
    pub fn register(&self, name: impl Into<String>, procedure: Arc<dyn Procedure>) -> bool {
        write(&self.procedures).insert(name.into(), procedure).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        read(&self.procedures).contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.procedures).keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a call and wrap its result for the wire
    pub async fn dispatch(&self, caller: &str, name: &str, args: Vec<u8>) -> RpcOutcome {
        let procedure = read(&self.procedures).get(name).cloned();
        match procedure {
            Some(procedure) => match procedure.call(caller, args).await {
                Ok(reply) => RpcOutcome::Ok(reply),
                Err(reason) => {
                    tracing::debug!("Procedure {} from {} failed: {}", name, caller, reason);
                    RpcOutcome::Failed(reason)
                }
            },
            None => {
                tracing::warn!("{} called unknown procedure {}", caller, name);
                RpcOutcome::UnknownProcedure(name.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Procedure for Echo {
        async fn call(&self, _caller: &str, args: Vec<u8>) -> Result<Vec<u8>, String> {
            if args.is_empty() {
                return Err("empty".to_string());
            }
            Ok(args)
        }
    }

    #[tokio::test]
    async fn test_dispatch_outcomes() {
        let table = ProcedureTable::new();
        assert!(!table.register("echo", Arc::new(Echo)));

        assert_eq!(table.dispatch("logic-1", "echo", vec![1]).await, RpcOutcome::Ok(vec![1]));
        assert_eq!(
            table.dispatch("logic-1", "echo", Vec::new()).await,
            RpcOutcome::Failed("empty".to_string())
        );
        assert_eq!(
            table.dispatch("logic-1", "missing", Vec::new()).await,
            RpcOutcome::UnknownProcedure("missing".to_string())
        );
        assert_eq!(table.names(), vec!["echo"]);
    }
}
