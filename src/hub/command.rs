//! Command table
//!
//! Maps command names to their wire index. The index of a command is its
//! position in the declared list, so every process built from the same
//! cluster file agrees on it.

use std::collections::HashMap;

use crate::config::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    names: Vec<String>,
    indices: HashMap<String, usize>,
}

impl CommandTable {
    /// Build the table from the declared command list.
    ///
    /// A repeated name would make the reverse lookup ambiguous and is rejected.
    pub fn new<I, S>(commands: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for name in commands {
            let name = name.into();
            if table.indices.contains_key(&name) {
                return Err(ConfigError::DuplicateCommand(name));
            }
            table.indices.insert(name.clone(), table.names.len());
            table.names.push(name);
        }
        Ok(table)
    }

    /// Wire index of a command
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    /// Command name at a wire index
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// `(index, name)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i, n.as_str()))
    }
}

/// Server type a command is addressed to: the text before the first `.`.
///
/// Push-only commands without a dot have no target type.
pub fn target_server_type(command: &str) -> Option<&str> {
    command.split_once('.').map(|(server_type, _)| server_type)
}
