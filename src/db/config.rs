//! Database group configuration.

use serde::{Deserialize, Serialize};

use super::dialect::Dialect;

/// Name of the group used when none is configured.
pub const DEFAULT_GROUP: &str = "default";

/// Configuration of one database group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Logical group name; transactions are bound into contexts per group.
    pub group: String,
    /// Dialect used for identifier quoting.
    pub dialect: Dialect,
    /// Write every statement record through `tracing`.
    pub debug: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            dialect: Dialect::default(),
            debug: false,
        }
    }
}

impl DatabaseConfig {
    /// Create a configuration for the given group.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Default::default()
        }
    }

    pub fn dialect(mut self, value: Dialect) -> Self {
        self.dialect = value;
        self
    }

    pub fn debug(mut self, value: bool) -> Self {
        self.debug = value;
        self
    }
}
