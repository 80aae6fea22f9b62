//! Session and persistence-unit configuration.

use serde::{Deserialize, Serialize};
use sqlpersist_core::{ConfigError, Dialect, Error, Result};

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Flush pending changes before running criteria queries.
    pub auto_flush: bool,
    /// Issue one statement per collection fetch join when a query fetches two or more.
    pub split_fetch_joins: bool,
    /// Nesting depth beyond which eager relationships are left for lazy loading.
    pub max_fetch_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_flush: false,
            split_fetch_joins: true,
            max_fetch_depth: 8,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_flush(mut self, value: bool) -> Self {
        self.auto_flush = value;
        self
    }

    pub fn split_fetch_joins(mut self, value: bool) -> Self {
        self.split_fetch_joins = value;
        self
    }

    pub fn max_fetch_depth(mut self, depth: usize) -> Self {
        self.max_fetch_depth = depth;
        self
    }
}

/// Declarative description of a persistence unit.
///
/// ```json
/// { "name": "library", "dialect": "sqlite", "session": { "auto_flush": true } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub name: String,
    /// Dialect to render statements in; defaults to the connection's.
    #[serde(default)]
    pub dialect: Option<Dialect>,
    #[serde(default)]
    pub session: SessionConfig,
}

impl UnitConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dialect: None,
            session: SessionConfig::default(),
        }
    }

    /// Parse a unit description from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid persistence unit configuration: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }
}
