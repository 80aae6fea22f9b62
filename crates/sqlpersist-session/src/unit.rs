//! Persistence units: an entity model plus the settings its sessions share.

use std::sync::Arc;

use sqlpersist_core::{Connection, Dialect, EntityModel};

use crate::config::{SessionConfig, UnitConfig};
use crate::session::Session;

/// Explicit handle replacing any process-wide registry of mapped types.
#[derive(Debug, Clone)]
pub struct PersistenceUnit {
    name: String,
    model: Arc<EntityModel>,
    dialect: Option<Dialect>,
    config: SessionConfig,
}

impl PersistenceUnit {
    pub fn new(name: impl Into<String>, model: EntityModel) -> Self {
        Self {
            name: name.into(),
            model: Arc::new(model),
            dialect: None,
            config: SessionConfig::default(),
        }
    }

    pub fn from_config(config: UnitConfig, model: EntityModel) -> Self {
        Self {
            name: config.name,
            model: Arc::new(model),
            dialect: config.dialect,
            config: config.session,
        }
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Arc<EntityModel> {
        &self.model
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.dialect
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a session over `connection`.
    pub fn session<C: Connection>(&self, connection: C) -> Session<C> {
        tracing::debug!(unit = %self.name, "opening session");
        Session::new(self, connection)
    }
}
