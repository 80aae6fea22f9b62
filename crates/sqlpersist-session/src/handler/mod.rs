//! Entity handler: moves instances between the context and the database.
//!
//! A handler is a short-lived view over a session's context, connection and
//! renderer. Every public session operation builds one, runs, and drops it.
//!
//! - [`load`]: find, refresh, row materialization and relationship wiring
//! - [`flush`]: the three-pass unit-of-work write
//! - [`cascade`]: persist / remove / refresh / detach propagation

pub(crate) mod cascade;
pub(crate) mod flush;
pub(crate) mod load;

use std::sync::Arc;

use sqlpersist_core::{
    Column, Connection, EntityId, EntityKey, EntityModel, EntityType, Error, JoinColumnMapping,
    Result, Row, StateError, Value,
};
use sqlpersist_query::{
    Renderer, ResultShape, Statement, StatementFactory, StatementParameters, column_label,
};

use crate::config::SessionConfig;
use crate::context::PersistenceContext;
use crate::status::EntityStatus;

pub use flush::FlushResult;

pub(crate) struct EntityHandler<'s, C: Connection> {
    model: Arc<EntityModel>,
    ctx: &'s mut PersistenceContext,
    conn: &'s C,
    renderer: &'s dyn Renderer,
    config: &'s SessionConfig,
    /// Nesting of relationship wiring, bounded by `max_fetch_depth`.
    depth: usize,
}

impl<'s, C: Connection> EntityHandler<'s, C> {
    pub(crate) fn new(
        ctx: &'s mut PersistenceContext,
        conn: &'s C,
        renderer: &'s dyn Renderer,
        config: &'s SessionConfig,
    ) -> Self {
        Self {
            model: Arc::clone(ctx.model()),
            ctx,
            conn,
            renderer,
            config,
            depth: 0,
        }
    }

    fn status_of(&self, id: EntityId) -> Result<EntityStatus> {
        self.ctx.status(id).ok_or_else(|| unknown(id))
    }

    pub(crate) fn factory(&self) -> StatementFactory<'_> {
        StatementFactory::new(&self.model).split_fetch_joins(self.config.split_fetch_joins)
    }

    fn query(&self, statement: &StatementParameters) -> Result<Vec<Row>> {
        let sql = self.renderer.render(&statement.statement);
        tracing::debug!(sql = %sql, params = ?statement.params, "query");
        let rows = self.conn.query(&sql, &statement.params)?;
        tracing::debug!(rows = rows.len(), "query complete");
        Ok(rows)
    }

    fn execute(&self, statement: &Statement, params: &[Value]) -> Result<u64> {
        let sql = self.renderer.render(statement);
        tracing::debug!(sql = %sql, params = ?params, "execute");
        self.conn.execute(&sql, params)
    }

    fn insert_row(&self, statement: &Statement, params: &[Value]) -> Result<Option<Value>> {
        let sql = self.renderer.render(statement);
        tracing::debug!(sql = %sql, params = ?params, "insert");
        self.conn.insert(&sql, params)
    }

    /// First column of the first row, e.g. the next value of a sequence.
    fn fetch_value(&self, statement: &Statement) -> Result<Option<Value>> {
        let sql = self.renderer.render(statement);
        tracing::debug!(sql = %sql, "fetch value");
        let rows = self.conn.query(&sql, &[])?;
        Ok(rows.first().and_then(|row| row.get(0)).cloned())
    }
}

/// Alias of the entity a lookup statement selects.
fn lookup_alias(statement: &StatementParameters) -> Result<String> {
    match &statement.shape {
        ResultShape::Entity { alias, .. } => Ok(alias.clone()),
        other => Err(Error::Custom(format!(
            "lookup statement must select an entity, got {other:?}"
        ))),
    }
}

/// Read the value selected as `<alias>__<column>` and coerce it to the column type.
pub(crate) fn read_column(row: &Row, alias: &str, column: &Column) -> Result<Value> {
    let label = column_label(alias, &column.name);
    let value = row.require(&label)?.clone();
    value
        .coerce_to(&column.sql_type)
        .map_err(|err| with_column(err, &label))
}

pub(crate) fn with_column(err: Error, label: &str) -> Error {
    match err {
        Error::Type(mut e) => {
            e.column.get_or_insert_with(|| label.to_string());
            Error::Type(e)
        }
        other => other,
    }
}

/// Foreign-key values, in `cols` order, for a target key.
pub(crate) fn key_to_columns(
    cols: &[JoinColumnMapping],
    target: &EntityType,
    key: &EntityKey,
) -> Result<Vec<Value>> {
    let pk = target.pk_columns();
    cols.iter()
        .enumerate()
        .map(|(i, col)| {
            let index = pk
                .iter()
                .position(|c| c.name == col.referenced_column)
                .unwrap_or(i);
            let value = key.values().get(index).cloned().ok_or_else(|| {
                Error::mapping(
                    &target.name,
                    format!("column {} references no key column", col.column.name),
                )
            })?;
            value.coerce_to(&col.column.sql_type)
        })
        .collect()
}

/// Target key from foreign-key values given in `cols` order. `None` when any is NULL.
pub(crate) fn columns_to_key(
    cols: &[JoinColumnMapping],
    target: &EntityType,
    values: &[Value],
) -> Option<EntityKey> {
    if values.is_empty() || values.iter().any(Value::is_null) {
        return None;
    }
    let pk = target.pk_columns();
    let mut ordered = values.to_vec();
    for (i, col) in cols.iter().enumerate() {
        if let Some(index) = pk.iter().position(|c| c.name == col.referenced_column) {
            if let (Some(slot), Some(value)) = (ordered.get_mut(index), values.get(i)) {
                *slot = value.clone();
            }
        }
    }
    Some(EntityKey::new(ordered))
}

fn unknown(id: EntityId) -> Error {
    Error::InvalidState(StateError {
        from: "absent".to_string(),
        to: "access".to_string(),
        message: format!("instance {id} is not held by this session"),
    })
}
