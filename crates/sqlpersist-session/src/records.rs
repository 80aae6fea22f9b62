//! Record builders: turning result rows into values, entities and tuples.

use std::collections::HashSet;

use sqlpersist_core::{Connection, EntityId, EntityTypeId, Result, Row, SqlType, Value};
use sqlpersist_query::{FetchParameter, ResultShape};

use crate::handler::{EntityHandler, with_column};

/// One result of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Value(Value),
    Entity(EntityId),
    Tuple(Vec<QueryResult>),
}

impl QueryResult {
    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            QueryResult::Entity(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            QueryResult::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            QueryResult::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[QueryResult]> {
        match self {
            QueryResult::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

/// How one row becomes one [`QueryResult`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBuilder {
    /// Read the column labeled `label` and coerce it to `sql_type`.
    Primitive { label: String, sql_type: SqlType },
    /// Materialize (or find) the entity whose columns are labeled under `alias`.
    Entity { entity: EntityTypeId, alias: String },
    Tuple(Vec<RecordBuilder>),
}

impl RecordBuilder {
    /// The builder a statement's result shape calls for.
    pub fn from_shape(shape: &ResultShape) -> Self {
        match shape {
            ResultShape::Entity { entity, alias } => RecordBuilder::Entity {
                entity: *entity,
                alias: alias.clone(),
            },
            ResultShape::Tuple(items) => {
                RecordBuilder::Tuple(items.iter().map(Self::from_parameter).collect())
            }
            ResultShape::Scalar(item) => Self::from_parameter(item),
        }
    }

    fn from_parameter(parameter: &FetchParameter) -> Self {
        match parameter {
            FetchParameter::Column { label, sql_type } => RecordBuilder::Primitive {
                label: label.clone(),
                sql_type: sql_type.clone(),
            },
            FetchParameter::Entity { entity, alias } => RecordBuilder::Entity {
                entity: *entity,
                alias: alias.clone(),
            },
        }
    }

    pub(crate) fn build<C: Connection>(
        &self,
        handler: &mut EntityHandler<'_, C>,
        row: &Row,
        pending: &mut Vec<EntityId>,
    ) -> Result<QueryResult> {
        match self {
            RecordBuilder::Primitive { label, sql_type } => {
                let value = row
                    .require(label)?
                    .clone()
                    .coerce_to(sql_type)
                    .map_err(|err| with_column(err, label))?;
                Ok(QueryResult::Value(value))
            }
            RecordBuilder::Entity { entity, alias } => {
                Ok(match handler.materialize(*entity, alias, row, pending)? {
                    Some(id) => QueryResult::Entity(id),
                    None => QueryResult::Value(Value::Null),
                })
            }
            RecordBuilder::Tuple(items) => items
                .iter()
                .map(|item| item.build(handler, row, pending))
                .collect::<Result<Vec<_>>>()
                .map(QueryResult::Tuple),
        }
    }
}

/// Which builder a query runs with.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RecordStrategy {
    /// Derive the builder from the statement's result shape.
    #[default]
    Shape,
    Builder(RecordBuilder),
}

impl RecordStrategy {
    pub fn builder(&self, shape: &ResultShape) -> RecordBuilder {
        match self {
            RecordStrategy::Shape => RecordBuilder::from_shape(shape),
            RecordStrategy::Builder(builder) => builder.clone(),
        }
    }
}

/// Drop repeated entity roots, keeping first-seen order.
pub(crate) fn dedup_roots(results: Vec<QueryResult>) -> Vec<QueryResult> {
    let mut merged = Vec::with_capacity(results.len());
    merge_roots(&mut merged, results);
    merged
}

/// Append `more` to `into`, skipping entity roots already present.
pub(crate) fn merge_roots(into: &mut Vec<QueryResult>, more: Vec<QueryResult>) {
    let mut seen: HashSet<EntityId> = into.iter().filter_map(QueryResult::as_entity).collect();
    for result in more {
        match result.as_entity() {
            Some(id) if !seen.insert(id) => {}
            _ => into.push(result),
        }
    }
}
