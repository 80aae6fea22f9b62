//! Statement parameters: a rendered-ready statement plus everything a
//! record builder needs to interpret its rows.

use sqlpersist_core::{AttrId, EntityTypeId, SqlType, Value};

use crate::ast::Statement;

/// Separator between alias and column in result labels.
pub const LABEL_SEPARATOR: &str = "__";

/// Result label of `column` selected under `alias`.
pub fn column_label(alias: &str, column: &str) -> String {
    format!("{alias}{LABEL_SEPARATOR}{column}")
}

/// Whether the statement carries fetch joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Plain,
    FetchJoin,
}

/// A fetch join: the joined entity is materialized and attached to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJoin {
    pub alias: String,
    pub parent_alias: String,
    pub entity: EntityTypeId,
    /// Relationship attribute on the parent entity.
    pub attribute: AttrId,
    pub collection: bool,
}

/// One selected value of a tuple or scalar result.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchParameter {
    /// A column read back under `label` and coerced to `sql_type`.
    Column { label: String, sql_type: SqlType },
    /// An entity whose columns are labeled under `alias`.
    Entity { entity: EntityTypeId, alias: String },
}

/// How rows of a statement turn into results.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultShape {
    Entity { entity: EntityTypeId, alias: String },
    Tuple(Vec<FetchParameter>),
    Scalar(FetchParameter),
}

/// A statement with its bound values, produced once per query and consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementParameters {
    pub statement: Statement,
    pub params: Vec<Value>,
    pub kind: StatementKind,
    pub fetches: Vec<FetchJoin>,
    pub shape: ResultShape,
}

impl StatementParameters {
    pub fn plain(statement: Statement, params: Vec<Value>, shape: ResultShape) -> Self {
        Self {
            statement,
            params,
            kind: StatementKind::Plain,
            fetches: Vec::new(),
            shape,
        }
    }

    pub fn is_fetch_join(&self) -> bool {
        self.kind == StatementKind::FetchJoin
    }
}
