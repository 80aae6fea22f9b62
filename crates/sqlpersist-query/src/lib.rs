//! Statement construction for sqlpersist.
//!
//! `sqlpersist-query` turns criteria queries and relationship lookups into
//! SQL statement trees plus their bound parameters, and renders those trees
//! to SQL text for a given dialect.
//!
//! - **Criteria**: `CriteriaQuery` and the closed `Predicate` enum.
//! - **Factory**: `StatementFactory` resolves criteria against an `EntityModel`.
//! - **Rendering**: the `Renderer` trait and the default `SqlRenderer`.
//!
//! Statements execute through the `Connection` trait from `sqlpersist-core`.
//! Most users reach these types via the `sqlpersist` facade crate.

pub mod ast;
pub mod criteria;
pub mod factory;
pub mod params;
pub mod render;

pub use ast::{
    BinaryOp, Delete, Expr, Insert, Join, JoinType, OrderItem, Params, Select, SelectItem,
    Statement, TableRef, Update, key_equals,
};
pub use criteria::{
    AggregateFn, ArithmeticOp, CompareOp, CriteriaQuery, Expression, JoinSpec, LockMode,
    OrderSpec, Predicate, Selection,
};
pub use factory::{StatementFactory, relationship_joins};
pub use params::{
    FetchJoin, FetchParameter, LABEL_SEPARATOR, ResultShape, StatementKind, StatementParameters,
    column_label,
};
pub use render::{Renderer, SqlRenderer};
