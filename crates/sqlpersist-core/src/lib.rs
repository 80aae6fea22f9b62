//! Core types for sqlpersist.
//!
//! This crate provides the vocabulary shared by the query and session crates:
//!
//! - `Value`, `Row` and `SqlType` for data exchanged with the database
//! - `Connection` for the synchronous database capability
//! - `EntityModel` and its builders for the mapped entity types
//! - `Accessor` tables through which the engine reads and writes instances
//! - `Error` for every failure the engine can report

pub mod accessor;
pub mod connection;
pub mod error;
pub mod identifiers;
pub mod key;
pub mod model;
pub mod mva;
pub mod relationship;
pub mod row;
pub mod types;
pub mod value;

pub use accessor::{Accessor, AttrValue, EntityId};
pub use connection::{Connection, Dialect};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, DuplicateKeyError, Error, IntegrityError,
    MappingError, NotFoundError, OptimisticLockError, QueryError, QueryErrorKind, Result,
    StateError, TypeError,
};
pub use key::EntityKey;
pub use model::{
    AttrId, Attribute, AttributeKind, Column, Embeddable, EmbeddedField, EmbeddedKind,
    EntityModel, EntityModelBuilder, EntityType, EntityTypeBuilder, EntityTypeId,
    GenerationStrategy, Pk,
};
pub use mva::ModelValueArray;
pub use relationship::{
    Cascade, FetchMode, JoinColumnMapping, JoinMapping, Relationship, RelationshipJoinTable,
    RelationshipKind, ResolvedLink,
};
pub use row::{ColumnInfo, Row};
pub use types::SqlType;
pub use value::Value;
