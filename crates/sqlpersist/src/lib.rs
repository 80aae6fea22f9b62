//! SQLPersist - a persistence-context engine for relational databases.
//!
//! SQLPersist keeps mapped entity instances in a session and turns the
//! changes made to them into ordered SQL:
//!
//! - An identity map holding at most one instance per row
//! - A lifecycle state machine for every tracked instance
//! - Eager and lazy relationship loading, including fetch joins
//! - A three-pass flush honoring foreign-key order and optimistic locks
//! - Criteria queries translated into parameterized statements
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlpersist::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Hero {
//!     id: Option<i64>,
//!     name: String,
//! }
//!
//! let hero = EntityType::builder::<Hero>("Hero", "heroes")
//!     .id(
//!         "id",
//!         Column::new("id", SqlType::BigInt),
//!         GenerationStrategy::Identity,
//!         Accessor::value(|h: &Hero| h.id.into(), |h: &mut Hero, v| {
//!             h.id = v.try_into()?;
//!             Ok(())
//!         }),
//!     )
//!     .basic(
//!         "name",
//!         Column::new("name", SqlType::Text).not_null(),
//!         Accessor::value(|h: &Hero| h.name.clone().into(), |h: &mut Hero, v| {
//!             h.name = v.try_into()?;
//!             Ok(())
//!         }),
//!     )
//!     .build()?;
//!
//! let unit = PersistenceUnit::new("heroes", EntityModel::builder().entity(hero).build()?);
//! let mut session = unit.session(SqliteConnection::open_memory()?);
//!
//! let id = session.persist_new(Hero { id: None, name: "Spider-Man".into() })?;
//! session.flush()?;
//!
//! let heroes = session.query_entities(
//!     &CriteriaQuery::from("Hero", "h").filter(path("h", "name").eq(lit("Spider-Man"))),
//! )?;
//! assert_eq!(heroes, vec![id]);
//! ```

pub use sqlpersist_core::{
    Accessor, AttrId, AttrValue, Attribute, AttributeKind, Cascade, Column, Connection, Dialect,
    Embeddable, EmbeddedField, EmbeddedKind, EntityId, EntityKey, EntityModel,
    EntityModelBuilder, EntityType, EntityTypeBuilder, EntityTypeId, Error, FetchMode,
    GenerationStrategy, JoinColumnMapping, JoinMapping, ModelValueArray, Pk, Relationship,
    RelationshipJoinTable, RelationshipKind, Result, Row, SqlType, Value,
};
pub use sqlpersist_core::error;

pub use sqlpersist_query::criteria::{
    avg, count, count_all, count_distinct, entity, lit, max, min, path, sum,
};
pub use sqlpersist_query::{
    CriteriaQuery, Expression, LockMode, Predicate, Renderer, SqlRenderer, StatementFactory,
    StatementParameters,
};

pub use sqlpersist_session::{
    EntityStatus, FlushResult, PersistenceContext, PersistenceUnit, QueryResult, RecordBuilder,
    RecordStrategy, Session, SessionConfig, UnitConfig,
};

#[cfg(feature = "sqlite")]
pub use sqlpersist_sqlite::{SqliteConfig, SqliteConnection};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything needed to describe a model and work with a session.
pub mod prelude {
    pub use crate::{
        // Model description
        Accessor,
        AttrValue,
        Cascade,
        Column,
        // Database capability
        Connection,
        // Queries
        CriteriaQuery,
        Dialect,
        EntityId,
        EntityKey,
        EntityModel,
        // Session
        EntityStatus,
        EntityType,
        Error,
        FlushResult,
        GenerationStrategy,
        JoinColumnMapping,
        LockMode,
        PersistenceUnit,
        QueryResult,
        Relationship,
        RelationshipJoinTable,
        RelationshipKind,
        Result,
        Row,
        Session,
        SessionConfig,
        SqlType,
        Value,
        count,
        lit,
        path,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::SqliteConnection;
}
