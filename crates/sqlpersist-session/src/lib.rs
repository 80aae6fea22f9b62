//! Persistence context and unit of work for sqlpersist.
//!
//! `sqlpersist-session` keeps entity instances in a [`PersistenceContext`]
//! and moves them to and from the database through a [`Session`].
//!
//! # Role In The Architecture
//!
//! - **Identity map**: at most one instance per (entity type, primary key).
//! - **Lifecycle**: every instance carries an [`EntityStatus`]; illegal moves are errors.
//! - **Loading**: two-step (materialize, then wire relationships), eager or lazy.
//! - **Flush**: three ordered passes turning pending changes into SQL.
//!
//! # Example
//!
//! ```ignore
//! let unit = PersistenceUnit::new("library", model);
//! let mut session = unit.session(SqliteConnection::open_memory()?);
//!
//! let author = session.persist_new(Author { name: "Le Guin".into(), ..Author::default() })?;
//! session.flush()?;
//!
//! let found = session.find::<Author>(1)?;
//! assert_eq!(found, Some(author));
//! ```

pub mod config;
pub mod context;
mod handler;
pub mod records;
pub mod session;
pub mod status;
pub mod unit;

pub use config::{SessionConfig, UnitConfig};
pub use context::PersistenceContext;
pub use handler::FlushResult;
pub use records::{QueryResult, RecordBuilder, RecordStrategy};
pub use session::Session;
pub use status::EntityStatus;
pub use unit::PersistenceUnit;

#[cfg(test)]
mod tests;
