//! SQLite driver for sqlpersist.
//!
//! Provides [`SqliteConnection`], a synchronous implementation of the
//! `Connection` capability backed by a bundled SQLite.
//!
//! # Type Mapping
//!
//! | Value | SQLite storage |
//! |-------|----------------|
//! | `Bool`, integers, `Date`, `Time`, `Timestamp` | INTEGER |
//! | `Float`, `Double` | REAL |
//! | `Text`, `Decimal`, `Json` | TEXT |
//! | `Bytes`, `Uuid` | BLOB |
//!
//! Identity keys are read back with `last_insert_rowid`.

#![allow(unsafe_code)]

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

/// Version string of the bundled SQLite library.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}
