//! SQLite connection implementation.
//!
//! A thin, mutex-guarded wrapper around one `sqlite3` handle that implements
//! the synchronous [`Connection`] capability from sqlpersist-core.

// FFI lengths and counts are c_int
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]

use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sqlpersist_core::{
    ColumnInfo, Connection, ConnectionError, ConnectionErrorKind, Dialect, Error, QueryError,
    QueryErrorKind, Result, Row, Value,
};

use crate::ffi;
use crate::types;

/// Flags used when opening a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub read_only: bool,
    pub create: bool,
    pub uri: bool,
}

impl OpenFlags {
    /// Read-write, creating the file if missing.
    pub const fn create_read_write() -> Self {
        Self {
            read_only: false,
            create: true,
            uri: false,
        }
    }

    pub const fn read_only() -> Self {
        Self {
            read_only: true,
            create: false,
            uri: false,
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = ffi::SQLITE_OPEN_FULLMUTEX;
        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        } else {
            flags |= ffi::SQLITE_OPEN_READWRITE;
            if self.create {
                flags |= ffi::SQLITE_OPEN_CREATE;
            }
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        flags
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self::create_read_write()
    }
}

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:"
    pub path: String,
    pub flags: OpenFlags,
    pub busy_timeout_ms: u32,
    /// Run `PRAGMA foreign_keys = ON` after opening
    pub foreign_keys: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
            foreign_keys: true,
        }
    }
}

impl SqliteConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }
}

struct SqliteInner {
    db: *mut ffi::sqlite3,
    in_transaction: bool,
}

// SAFETY: the handle is opened FULLMUTEX and every access goes through the Mutex.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Finalizes its statement when dropped.
struct Prepared {
    stmt: *mut ffi::sqlite3_stmt,
}

impl Drop for Prepared {
    fn drop(&mut self) {
        // SAFETY: stmt came from a successful prepare and is finalized once
        unsafe {
            ffi::sqlite3_finalize(self.stmt);
        }
    }
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        // SAFETY: valid path and out-pointer; return value is checked
        let rc = unsafe {
            ffi::sqlite3_open_v2(
                c_path.as_ptr(),
                &mut db,
                config.flags.to_sqlite_flags(),
                ptr::null(),
            )
        };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc)
            } else {
                // SAFETY: sqlite hands back a handle even on failure; read the message then close it
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {msg}"),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        let conn = Self {
            inner: Mutex::new(SqliteInner {
                db,
                in_transaction: false,
            }),
            path: config.path.clone(),
        };
        if config.foreign_keys {
            conn.execute_raw("PRAGMA foreign_keys = ON")?;
        }
        tracing::debug!(path = %conn.path, version = ffi::version(), "sqlite connection opened");
        Ok(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute one or more `;`-separated statements without parameters (DDL, pragmas).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = self.lock();
        let c_sql = CString::new(sql).map_err(|_| nul_in_sql(sql))?;
        let mut err: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: all pointers are valid; no callback
        let rc = unsafe { ffi::sqlite3_exec(inner.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut err) };

        if rc != ffi::SQLITE_OK {
            let message = if err.is_null() {
                ffi::error_string(rc)
            } else {
                // SAFETY: err was allocated by sqlite and is freed once
                unsafe {
                    let msg = CStr::from_ptr(err).to_string_lossy().into_owned();
                    ffi::sqlite3_free(err.cast());
                    msg
                }
            };
            return Err(Error::Query(QueryError {
                kind: error_code_to_kind(rc),
                sql: Some(sql.to_string()),
                message,
                source: None,
            }));
        }
        Ok(())
    }

    /// Rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> i64 {
        let inner = self.lock();
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_last_insert_rowid(inner.db) }
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> i32 {
        let inner = self.lock();
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_changes(inner.db) }
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    fn run(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let inner = self.lock();
        let prepared = prepare(inner.db, sql, params)?;
        // SAFETY: statement is valid and bound
        let rc = unsafe { ffi::sqlite3_step(prepared.stmt) };
        match rc {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid
                let changes = unsafe { ffi::sqlite3_changes(inner.db) };
                let changes = u64::try_from(changes).unwrap_or(0);
                tracing::debug!(sql, params = params.len(), rows = changes, "sqlite execute");
                Ok(changes)
            }
            _ => Err(db_error(inner.db, sql)),
        }
    }

    fn transaction_command(&self, sql: &str, opening: bool) -> Result<()> {
        let in_transaction = self.lock().in_transaction;
        if in_transaction == opening {
            let message = if opening {
                "Already in a transaction"
            } else {
                "Not in a transaction"
            };
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: Some(sql.to_string()),
                message: message.to_string(),
                source: None,
            }));
        }
        self.execute_raw(sql)?;
        self.lock().in_transaction = opening;
        tracing::debug!(command = sql, "sqlite transaction");
        Ok(())
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let inner = self.lock();
        let prepared = prepare(inner.db, sql, params)?;
        let stmt = prepared.stmt;

        // SAFETY: stmt is valid
        let count = unsafe { ffi::sqlite3_column_count(stmt) };
        let names = (0..count)
            // SAFETY: index is within the column count
            .map(|i| unsafe { types::column_name(stmt, i) }.unwrap_or_else(|| format!("col{i}")))
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt) } {
                ffi::SQLITE_ROW => {
                    let values = (0..count)
                        // SAFETY: we just got SQLITE_ROW and i is a valid column
                        .map(|i| unsafe { types::read_column(stmt, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(db_error(inner.db, sql)),
            }
        }
        tracing::debug!(sql, params = params.len(), rows = rows.len(), "sqlite query");
        Ok(rows)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.run(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        self.run(sql, params)?;
        Ok(Some(Value::BigInt(self.last_insert_rowid())))
    }

    fn begin(&self) -> Result<()> {
        self.transaction_command("BEGIN", true)
    }

    fn commit(&self) -> Result<()> {
        self.transaction_command("COMMIT", false)
    }

    fn rollback(&self) -> Result<()> {
        self.transaction_command("ROLLBACK", false)
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let inner = self.lock();
        if !inner.db.is_null() {
            // SAFETY: db is valid and closed exactly once
            unsafe {
                ffi::sqlite3_close(inner.db);
            }
        }
    }
}

fn prepare(db: *mut ffi::sqlite3, sql: &str, params: &[Value]) -> Result<Prepared> {
    let c_sql = CString::new(sql).map_err(|_| nul_in_sql(sql))?;
    let len = c_int::try_from(c_sql.as_bytes().len()).map_err(|_| Error::Query(QueryError {
        kind: QueryErrorKind::DataTruncation,
        sql: None,
        message: "SQL text too long".to_string(),
        source: None,
    }))?;
    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

    // SAFETY: all pointers are valid
    let rc = unsafe { ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), len, &mut stmt, ptr::null_mut()) };
    if rc != ffi::SQLITE_OK {
        return Err(db_error(db, sql));
    }
    let prepared = Prepared { stmt };

    for (i, param) in params.iter().enumerate() {
        let index = c_int::try_from(i + 1).unwrap_or(c_int::MAX);
        // SAFETY: stmt is valid, index is 1-based
        let rc = unsafe { types::bind_value(prepared.stmt, index, param) };
        if rc != ffi::SQLITE_OK {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: Some(sql.to_string()),
                // SAFETY: db is valid
                message: format!("Failed to bind parameter {}: {}", i + 1, unsafe { errmsg(db) }),
                source: None,
            }));
        }
    }
    Ok(prepared)
}

/// # Safety
/// `db` must be a valid handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: upheld by the caller; the message is copied immediately
    unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
        .to_string_lossy()
        .into_owned()
}

fn db_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid for every caller
    let (message, code) = unsafe { (errmsg(db), ffi::sqlite3_errcode(db)) };
    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        message,
        source: None,
    })
}

fn nul_in_sql(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        message: "SQL contains null byte".to_string(),
        source: None,
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match ffi::primary_code(code) {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_INTERRUPT => QueryErrorKind::Cancelled,
        ffi::SQLITE_ERROR => QueryErrorKind::Syntax,
        _ => QueryErrorKind::Database,
    }
}
