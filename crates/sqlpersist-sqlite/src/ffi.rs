//! Raw SQLite bindings.
//!
//! Re-exports the subset of `libsqlite3-sys` the connection uses, plus a
//! couple of safe helpers over the version and error-string functions.

use std::ffi::{CStr, c_int};

pub use libsqlite3_sys::{
    SQLITE_AUTH, SQLITE_BLOB, SQLITE_BUSY, SQLITE_CONSTRAINT, SQLITE_DONE, SQLITE_ERROR,
    SQLITE_FLOAT, SQLITE_INTEGER, SQLITE_INTERRUPT, SQLITE_LOCKED, SQLITE_NOTFOUND, SQLITE_NULL,
    SQLITE_OK, SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_READONLY,
    SQLITE_OPEN_READWRITE, SQLITE_OPEN_URI, SQLITE_PERM, SQLITE_ROW, SQLITE_TEXT, SQLITE_TOOBIG,
    SQLITE_TRANSIENT, sqlite3, sqlite3_bind_blob, sqlite3_bind_double, sqlite3_bind_int64,
    sqlite3_bind_null, sqlite3_bind_text, sqlite3_busy_timeout, sqlite3_changes,
    sqlite3_close, sqlite3_column_blob, sqlite3_column_bytes, sqlite3_column_count,
    sqlite3_column_double, sqlite3_column_int64, sqlite3_column_name, sqlite3_column_text,
    sqlite3_column_type, sqlite3_errcode, sqlite3_errmsg, sqlite3_errstr, sqlite3_exec,
    sqlite3_finalize, sqlite3_free, sqlite3_last_insert_rowid, sqlite3_libversion,
    sqlite3_libversion_number, sqlite3_open_v2, sqlite3_prepare_v2, sqlite3_step, sqlite3_stmt,
};

/// Primary result code of a possibly extended one.
pub const fn primary_code(rc: c_int) -> c_int {
    rc & 0xff
}

/// Version string of the linked SQLite library.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a pointer to a static NUL-terminated string
    unsafe { CStr::from_ptr(sqlite3_libversion()) }
        .to_str()
        .unwrap_or("unknown")
}

/// Version number of the linked SQLite library, e.g. 3045000.
pub fn version_number() -> i32 {
    // SAFETY: no preconditions
    unsafe { sqlite3_libversion_number() }
}

/// English description of a result code.
pub fn error_string(code: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a static string for every input
    let ptr = unsafe { sqlite3_errstr(code) };
    if ptr.is_null() {
        return format!("sqlite error {code}");
    }
    // SAFETY: non-null static string
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_version_is_three() {
        assert!(version().starts_with("3."));
        assert!(version_number() >= 3_000_000);
    }

    #[test]
    fn error_strings() {
        assert_eq!(error_string(SQLITE_OK), "not an error");
        assert!(error_string(SQLITE_CONSTRAINT).contains("constraint"));
    }

    #[test]
    fn extended_codes_reduce_to_primary() {
        // SQLITE_CONSTRAINT_UNIQUE
        assert_eq!(primary_code(2067), SQLITE_CONSTRAINT);
    }
}
