//! Moving values across the SQLite boundary.
//!
//! SQLite has five storage classes. Values bind as follows:
//!
//! | Value | Storage |
//! |---|---|
//! | Bool, integers | INTEGER |
//! | Date (days), Time / Timestamp (micros) | INTEGER |
//! | Float, Double | REAL |
//! | Text, Decimal, Json | TEXT |
//! | Bytes, Uuid | BLOB |
//!
//! Reads return the storage class as is; the record builders coerce them back
//! to the column type.

use std::ffi::{CStr, c_int};

use sqlpersist_core::Value;

use crate::ffi;

/// Bind a value to a 1-based statement parameter.
///
/// # Safety
/// `stmt` must be a valid prepared statement and `index` within its parameter count.
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    // SAFETY: upheld by the caller; text and blob buffers are copied (TRANSIENT)
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Bool(b) => ffi::sqlite3_bind_int64(stmt, index, i64::from(*b)),
            Value::TinyInt(v) => ffi::sqlite3_bind_int64(stmt, index, i64::from(*v)),
            Value::SmallInt(v) => ffi::sqlite3_bind_int64(stmt, index, i64::from(*v)),
            Value::Int(v) | Value::Date(v) => ffi::sqlite3_bind_int64(stmt, index, i64::from(*v)),
            Value::BigInt(v) | Value::Time(v) | Value::Timestamp(v) => {
                ffi::sqlite3_bind_int64(stmt, index, *v)
            }
            Value::Float(v) => ffi::sqlite3_bind_double(stmt, index, f64::from(*v)),
            Value::Double(v) => ffi::sqlite3_bind_double(stmt, index, *v),
            Value::Decimal(s) | Value::Text(s) => bind_text(stmt, index, s),
            Value::Json(json) => bind_text(stmt, index, &json.to_string()),
            Value::Bytes(b) => bind_blob(stmt, index, b),
            Value::Uuid(bytes) => bind_blob(stmt, index, bytes),
        }
    }
}

unsafe fn bind_text(stmt: *mut ffi::sqlite3_stmt, index: c_int, text: &str) -> c_int {
    let Ok(len) = c_int::try_from(text.len()) else {
        return ffi::SQLITE_TOOBIG;
    };
    // SAFETY: caller guarantees stmt; the buffer outlives the call and is copied
    unsafe {
        ffi::sqlite3_bind_text(
            stmt,
            index,
            text.as_ptr().cast(),
            len,
            ffi::SQLITE_TRANSIENT(),
        )
    }
}

unsafe fn bind_blob(stmt: *mut ffi::sqlite3_stmt, index: c_int, bytes: &[u8]) -> c_int {
    let Ok(len) = c_int::try_from(bytes.len()) else {
        return ffi::SQLITE_TOOBIG;
    };
    // SAFETY: as for bind_text
    unsafe {
        ffi::sqlite3_bind_blob(
            stmt,
            index,
            bytes.as_ptr().cast(),
            len,
            ffi::SQLITE_TRANSIENT(),
        )
    }
}

/// Read a 0-based column of the current row.
///
/// # Safety
/// `stmt` must have just returned `SQLITE_ROW` and `index` be a valid column.
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    // SAFETY: upheld by the caller; pointers returned by sqlite stay valid
    // until the next step or finalize, and are copied before that
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_INTEGER => Value::BigInt(ffi::sqlite3_column_int64(stmt, index)),
            ffi::SQLITE_FLOAT => Value::Double(ffi::sqlite3_column_double(stmt, index)),
            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_column_text(stmt, index);
                let len = usize::try_from(ffi::sqlite3_column_bytes(stmt, index)).unwrap_or(0);
                if ptr.is_null() {
                    Value::Null
                } else {
                    let slice = std::slice::from_raw_parts(ptr, len);
                    Value::Text(String::from_utf8_lossy(slice).into_owned())
                }
            }
            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_column_blob(stmt, index);
                let len = usize::try_from(ffi::sqlite3_column_bytes(stmt, index)).unwrap_or(0);
                if ptr.is_null() || len == 0 {
                    Value::Bytes(Vec::new())
                } else {
                    Value::Bytes(std::slice::from_raw_parts(ptr.cast::<u8>(), len).to_vec())
                }
            }
            _ => Value::Null,
        }
    }
}

/// Name of a result column.
///
/// # Safety
/// `stmt` must be a valid prepared statement and `index` a valid column.
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: upheld by the caller
    let ptr = unsafe { ffi::sqlite3_column_name(stmt, index) };
    if ptr.is_null() {
        None
    } else {
        // SAFETY: non-null NUL-terminated string owned by the statement
        unsafe { CStr::from_ptr(ptr) }.to_str().ok().map(String::from)
    }
}
