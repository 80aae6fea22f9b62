//! Dynamic SQL values.

use serde::{Deserialize, Serialize};

use crate::error::{Error, TypeError};
use crate::types::SqlType;

/// A dynamically-typed SQL value.
///
/// Used for parameter binding, result fetching and as the payload of
/// basic attributes read through an entity's accessor table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 8-bit signed integer
    TinyInt(i8),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 32-bit floating point
    Float(f32),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since epoch)
    Date(i32),

    /// Time (microseconds since midnight)
    Time(i64),

    /// Timestamp (microseconds since epoch)
    Timestamp(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Float(_) => "REAL",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::TinyInt(v) => Some(*v != 0),
            Value::SmallInt(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1 } else { 0 }),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::TinyInt(v) => Some(f64::from(*v)),
            Value::SmallInt(v) => Some(f64::from(*v)),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Convert this value into the representation of `sql_type`.
    ///
    /// Drivers report the storage class they read (SQLite hands back
    /// INTEGER for a COUNT, TEXT for a DECIMAL column); this brings the
    /// value back to the declared or inferred column type.
    pub fn coerce_to(self, sql_type: &SqlType) -> crate::Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = |v: &Value| {
            Error::Type(TypeError {
                expected: sql_type.type_label(),
                actual: v.type_name().to_string(),
                column: None,
            })
        };
        match sql_type {
            SqlType::Boolean => self.as_bool().map(Value::Bool).ok_or_else(|| mismatch(&self)),
            SqlType::TinyInt => {
                let v = self.as_i64().ok_or_else(|| mismatch(&self))?;
                i8::try_from(v).map(Value::TinyInt).map_err(|_| mismatch(&self))
            }
            SqlType::SmallInt => {
                let v = self.as_i64().ok_or_else(|| mismatch(&self))?;
                i16::try_from(v)
                    .map(Value::SmallInt)
                    .map_err(|_| mismatch(&self))
            }
            SqlType::Integer => {
                let v = self.as_i64().ok_or_else(|| mismatch(&self))?;
                i32::try_from(v).map(Value::Int).map_err(|_| mismatch(&self))
            }
            SqlType::BigInt => self.as_i64().map(Value::BigInt).ok_or_else(|| mismatch(&self)),
            #[allow(clippy::cast_possible_truncation)]
            SqlType::Real => self
                .as_f64()
                .map(|v| Value::Float(v as f32))
                .ok_or_else(|| mismatch(&self)),
            SqlType::Double => self.as_f64().map(Value::Double).ok_or_else(|| mismatch(&self)),
            SqlType::Decimal { .. } => match self {
                Value::Decimal(s) | Value::Text(s) => Ok(Value::Decimal(s)),
                Value::Float(_) | Value::Double(_) => {
                    Ok(Value::Decimal(self.as_f64().unwrap_or_default().to_string()))
                }
                other => other
                    .as_i64()
                    .map(|v| Value::Decimal(v.to_string()))
                    .ok_or_else(|| mismatch(&other)),
            },
            SqlType::VarChar(_) | SqlType::Text => match self {
                Value::Text(_) => Ok(self),
                Value::Decimal(s) => Ok(Value::Text(s)),
                other => Err(mismatch(&other)),
            },
            SqlType::Blob => match self {
                Value::Bytes(_) => Ok(self),
                Value::Text(s) => Ok(Value::Bytes(s.into_bytes())),
                other => Err(mismatch(&other)),
            },
            SqlType::Uuid => match self {
                Value::Uuid(_) => Ok(self),
                Value::Bytes(b) if b.len() == 16 => {
                    let mut arr = [0u8; 16];
                    arr.copy_from_slice(&b);
                    Ok(Value::Uuid(arr))
                }
                other => Err(mismatch(&other)),
            },
            SqlType::Json => match self {
                Value::Json(_) => Ok(self),
                Value::Text(s) => serde_json::from_str(&s)
                    .map(Value::Json)
                    .map_err(|e| Error::Serde(e.to_string())),
                other => Err(mismatch(&other)),
            },
            SqlType::Date => match self {
                Value::Date(_) => Ok(self),
                other => {
                    let v = other.as_i64().ok_or_else(|| mismatch(&other))?;
                    i32::try_from(v).map(Value::Date).map_err(|_| mismatch(&other))
                }
            },
            SqlType::Time => match self {
                Value::Time(_) => Ok(self),
                other => other.as_i64().map(Value::Time).ok_or_else(|| mismatch(&other)),
            },
            SqlType::Timestamp => match self {
                Value::Timestamp(_) => Ok(self),
                other => other
                    .as_i64()
                    .map(Value::Timestamp)
                    .ok_or_else(|| mismatch(&other)),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::TinyInt(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

fn type_error(expected: &'static str, actual: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: actual.type_name().to_string(),
        column: None,
    })
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_bool().ok_or_else(|| type_error("bool", &value))
    }
}

impl TryFrom<Value> for i16 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value
            .as_i64()
            .and_then(|v| i16::try_from(v).ok())
            .ok_or_else(|| type_error("i16", &value))
    }
}

impl TryFrom<Value> for i32 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| type_error("i32", &value))
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_i64().ok_or_else(|| type_error("i64", &value))
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_f64().ok_or_else(|| type_error("f64", &value))
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(v) | Value::Decimal(v) => Ok(v),
            other => Err(type_error("String", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::Text(v) => Ok(v.into_bytes()),
            other => Err(type_error("Vec<u8>", &other)),
        }
    }
}

impl TryFrom<Value> for [u8; 16] {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Uuid(v) => Ok(v),
            Value::Bytes(v) if v.len() == 16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&v);
                Ok(arr)
            }
            other => Err(type_error("UUID", &other)),
        }
    }
}

/// TryFrom for `Option<T>` - returns None for Null, tries to convert otherwise
impl<T> TryFrom<Value> for Option<T>
where
    T: TryFrom<Value, Error = Error>,
{
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(None),
            v => T::try_from(v).map(Some),
        }
    }
}
