//! Primary-key values.
//!
//! An [`EntityKey`] is the ordered list of key column values of one row.
//! Integer widths are normalized so that a key read back from a driver as
//! `INTEGER` matches the same key supplied by the application as `i64`.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::value::Value;

/// Ordered primary-key values of one entity instance.
#[derive(Debug, Clone)]
pub struct EntityKey(Vec<Value>);

impl EntityKey {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values.into_iter().map(normalize).collect())
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A key with any NULL component identifies no row.
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }
}

fn normalize(v: Value) -> Value {
    match v {
        Value::TinyInt(i) => Value::BigInt(i64::from(i)),
        Value::SmallInt(i) => Value::BigInt(i64::from(i)),
        Value::Int(i) => Value::BigInt(i64::from(i)),
        Value::Float(f) => Value::Double(f64::from(f)),
        Value::Decimal(s) => Value::Text(s),
        other => other,
    }
}

fn hash_single_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::TinyInt(i) => {
            2u8.hash(hasher);
            i64::from(*i).hash(hasher);
        }
        Value::SmallInt(i) => {
            2u8.hash(hasher);
            i64::from(*i).hash(hasher);
        }
        Value::Int(i) => {
            2u8.hash(hasher);
            i64::from(*i).hash(hasher);
        }
        Value::BigInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Float(f) => {
            3u8.hash(hasher);
            f64::from(*f).to_bits().hash(hasher);
        }
        Value::Double(f) => {
            3u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Decimal(s) | Value::Text(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            5u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Date(d) => {
            6u8.hash(hasher);
            d.hash(hasher);
        }
        Value::Time(t) => {
            7u8.hash(hasher);
            t.hash(hasher);
        }
        Value::Timestamp(ts) => {
            8u8.hash(hasher);
            ts.hash(hasher);
        }
        Value::Uuid(u) => {
            9u8.hash(hasher);
            u.hash(hasher);
        }
        Value::Json(j) => {
            10u8.hash(hasher);
            j.to_string().hash(hasher);
        }
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for v in &self.0 {
            hash_single_value(v, state);
        }
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|(a, b)| same_value(a, b))
    }
}

impl Eq for EntityKey {}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match v {
                Value::Null => write!(f, "NULL")?,
                Value::Bool(b) => write!(f, "{}", b)?,
                Value::BigInt(n) => write!(f, "{}", n)?,
                Value::Double(n) => write!(f, "{}", n)?,
                Value::Text(s) => write!(f, "'{}'", s)?,
                other => write!(f, "{:?}", other)?,
            }
        }
        write!(f, "]")
    }
}

impl From<Vec<Value>> for EntityKey {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl From<Value> for EntityKey {
    fn from(value: Value) -> Self {
        Self::new(vec![value])
    }
}

impl From<i64> for EntityKey {
    fn from(v: i64) -> Self {
        Self::new(vec![Value::BigInt(v)])
    }
}

impl From<i32> for EntityKey {
    fn from(v: i32) -> Self {
        Self::new(vec![Value::Int(v)])
    }
}

impl From<&str> for EntityKey {
    fn from(v: &str) -> Self {
        Self::new(vec![Value::Text(v.to_string())])
    }
}

impl From<String> for EntityKey {
    fn from(v: String) -> Self {
        Self::new(vec![Value::Text(v)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn integer_widths_compare_equal() {
        let a = EntityKey::new(vec![Value::Int(5)]);
        let b = EntityKey::from(5_i64);
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, "five");
        assert_eq!(map.get(&b), Some(&"five"));
    }

    #[test]
    fn composite_order_matters() {
        let a = EntityKey::new(vec![Value::BigInt(1), Value::Text("x".into())]);
        let b = EntityKey::new(vec![Value::Text("x".into()), Value::BigInt(1)]);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "[1, 'x']");
    }

    #[test]
    fn null_component_detected() {
        assert!(EntityKey::new(vec![Value::BigInt(1), Value::Null]).has_null());
        assert!(!EntityKey::from("k").has_null());
    }
}
