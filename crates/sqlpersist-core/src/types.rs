//! SQL type definitions and numeric promotion.

use serde::{Deserialize, Serialize};

/// SQL data types a mapped column can declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    // Integer types
    TinyInt,
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Real,
    Double,

    // Fixed precision
    Decimal { precision: u8, scale: u8 },

    // Boolean
    Boolean,

    // String types
    VarChar(u32),
    Text,

    // Binary
    Blob,

    // Date/time types
    Date,
    Time,
    Timestamp,

    // UUID
    Uuid,

    // JSON
    Json,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            other => other.type_label().to_string(),
        }
    }

    /// Static label, used in type errors.
    pub const fn type_label(&self) -> &'static str {
        match self {
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Decimal { .. } => "DECIMAL",
            SqlType::Boolean => "BOOLEAN",
            SqlType::VarChar(_) => "VARCHAR",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Uuid => "UUID",
            SqlType::Json => "JSON",
        }
    }

    /// Position on the numeric widening ladder, `None` for non-numeric types.
    ///
    /// TINYINT < SMALLINT < INTEGER < BIGINT < DECIMAL < REAL < DOUBLE
    pub const fn numeric_rank(&self) -> Option<u8> {
        match self {
            SqlType::TinyInt => Some(0),
            SqlType::SmallInt => Some(1),
            SqlType::Integer => Some(2),
            SqlType::BigInt => Some(3),
            SqlType::Decimal { .. } => Some(4),
            SqlType::Real => Some(5),
            SqlType::Double => Some(6),
            _ => None,
        }
    }

    pub const fn is_numeric(&self) -> bool {
        self.numeric_rank().is_some()
    }

    pub const fn is_integral(&self) -> bool {
        matches!(
            self,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
        )
    }

    /// The wider of two operand types.
    ///
    /// Two numeric types promote to the higher rank. A numeric mixed with a
    /// non-numeric type keeps the numeric side; otherwise the left type wins.
    pub fn promote(left: &SqlType, right: &SqlType) -> SqlType {
        match (left.numeric_rank(), right.numeric_rank()) {
            (Some(l), Some(r)) => {
                if r > l {
                    right.clone()
                } else {
                    left.clone()
                }
            }
            (None, Some(_)) => right.clone(),
            _ => left.clone(),
        }
    }

    /// Result type of `SUM` over an operand of this type.
    pub fn sum_type(&self) -> SqlType {
        match self {
            SqlType::Decimal { .. } => self.clone(),
            t if t.is_integral() => SqlType::BigInt,
            _ => SqlType::Double,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_takes_wider_numeric() {
        assert_eq!(
            SqlType::promote(&SqlType::Integer, &SqlType::BigInt),
            SqlType::BigInt
        );
        assert_eq!(
            SqlType::promote(&SqlType::Double, &SqlType::SmallInt),
            SqlType::Double
        );
        assert_eq!(
            SqlType::promote(&SqlType::BigInt, &SqlType::Real),
            SqlType::Real
        );
        assert_eq!(
            SqlType::promote(&SqlType::Text, &SqlType::Integer),
            SqlType::Integer
        );
        assert_eq!(
            SqlType::promote(&SqlType::Text, &SqlType::Date),
            SqlType::Text
        );
    }

    #[test]
    fn sum_types() {
        assert_eq!(SqlType::Integer.sum_type(), SqlType::BigInt);
        assert_eq!(SqlType::Real.sum_type(), SqlType::Double);
        let dec = SqlType::Decimal {
            precision: 12,
            scale: 2,
        };
        assert_eq!(dec.sum_type(), dec);
    }

    #[test]
    fn sql_names() {
        assert_eq!(SqlType::VarChar(40).sql_name(), "VARCHAR(40)");
        assert_eq!(SqlType::BigInt.sql_name(), "BIGINT");
    }
}
