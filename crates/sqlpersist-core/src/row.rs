//! Database row representation.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column names in order
    names: Vec<String>,
    /// Name -> index mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    ///
    /// Drivers differ in how they case column labels, so an exact miss
    /// falls back to a case-insensitive scan.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied().or_else(|| {
            self.names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(name))
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a database query.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with the given columns and values.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a value by column name, failing when the column is absent.
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: "column in result set",
                actual: format!("no column named '{}'", name),
                column: Some(name.to_string()),
            })
        })
    }

    /// Get a typed value by column name.
    pub fn get_named<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self.require(name)?.clone();
        T::try_from(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            other => other,
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_named_access() {
        let row = Row::new(
            vec!["b0__id".into(), "b0__title".into()],
            vec![Value::Int(1), Value::Text("Dune".into())],
        );
        assert_eq!(row.get_named::<i64>("b0__id").unwrap(), 1);
        assert_eq!(row.get_named::<String>("B0__TITLE").unwrap(), "Dune");
        assert!(row.get_by_name("b0__missing").is_none());
    }

    #[test]
    fn test_row_type_error_carries_column() {
        let row = Row::new(vec!["n".into()], vec![Value::Text("x".into())]);
        match row.get_named::<i64>("n") {
            Err(Error::Type(te)) => assert_eq!(te.column.as_deref(), Some("n")),
            other => panic!("expected type error, got {other:?}"),
        }
    }

    #[test]
    fn test_shared_columns() {
        let cols = Arc::new(ColumnInfo::new(vec!["a".into()]));
        let r1 = Row::with_columns(Arc::clone(&cols), vec![Value::Int(1)]);
        let r2 = Row::with_columns(cols, vec![Value::Int(2)]);
        assert_eq!(r1.get(0), Some(&Value::Int(1)));
        assert_eq!(r2.get(0), Some(&Value::Int(2)));
        assert_eq!(r2.column_names().collect::<Vec<_>>(), vec!["a"]);
    }
}
