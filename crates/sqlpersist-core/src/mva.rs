//! Parallel arrays of model descriptors and values.
//!
//! Lookup is by descriptor identity: two structurally equal columns from
//! different joins are still different entries.

use crate::value::Value;

/// Model descriptors paired positionally with values.
#[derive(Debug, Clone)]
pub struct ModelValueArray<'m, M> {
    models: Vec<&'m M>,
    values: Vec<Value>,
}

impl<M> Default for ModelValueArray<'_, M> {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<'m, M> ModelValueArray<'m, M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            models: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, model: &'m M, value: Value) {
        self.models.push(model);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// The value stored for exactly this descriptor.
    pub fn get(&self, model: &M) -> Option<&Value> {
        self.position(model).map(|i| &self.values[i])
    }

    /// Move the value for `model` out, leaving NULL in its place.
    pub fn take(&mut self, model: &M) -> Option<Value> {
        self.position(model)
            .map(|i| std::mem::replace(&mut self.values[i], Value::Null))
    }

    pub fn contains(&self, model: &M) -> bool {
        self.position(model).is_some()
    }

    fn position(&self, model: &M) -> Option<usize> {
        self.models.iter().position(|m| std::ptr::eq(*m, model))
    }

    pub fn models(&self) -> &[&'m M] {
        &self.models
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'m M, &Value)> + '_ {
        self.models.iter().copied().zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Column;
    use crate::types::SqlType;

    #[test]
    fn lookup_is_by_identity() {
        let a = Column::new("id", SqlType::BigInt);
        let b = Column::new("id", SqlType::BigInt);
        assert_eq!(a, b);

        let mut mva = ModelValueArray::new();
        mva.push(&a, Value::BigInt(1));
        mva.push(&b, Value::BigInt(2));
        assert_eq!(mva.len(), 2);
        assert_eq!(mva.get(&b), Some(&Value::BigInt(2)));
        assert_eq!(mva.get(&a), Some(&Value::BigInt(1)));

        let c = Column::new("id", SqlType::BigInt);
        assert!(!mva.contains(&c));
    }

    #[test]
    fn take_leaves_null() {
        let a = Column::new("name", SqlType::Text);
        let mut mva = ModelValueArray::new();
        mva.push(&a, Value::Text("x".into()));
        assert_eq!(mva.take(&a), Some(Value::Text("x".into())));
        assert_eq!(mva.get(&a), Some(&Value::Null));
    }
}
