//! Typed attribute accessor tables.
//!
//! Every mapped attribute carries an [`Accessor`]: a getter and a setter
//! closure built once with the entity model. The engine reads and writes
//! instances only through these, addressing attributes by id rather than
//! by reflection.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, MappingError, Result};
use crate::value::Value;

/// Handle of one entity instance inside a persistence context.
///
/// Handles are never reused within a context, so comparing two handles is
/// the identity comparison of the instances they name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The value of one attribute as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// A scalar column value.
    Basic(Value),
    /// An embeddable, one entry per embedded field in declaration order.
    Embedded(Vec<AttrValue>),
    /// A to-one reference.
    One(Option<EntityId>),
    /// A to-many collection.
    Many(Vec<EntityId>),
}

impl AttrValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            AttrValue::Basic(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            AttrValue::Basic(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_one(&self) -> Option<EntityId> {
        match self {
            AttrValue::One(id) => *id,
            _ => None,
        }
    }

    pub fn as_many(&self) -> &[EntityId] {
        match self {
            AttrValue::Many(ids) => ids,
            _ => &[],
        }
    }

    /// Every entity handle referenced by this value.
    pub fn referenced(&self) -> Vec<EntityId> {
        match self {
            AttrValue::One(Some(id)) => vec![*id],
            AttrValue::Many(ids) => ids.clone(),
            _ => Vec::new(),
        }
    }
}

impl From<Value> for AttrValue {
    fn from(v: Value) -> Self {
        AttrValue::Basic(v)
    }
}

type Getter = dyn Fn(&dyn Any) -> Result<AttrValue> + Send + Sync;
type Setter = dyn Fn(&mut dyn Any, AttrValue) -> Result<()> + Send + Sync;

/// Getter/setter pair for one attribute of one entity type.
#[derive(Clone)]
pub struct Accessor {
    get: Arc<Getter>,
    set: Arc<Setter>,
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Accessor")
    }
}

fn wrong_instance<E>() -> Error {
    Error::Mapping(MappingError {
        entity: Some(std::any::type_name::<E>().to_string()),
        attribute: None,
        message: "accessor applied to an instance of another type".to_string(),
    })
}

fn wrong_shape(expected: &str, got: &AttrValue) -> Error {
    Error::Mapping(MappingError {
        entity: None,
        attribute: None,
        message: format!("expected {} attribute value, got {:?}", expected, got),
    })
}

impl Accessor {
    /// Build an accessor from closures over the concrete entity type.
    pub fn new<E, G, S>(get: G, set: S) -> Self
    where
        E: 'static,
        G: Fn(&E) -> AttrValue + Send + Sync + 'static,
        S: Fn(&mut E, AttrValue) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            get: Arc::new(move |any: &dyn Any| {
                any.downcast_ref::<E>()
                    .map(&get)
                    .ok_or_else(wrong_instance::<E>)
            }),
            set: Arc::new(move |any: &mut dyn Any, value| match any.downcast_mut::<E>() {
                Some(e) => set(e, value),
                None => Err(wrong_instance::<E>()),
            }),
        }
    }

    /// Accessor for a basic (scalar) attribute.
    pub fn value<E, G, S>(get: G, set: S) -> Self
    where
        E: 'static,
        G: Fn(&E) -> Value + Send + Sync + 'static,
        S: Fn(&mut E, Value) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(
            move |e: &E| AttrValue::Basic(get(e)),
            move |e: &mut E, v| match v {
                AttrValue::Basic(v) => set(e, v),
                other => Err(wrong_shape("basic", &other)),
            },
        )
    }

    /// Accessor for a to-one reference.
    pub fn one<E, G, S>(get: G, set: S) -> Self
    where
        E: 'static,
        G: Fn(&E) -> Option<EntityId> + Send + Sync + 'static,
        S: Fn(&mut E, Option<EntityId>) + Send + Sync + 'static,
    {
        Self::new(
            move |e: &E| AttrValue::One(get(e)),
            move |e: &mut E, v| match v {
                AttrValue::One(id) => {
                    set(e, id);
                    Ok(())
                }
                other => Err(wrong_shape("to-one", &other)),
            },
        )
    }

    /// Accessor for a to-many collection.
    pub fn many<E, G, S>(get: G, set: S) -> Self
    where
        E: 'static,
        G: Fn(&E) -> Vec<EntityId> + Send + Sync + 'static,
        S: Fn(&mut E, Vec<EntityId>) + Send + Sync + 'static,
    {
        Self::new(
            move |e: &E| AttrValue::Many(get(e)),
            move |e: &mut E, v| match v {
                AttrValue::Many(ids) => {
                    set(e, ids);
                    Ok(())
                }
                other => Err(wrong_shape("to-many", &other)),
            },
        )
    }

    pub fn get(&self, instance: &dyn Any) -> Result<AttrValue> {
        (self.get)(instance)
    }

    pub fn set(&self, instance: &mut dyn Any, value: AttrValue) -> Result<()> {
        (self.set)(instance, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Note {
        text: String,
        parent: Option<EntityId>,
    }

    #[test]
    fn typed_accessor_round_trips_through_any() {
        let text = Accessor::value(
            |n: &Note| Value::Text(n.text.clone()),
            |n: &mut Note, v| {
                n.text = v.try_into()?;
                Ok(())
            },
        );
        let mut note: Box<dyn Any> = Box::new(Note::default());
        text.set(note.as_mut(), AttrValue::Basic(Value::Text("hi".into())))
            .unwrap();
        assert_eq!(
            text.get(note.as_ref()).unwrap(),
            AttrValue::Basic(Value::Text("hi".into()))
        );
    }

    #[test]
    fn wrong_shape_is_mapping_error() {
        let parent = Accessor::one(|n: &Note| n.parent, |n: &mut Note, v| n.parent = v);
        let mut note: Box<dyn Any> = Box::new(Note::default());
        let err = parent
            .set(note.as_mut(), AttrValue::Many(vec![EntityId(1)]))
            .unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
        parent
            .set(note.as_mut(), AttrValue::One(Some(EntityId(3))))
            .unwrap();
        assert_eq!(parent.get(note.as_ref()).unwrap().as_one(), Some(EntityId(3)));
    }

    #[test]
    fn wrong_instance_type_is_rejected() {
        let parent = Accessor::one(|n: &Note| n.parent, |n: &mut Note, v| n.parent = v);
        let other: Box<dyn Any> = Box::new(5_u32);
        assert!(parent.get(other.as_ref()).is_err());
    }
}
