//! The entity model: immutable description of mapped entity types.
//!
//! An [`EntityModel`] is built once per persistence unit and shared by
//! reference for its whole lifetime. Building it validates identifiers,
//! resolves relationship targets and `mapped_by` counterparts, and puts
//! every join column list into the key order of the entity it references,
//! so that later code can zip foreign-key columns with key values directly.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::accessor::{Accessor, AttrValue};
use crate::error::{Error, Result};
use crate::identifiers::validate_identifier;
use crate::key::EntityKey;
use crate::relationship::{JoinColumnMapping, JoinMapping, Relationship, ResolvedLink};
use crate::types::SqlType;
use crate::value::Value;

/// Index of an entity type within its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityTypeId(pub usize);

/// Index of an attribute within its entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrId(pub usize);

/// A mapped column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A value type flattened into its owner's table.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddable {
    pub name: String,
    pub fields: Vec<EmbeddedField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedField {
    pub name: String,
    pub kind: EmbeddedKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddedKind {
    Column(Column),
    Nested(Embeddable),
}

impl Embeddable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, column: Column) -> Self {
        self.fields.push(EmbeddedField {
            name: name.into(),
            kind: EmbeddedKind::Column(column),
        });
        self
    }

    pub fn nested(mut self, name: impl Into<String>, embeddable: Embeddable) -> Self {
        self.fields.push(EmbeddedField {
            name: name.into(),
            kind: EmbeddedKind::Nested(embeddable),
        });
        self
    }

    /// All columns, depth first, in declaration order.
    pub fn columns(&self) -> Vec<&Column> {
        let mut out = Vec::new();
        for field in &self.fields {
            match &field.kind {
                EmbeddedKind::Column(c) => out.push(c),
                EmbeddedKind::Nested(e) => out.extend(e.columns()),
            }
        }
        out
    }

    /// Find the column at a dotted path such as `address.city`.
    pub fn column_at(&self, path: &[&str]) -> Option<&Column> {
        let (head, rest) = path.split_first()?;
        let field = self.fields.iter().find(|f| f.name == *head)?;
        match (&field.kind, rest.is_empty()) {
            (EmbeddedKind::Column(c), true) => Some(c),
            (EmbeddedKind::Nested(e), false) => e.column_at(rest),
            _ => None,
        }
    }

    /// Flatten an embedded attribute value into column values.
    ///
    /// A NULL basic value stands for an absent embeddable and yields one
    /// NULL per column.
    pub fn flatten(&self, value: &AttrValue) -> Result<Vec<Value>> {
        match value {
            AttrValue::Basic(Value::Null) => Ok(vec![Value::Null; self.columns().len()]),
            AttrValue::Embedded(parts) if parts.len() == self.fields.len() => {
                let mut out = Vec::new();
                for (field, part) in self.fields.iter().zip(parts) {
                    match (&field.kind, part) {
                        (EmbeddedKind::Column(_), AttrValue::Basic(v)) => out.push(v.clone()),
                        (EmbeddedKind::Nested(e), nested) => out.extend(e.flatten(nested)?),
                        (EmbeddedKind::Column(_), other) => {
                            return Err(Error::mapping_attr(
                                &self.name,
                                &field.name,
                                format!("expected a basic value, got {:?}", other),
                            ));
                        }
                    }
                }
                Ok(out)
            }
            other => Err(Error::mapping(
                &self.name,
                format!(
                    "expected {} embedded fields, got {:?}",
                    self.fields.len(),
                    other
                ),
            )),
        }
    }

    /// Rebuild an embedded attribute value from column values.
    pub fn assemble(&self, values: &mut impl Iterator<Item = Value>) -> Result<AttrValue> {
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match &field.kind {
                EmbeddedKind::Column(c) => {
                    let v = values.next().ok_or_else(|| {
                        Error::mapping_attr(&self.name, &field.name, "missing column value")
                    })?;
                    parts.push(AttrValue::Basic(v.coerce_to(&c.sql_type)?));
                }
                EmbeddedKind::Nested(e) => parts.push(e.assemble(values)?),
            }
        }
        Ok(AttrValue::Embedded(parts))
    }
}

/// How new key values are produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationStrategy {
    /// Assigned by the application before persist.
    Plain,
    /// Generated by the database on INSERT and read back.
    Identity,
    /// Fetched from the named sequence before INSERT.
    Sequence(String),
}

/// Primary key descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pk {
    Single {
        attribute: AttrId,
        generation: GenerationStrategy,
    },
    Composite {
        attributes: Vec<AttrId>,
    },
    IdClass {
        class_name: String,
        attributes: Vec<AttrId>,
    },
    Embedded {
        attribute: AttrId,
    },
}

impl Pk {
    pub fn attribute_ids(&self) -> Vec<AttrId> {
        match self {
            Pk::Single { attribute, .. } | Pk::Embedded { attribute } => vec![*attribute],
            Pk::Composite { attributes } | Pk::IdClass { attributes, .. } => attributes.clone(),
        }
    }

    pub fn generation(&self) -> GenerationStrategy {
        match self {
            Pk::Single { generation, .. } => generation.clone(),
            _ => GenerationStrategy::Plain,
        }
    }

    /// Key columns in key order.
    pub fn columns<'a>(&self, attributes: &'a [Attribute]) -> Vec<&'a Column> {
        self.attribute_ids()
            .into_iter()
            .flat_map(|id| attributes[id.0].own_columns())
            .collect()
    }

    /// Read the key out of an instance. `None` when any component is NULL.
    pub fn read_key(&self, attributes: &[Attribute], instance: &dyn Any) -> Result<Option<EntityKey>> {
        let mut values = Vec::new();
        for id in self.attribute_ids() {
            let attr = &attributes[id.0];
            let value = attr.accessor.get(instance)?;
            match (&attr.kind, value) {
                (AttributeKind::Basic(_), AttrValue::Basic(v)) => values.push(v),
                (AttributeKind::Embedded(e), v) => values.extend(e.flatten(&v)?),
                (_, other) => {
                    return Err(Error::mapping_attr(
                        "",
                        &attr.name,
                        format!("key attribute returned {:?}", other),
                    ));
                }
            }
        }
        let key = EntityKey::new(values);
        Ok(if key.has_null() { None } else { Some(key) })
    }

    /// Write a key into an instance, distributing values over key attributes.
    pub fn write_key(
        &self,
        attributes: &[Attribute],
        instance: &mut dyn Any,
        key: &EntityKey,
    ) -> Result<()> {
        let mut values = key.values().iter().cloned();
        for id in self.attribute_ids() {
            let attr = &attributes[id.0];
            let value = match &attr.kind {
                AttributeKind::Basic(c) => {
                    let v = values
                        .next()
                        .ok_or_else(|| Error::mapping_attr("", &attr.name, "key too short"))?;
                    AttrValue::Basic(v.coerce_to(&c.sql_type)?)
                }
                AttributeKind::Embedded(e) => e.assemble(&mut values)?,
                AttributeKind::Relationship(_) => {
                    return Err(Error::mapping_attr(
                        "",
                        &attr.name,
                        "relationship cannot be a key attribute",
                    ));
                }
            };
            attr.accessor.set(instance, value)?;
        }
        Ok(())
    }

    /// Query parameters for a key, in the order of [`Pk::columns`].
    pub fn params(&self, key: &EntityKey) -> Vec<Value> {
        key.values().to_vec()
    }
}

/// Kind-specific description of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeKind {
    Basic(Column),
    Embedded(Embeddable),
    Relationship(Relationship),
}

/// One mapped attribute of an entity type.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub kind: AttributeKind,
    pub accessor: Accessor,
}

impl Attribute {
    pub fn column(&self) -> Option<&Column> {
        match &self.kind {
            AttributeKind::Basic(c) => Some(c),
            _ => None,
        }
    }

    pub fn embeddable(&self) -> Option<&Embeddable> {
        match &self.kind {
            AttributeKind::Embedded(e) => Some(e),
            _ => None,
        }
    }

    pub fn relationship(&self) -> Option<&Relationship> {
        match &self.kind {
            AttributeKind::Relationship(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self.kind, AttributeKind::Relationship(_))
    }

    /// Columns this attribute occupies in its entity's own table.
    pub fn own_columns(&self) -> Vec<&Column> {
        match &self.kind {
            AttributeKind::Basic(c) => vec![c],
            AttributeKind::Embedded(e) => e.columns(),
            AttributeKind::Relationship(r) if r.owns_foreign_key() => r
                .join_columns()
                .map(|cols| cols.iter().map(|j| &j.column).collect())
                .unwrap_or_default(),
            AttributeKind::Relationship(_) => Vec::new(),
        }
    }
}

type Factory = dyn Fn() -> Box<dyn Any> + Send + Sync;

/// A mapped entity type.
#[derive(Clone)]
pub struct EntityType {
    pub name: String,
    pub table: String,
    attributes: Vec<Attribute>,
    by_name: HashMap<String, AttrId>,
    pk: Pk,
    version: Option<AttrId>,
    rust_type: TypeId,
    factory: Arc<Factory>,
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("attributes", &self.attributes.len())
            .field("pk", &self.pk)
            .finish_non_exhaustive()
    }
}

impl EntityType {
    /// Start describing entity type `E`, stored in `table`.
    pub fn builder<E: Default + 'static>(
        name: impl Into<String>,
        table: impl Into<String>,
    ) -> EntityTypeBuilder {
        EntityTypeBuilder {
            name: name.into(),
            table: table.into(),
            attributes: Vec::new(),
            key: None,
            version: None,
            rust_type: TypeId::of::<E>(),
            factory: Arc::new(|| Box::new(E::default())),
        }
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, id: AttrId) -> &Attribute {
        &self.attributes[id.0]
    }

    pub fn attribute_ids(&self) -> impl Iterator<Item = AttrId> + '_ {
        (0..self.attributes.len()).map(AttrId)
    }

    pub fn attribute_id(&self, name: &str) -> Option<AttrId> {
        self.by_name.get(name).copied()
    }

    /// Look up an attribute by name, failing with a mapping error.
    pub fn require_attribute(&self, name: &str) -> Result<(AttrId, &Attribute)> {
        self.attribute_id(name)
            .map(|id| (id, self.attribute(id)))
            .ok_or_else(|| Error::mapping_attr(&self.name, name, "no such attribute"))
    }

    pub fn pk(&self) -> &Pk {
        &self.pk
    }

    pub fn version(&self) -> Option<AttrId> {
        self.version
    }

    pub fn is_key_attribute(&self, id: AttrId) -> bool {
        self.pk.attribute_ids().contains(&id)
    }

    pub fn pk_columns(&self) -> Vec<&Column> {
        self.pk.columns(&self.attributes)
    }

    pub fn key_of(&self, instance: &dyn Any) -> Result<Option<EntityKey>> {
        self.pk.read_key(&self.attributes, instance).map_err(|e| self.tag(e))
    }

    pub fn write_key(&self, instance: &mut dyn Any, key: &EntityKey) -> Result<()> {
        self.pk
            .write_key(&self.attributes, instance, key)
            .map_err(|e| self.tag(e))
    }

    /// Relationship attributes, with their descriptors.
    pub fn relationships(&self) -> impl Iterator<Item = (AttrId, &Relationship)> + '_ {
        self.attributes
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.relationship().map(|r| (AttrId(i), r)))
    }

    /// Allocate an empty instance.
    pub fn new_instance(&self) -> Box<dyn Any> {
        (self.factory)()
    }

    pub fn rust_type(&self) -> TypeId {
        self.rust_type
    }

    fn tag(&self, err: Error) -> Error {
        match err {
            Error::Mapping(mut m) if m.entity.as_deref().is_none_or(str::is_empty) => {
                m.entity = Some(self.name.clone());
                Error::Mapping(m)
            }
            other => other,
        }
    }
}

enum KeySpec {
    Single(String, GenerationStrategy),
    Composite(Vec<String>),
    IdClass(String, Vec<String>),
    Embedded(String),
}

/// Builder for [`EntityType`].
pub struct EntityTypeBuilder {
    name: String,
    table: String,
    attributes: Vec<Attribute>,
    key: Option<KeySpec>,
    version: Option<String>,
    rust_type: TypeId,
    factory: Arc<Factory>,
}

impl EntityTypeBuilder {
    fn push(mut self, name: impl Into<String>, kind: AttributeKind, accessor: Accessor) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            kind,
            accessor,
        });
        self
    }

    /// Single-attribute key.
    pub fn id(
        mut self,
        name: impl Into<String>,
        column: Column,
        generation: GenerationStrategy,
        accessor: Accessor,
    ) -> Self {
        let name = name.into();
        self.key = Some(KeySpec::Single(name.clone(), generation));
        self.push(name, AttributeKind::Basic(column), accessor)
    }

    /// Embedded key.
    pub fn embedded_id(
        mut self,
        name: impl Into<String>,
        embeddable: Embeddable,
        accessor: Accessor,
    ) -> Self {
        let name = name.into();
        self.key = Some(KeySpec::Embedded(name.clone()));
        self.push(name, AttributeKind::Embedded(embeddable), accessor)
    }

    /// Composite key over basic attributes declared with [`Self::basic`].
    pub fn composite_key(mut self, attributes: &[&str]) -> Self {
        self.key = Some(KeySpec::Composite(
            attributes.iter().map(|s| (*s).to_string()).collect(),
        ));
        self
    }

    /// Composite key whose values are exchanged as an id class.
    pub fn id_class(mut self, class_name: impl Into<String>, attributes: &[&str]) -> Self {
        self.key = Some(KeySpec::IdClass(
            class_name.into(),
            attributes.iter().map(|s| (*s).to_string()).collect(),
        ));
        self
    }

    pub fn basic(self, name: impl Into<String>, column: Column, accessor: Accessor) -> Self {
        self.push(name, AttributeKind::Basic(column), accessor)
    }

    /// Optimistic-lock version attribute.
    pub fn version(mut self, name: impl Into<String>, column: Column, accessor: Accessor) -> Self {
        let name = name.into();
        self.version = Some(name.clone());
        self.push(name, AttributeKind::Basic(column), accessor)
    }

    pub fn embedded(
        self,
        name: impl Into<String>,
        embeddable: Embeddable,
        accessor: Accessor,
    ) -> Self {
        self.push(name, AttributeKind::Embedded(embeddable), accessor)
    }

    pub fn relationship(
        self,
        name: impl Into<String>,
        relationship: Relationship,
        accessor: Accessor,
    ) -> Self {
        self.push(name, AttributeKind::Relationship(relationship), accessor)
    }

    pub fn build(self) -> Result<EntityType> {
        let entity = self.name.clone();
        validate_identifier(&entity, &self.table)?;

        let mut by_name = HashMap::new();
        for (i, attr) in self.attributes.iter().enumerate() {
            if by_name.insert(attr.name.clone(), AttrId(i)).is_some() {
                return Err(Error::mapping_attr(&entity, &attr.name, "declared twice"));
            }
            for column in attr.own_columns() {
                validate_identifier(&entity, &column.name)?;
            }
        }

        let lookup = |name: &str| {
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| Error::mapping_attr(&entity, name, "key attribute is not declared"))
        };
        let basic_only = |ids: &[AttrId]| -> Result<()> {
            for id in ids {
                let attr = &self.attributes[id.0];
                if attr.column().is_none() {
                    return Err(Error::mapping_attr(
                        &entity,
                        &attr.name,
                        "composite key attributes must be basic",
                    ));
                }
            }
            Ok(())
        };

        let pk = match self.key {
            None => return Err(Error::mapping(&entity, "entity declares no primary key")),
            Some(KeySpec::Single(name, generation)) => Pk::Single {
                attribute: lookup(&name)?,
                generation,
            },
            Some(KeySpec::Embedded(name)) => Pk::Embedded {
                attribute: lookup(&name)?,
            },
            Some(KeySpec::Composite(names)) => {
                let attributes = names.iter().map(|n| lookup(n)).collect::<Result<Vec<_>>>()?;
                basic_only(&attributes)?;
                Pk::Composite { attributes }
            }
            Some(KeySpec::IdClass(class_name, names)) => {
                let attributes = names.iter().map(|n| lookup(n)).collect::<Result<Vec<_>>>()?;
                basic_only(&attributes)?;
                Pk::IdClass {
                    class_name,
                    attributes,
                }
            }
        };
        if pk.attribute_ids().is_empty() {
            return Err(Error::mapping(&entity, "primary key has no attributes"));
        }

        let version = match self.version {
            None => None,
            Some(name) => {
                let id = lookup(&name)?;
                let integral = self.attributes[id.0]
                    .column()
                    .is_some_and(|c| c.sql_type.is_integral());
                if !integral {
                    return Err(Error::mapping_attr(
                        &entity,
                        &name,
                        "version attribute must be an integer column",
                    ));
                }
                Some(id)
            }
        };

        Ok(EntityType {
            name: self.name,
            table: self.table,
            attributes: self.attributes,
            by_name,
            pk,
            version,
            rust_type: self.rust_type,
            factory: self.factory,
        })
    }
}

/// The immutable model of one persistence unit.
#[derive(Debug, Clone)]
pub struct EntityModel {
    types: Vec<EntityType>,
    by_name: HashMap<String, EntityTypeId>,
    by_rust_type: HashMap<TypeId, EntityTypeId>,
}

impl EntityModel {
    pub fn builder() -> EntityModelBuilder {
        EntityModelBuilder { types: Vec::new() }
    }

    /// The entity type behind an id handed out by this model.
    pub fn get(&self, id: EntityTypeId) -> &EntityType {
        &self.types[id.0]
    }

    pub fn types(&self) -> impl Iterator<Item = (EntityTypeId, &EntityType)> {
        self.types.iter().enumerate().map(|(i, t)| (EntityTypeId(i), t))
    }

    pub fn entity_id(&self, name: &str) -> Result<EntityTypeId> {
        self.by_name.get(name).copied().ok_or_else(|| {
            Error::Mapping(crate::error::MappingError {
                entity: Some(name.to_string()),
                attribute: None,
                message: "not registered as an entity".to_string(),
            })
        })
    }

    /// The entity type mapped to the Rust type `E`.
    pub fn type_of<E: 'static>(&self) -> Result<EntityTypeId> {
        self.by_rust_type
            .get(&TypeId::of::<E>())
            .copied()
            .ok_or_else(|| {
                Error::mapping(
                    std::any::type_name::<E>(),
                    "not registered as an entity",
                )
            })
    }

    /// The entity type of a type-erased instance.
    pub fn type_of_instance(&self, instance: &dyn Any) -> Option<EntityTypeId> {
        self.by_rust_type.get(&instance.type_id()).copied()
    }

    /// Target type of a relationship attribute.
    pub fn target_of(&self, owner: EntityTypeId, attr: AttrId) -> Result<(EntityTypeId, &Relationship)> {
        let ty = self.get(owner);
        let a = ty.attribute(attr);
        let rel = a
            .relationship()
            .ok_or_else(|| Error::mapping_attr(&ty.name, &a.name, "not a relationship"))?;
        let link = rel
            .link()
            .ok_or_else(|| Error::mapping_attr(&ty.name, &a.name, "relationship is unresolved"))?;
        Ok((link.target, rel))
    }
}

/// Builder for [`EntityModel`].
pub struct EntityModelBuilder {
    types: Vec<EntityType>,
}

impl EntityModelBuilder {
    pub fn entity(mut self, entity: EntityType) -> Self {
        self.types.push(entity);
        self
    }

    pub fn build(mut self) -> Result<EntityModel> {
        let mut by_name = HashMap::new();
        let mut by_rust_type = HashMap::new();
        for (i, ty) in self.types.iter().enumerate() {
            if by_name.insert(ty.name.clone(), EntityTypeId(i)).is_some() {
                return Err(Error::mapping(&ty.name, "entity declared twice"));
            }
            by_rust_type.insert(ty.rust_type, EntityTypeId(i));
        }

        let mut updates = Vec::new();
        for (ti, ty) in self.types.iter().enumerate() {
            for (attr_id, rel) in ty.relationships() {
                let attr_name = &ty.attribute(attr_id).name;
                let target_id = *by_name.get(&rel.target).ok_or_else(|| {
                    Error::mapping_attr(
                        &ty.name,
                        attr_name,
                        format!("unknown target entity '{}'", rel.target),
                    )
                })?;
                let target = &self.types[target_id.0];
                let target_pk: Vec<String> =
                    target.pk_columns().iter().map(|c| c.name.clone()).collect();
                let owner_pk: Vec<String> =
                    ty.pk_columns().iter().map(|c| c.name.clone()).collect();

                let mut mapping = rel.mapping.clone();
                let counterpart = match &mut mapping {
                    JoinMapping::Inverse { mapped_by } => {
                        let (owning_id, owning) =
                            target.require_attribute(mapped_by).map_err(|_| {
                                Error::mapping_attr(
                                    &ty.name,
                                    attr_name,
                                    format!("mapped_by '{}' is not an attribute of {}", mapped_by, target.name),
                                )
                            })?;
                        let owning_rel = owning.relationship().filter(|r| {
                            r.is_owner() && r.target == ty.name
                        });
                        if owning_rel.is_none() {
                            return Err(Error::mapping_attr(
                                &ty.name,
                                attr_name,
                                format!(
                                    "mapped_by '{}' is not an owning relationship to {}",
                                    mapped_by, ty.name
                                ),
                            ));
                        }
                        Some(owning_id)
                    }
                    JoinMapping::Columns(cols) => {
                        if rel.kind.is_to_one() {
                            order_by_key(&ty.name, attr_name, cols, &target_pk)?;
                        } else {
                            order_by_key(&ty.name, attr_name, cols, &owner_pk)?;
                        }
                        inverse_of(target, &ty.name, attr_name)
                    }
                    JoinMapping::Table(table) => {
                        validate_identifier(&ty.name, &table.table)?;
                        order_by_key(&ty.name, attr_name, &mut table.owner_columns, &owner_pk)?;
                        order_by_key(&ty.name, attr_name, &mut table.target_columns, &target_pk)?;
                        inverse_of(target, &ty.name, attr_name)
                    }
                };
                updates.push((
                    ti,
                    attr_id,
                    mapping,
                    ResolvedLink {
                        target: target_id,
                        counterpart,
                    },
                ));
            }
        }

        let links = updates.len();
        for (ti, attr_id, mapping, link) in updates {
            if let AttributeKind::Relationship(rel) = &mut self.types[ti].attributes[attr_id.0].kind {
                rel.mapping = mapping;
                rel.resolved = Some(link);
            }
        }
        tracing::debug!(entities = self.types.len(), relationships = links, "entity model built");

        Ok(EntityModel {
            types: self.types,
            by_name,
            by_rust_type,
        })
    }
}

/// Reorder join columns into the key order of the referenced entity.
fn order_by_key(
    entity: &str,
    attr: &str,
    cols: &mut Vec<JoinColumnMapping>,
    key_columns: &[String],
) -> Result<()> {
    if cols.len() != key_columns.len() {
        return Err(Error::mapping_attr(
            entity,
            attr,
            format!(
                "{} join columns for a {}-column key",
                cols.len(),
                key_columns.len()
            ),
        ));
    }
    let mut ordered = Vec::with_capacity(cols.len());
    for key_col in key_columns {
        let pos = cols
            .iter()
            .position(|c| &c.referenced_column == key_col)
            .ok_or_else(|| {
                Error::mapping_attr(
                    entity,
                    attr,
                    format!("no join column references key column '{}'", key_col),
                )
            })?;
        let col = cols.remove(pos);
        validate_identifier(entity, &col.column.name)?;
        ordered.push(col);
    }
    *cols = ordered;
    Ok(())
}

/// The attribute on `target` declared as `mapped_by` this owning attribute.
fn inverse_of(target: &EntityType, owner: &str, attr: &str) -> Option<AttrId> {
    target.relationships().find_map(|(id, r)| {
        (r.target == owner && r.mapped_by_name() == Some(attr)).then_some(id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::EntityId;
    use crate::relationship::{RelationshipJoinTable, RelationshipKind};

    #[derive(Default)]
    struct Author {
        id: Option<i64>,
        books: Vec<EntityId>,
    }

    #[derive(Default)]
    struct Book {
        isbn: String,
        edition: i32,
        author: Option<EntityId>,
        tags: Vec<EntityId>,
    }

    #[derive(Default)]
    struct Tag {
        id: i64,
    }

    fn author() -> EntityType {
        EntityType::builder::<Author>("Author", "authors")
            .id(
                "id",
                Column::new("id", SqlType::BigInt),
                GenerationStrategy::Identity,
                Accessor::value(
                    |a: &Author| a.id.into(),
                    |a: &mut Author, v| {
                        a.id = v.try_into()?;
                        Ok(())
                    },
                ),
            )
            .relationship(
                "books",
                Relationship::mapped_by(RelationshipKind::OneToMany, "Book", "author"),
                Accessor::many(|a: &Author| a.books.clone(), |a: &mut Author, v| a.books = v),
            )
            .build()
            .unwrap()
    }

    fn book() -> EntityType {
        EntityType::builder::<Book>("Book", "books")
            .basic(
                "isbn",
                Column::new("isbn", SqlType::Text).not_null(),
                Accessor::value(
                    |b: &Book| b.isbn.clone().into(),
                    |b: &mut Book, v| {
                        b.isbn = v.try_into()?;
                        Ok(())
                    },
                ),
            )
            .basic(
                "edition",
                Column::new("edition", SqlType::Integer).not_null(),
                Accessor::value(
                    |b: &Book| b.edition.into(),
                    |b: &mut Book, v| {
                        b.edition = v.try_into()?;
                        Ok(())
                    },
                ),
            )
            .id_class("BookId", &["isbn", "edition"])
            .relationship(
                "author",
                Relationship::many_to_one(
                    "Author",
                    vec![JoinColumnMapping::new("author_id", SqlType::BigInt, "id")],
                ),
                Accessor::one(|b: &Book| b.author, |b: &mut Book, v| b.author = v),
            )
            .relationship(
                "tags",
                Relationship::join_table(
                    RelationshipKind::ManyToMany,
                    "Tag",
                    RelationshipJoinTable::new(
                        "book_tags",
                        vec![
                            JoinColumnMapping::new("book_edition", SqlType::Integer, "edition"),
                            JoinColumnMapping::new("book_isbn", SqlType::Text, "isbn"),
                        ],
                        vec![JoinColumnMapping::new("tag_id", SqlType::BigInt, "id")],
                    ),
                ),
                Accessor::many(|b: &Book| b.tags.clone(), |b: &mut Book, v| b.tags = v),
            )
            .build()
            .unwrap()
    }

    fn tag() -> EntityType {
        EntityType::builder::<Tag>("Tag", "tags")
            .id(
                "id",
                Column::new("id", SqlType::BigInt),
                GenerationStrategy::Plain,
                Accessor::value(
                    |t: &Tag| t.id.into(),
                    |t: &mut Tag, v| {
                        t.id = v.try_into()?;
                        Ok(())
                    },
                ),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_targets_and_counterparts() {
        let model = EntityModel::builder()
            .entity(author())
            .entity(book())
            .entity(tag())
            .build()
            .unwrap();
        let author_id = model.entity_id("Author").unwrap();
        let book_id = model.type_of::<Book>().unwrap();

        let books_attr = model.get(author_id).attribute_id("books").unwrap();
        let (target, rel) = model.target_of(author_id, books_attr).unwrap();
        assert_eq!(target, book_id);
        let owning = model.get(book_id).attribute_id("author").unwrap();
        assert_eq!(rel.link().unwrap().counterpart, Some(owning));

        let (_, owning_rel) = model.target_of(book_id, owning).unwrap();
        assert_eq!(owning_rel.link().unwrap().counterpart, Some(books_attr));
    }

    #[test]
    fn join_columns_follow_key_order() {
        let model = EntityModel::builder()
            .entity(author())
            .entity(book())
            .entity(tag())
            .build()
            .unwrap();
        let book_id = model.type_of::<Book>().unwrap();
        let ty = model.get(book_id);
        let tags = ty.attribute(ty.attribute_id("tags").unwrap());
        let table = tags.relationship().unwrap().join_table_mapping().unwrap();
        let names: Vec<_> = table
            .owner_columns
            .iter()
            .map(|c| c.column.name.as_str())
            .collect();
        assert_eq!(names, vec!["book_isbn", "book_edition"]);
    }

    #[test]
    fn composite_key_read_and_write() {
        let ty = book();
        let mut instance = ty.new_instance();
        assert!(ty.key_of(instance.as_ref()).unwrap().is_some());
        let key = EntityKey::new(vec![Value::Text("978".into()), Value::BigInt(2)]);
        ty.write_key(instance.as_mut(), &key).unwrap();
        assert_eq!(ty.key_of(instance.as_ref()).unwrap(), Some(key.clone()));
        assert_eq!(ty.pk().params(&key).len(), 2);
        let b = instance.downcast_ref::<Book>().unwrap();
        assert_eq!(b.edition, 2);
    }

    #[test]
    fn generated_key_reads_none_until_assigned() {
        let ty = author();
        let instance = ty.new_instance();
        assert_eq!(ty.key_of(instance.as_ref()).unwrap(), None);
        assert_eq!(ty.pk().generation(), GenerationStrategy::Identity);
    }

    #[test]
    fn unknown_target_is_mapping_error() {
        let err = EntityModel::builder().entity(book()).build().unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
        assert!(err.to_string().contains("unknown target entity 'Author'"));
    }

    #[test]
    fn bad_mapped_by_is_mapping_error() {
        let broken = EntityType::builder::<Author>("Author", "authors")
            .id(
                "id",
                Column::new("id", SqlType::BigInt),
                GenerationStrategy::Identity,
                Accessor::value(|a: &Author| a.id.into(), |_: &mut Author, _| Ok(())),
            )
            .relationship(
                "books",
                Relationship::mapped_by(RelationshipKind::OneToMany, "Book", "writer"),
                Accessor::many(|a: &Author| a.books.clone(), |a: &mut Author, v| a.books = v),
            )
            .build()
            .unwrap();
        let err = EntityModel::builder()
            .entity(broken)
            .entity(book())
            .entity(tag())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("mapped_by 'writer'"));
    }

    #[test]
    fn missing_key_is_rejected() {
        let err = EntityType::builder::<Tag>("Tag", "tags").build().unwrap_err();
        assert!(err.to_string().contains("no primary key"));
    }

    #[test]
    fn embeddable_flatten_and_assemble() {
        let address = Embeddable::new("Address")
            .column("street", Column::new("street", SqlType::Text))
            .nested(
                "geo",
                Embeddable::new("Geo")
                    .column("lat", Column::new("lat", SqlType::Double))
                    .column("lon", Column::new("lon", SqlType::Double)),
            );
        assert_eq!(address.columns().len(), 3);
        assert_eq!(
            address.column_at(&["geo", "lon"]).map(|c| c.name.as_str()),
            Some("lon")
        );

        let value = AttrValue::Embedded(vec![
            AttrValue::Basic(Value::Text("Main".into())),
            AttrValue::Embedded(vec![
                AttrValue::Basic(Value::Double(1.0)),
                AttrValue::Basic(Value::Double(2.0)),
            ]),
        ]);
        let flat = address.flatten(&value).unwrap();
        assert_eq!(flat.len(), 3);
        let rebuilt = address.assemble(&mut flat.into_iter()).unwrap();
        assert_eq!(rebuilt, value);

        let nulls = address.flatten(&AttrValue::Basic(Value::Null)).unwrap();
        assert!(nulls.iter().all(Value::is_null));
    }
}
