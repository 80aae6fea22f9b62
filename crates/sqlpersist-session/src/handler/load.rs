//! Load path: lookups, row materialization and relationship wiring.
//!
//! Loading is two-step. Every row first becomes a registered instance with
//! its relationship attributes empty, then [`EntityHandler::wire`] resolves
//! relationships over the batch. Registration before wiring is what makes
//! cyclic graphs terminate: the second visit of an instance is an identity
//! map hit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlpersist_core::{
    AttrId, AttrValue, Attribute, AttributeKind, Connection, EntityId, EntityKey, EntityTypeId,
    Error, FetchMode, ModelValueArray, NotFoundError, Result, Row, StateError, Value,
};
use sqlpersist_query::{FetchParameter, LockMode, ResultShape, StatementParameters};

use super::{EntityHandler, columns_to_key, lookup_alias, read_column};
use crate::records::{QueryResult, RecordStrategy, dedup_roots};
use crate::status::EntityStatus;

/// Elements fetched for one (parent, attribute) pair, in row order.
struct Fetched {
    parent: EntityId,
    attribute: AttrId,
    collection: bool,
    elements: Vec<EntityId>,
}

impl<C: Connection> EntityHandler<'_, C> {
    /// Identity map first, then `SELECT ... WHERE pk = ?`.
    #[tracing::instrument(level = "debug", skip(self, key))]
    pub(crate) fn find_by_id(
        &mut self,
        entity: EntityTypeId,
        key: &EntityKey,
        lock: LockMode,
    ) -> Result<Option<EntityId>> {
        let mut pending = Vec::new();
        let id = self.lookup(entity, key, lock, &mut pending)?;
        self.wire(pending)?;
        Ok(id)
    }

    /// [`Self::find_by_id`] without wiring the instance it builds.
    fn lookup(
        &mut self,
        entity: EntityTypeId,
        key: &EntityKey,
        lock: LockMode,
        pending: &mut Vec<EntityId>,
    ) -> Result<Option<EntityId>> {
        if let Some(id) = self.ctx.find(entity, key) {
            let removed = self.ctx.status(id).is_some_and(EntityStatus::is_pending_removal);
            return Ok(if removed { None } else { Some(id) });
        }
        let statement = self.factory().find_by_key(entity, key, lock)?;
        let alias = lookup_alias(&statement)?;
        let rows = self.query(&statement)?;
        let Some(row) = rows.first() else {
            tracing::debug!(entity = %self.model.get(entity).name, %key, "no row");
            return Ok(None);
        };
        self.materialize(entity, &alias, row, pending)
    }

    /// Build (or find) the instance whose columns are labeled under `alias`.
    ///
    /// Returns `None` when every key column is NULL, as for the missing side
    /// of an outer join. Newly built instances are pushed onto `pending` and
    /// still need [`Self::wire`].
    pub(crate) fn materialize(
        &mut self,
        entity: EntityTypeId,
        alias: &str,
        row: &Row,
        pending: &mut Vec<EntityId>,
    ) -> Result<Option<EntityId>> {
        let model = Arc::clone(&self.model);
        let ty = model.get(entity);
        let key = ty
            .pk_columns()
            .into_iter()
            .map(|column| read_column(row, alias, column))
            .collect::<Result<Vec<_>>>()?;
        if key.iter().all(Value::is_null) {
            return Ok(None);
        }
        if key.iter().any(Value::is_null) {
            return Err(Error::integrity(
                &ty.name,
                None,
                format!("row under alias '{alias}' has a partially NULL key"),
            ));
        }
        let key = EntityKey::new(key);
        if let Some(id) = self.ctx.find(entity, &key) {
            return Ok(Some(id));
        }

        let id = self.ctx.allocate(entity, ty.new_instance());
        self.apply_row(id, alias, row)?;
        self.ctx.set_status(id, EntityStatus::FlushedLoadedFromDb)?;
        self.ctx.add_managed(id, key)?;
        self.ctx.take_snapshot(id)?;
        tracing::debug!(entity = %ty.name, %id, "materialized");
        pending.push(id);
        Ok(Some(id))
    }

    /// Overwrite the column-backed attributes of `id` from a row and reset
    /// its relationships to unloaded.
    fn apply_row(&mut self, id: EntityId, alias: &str, row: &Row) -> Result<()> {
        let model = Arc::clone(&self.model);
        let entity = self.ctx.entity_type(id)?;
        let ty = model.get(entity);

        let mut values = ModelValueArray::new();
        for column in ty.attributes().iter().flat_map(Attribute::own_columns) {
            values.push(column, read_column(row, alias, column)?);
        }

        for (i, attribute) in ty.attributes().iter().enumerate() {
            let attr = AttrId(i);
            match &attribute.kind {
                AttributeKind::Basic(column) => {
                    let value = values.take(column).unwrap_or(Value::Null);
                    self.ctx.write_synced(id, attr, AttrValue::Basic(value))?;
                }
                AttributeKind::Embedded(embeddable) => {
                    let mut parts = embeddable
                        .columns()
                        .into_iter()
                        .map(|c| values.take(c).unwrap_or(Value::Null))
                        .collect::<Vec<_>>()
                        .into_iter();
                    let value = embeddable.assemble(&mut parts)?;
                    self.ctx.write_synced(id, attr, value)?;
                }
                AttributeKind::Relationship(rel) if rel.owns_foreign_key() => {
                    let fk: Vec<Value> = attribute
                        .own_columns()
                        .into_iter()
                        .map(|c| values.take(c).unwrap_or(Value::Null))
                        .collect();
                    let target = model.target_of(entity, attr)?.0;
                    let cols = rel.join_columns().unwrap_or_default();
                    let key = columns_to_key(cols, model.get(target), &fk);
                    self.ctx.set_lazy_key(id, attr, key);
                    self.ctx.unset_loaded(id, attr);
                    self.ctx.write_synced(id, attr, AttrValue::One(None))?;
                }
                AttributeKind::Relationship(rel) => {
                    let empty = if rel.kind.is_to_many() {
                        AttrValue::Many(Vec::new())
                    } else {
                        AttrValue::One(None)
                    };
                    self.ctx.unset_loaded(id, attr);
                    self.ctx.write_synced(id, attr, empty)?;
                }
            }
        }
        Ok(())
    }

    /// Second step of loading: resolve the relationships of freshly built instances.
    pub(crate) fn wire(&mut self, pending: Vec<EntityId>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        self.depth += 1;
        let result = self.wire_batch(&pending);
        self.depth -= 1;
        result
    }

    fn eager_allowed(&self) -> bool {
        self.depth <= self.config.max_fetch_depth
    }

    fn wire_batch(&mut self, pending: &[EntityId]) -> Result<()> {
        let model = Arc::clone(&self.model);
        if !self.eager_allowed() {
            tracing::debug!(depth = self.depth, "fetch depth reached; eager relationships left lazy");
            return Ok(());
        }

        // Owning to-ones first, so back-references exist before inverse
        // sides are queried.
        for &id in pending {
            let ty = model.get(self.ctx.entity_type(id)?);
            for (attr, rel) in ty.relationships() {
                if rel.owns_foreign_key()
                    && rel.fetch == FetchMode::Eager
                    && !self.ctx.is_loaded(id, attr)
                {
                    self.resolve_owning(id, attr)?;
                }
            }
        }

        for &id in pending {
            let ty = model.get(self.ctx.entity_type(id)?);
            for (attr, rel) in ty.relationships() {
                if rel.owns_foreign_key()
                    || rel.fetch != FetchMode::Eager
                    || self.ctx.is_loaded(id, attr)
                {
                    continue;
                }
                self.load_related(id, attr)?;
            }
        }
        Ok(())
    }

    /// Resolve an owning to-one through its foreign key, then write the
    /// back-reference on the target's inverse to-one if that is still unset.
    ///
    /// A target loaded here is wired only after the back-reference is in
    /// place, so a bidirectional one-to-one costs one SELECT per pair.
    fn resolve_owning(&mut self, id: EntityId, attr: AttrId) -> Result<Option<EntityId>> {
        let model = Arc::clone(&self.model);
        let entity = self.ctx.entity_type(id)?;
        let (target, rel) = model.target_of(entity, attr)?;

        let mut pending = Vec::new();
        let resolved = match self.ctx.lazy_key(id, attr).cloned() {
            None => None,
            Some(key) => {
                let found = match self.ctx.find(target, &key) {
                    Some(found) => Some(found),
                    None => self.lookup(target, &key, LockMode::None, &mut pending)?,
                };
                Some(found.ok_or_else(|| {
                    Error::NotFound(NotFoundError {
                        entity: model.get(target).name.clone(),
                        key: key.to_string(),
                    })
                })?)
            }
        };
        self.ctx.write_synced(id, attr, AttrValue::One(resolved))?;
        self.ctx.set_loaded(id, attr);
        self.ctx.set_lazy_key(id, attr, None);

        let inverse = rel.link().and_then(|link| link.counterpart);
        if let (Some(target_id), Some(inverse)) = (resolved, inverse) {
            let inverse_to_one = model
                .get(target)
                .attribute(inverse)
                .relationship()
                .is_some_and(|r| r.kind.is_to_one());
            if inverse_to_one
                && !self.ctx.is_loaded(target_id, inverse)
                && self.ctx.read(target_id, inverse)?.as_one().is_none()
            {
                self.ctx
                    .write_synced(target_id, inverse, AttrValue::One(Some(id)))?;
                self.ctx.set_loaded(target_id, inverse);
            }
        }
        self.wire(pending)?;
        Ok(resolved)
    }

    /// Resolve every owning to-one still held only as a raw key, so that the
    /// object shows its row's references before the application edits it.
    pub(crate) fn resolve_lazy_references(&mut self, id: EntityId) -> Result<()> {
        if !self.status_of(id)?.is_persistent() {
            return Ok(());
        }
        let model = Arc::clone(&self.model);
        let ty = model.get(self.ctx.entity_type(id)?);
        for (attr, rel) in ty.relationships() {
            if rel.owns_foreign_key()
                && !self.ctx.is_loaded(id, attr)
                && self.ctx.lazy_key(id, attr).is_some()
            {
                self.resolve_owning(id, attr)?;
            }
        }
        Ok(())
    }

    /// Query the targets of a to-many or non-owning to-one and store them.
    fn load_related(&mut self, id: EntityId, attr: AttrId) -> Result<AttrValue> {
        let model = Arc::clone(&self.model);
        let entity = self.ctx.entity_type(id)?;
        let (target, rel) = model.target_of(entity, attr)?;
        let Some(key) = self.ctx.key(id).cloned() else {
            return self.ctx.read(id, attr);
        };

        let statement = self.factory().related(entity, attr, &key)?;
        let alias = lookup_alias(&statement)?;
        let rows = self.query(&statement)?;
        let mut pending = Vec::new();
        let mut related = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(found) = self.materialize(target, &alias, row, &mut pending)? {
                if !related.contains(&found) {
                    related.push(found);
                }
            }
        }

        let value = if rel.kind.is_to_many() {
            AttrValue::Many(related)
        } else {
            AttrValue::One(related.first().copied())
        };
        self.ctx.write_synced(id, attr, value.clone())?;
        self.ctx.set_loaded(id, attr);
        self.wire(pending)?;
        Ok(value)
    }

    /// Attribute-access hook: the value of `attr`, loading it first if it is
    /// a relationship that has not been resolved yet.
    pub(crate) fn load_attribute(&mut self, id: EntityId, attr: AttrId) -> Result<AttrValue> {
        let status = self.status_of(id)?;
        let model = Arc::clone(&self.model);
        let ty = model.get(self.ctx.entity_type(id)?);
        let attribute = ty.attribute(attr);
        let Some(rel) = attribute.relationship() else {
            return self.ctx.read(id, attr);
        };
        if self.ctx.is_loaded(id, attr)
            || matches!(status, EntityStatus::New | EntityStatus::PersistNotFlushed)
        {
            return self.ctx.read(id, attr);
        }
        if matches!(status, EntityStatus::Detached | EntityStatus::Removed) {
            return Err(Error::InvalidState(StateError {
                from: status.to_string(),
                to: "loaded".to_string(),
                message: format!(
                    "cannot load {}.{} of an instance that is no longer managed",
                    ty.name, attribute.name
                ),
            }));
        }
        if rel.owns_foreign_key() {
            return Ok(AttrValue::One(self.resolve_owning(id, attr)?));
        }
        self.load_related(id, attr)
    }

    /// Re-select the row of a persistent instance and overwrite its state.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) fn refresh_instance(&mut self, id: EntityId) -> Result<()> {
        let status = self.status_of(id)?;
        if !matches!(
            status,
            EntityStatus::Flushed | EntityStatus::FlushedLoadedFromDb
        ) {
            return Err(Error::InvalidState(StateError {
                from: status.to_string(),
                to: EntityStatus::FlushedLoadedFromDb.to_string(),
                message: format!("instance {id} has no row to refresh from"),
            }));
        }
        let entity = self.ctx.entity_type(id)?;
        let model = Arc::clone(&self.model);
        let key = self.ctx.key(id).cloned().ok_or_else(|| {
            Error::integrity(&model.get(entity).name, None, "persistent instance without a key")
        })?;
        let statement = self.factory().find_by_key(entity, &key, LockMode::None)?;
        let alias = lookup_alias(&statement)?;
        let rows = self.query(&statement)?;
        let row = rows.first().ok_or_else(|| {
            Error::NotFound(NotFoundError {
                entity: model.get(entity).name.clone(),
                key: key.to_string(),
            })
        })?;
        self.apply_row(id, &alias, row)?;
        self.ctx.clear_dirty(id);
        self.ctx.set_status(id, EntityStatus::FlushedLoadedFromDb)?;
        self.wire(vec![id])
    }

    /// Run a statement and turn every row into a result.
    ///
    /// Fetch-joined elements are attached to their parents. Entity roots
    /// repeated by collection fetch joins are returned once, in first-seen order.
    #[tracing::instrument(level = "debug", skip_all, fields(fetch_joins = statement.fetches.len()))]
    pub(crate) fn execute_query(
        &mut self,
        statement: &StatementParameters,
        strategy: &RecordStrategy,
    ) -> Result<Vec<QueryResult>> {
        let builder = strategy.builder(&statement.shape);
        let rows = self.query(statement)?;
        let alias_types = alias_types(statement);

        let mut pending = Vec::new();
        let mut fetched: Vec<Fetched> = Vec::new();
        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            results.push(builder.build(self, row, &mut pending)?);
            if statement.is_fetch_join() {
                self.collect_fetches(statement, &alias_types, row, &mut pending, &mut fetched)?;
            }
        }

        let fresh: HashSet<EntityId> = pending.iter().copied().collect();
        for group in fetched {
            if !fresh.contains(&group.parent) && self.ctx.is_loaded(group.parent, group.attribute) {
                continue;
            }
            let value = if group.collection {
                AttrValue::Many(group.elements)
            } else {
                AttrValue::One(group.elements.first().copied())
            };
            self.ctx.write_synced(group.parent, group.attribute, value)?;
            self.ctx.set_loaded(group.parent, group.attribute);
            self.ctx.set_lazy_key(group.parent, group.attribute, None);
        }
        self.wire(pending)?;

        if statement.is_fetch_join() && matches!(statement.shape, ResultShape::Entity { .. }) {
            results = dedup_roots(results);
        }
        tracing::debug!(results = results.len(), "query results built");
        Ok(results)
    }

    fn collect_fetches(
        &mut self,
        statement: &StatementParameters,
        alias_types: &HashMap<String, EntityTypeId>,
        row: &Row,
        pending: &mut Vec<EntityId>,
        fetched: &mut Vec<Fetched>,
    ) -> Result<()> {
        let mut ids: HashMap<&str, Option<EntityId>> = HashMap::new();
        for fetch in &statement.fetches {
            let parent = match ids.get(fetch.parent_alias.as_str()) {
                Some(parent) => *parent,
                None => {
                    let entity = *alias_types.get(&fetch.parent_alias).ok_or_else(|| {
                        Error::Custom(format!(
                            "fetch join parent '{}' is not selected",
                            fetch.parent_alias
                        ))
                    })?;
                    let parent = self.materialize(entity, &fetch.parent_alias, row, pending)?;
                    ids.insert(&fetch.parent_alias, parent);
                    parent
                }
            };
            let child = self.materialize(fetch.entity, &fetch.alias, row, pending)?;
            ids.insert(&fetch.alias, child);

            let Some(parent) = parent else { continue };
            let index = match fetched
                .iter()
                .position(|f| f.parent == parent && f.attribute == fetch.attribute)
            {
                Some(index) => index,
                None => {
                    fetched.push(Fetched {
                        parent,
                        attribute: fetch.attribute,
                        collection: fetch.collection,
                        elements: Vec::new(),
                    });
                    fetched.len() - 1
                }
            };
            if let Some(child) = child {
                let group = &mut fetched[index];
                if !group.elements.contains(&child) {
                    group.elements.push(child);
                }
            }
        }
        Ok(())
    }
}

/// Entity type behind every alias a statement selects.
fn alias_types(statement: &StatementParameters) -> HashMap<String, EntityTypeId> {
    let mut types = HashMap::new();
    match &statement.shape {
        ResultShape::Entity { entity, alias } => {
            types.insert(alias.clone(), *entity);
        }
        ResultShape::Tuple(items) => {
            for item in items {
                if let FetchParameter::Entity { entity, alias } = item {
                    types.insert(alias.clone(), *entity);
                }
            }
        }
        ResultShape::Scalar(_) => {}
    }
    for fetch in &statement.fetches {
        types.insert(fetch.alias.clone(), fetch.entity);
    }
    types
}
