//! Flush: writing the managed instances of a context to the database.
//!
//! Three passes over the managed list, in registration order:
//!
//! 1. Early deletes: join-table rows of removed owners, collection pairs
//!    dropped since the last snapshot, and removed rows that reference
//!    other removed rows. Persistent rows moving their foreign key away
//!    from a removed row are updated here too.
//! 2. One statement per instance by status: INSERT, UPDATE or DELETE.
//!    Owning to-one targets that are not yet written are inserted first.
//! 3. Collection membership: join-table pairs added since the snapshot and
//!    foreign keys of unidirectional one-to-many children.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlpersist_core::{
    AttrId, AttrValue, Attribute, AttributeKind, Connection, EntityId, EntityKey, EntityType,
    Error, GenerationStrategy, JoinColumnMapping, JoinMapping, OptimisticLockError, Relationship,
    Result, Value,
};
use sqlpersist_query::{Delete, Expr, Insert, Params, Statement, Update, key_equals};

use super::{EntityHandler, key_to_columns};
use crate::context::writes_membership;
use crate::status::EntityStatus;

/// Counts of the statements a flush ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushResult {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Join-table rows inserted, plus child foreign keys set.
    pub link_inserts: usize,
    /// Join-table rows deleted, plus child foreign keys cleared.
    pub link_deletes: usize,
}

impl FlushResult {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted + self.link_inserts + self.link_deletes
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// A foreign key written as NULL because its target was still being inserted.
#[derive(Debug)]
struct Postponed {
    id: EntityId,
    attr: AttrId,
    target: EntityId,
}

#[derive(Debug, Default)]
struct FlushState {
    result: FlushResult,
    /// Instances whose INSERT is in progress further up the stack.
    inserting: HashSet<EntityId>,
    /// Instances whose dependents are being deleted early.
    removing: HashSet<EntityId>,
    /// Removed instances whose referencing rows have been dealt with.
    releasing: HashSet<EntityId>,
    /// Rows holding a foreign key to a removed instance, keyed by that instance.
    referencing: HashMap<EntityId, Vec<EntityId>>,
    postponed: Vec<Postponed>,
}

fn names(cols: &[JoinColumnMapping]) -> Vec<&str> {
    cols.iter().map(|c| c.column.name.as_str()).collect()
}

impl<C: Connection> EntityHandler<'_, C> {
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) fn flush(&mut self) -> Result<FlushResult> {
        let order = self.ctx.managed();
        tracing::debug!(managed = order.len(), "flush start");
        let mut state = FlushState {
            referencing: self.rows_referencing_removed(&order)?,
            ..FlushState::default()
        };

        for &id in &order {
            match self.status_of(id)? {
                EntityStatus::RemovedNotFlushed => self.delete_dependents_first(id, &mut state)?,
                status if status.is_persistent() => self.delete_dropped_pairs(id, &mut state)?,
                _ => {}
            }
        }
        for &id in &order {
            if self.ctx.status(id) == Some(EntityStatus::RemovedNotFlushed) {
                self.release_references_to(id, &mut state)?;
            }
        }

        for &id in &order {
            self.flush_instance(id, &mut state)?;
        }

        for &id in &order {
            self.write_memberships(id, &mut state)?;
        }

        let result = state.result;
        tracing::info!(
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            link_inserts = result.link_inserts,
            link_deletes = result.link_deletes,
            "flush complete"
        );
        Ok(result)
    }

    fn flush_instance(&mut self, id: EntityId, state: &mut FlushState) -> Result<()> {
        match self.status_of(id)? {
            EntityStatus::Flushed | EntityStatus::FlushedLoadedFromDb => self.update_row(id, state),
            EntityStatus::PersistNotFlushed => self.insert_row_of(id, false, state),
            EntityStatus::RemovedNotFlushed => {
                self.delete_row(id, state)?;
                self.ctx.remove_managed(id);
                self.ctx.set_status(id, EntityStatus::Removed)
            }
            EntityStatus::EarlyInsert => self.ctx.set_status(id, EntityStatus::Flushed),
            EntityStatus::EarlyRemove => {
                self.ctx.remove_managed(id);
                self.ctx.set_status(id, EntityStatus::Removed)
            }
            _ => Ok(()),
        }
    }

    // ---- pass 1 ----------------------------------------------------------

    /// Clear everything that references the row of a removed instance:
    /// join-table rows, unidirectional child foreign keys, and loaded
    /// dependents that are themselves pending removal.
    fn delete_dependents_first(&mut self, id: EntityId, state: &mut FlushState) -> Result<()> {
        if !state.removing.insert(id) {
            return Ok(());
        }
        let model = Arc::clone(&self.model);
        let entity = self.ctx.entity_type(id)?;
        let ty = model.get(entity);
        let Some(key) = self.ctx.key(id).cloned() else {
            return Ok(());
        };

        for (attr, rel) in ty.relationships() {
            let target = model.target_of(entity, attr)?.0;
            match &rel.mapping {
                JoinMapping::Table(table) => {
                    let values = key_to_columns(&table.owner_columns, ty, &key)?;
                    let removed =
                        self.delete_where(&table.table, names(&table.owner_columns), &values)?;
                    state.result.link_deletes += removed;
                }
                JoinMapping::Columns(cols) if rel.kind.is_to_many() => {
                    let values = key_to_columns(cols, ty, &key)?;
                    let cleared =
                        self.clear_foreign_key(&model.get(target).table, cols, &values)?;
                    state.result.link_deletes += cleared;
                }
                JoinMapping::Inverse { .. } => {
                    let owning = rel
                        .link()
                        .and_then(|link| link.counterpart)
                        .and_then(|a| model.get(target).attribute(a).relationship());
                    if let Some(table) = owning.and_then(Relationship::join_table_mapping) {
                        let values = key_to_columns(&table.target_columns, ty, &key)?;
                        let removed = self.delete_where(
                            &table.table,
                            names(&table.target_columns),
                            &values,
                        )?;
                        state.result.link_deletes += removed;
                    }
                    if self.ctx.is_loaded(id, attr) {
                        for child in self.ctx.read(id, attr)?.referenced() {
                            if self.ctx.status(child) == Some(EntityStatus::RemovedNotFlushed)
                                && !state.removing.contains(&child)
                            {
                                self.delete_dependents_first(child, state)?;
                                self.release_references_to(child, state)?;
                                self.delete_row(child, state)?;
                                self.ctx.set_status(child, EntityStatus::EarlyRemove)?;
                            }
                        }
                    }
                }
                JoinMapping::Columns(_) => {}
            }
        }
        Ok(())
    }

    /// Instances whose row, as last synchronized, holds a foreign key to a
    /// row pending removal: removed instances, and persistent instances whose
    /// reference has since changed. Keyed by the referenced instance.
    fn rows_referencing_removed(
        &self,
        order: &[EntityId],
    ) -> Result<HashMap<EntityId, Vec<EntityId>>> {
        let model = Arc::clone(&self.model);
        let mut referencing: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        for &id in order {
            let status = self.status_of(id)?;
            let removed = status == EntityStatus::RemovedNotFlushed;
            if !removed && !status.is_persistent() {
                continue;
            }
            let entity = self.ctx.entity_type(id)?;
            for (attr, rel) in model.get(entity).relationships() {
                if !rel.owns_foreign_key() {
                    continue;
                }
                let stored = match self.ctx.lazy_key(id, attr) {
                    Some(key) if !self.ctx.is_loaded(id, attr) => {
                        self.ctx.find(model.target_of(entity, attr)?.0, key)
                    }
                    _ => self.ctx.column_baseline(id, attr).and_then(AttrValue::as_one),
                };
                let Some(target) = stored else { continue };
                if self.ctx.status(target) != Some(EntityStatus::RemovedNotFlushed) {
                    continue;
                }
                if removed || self.ctx.read(id, attr)?.as_one() != Some(target) {
                    referencing.entry(target).or_default().push(id);
                }
            }
        }
        Ok(referencing)
    }

    /// Delete (or update away from `id`) every row that still references `id`,
    /// ahead of `id`'s own DELETE.
    fn release_references_to(&mut self, id: EntityId, state: &mut FlushState) -> Result<()> {
        if !state.releasing.insert(id) {
            return Ok(());
        }
        let sources = state.referencing.get(&id).cloned().unwrap_or_default();
        for source in sources {
            match self.status_of(source)? {
                EntityStatus::RemovedNotFlushed => {
                    self.delete_dependents_first(source, state)?;
                    self.release_references_to(source, state)?;
                    self.delete_row(source, state)?;
                    self.ctx.set_status(source, EntityStatus::EarlyRemove)?;
                }
                status if status.is_persistent() => self.update_row(source, state)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Delete join-table pairs that left a loaded collection since its snapshot.
    fn delete_dropped_pairs(&mut self, id: EntityId, state: &mut FlushState) -> Result<()> {
        let model = Arc::clone(&self.model);
        let entity = self.ctx.entity_type(id)?;
        let ty = model.get(entity);
        let Some(key) = self.ctx.key(id).cloned() else {
            return Ok(());
        };
        for (attr, rel) in ty.relationships() {
            let Some(table) = rel.join_table_mapping() else {
                continue;
            };
            if !self.ctx.is_loaded(id, attr) {
                continue;
            }
            let Some(baseline) = self.ctx.collection_baseline(id, attr).map(<[_]>::to_vec) else {
                continue;
            };
            let current = self.ctx.read(id, attr)?.referenced();
            let target = model.get(model.target_of(entity, attr)?.0);
            for element in baseline.into_iter().filter(|e| !current.contains(e)) {
                let Some(element_key) = self.ctx.key(element).cloned() else {
                    continue;
                };
                let mut columns = names(&table.owner_columns);
                columns.extend(names(&table.target_columns));
                let mut values = key_to_columns(&table.owner_columns, ty, &key)?;
                values.extend(key_to_columns(&table.target_columns, target, &element_key)?);
                state.result.link_deletes += self.delete_where(&table.table, columns, &values)?;
            }
        }
        Ok(())
    }

    fn delete_where(&mut self, table: &str, columns: Vec<&str>, values: &[Value]) -> Result<usize> {
        let mut params = Params::new();
        let filter = key_equals(None, columns, values, &mut params);
        let statement = Statement::Delete(Delete {
            table: table.to_string(),
            filter: Some(filter),
        });
        let affected = self.execute(&statement, &params.into_values())?;
        tracing::debug!(table, rows = affected, "link rows deleted");
        Ok(usize::try_from(affected).unwrap_or(usize::MAX))
    }

    /// `UPDATE <table> SET fk = NULL WHERE fk = <owner key>`.
    fn clear_foreign_key(
        &mut self,
        table: &str,
        cols: &[JoinColumnMapping],
        owner: &[Value],
    ) -> Result<usize> {
        let mut params = Params::new();
        let assignments = cols
            .iter()
            .map(|c| (c.column.name.clone(), params.bind(Value::Null)))
            .collect();
        let filter = key_equals(None, names(cols), owner, &mut params);
        let statement = Statement::Update(Update {
            table: table.to_string(),
            assignments,
            filter: Some(filter),
        });
        let affected = self.execute(&statement, &params.into_values())?;
        Ok(usize::try_from(affected).unwrap_or(usize::MAX))
    }

    // ---- pass 2 ----------------------------------------------------------

    fn update_row(&mut self, id: EntityId, state: &mut FlushState) -> Result<()> {
        let model = Arc::clone(&self.model);
        let ty = model.get(self.ctx.entity_type(id)?);
        let dirty: Vec<AttrId> = self
            .ctx
            .dirty_attributes(id)?
            .into_iter()
            .filter(|a| !ty.attribute(*a).own_columns().is_empty())
            .collect();
        if dirty.is_empty() {
            self.ctx.clear_dirty(id);
            return Ok(());
        }
        if let Some(attr) = dirty.iter().find(|a| ty.is_key_attribute(**a)) {
            return Err(Error::integrity(
                &ty.name,
                Some(&ty.attribute(*attr).name),
                "key attributes cannot change once persistent",
            ));
        }
        self.validate(id, ty)?;
        let key = self.require_key(id, ty)?;
        for &attr in &dirty {
            self.insert_reference_first(id, ty, attr, state)?;
        }

        let mut params = Params::new();
        let mut assignments = Vec::new();
        let mut seen = HashSet::new();
        for &attr in &dirty {
            if Some(attr) == ty.version() {
                continue;
            }
            for (column, value) in self.column_values(id, attr)? {
                if seen.insert(column.clone()) {
                    assignments.push((column, params.bind(value)));
                }
            }
        }

        let guard = self.version_guard(id, ty)?;
        if let Some((column, _, next)) = &guard {
            assignments.push((column.clone(), params.bind(next.clone())));
        }
        let filter = self.row_filter(ty, &key, guard.as_ref(), &mut params);
        let statement = Statement::Update(Update {
            table: ty.table.clone(),
            assignments,
            filter: Some(filter),
        });
        let affected = self.execute(&statement, &params.into_values())?;
        if let Some((_, expected, next)) = guard {
            if affected == 0 {
                return Err(lost_update(ty, &key, &expected));
            }
            if let Some(version) = ty.version() {
                self.ctx.write(id, version, AttrValue::Basic(next))?;
            }
        }
        self.ctx.clear_dirty(id);
        self.ctx.take_snapshot(id)?;
        state.result.updated += 1;
        tracing::debug!(entity = %ty.name, %id, rows = affected, "updated");
        Ok(())
    }

    /// Insert the target of a changed owning to-one if its row is still pending.
    fn insert_reference_first(
        &mut self,
        id: EntityId,
        ty: &EntityType,
        attr: AttrId,
        state: &mut FlushState,
    ) -> Result<()> {
        let owning = ty
            .attribute(attr)
            .relationship()
            .is_some_and(Relationship::owns_foreign_key);
        if !owning {
            return Ok(());
        }
        let Some(target) = self.ctx.read(id, attr)?.as_one() else {
            return Ok(());
        };
        match self.ctx.status(target) {
            Some(EntityStatus::PersistNotFlushed) => self.insert_row_of(target, true, state),
            Some(EntityStatus::New) | None => Err(Error::integrity(
                &ty.name,
                Some(&ty.attribute(attr).name),
                "references an instance that was never persisted",
            )),
            _ => Ok(()),
        }
    }

    /// Insert one instance, writing not-yet-flushed owning to-one targets first.
    fn insert_row_of(&mut self, id: EntityId, early: bool, state: &mut FlushState) -> Result<()> {
        let model = Arc::clone(&self.model);
        let ty = model.get(self.ctx.entity_type(id)?);
        state.inserting.insert(id);

        if let Some(version) = ty.version() {
            let current = self.ctx.read(id, version)?;
            if current.as_value().is_none_or(Value::is_null) {
                let column = ty.attribute(version).own_columns();
                let initial = match column.first() {
                    Some(c) => Value::BigInt(1).coerce_to(&c.sql_type)?,
                    None => Value::BigInt(1),
                };
                self.ctx.write(id, version, AttrValue::Basic(initial))?;
            }
        }
        self.validate(id, ty)?;

        let mut postponed_attrs = HashSet::new();
        for (attr, rel) in ty.relationships() {
            if !rel.owns_foreign_key() {
                continue;
            }
            let Some(target) = self.ctx.read(id, attr)?.as_one() else {
                continue;
            };
            if state.inserting.contains(&target) {
                postponed_attrs.insert(attr);
                state.postponed.push(Postponed { id, attr, target });
                continue;
            }
            match self.ctx.status(target) {
                Some(EntityStatus::PersistNotFlushed) => {
                    self.insert_row_of(target, true, state)?;
                }
                Some(EntityStatus::New) | None => {
                    return Err(Error::integrity(
                        &ty.name,
                        Some(&ty.attribute(attr).name),
                        "references an instance that was never persisted",
                    ));
                }
                _ => {}
            }
        }

        let generation = ty.pk().generation();
        if let GenerationStrategy::Sequence(sequence) = &generation {
            if ty.key_of(self.ctx.object(id)?)?.is_none() {
                let next = self
                    .fetch_value(&Statement::NextValue(sequence.clone()))?
                    .ok_or_else(|| {
                        Error::integrity(&ty.name, None, format!("sequence {sequence} returned no value"))
                    })?;
                ty.write_key(self.ctx.object_mut(id)?, &EntityKey::new(vec![next]))?;
            }
        }

        let identity = generation == GenerationStrategy::Identity;
        let mut params = Params::new();
        let mut columns = Vec::new();
        let mut values = Vec::new();
        let mut seen = HashSet::new();
        for (i, attribute) in ty.attributes().iter().enumerate() {
            let attr = AttrId(i);
            if attribute.own_columns().is_empty() {
                continue;
            }
            let pairs = if postponed_attrs.contains(&attr) {
                null_columns(attribute)
            } else {
                self.column_values(id, attr)?
            };
            for (column, value) in pairs {
                if identity && ty.is_key_attribute(attr) && value.is_null() {
                    continue;
                }
                if seen.insert(column.clone()) {
                    columns.push(column);
                    values.push(params.bind(value));
                }
            }
        }
        let statement = Statement::Insert(Insert {
            table: ty.table.clone(),
            columns,
            values,
        });
        let generated = self.insert_row(&statement, &params.into_values())?;
        state.result.inserted += 1;

        if identity && ty.key_of(self.ctx.object(id)?)?.is_none() {
            let generated = generated.ok_or_else(|| {
                Error::integrity(&ty.name, None, "database returned no generated key")
            })?;
            ty.write_key(self.ctx.object_mut(id)?, &EntityKey::new(vec![generated]))?;
        }
        let key = self.require_key(id, ty)?;
        tracing::debug!(entity = %ty.name, %id, %key, early, "inserted");
        self.ctx.add_managed(id, key)?;
        self.ctx.take_snapshot(id)?;
        self.ctx.clear_dirty(id);
        for (attr, _) in ty.relationships() {
            self.ctx.set_loaded(id, attr);
        }
        state.inserting.remove(&id);

        let waiting = state.postponed.iter().any(|p| p.id == id);
        let status = if waiting {
            EntityStatus::PartiallyFlushed
        } else if early {
            EntityStatus::EarlyInsert
        } else {
            EntityStatus::Flushed
        };
        self.ctx.set_status(id, status)?;
        self.run_postponed(id, state)
    }

    /// Fix the NULL foreign keys that were waiting for `target` to get its key.
    fn run_postponed(&mut self, target: EntityId, state: &mut FlushState) -> Result<()> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.postponed)
            .into_iter()
            .partition(|p| p.target == target);
        state.postponed = waiting;

        let model = Arc::clone(&self.model);
        for p in ready {
            let ty = model.get(self.ctx.entity_type(p.id)?);
            let key = self.require_key(p.id, ty)?;
            let mut params = Params::new();
            let assignments = self
                .column_values(p.id, p.attr)?
                .into_iter()
                .map(|(column, value)| (column, params.bind(value)))
                .collect();
            let filter = self.row_filter(ty, &key, None, &mut params);
            let statement = Statement::Update(Update {
                table: ty.table.clone(),
                assignments,
                filter: Some(filter),
            });
            self.execute(&statement, &params.into_values())?;
            tracing::debug!(entity = %ty.name, id = %p.id, "postponed foreign key written");

            if !state.postponed.iter().any(|q| q.id == p.id)
                && self.ctx.status(p.id) == Some(EntityStatus::PartiallyFlushed)
            {
                self.ctx.set_status(p.id, EntityStatus::Flushed)?;
            }
        }
        Ok(())
    }

    fn delete_row(&mut self, id: EntityId, state: &mut FlushState) -> Result<()> {
        let model = Arc::clone(&self.model);
        let ty = model.get(self.ctx.entity_type(id)?);
        let key = self.require_key(id, ty)?;
        let guard = self.version_guard(id, ty)?;
        let mut params = Params::new();
        let filter = self.row_filter(ty, &key, guard.as_ref(), &mut params);
        let statement = Statement::Delete(Delete {
            table: ty.table.clone(),
            filter: Some(filter),
        });
        let affected = self.execute(&statement, &params.into_values())?;
        if affected == 0 {
            if let Some((_, expected, _)) = guard {
                return Err(lost_update(ty, &key, &expected));
            }
        }
        state.result.deleted += 1;
        tracing::debug!(entity = %ty.name, %id, %key, "deleted");
        Ok(())
    }

    /// `(column, expected, next)` of the version attribute, if the type is versioned.
    fn version_guard(&self, id: EntityId, ty: &EntityType) -> Result<Option<(String, Value, Value)>> {
        let Some(version) = ty.version() else {
            return Ok(None);
        };
        let Some(column) = ty.attribute(version).column() else {
            return Ok(None);
        };
        let expected = match self.ctx.column_baseline(id, version) {
            Some(baseline) => baseline.as_value().cloned(),
            None => self.ctx.read(id, version)?.into_value(),
        };
        let Some(expected) = expected.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let current = expected.as_i64().ok_or_else(|| {
            Error::mapping_attr(
                &ty.name,
                &ty.attribute(version).name,
                format!("version column holds a non-integer {}", expected.type_name()),
            )
        })?;
        let next = current.checked_add(1).ok_or_else(|| {
            Error::integrity(
                &ty.name,
                Some(&ty.attribute(version).name),
                "version cannot be incremented past its maximum",
            )
        })?;
        let next = Value::BigInt(next).coerce_to(&column.sql_type)?;
        Ok(Some((column.name.clone(), expected, next)))
    }

    fn row_filter(
        &self,
        ty: &EntityType,
        key: &EntityKey,
        guard: Option<&(String, Value, Value)>,
        params: &mut Params,
    ) -> Expr {
        let pk: Vec<&str> = ty.pk_columns().iter().map(|c| c.name.as_str()).collect();
        let mut parts = vec![key_equals(None, pk, key.values(), params)];
        if let Some((column, expected, _)) = guard {
            parts.push(Expr::col(column.as_str()).eq(params.bind(expected.clone())));
        }
        Expr::all(parts)
    }

    fn require_key(&self, id: EntityId, ty: &EntityType) -> Result<EntityKey> {
        if let Some(key) = ty.key_of(self.ctx.object(id)?)? {
            return Ok(key);
        }
        self.ctx
            .key(id)
            .cloned()
            .ok_or_else(|| Error::integrity(&ty.name, None, "key is not assigned"))
    }

    /// Nullability and key-assignment checks run before any SQL.
    fn validate(&self, id: EntityId, ty: &EntityType) -> Result<()> {
        let generated = ty.pk().generation() != GenerationStrategy::Plain;
        for (i, attribute) in ty.attributes().iter().enumerate() {
            let attr = AttrId(i);
            if generated && ty.is_key_attribute(attr) {
                continue;
            }
            match &attribute.kind {
                AttributeKind::Basic(column) if !column.nullable => {
                    if self.ctx.read(id, attr)?.as_value().is_none_or(Value::is_null) {
                        return Err(Error::integrity(
                            &ty.name,
                            Some(&attribute.name),
                            format!("column {} is not nullable", column.name),
                        ));
                    }
                }
                AttributeKind::Embedded(embeddable) => {
                    let values = embeddable.flatten(&self.ctx.read(id, attr)?)?;
                    for (column, value) in embeddable.columns().into_iter().zip(values) {
                        if !column.nullable && value.is_null() {
                            return Err(Error::integrity(
                                &ty.name,
                                Some(&attribute.name),
                                format!("column {} is not nullable", column.name),
                            ));
                        }
                    }
                }
                AttributeKind::Relationship(rel) if rel.owns_foreign_key() => {
                    let required = attribute.own_columns().iter().any(|c| !c.nullable);
                    let unset = self.ctx.read(id, attr)?.as_one().is_none()
                        && (self.ctx.is_loaded(id, attr) || self.ctx.lazy_key(id, attr).is_none());
                    if required && unset {
                        return Err(Error::integrity(
                            &ty.name,
                            Some(&attribute.name),
                            "required reference is not set",
                        ));
                    }
                }
                _ => {}
            }
        }
        if !generated && ty.key_of(self.ctx.object(id)?)?.is_none() {
            return Err(Error::integrity(
                &ty.name,
                None,
                "key must be assigned before flush",
            ));
        }
        Ok(())
    }

    /// `(column, value)` pairs an attribute contributes to its entity's row.
    fn column_values(&self, id: EntityId, attr: AttrId) -> Result<Vec<(String, Value)>> {
        let model = Arc::clone(&self.model);
        let entity = self.ctx.entity_type(id)?;
        let ty = model.get(entity);
        let attribute = ty.attribute(attr);
        let value = self.ctx.read(id, attr)?;
        Ok(match &attribute.kind {
            AttributeKind::Basic(column) => {
                vec![(column.name.clone(), value.into_value().unwrap_or(Value::Null))]
            }
            AttributeKind::Embedded(embeddable) => embeddable
                .columns()
                .into_iter()
                .map(|c| c.name.clone())
                .zip(embeddable.flatten(&value)?)
                .collect(),
            AttributeKind::Relationship(rel) if rel.owns_foreign_key() => {
                let cols = rel.join_columns().unwrap_or_default();
                let target_ty = model.get(model.target_of(entity, attr)?.0);
                let key = match value.as_one() {
                    Some(target) => {
                        let key = match self.ctx.key(target) {
                            Some(key) => Some(key.clone()),
                            None => target_ty.key_of(self.ctx.object(target)?)?,
                        };
                        Some(key.ok_or_else(|| {
                            Error::integrity(
                                &ty.name,
                                Some(&attribute.name),
                                "references an instance without a key",
                            )
                        })?)
                    }
                    None if !self.ctx.is_loaded(id, attr) => self.ctx.lazy_key(id, attr).cloned(),
                    None => None,
                };
                let values = match key {
                    Some(key) => key_to_columns(cols, target_ty, &key)?,
                    None => vec![Value::Null; cols.len()],
                };
                cols.iter()
                    .map(|c| c.column.name.clone())
                    .zip(values)
                    .collect()
            }
            AttributeKind::Relationship(_) => Vec::new(),
        })
    }

    // ---- pass 3 ----------------------------------------------------------

    /// Write collection membership added (or, for unidirectional
    /// one-to-many, dropped) since the snapshot.
    fn write_memberships(&mut self, id: EntityId, state: &mut FlushState) -> Result<()> {
        if !self.status_of(id)?.is_persistent() {
            return Ok(());
        }
        let model = Arc::clone(&self.model);
        let entity = self.ctx.entity_type(id)?;
        let ty = model.get(entity);
        let Some(key) = self.ctx.key(id).cloned() else {
            return Ok(());
        };

        for (attr, rel) in ty.relationships() {
            if !writes_membership(ty.attribute(attr)) || !self.ctx.is_loaded(id, attr) {
                continue;
            }
            let target = model.get(model.target_of(entity, attr)?.0);
            let baseline = self
                .ctx
                .collection_baseline(id, attr)
                .map(<[_]>::to_vec)
                .unwrap_or_default();
            let current = self.ctx.read(id, attr)?.referenced();

            let mut synced = Vec::with_capacity(current.len());
            let mut seen = HashSet::new();
            for element in current {
                if !seen.insert(element) {
                    continue;
                }
                if baseline.contains(&element) {
                    synced.push(element);
                    continue;
                }
                let element_key = match self.ctx.key(element) {
                    Some(k) if self.ctx.is_managed(element) => k.clone(),
                    _ => {
                        tracing::warn!(
                            entity = %ty.name,
                            attribute = %ty.attribute(attr).name,
                            element = %element,
                            "skipping unmanaged collection element"
                        );
                        continue;
                    }
                };
                match &rel.mapping {
                    JoinMapping::Table(table) => {
                        let columns: Vec<String> = names(&table.owner_columns)
                            .into_iter()
                            .chain(names(&table.target_columns))
                            .map(str::to_string)
                            .collect();
                        let mut values = key_to_columns(&table.owner_columns, ty, &key)?;
                        values.extend(key_to_columns(&table.target_columns, target, &element_key)?);
                        let mut params = Params::new();
                        let exprs = values.into_iter().map(|v| params.bind(v)).collect();
                        let statement = Statement::Insert(Insert {
                            table: table.table.clone(),
                            columns,
                            values: exprs,
                        });
                        self.execute(&statement, &params.into_values())?;
                        state.result.link_inserts += 1;
                    }
                    JoinMapping::Columns(cols) => {
                        let owner = key_to_columns(cols, ty, &key)?;
                        self.set_child_key(target, cols, &element_key, owner)?;
                        state.result.link_inserts += 1;
                    }
                    JoinMapping::Inverse { .. } => {}
                }
                synced.push(element);
            }

            if let JoinMapping::Columns(cols) = &rel.mapping {
                for element in baseline.iter().filter(|e| !seen.contains(e)) {
                    let live = self.ctx.status(*element).is_some_and(EntityStatus::is_persistent);
                    let Some(element_key) = self.ctx.key(*element).cloned() else {
                        continue;
                    };
                    if live {
                        let nulls = vec![Value::Null; cols.len()];
                        self.set_child_key(target, cols, &element_key, nulls)?;
                        state.result.link_deletes += 1;
                    }
                }
            }
            self.ctx.set_collection_baseline(id, attr, synced);
        }
        Ok(())
    }

    /// `UPDATE <child table> SET fk = ? WHERE pk = <child key>`.
    fn set_child_key(
        &mut self,
        child: &EntityType,
        cols: &[JoinColumnMapping],
        child_key: &EntityKey,
        values: Vec<Value>,
    ) -> Result<()> {
        let mut params = Params::new();
        let assignments = cols
            .iter()
            .zip(values)
            .map(|(c, v)| (c.column.name.clone(), params.bind(v)))
            .collect();
        let filter = self.row_filter(child, child_key, None, &mut params);
        let statement = Statement::Update(Update {
            table: child.table.clone(),
            assignments,
            filter: Some(filter),
        });
        self.execute(&statement, &params.into_values())?;
        Ok(())
    }
}

fn null_columns(attribute: &Attribute) -> Vec<(String, Value)> {
    attribute
        .own_columns()
        .into_iter()
        .map(|c| (c.name.clone(), Value::Null))
        .collect()
}

fn lost_update(ty: &EntityType, key: &EntityKey, expected: &Value) -> Error {
    Error::OptimisticLock(OptimisticLockError {
        entity: ty.name.clone(),
        key: key.to_string(),
        expected_version: Some(format!("{expected:?}")),
    })
}
