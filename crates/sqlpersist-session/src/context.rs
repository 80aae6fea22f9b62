//! Persistence context: the identity map plus per-instance side tables.
//!
//! Instances live in an arena owned by the context and are addressed by
//! [`EntityId`]. Everything the engine tracks about an instance (status,
//! dirty attributes, loaded flags, raw lazy keys and the last synchronized
//! snapshot) lives in side tables keyed by that id, never on the object.
//!
//! The context issues no SQL.

use std::any::{Any, type_name};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlpersist_core::{
    AttrId, AttrValue, DuplicateKeyError, EntityId, EntityKey, EntityModel, EntityTypeId, Error,
    Result, StateError, TypeError,
};

use crate::status::EntityStatus;

/// Values of an instance as of its last synchronization with the database.
#[derive(Debug, Default, Clone)]
struct Snapshot {
    /// Column-backed attributes: basic, embedded and owning to-one.
    columns: HashMap<AttrId, AttrValue>,
    /// Collections whose membership is written by the owner.
    collections: HashMap<AttrId, Vec<EntityId>>,
}

struct Slot {
    entity: EntityTypeId,
    object: Box<dyn Any>,
}

/// Identity map and bookkeeping for one unit of work.
pub struct PersistenceContext {
    model: Arc<EntityModel>,
    next_id: u64,
    arena: HashMap<EntityId, Slot>,
    identity: HashMap<(EntityTypeId, EntityKey), EntityId>,
    /// Managed ids in registration order; drives flush order. Slots of
    /// dropped ids go stale and are skipped until the next compaction.
    order: Vec<EntityId>,
    /// Position in `order` of every managed id.
    enlisted: HashMap<EntityId, usize>,
    status: HashMap<EntityId, EntityStatus>,
    keys: HashMap<EntityId, EntityKey>,
    dirty: HashMap<EntityId, HashSet<AttrId>>,
    loaded: HashMap<EntityId, HashSet<AttrId>>,
    lazy_keys: HashMap<EntityId, HashMap<AttrId, EntityKey>>,
    snapshots: HashMap<EntityId, Snapshot>,
}

impl std::fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("instances", &self.arena.len())
            .field("managed", &self.enlisted.len())
            .finish_non_exhaustive()
    }
}

fn unknown_instance(id: EntityId) -> Error {
    Error::InvalidState(StateError {
        from: "absent".to_string(),
        to: "access".to_string(),
        message: format!("instance {id} is not held by this context"),
    })
}

impl PersistenceContext {
    pub fn new(model: Arc<EntityModel>) -> Self {
        Self {
            model,
            next_id: 1,
            arena: HashMap::new(),
            identity: HashMap::new(),
            order: Vec::new(),
            enlisted: HashMap::new(),
            status: HashMap::new(),
            keys: HashMap::new(),
            dirty: HashMap::new(),
            loaded: HashMap::new(),
            lazy_keys: HashMap::new(),
            snapshots: HashMap::new(),
        }
    }

    pub fn model(&self) -> &Arc<EntityModel> {
        &self.model
    }

    /// Place an application object in the arena with status `New`.
    pub fn insert_new(&mut self, object: Box<dyn Any>) -> Result<EntityId> {
        let entity = self.model.type_of_instance(object.as_ref()).ok_or_else(|| {
            Error::mapping("", "object is not an instance of a mapped entity type")
        })?;
        Ok(self.allocate(entity, object))
    }

    pub(crate) fn allocate(&mut self, entity: EntityTypeId, object: Box<dyn Any>) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.arena.insert(id, Slot { entity, object });
        self.status.insert(id, EntityStatus::New);
        id
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.arena.contains_key(&id)
    }

    /// Number of instances held, managed or not.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn entity_type(&self, id: EntityId) -> Result<EntityTypeId> {
        self.arena
            .get(&id)
            .map(|slot| slot.entity)
            .ok_or_else(|| unknown_instance(id))
    }

    pub fn status(&self, id: EntityId) -> Option<EntityStatus> {
        self.status.get(&id).copied()
    }

    /// Move an instance to `to`, rejecting moves the lifecycle does not allow.
    pub fn set_status(&mut self, id: EntityId, to: EntityStatus) -> Result<()> {
        let from = self.status(id).ok_or_else(|| unknown_instance(id))?;
        if !from.can_transition(to) {
            return Err(Error::InvalidState(StateError {
                from: from.to_string(),
                to: to.to_string(),
                message: format!("illegal transition for instance {id}"),
            }));
        }
        self.status.insert(id, to);
        Ok(())
    }

    /// Managed instance registered under `key`, if any. No I/O.
    pub fn find(&self, entity: EntityTypeId, key: &EntityKey) -> Option<EntityId> {
        self.identity.get(&(entity, key.clone())).copied()
    }

    /// Key the instance was last registered under.
    pub fn key(&self, id: EntityId) -> Option<&EntityKey> {
        self.keys.get(&id)
    }

    /// Register `id` under `key`.
    ///
    /// Fails with [`Error::DuplicateKey`] when another instance already holds
    /// the key. Re-adding the same pair is a no-op.
    pub fn add_managed(&mut self, id: EntityId, key: EntityKey) -> Result<()> {
        let entity = self.entity_type(id)?;
        match self.identity.get(&(entity, key.clone())) {
            Some(&other) if other != id => {
                return Err(Error::DuplicateKey(DuplicateKeyError {
                    entity: self.model.get(entity).name.clone(),
                    key: key.to_string(),
                }));
            }
            Some(_) => {}
            None => {
                if let Some(old) = self.keys.get(&id) {
                    let old = (entity, old.clone());
                    if self.identity.get(&old) == Some(&id) {
                        self.identity.remove(&old);
                    }
                }
                self.identity.insert((entity, key.clone()), id);
                self.keys.insert(id, key);
            }
        }
        self.enlist(id);
        Ok(())
    }

    /// Append to the managed list without a key (generated keys arrive at flush).
    pub(crate) fn enlist(&mut self, id: EntityId) {
        if !self.enlisted.contains_key(&id) {
            self.enlisted.insert(id, self.order.len());
            self.order.push(id);
        }
    }

    /// Drop `id` from the identity map and the managed list.
    pub fn remove_managed(&mut self, id: EntityId) {
        if let (Some(slot), Some(key)) = (self.arena.get(&id), self.keys.get(&id)) {
            let entry = (slot.entity, key.clone());
            if self.identity.get(&entry) == Some(&id) {
                self.identity.remove(&entry);
            }
        }
        let dropped = self.enlisted.remove(&id).is_some();
        if dropped && self.order.len() > 2 * self.enlisted.len() + 16 {
            self.compact();
        }
    }

    fn compact(&mut self) {
        let enlisted = &self.enlisted;
        let live: Vec<EntityId> = self
            .order
            .iter()
            .enumerate()
            .filter(|(pos, id)| enlisted.get(*id) == Some(pos))
            .map(|(_, id)| *id)
            .collect();
        self.enlisted = live.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
        self.order = live;
    }

    /// Schedule a managed instance for deletion. It stays in the identity map.
    pub fn mark_for_removal(&mut self, id: EntityId) -> Result<()> {
        self.set_status(id, EntityStatus::RemovedNotFlushed)
    }

    /// Stop tracking an instance. The object stays readable; a second call is a no-op.
    pub fn detach(&mut self, id: EntityId) -> Result<()> {
        let status = self.status(id).ok_or_else(|| unknown_instance(id))?;
        if !status.is_managed() {
            return Ok(());
        }
        self.remove_managed(id);
        self.clear_tracking(id);
        self.set_status(id, EntityStatus::Detached)
    }

    pub fn detach_all(&mut self) {
        for id in self.managed() {
            if let Err(err) = self.detach(id) {
                tracing::debug!(%id, error = %err, "detach skipped");
            }
        }
    }

    pub fn is_managed(&self, id: EntityId) -> bool {
        self.status(id).is_some_and(EntityStatus::is_managed)
    }

    pub fn is_managed_all(&self, ids: impl IntoIterator<Item = EntityId>) -> bool {
        ids.into_iter().all(|id| self.is_managed(id))
    }

    /// Managed ids in registration order.
    pub fn managed(&self) -> Vec<EntityId> {
        self.order
            .iter()
            .enumerate()
            .filter(|(pos, id)| self.enlisted.get(*id) == Some(pos))
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn managed_count(&self) -> usize {
        self.enlisted.len()
    }

    /// Move the object out of the context, dropping all tracking for it.
    pub fn take(&mut self, id: EntityId) -> Result<Box<dyn Any>> {
        self.remove_managed(id);
        self.clear_tracking(id);
        self.status.remove(&id);
        self.keys.remove(&id);
        self.arena
            .remove(&id)
            .map(|slot| slot.object)
            .ok_or_else(|| unknown_instance(id))
    }

    pub fn object(&self, id: EntityId) -> Result<&dyn Any> {
        self.arena
            .get(&id)
            .map(|slot| slot.object.as_ref())
            .ok_or_else(|| unknown_instance(id))
    }

    pub fn object_mut(&mut self, id: EntityId) -> Result<&mut dyn Any> {
        self.arena
            .get_mut(&id)
            .map(|slot| slot.object.as_mut())
            .ok_or_else(|| unknown_instance(id))
    }

    pub fn get<T: 'static>(&self, id: EntityId) -> Result<&T> {
        let entity = self.entity_type(id)?;
        self.object(id)?
            .downcast_ref::<T>()
            .ok_or_else(|| self.wrong_type::<T>(entity))
    }

    pub fn get_mut<T: 'static>(&mut self, id: EntityId) -> Result<&mut T> {
        let entity = self.entity_type(id)?;
        let err = self.wrong_type::<T>(entity);
        self.object_mut(id)?.downcast_mut::<T>().ok_or(err)
    }

    fn wrong_type<T>(&self, entity: EntityTypeId) -> Error {
        Error::Type(TypeError {
            expected: type_name::<T>(),
            actual: self.model.get(entity).name.clone(),
            column: None,
        })
    }

    /// Read an attribute through its accessor.
    pub fn read(&self, id: EntityId, attr: AttrId) -> Result<AttrValue> {
        let entity = self.entity_type(id)?;
        let object = self.object(id)?;
        self.model.get(entity).attribute(attr).accessor.get(object)
    }

    /// Write an attribute through its accessor without touching bookkeeping.
    pub fn write(&mut self, id: EntityId, attr: AttrId, value: AttrValue) -> Result<()> {
        let entity = self.entity_type(id)?;
        let model = Arc::clone(&self.model);
        let object = self.object_mut(id)?;
        model.get(entity).attribute(attr).accessor.set(object, value)
    }

    /// Write a value that mirrors the database, moving the snapshot along with it.
    pub fn write_synced(&mut self, id: EntityId, attr: AttrId, value: AttrValue) -> Result<()> {
        let entity = self.entity_type(id)?;
        let model = Arc::clone(&self.model);
        let attribute = model.get(entity).attribute(attr);
        let snapshot = match &value {
            AttrValue::Many(ids) if writes_membership(attribute) => {
                Some(Baseline::Collection(ids.clone()))
            }
            _ if !attribute.own_columns().is_empty() => Some(Baseline::Column(value.clone())),
            _ => None,
        };
        self.write(id, attr, value)?;
        let snap = self.snapshots.entry(id).or_default();
        match snapshot {
            Some(Baseline::Column(v)) => {
                snap.columns.insert(attr, v);
            }
            Some(Baseline::Collection(ids)) => {
                snap.collections.insert(attr, ids);
            }
            None => {}
        }
        Ok(())
    }

    /// Record the column-backed attributes as synchronized.
    pub fn take_snapshot(&mut self, id: EntityId) -> Result<()> {
        let entity = self.entity_type(id)?;
        let ty = self.model.get(entity);
        let object = self.object(id)?;
        let mut columns = HashMap::new();
        for (i, attribute) in ty.attributes().iter().enumerate() {
            if !attribute.own_columns().is_empty() {
                columns.insert(AttrId(i), attribute.accessor.get(object)?);
            }
        }
        self.snapshots.entry(id).or_default().columns = columns;
        Ok(())
    }

    pub fn column_baseline(&self, id: EntityId, attr: AttrId) -> Option<&AttrValue> {
        self.snapshots.get(&id)?.columns.get(&attr)
    }

    pub fn collection_baseline(&self, id: EntityId, attr: AttrId) -> Option<&[EntityId]> {
        self.snapshots
            .get(&id)?
            .collections
            .get(&attr)
            .map(Vec::as_slice)
    }

    pub fn set_collection_baseline(&mut self, id: EntityId, attr: AttrId, ids: Vec<EntityId>) {
        self.snapshots
            .entry(id)
            .or_default()
            .collections
            .insert(attr, ids);
    }

    pub fn mark_dirty(&mut self, id: EntityId, attr: AttrId) {
        self.dirty.entry(id).or_default().insert(attr);
    }

    pub fn clear_dirty(&mut self, id: EntityId) {
        self.dirty.remove(&id);
    }

    /// Explicitly marked attributes plus column-backed attributes that differ
    /// from the snapshot, in attribute order.
    pub fn dirty_attributes(&self, id: EntityId) -> Result<Vec<AttrId>> {
        let entity = self.entity_type(id)?;
        let ty = self.model.get(entity);
        let object = self.object(id)?;
        let marked = self.dirty.get(&id);
        let snapshot = self.snapshots.get(&id);

        let mut dirty = Vec::new();
        for (i, attribute) in ty.attributes().iter().enumerate() {
            let attr = AttrId(i);
            if marked.is_some_and(|m| m.contains(&attr)) {
                dirty.push(attr);
                continue;
            }
            if attribute.own_columns().is_empty() {
                continue;
            }
            let baseline = snapshot.and_then(|s| s.columns.get(&attr));
            let current = attribute.accessor.get(object)?;
            if baseline != Some(&current) {
                dirty.push(attr);
            }
        }
        Ok(dirty)
    }

    pub fn is_loaded(&self, id: EntityId, attr: AttrId) -> bool {
        self.loaded.get(&id).is_some_and(|l| l.contains(&attr))
    }

    pub fn set_loaded(&mut self, id: EntityId, attr: AttrId) {
        self.loaded.entry(id).or_default().insert(attr);
    }

    pub fn unset_loaded(&mut self, id: EntityId, attr: AttrId) {
        if let Some(l) = self.loaded.get_mut(&id) {
            l.remove(&attr);
        }
    }

    /// Raw foreign key of an unresolved lazy to-one.
    pub fn lazy_key(&self, id: EntityId, attr: AttrId) -> Option<&EntityKey> {
        self.lazy_keys.get(&id)?.get(&attr)
    }

    pub fn set_lazy_key(&mut self, id: EntityId, attr: AttrId, key: Option<EntityKey>) {
        match key {
            Some(key) => {
                self.lazy_keys.entry(id).or_default().insert(attr, key);
            }
            None => {
                if let Some(keys) = self.lazy_keys.get_mut(&id) {
                    keys.remove(&attr);
                }
            }
        }
    }

    fn clear_tracking(&mut self, id: EntityId) {
        self.dirty.remove(&id);
        self.loaded.remove(&id);
        self.lazy_keys.remove(&id);
        self.snapshots.remove(&id);
    }
}

enum Baseline {
    Column(AttrValue),
    Collection(Vec<EntityId>),
}

/// Whether flushing the owner writes this collection's membership
/// (join-table rows or a unidirectional child foreign key).
pub(crate) fn writes_membership(attribute: &sqlpersist_core::Attribute) -> bool {
    attribute
        .relationship()
        .is_some_and(|r| r.kind.is_to_many() && r.is_owner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlpersist_core::{
        Accessor, Column, EntityType, GenerationStrategy, JoinColumnMapping, Relationship,
        RelationshipJoinTable, RelationshipKind, SqlType, Value,
    };

    #[derive(Debug, Default)]
    struct Note {
        id: Option<i64>,
        body: String,
        labels: Vec<EntityId>,
    }

    #[derive(Debug, Default)]
    struct Label {
        id: Option<i64>,
    }

    fn model() -> Arc<EntityModel> {
        let note = EntityType::builder::<Note>("Note", "notes")
            .id(
                "id",
                Column::new("id", SqlType::BigInt),
                GenerationStrategy::Identity,
                Accessor::value(
                    |n: &Note| n.id.into(),
                    |n: &mut Note, v| {
                        n.id = v.try_into()?;
                        Ok(())
                    },
                ),
            )
            .basic(
                "body",
                Column::new("body", SqlType::Text),
                Accessor::value(
                    |n: &Note| Value::Text(n.body.clone()),
                    |n: &mut Note, v| {
                        n.body = v.try_into()?;
                        Ok(())
                    },
                ),
            )
            .relationship(
                "labels",
                Relationship::join_table(
                    RelationshipKind::ManyToMany,
                    "Label",
                    RelationshipJoinTable::new(
                        "note_labels",
                        vec![JoinColumnMapping::new("note_id", SqlType::BigInt, "id")],
                        vec![JoinColumnMapping::new("label_id", SqlType::BigInt, "id")],
                    ),
                ),
                Accessor::many(|n: &Note| n.labels.clone(), |n: &mut Note, v| n.labels = v),
            )
            .build()
            .unwrap();
        let label = EntityType::builder::<Label>("Label", "labels")
            .id(
                "id",
                Column::new("id", SqlType::BigInt),
                GenerationStrategy::Plain,
                Accessor::value(
                    |l: &Label| l.id.into(),
                    |l: &mut Label, v| {
                        l.id = v.try_into()?;
                        Ok(())
                    },
                ),
            )
            .build()
            .unwrap();
        Arc::new(
            EntityModel::builder()
                .entity(note)
                .entity(label)
                .build()
                .unwrap(),
        )
    }

    fn note(body: &str) -> Box<dyn Any> {
        Box::new(Note {
            body: body.to_string(),
            ..Note::default()
        })
    }

    #[test]
    fn identity_map_rejects_a_second_instance() {
        let mut ctx = PersistenceContext::new(model());
        let a = ctx.insert_new(note("a")).unwrap();
        let b = ctx.insert_new(note("b")).unwrap();
        let note_ty = ctx.entity_type(a).unwrap();

        ctx.add_managed(a, EntityKey::from(1_i64)).unwrap();
        ctx.add_managed(a, EntityKey::from(1_i32)).unwrap();
        assert_eq!(ctx.find(note_ty, &EntityKey::from(1_i64)), Some(a));
        assert_eq!(ctx.managed(), vec![a]);

        let err = ctx.add_managed(b, EntityKey::from(1_i64)).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
    }

    #[test]
    fn unmapped_objects_are_rejected() {
        let mut ctx = PersistenceContext::new(model());
        assert!(ctx.insert_new(Box::new(42_u8)).is_err());
    }

    #[test]
    fn removal_keeps_the_identity_entry() {
        let mut ctx = PersistenceContext::new(model());
        let a = ctx.insert_new(note("a")).unwrap();
        let ty = ctx.entity_type(a).unwrap();
        ctx.set_status(a, EntityStatus::PersistNotFlushed).unwrap();
        ctx.add_managed(a, EntityKey::from(3_i64)).unwrap();
        ctx.set_status(a, EntityStatus::Flushed).unwrap();

        ctx.mark_for_removal(a).unwrap();
        assert_eq!(ctx.status(a), Some(EntityStatus::RemovedNotFlushed));
        assert_eq!(ctx.find(ty, &EntityKey::from(3_i64)), Some(a));

        ctx.remove_managed(a);
        assert_eq!(ctx.find(ty, &EntityKey::from(3_i64)), None);
    }

    #[test]
    fn illegal_transition_is_an_error() {
        let mut ctx = PersistenceContext::new(model());
        let a = ctx.insert_new(note("a")).unwrap();
        let err = ctx.mark_for_removal(a).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn detach_is_idempotent_and_keeps_the_object() {
        let mut ctx = PersistenceContext::new(model());
        let a = ctx.insert_new(note("kept")).unwrap();
        ctx.set_status(a, EntityStatus::FlushedLoadedFromDb).unwrap();
        ctx.add_managed(a, EntityKey::from(9_i64)).unwrap();

        ctx.detach(a).unwrap();
        ctx.detach(a).unwrap();
        assert_eq!(ctx.status(a), Some(EntityStatus::Detached));
        assert!(!ctx.is_managed(a));
        assert!(ctx.managed().is_empty());
        assert_eq!(ctx.get::<Note>(a).unwrap().body, "kept");
    }

    #[test]
    fn detach_all_empties_the_managed_list() {
        let mut ctx = PersistenceContext::new(model());
        let ids: Vec<EntityId> = (1..=3_i64)
            .map(|k| {
                let id = ctx.insert_new(note("n")).unwrap();
                ctx.set_status(id, EntityStatus::FlushedLoadedFromDb).unwrap();
                ctx.add_managed(id, EntityKey::from(k)).unwrap();
                id
            })
            .collect();
        assert!(ctx.is_managed_all(ids.iter().copied()));
        ctx.detach_all();
        assert!(ctx.managed().is_empty());
        assert!(ids.iter().all(|id| ctx.status(*id) == Some(EntityStatus::Detached)));
    }

    #[test]
    fn managed_order_survives_removal_and_re_registration() {
        let mut ctx = PersistenceContext::new(model());
        let ids: Vec<EntityId> = (1..=100_i64)
            .map(|k| {
                let id = ctx.insert_new(note("n")).unwrap();
                ctx.set_status(id, EntityStatus::FlushedLoadedFromDb).unwrap();
                ctx.add_managed(id, EntityKey::from(k)).unwrap();
                id
            })
            .collect();
        for id in &ids[..90] {
            ctx.remove_managed(*id);
        }
        assert_eq!(ctx.managed(), ids[90..].to_vec());
        assert_eq!(ctx.managed_count(), 10);

        ctx.add_managed(ids[0], EntityKey::from(1_i64)).unwrap();
        ctx.add_managed(ids[95], EntityKey::from(96_i64)).unwrap();
        let mut expected = ids[90..].to_vec();
        expected.push(ids[0]);
        assert_eq!(ctx.managed(), expected);
    }

    #[test]
    fn snapshot_diff_detects_changes() {
        let mut ctx = PersistenceContext::new(model());
        let a = ctx.insert_new(note("before")).unwrap();
        ctx.take_snapshot(a).unwrap();
        assert!(ctx.dirty_attributes(a).unwrap().is_empty());

        ctx.get_mut::<Note>(a).unwrap().body = "after".to_string();
        let body = AttrId(1);
        assert_eq!(ctx.dirty_attributes(a).unwrap(), vec![body]);

        ctx.take_snapshot(a).unwrap();
        ctx.mark_dirty(a, AttrId(0));
        assert_eq!(ctx.dirty_attributes(a).unwrap(), vec![AttrId(0)]);
        ctx.clear_dirty(a);
        assert!(ctx.dirty_attributes(a).unwrap().is_empty());
    }

    #[test]
    fn synced_collection_writes_move_the_baseline() {
        let mut ctx = PersistenceContext::new(model());
        let a = ctx.insert_new(note("n")).unwrap();
        let labels = AttrId(2);
        assert_eq!(ctx.collection_baseline(a, labels), None);
        ctx.write_synced(a, labels, AttrValue::Many(vec![EntityId(40)]))
            .unwrap();
        assert_eq!(ctx.collection_baseline(a, labels), Some(&[EntityId(40)][..]));
        assert_eq!(ctx.get::<Note>(a).unwrap().labels, vec![EntityId(40)]);
    }

    #[test]
    fn typed_access_checks_the_type() {
        let mut ctx = PersistenceContext::new(model());
        let a = ctx.insert_new(note("n")).unwrap();
        assert!(ctx.get::<Label>(a).is_err());
        let taken = ctx.take(a).unwrap();
        assert!(taken.downcast_ref::<Note>().is_some());
        assert!(!ctx.contains(a));
    }
}
