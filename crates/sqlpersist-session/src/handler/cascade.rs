//! Cascading persist, remove, refresh and detach across relationships.

use std::collections::HashSet;
use std::sync::Arc;

use sqlpersist_core::{AttrValue, Cascade, Connection, EntityId, Error, Result, StateError};

use super::EntityHandler;
use crate::status::EntityStatus;

fn rejected(id: EntityId, status: EntityStatus, operation: &str) -> Error {
    Error::InvalidState(StateError {
        from: status.to_string(),
        to: operation.to_string(),
        message: format!("cannot {operation} instance {id} in state {status}"),
    })
}

impl<C: Connection> EntityHandler<'_, C> {
    /// Schedule an instance for INSERT, following PERSIST cascades.
    pub(crate) fn persist(&mut self, id: EntityId) -> Result<()> {
        self.persist_cascade(id, &mut HashSet::new())
    }

    fn persist_cascade(&mut self, id: EntityId, visited: &mut HashSet<EntityId>) -> Result<()> {
        if !visited.insert(id) {
            return Ok(());
        }
        let model = Arc::clone(&self.model);
        let ty = model.get(self.ctx.entity_type(id)?);
        match self.status_of(id)? {
            EntityStatus::New => {
                self.ctx.set_status(id, EntityStatus::PersistNotFlushed)?;
                match ty.key_of(self.ctx.object(id)?)? {
                    Some(key) => self.ctx.add_managed(id, key)?,
                    None => self.ctx.enlist(id),
                }
                for (attr, _) in ty.relationships() {
                    self.ctx.set_loaded(id, attr);
                }
                tracing::debug!(entity = %ty.name, %id, "scheduled for insert");
            }
            EntityStatus::RemovedNotFlushed => {
                self.ctx.set_status(id, EntityStatus::Flushed)?;
            }
            status @ (EntityStatus::Detached | EntityStatus::Removed) => {
                return Err(rejected(id, status, "persist"));
            }
            _ => {}
        }

        for (attr, rel) in ty.relationships() {
            if !rel.cascade.persist {
                continue;
            }
            let children = self.ctx.read(id, attr)?.referenced();
            let inverse = rel
                .mapped_by_name()
                .filter(|_| rel.kind.is_to_many())
                .and(rel.link().and_then(|link| link.counterpart));
            for child in children {
                if let Some(owning) = inverse {
                    if self.ctx.read(child, owning)?.as_one().is_none() {
                        self.ctx.write(child, owning, AttrValue::One(Some(id)))?;
                        self.ctx.set_loaded(child, owning);
                        if self.ctx.status(child).is_some_and(EntityStatus::is_persistent) {
                            self.ctx.mark_dirty(child, owning);
                        }
                    }
                }
                self.persist_cascade(child, visited)?;
            }
        }
        Ok(())
    }

    /// Schedule an instance for DELETE, following REMOVE cascades.
    pub(crate) fn remove(&mut self, id: EntityId) -> Result<()> {
        self.remove_cascade(id, &mut HashSet::new())
    }

    fn remove_cascade(&mut self, id: EntityId, visited: &mut HashSet<EntityId>) -> Result<()> {
        if !visited.insert(id) {
            return Ok(());
        }
        let status = self.status_of(id)?;
        match status {
            EntityStatus::New => return Ok(()),
            EntityStatus::Detached | EntityStatus::Removed => {
                return Err(rejected(id, status, "remove"));
            }
            _ => {}
        }
        let children = self.cascade_targets(id, |c| c.remove, true)?;

        match status {
            EntityStatus::PersistNotFlushed => {
                self.ctx.remove_managed(id);
                self.ctx.set_status(id, EntityStatus::New)?;
            }
            EntityStatus::Flushed | EntityStatus::FlushedLoadedFromDb => {
                self.ctx.mark_for_removal(id)?;
            }
            _ => {}
        }
        for child in children {
            self.remove_cascade(child, visited)?;
        }
        Ok(())
    }

    /// Stop tracking an instance and everything reachable through DETACH cascades.
    pub(crate) fn detach(&mut self, id: EntityId) -> Result<()> {
        self.detach_cascade(id, &mut HashSet::new())
    }

    fn detach_cascade(&mut self, id: EntityId, visited: &mut HashSet<EntityId>) -> Result<()> {
        if !visited.insert(id) {
            return Ok(());
        }
        let children = self.cascade_targets(id, |c| c.detach, false)?;
        self.ctx.detach(id)?;
        for child in children {
            self.detach_cascade(child, visited)?;
        }
        Ok(())
    }

    /// Reload an instance from its row, following REFRESH cascades.
    pub(crate) fn refresh(&mut self, id: EntityId) -> Result<()> {
        self.refresh_cascade(id, &mut HashSet::new())
    }

    fn refresh_cascade(&mut self, id: EntityId, visited: &mut HashSet<EntityId>) -> Result<()> {
        if !visited.insert(id) {
            return Ok(());
        }
        let children = self.cascade_targets(id, |c| c.refresh, false)?;
        self.refresh_instance(id)?;
        for child in children {
            let refreshable = matches!(
                self.ctx.status(child),
                Some(EntityStatus::Flushed | EntityStatus::FlushedLoadedFromDb)
            );
            if refreshable {
                self.refresh_cascade(child, visited)?;
            }
        }
        Ok(())
    }

    /// Instances referenced through relationships whose cascade set passes
    /// `selected`. Unloaded relationships are loaded first when `load` is set
    /// and skipped otherwise.
    fn cascade_targets(
        &mut self,
        id: EntityId,
        selected: impl Fn(&Cascade) -> bool,
        load: bool,
    ) -> Result<Vec<EntityId>> {
        let model = Arc::clone(&self.model);
        let ty = model.get(self.ctx.entity_type(id)?);
        let mut targets = Vec::new();
        for (attr, rel) in ty.relationships() {
            if !selected(&rel.cascade) {
                continue;
            }
            let value = if load {
                self.load_attribute(id, attr)?
            } else if self.ctx.is_loaded(id, attr) {
                self.ctx.read(id, attr)?
            } else {
                continue;
            };
            targets.extend(value.referenced());
        }
        Ok(targets)
    }
}
