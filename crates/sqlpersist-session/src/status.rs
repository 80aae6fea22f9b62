//! Entity lifecycle states and the transitions between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an instance held by a persistence context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Not managed; never persisted.
    New,
    /// Scheduled for INSERT on the next flush.
    PersistNotFlushed,
    /// Written by a flush of this context.
    Flushed,
    /// INSERT ran but a postponed foreign-key update has not.
    PartiallyFlushed,
    /// Loaded from (or refreshed against) the database.
    FlushedLoadedFromDb,
    /// No longer tracked; the object stays readable.
    Detached,
    /// Scheduled for DELETE on the next flush.
    RemovedNotFlushed,
    /// Deleted and dropped from the identity map.
    Removed,
    /// Inserted ahead of its turn during a flush.
    EarlyInsert,
    /// Deleted ahead of its turn during a flush.
    EarlyRemove,
}

impl EntityStatus {
    /// Whether the context tracks instances in this state.
    pub const fn is_managed(self) -> bool {
        !matches!(
            self,
            EntityStatus::New | EntityStatus::Detached | EntityStatus::Removed
        )
    }

    /// Whether the row behind the instance exists in the database.
    pub const fn is_persistent(self) -> bool {
        matches!(
            self,
            EntityStatus::Flushed
                | EntityStatus::PartiallyFlushed
                | EntityStatus::FlushedLoadedFromDb
                | EntityStatus::EarlyInsert
        )
    }

    /// Whether a flush still has to write this instance's row.
    pub const fn is_pending_insert(self) -> bool {
        matches!(self, EntityStatus::PersistNotFlushed)
    }

    pub const fn is_pending_removal(self) -> bool {
        matches!(
            self,
            EntityStatus::RemovedNotFlushed | EntityStatus::EarlyRemove
        )
    }

    /// Whether `self -> to` is a legal move. Staying put is always legal.
    pub fn can_transition(self, to: EntityStatus) -> bool {
        use EntityStatus::{
            Detached, EarlyInsert, EarlyRemove, Flushed, FlushedLoadedFromDb, New,
            PartiallyFlushed, PersistNotFlushed, Removed, RemovedNotFlushed,
        };
        if self == to {
            return true;
        }
        if to == Detached {
            return self.is_managed();
        }
        match self {
            New => matches!(to, PersistNotFlushed | FlushedLoadedFromDb),
            PersistNotFlushed => matches!(to, Flushed | EarlyInsert | PartiallyFlushed | New),
            EarlyInsert => matches!(to, Flushed | PartiallyFlushed),
            PartiallyFlushed => matches!(to, Flushed | EarlyInsert),
            Flushed | FlushedLoadedFromDb => matches!(to, RemovedNotFlushed | FlushedLoadedFromDb),
            RemovedNotFlushed => matches!(to, Removed | EarlyRemove | Flushed),
            EarlyRemove => to == Removed,
            Detached | Removed => false,
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
