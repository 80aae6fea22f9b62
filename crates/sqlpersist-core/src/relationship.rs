//! Relationship descriptors between entity types.
//!
//! A relationship is either owned (it carries join metadata) or inverse
//! (it names the owning attribute on the target through `mapped_by`).
//! Only the owning side's metadata ever produces relationship DML.

use serde::{Deserialize, Serialize};

use crate::model::{AttrId, Column, EntityTypeId};
use crate::types::SqlType;

/// The type of relationship between two entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// One-to-one: `Passport` has one `Person`.
    OneToOne,
    /// Many-to-one: many `Book` rows reference one `Author`.
    ManyToOne,
    /// One-to-many: one `Author` has many `Book` rows.
    OneToMany,
    /// Many-to-many through a join table.
    ManyToMany,
}

impl RelationshipKind {
    pub const fn is_to_one(self) -> bool {
        matches!(self, RelationshipKind::OneToOne | RelationshipKind::ManyToOne)
    }

    pub const fn is_to_many(self) -> bool {
        !self.is_to_one()
    }
}

/// When a relationship is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchMode {
    /// Resolved while the owning instance is built.
    Eager,
    /// Resolved on first access through the attribute-access hook.
    Lazy,
}

/// Operations propagated from an instance to its related instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cascade {
    pub persist: bool,
    pub remove: bool,
    pub refresh: bool,
    pub detach: bool,
}

impl Cascade {
    pub const NONE: Cascade = Cascade {
        persist: false,
        remove: false,
        refresh: false,
        detach: false,
    };
    pub const PERSIST: Cascade = Cascade {
        persist: true,
        ..Cascade::NONE
    };
    pub const REMOVE: Cascade = Cascade {
        remove: true,
        ..Cascade::NONE
    };
    pub const REFRESH: Cascade = Cascade {
        refresh: true,
        ..Cascade::NONE
    };
    pub const DETACH: Cascade = Cascade {
        detach: true,
        ..Cascade::NONE
    };
    pub const ALL: Cascade = Cascade {
        persist: true,
        remove: true,
        refresh: true,
        detach: true,
    };

    /// Union of two cascade sets.
    pub const fn with(self, other: Cascade) -> Cascade {
        Cascade {
            persist: self.persist || other.persist,
            remove: self.remove || other.remove,
            refresh: self.refresh || other.refresh,
            detach: self.detach || other.detach,
        }
    }
}

/// One foreign-key column paired with the key column it references.
///
/// For a to-one, `column` lives in the owner's table. For a unidirectional
/// one-to-many, it lives in the target's table. Inside a join table, it
/// is a join-table column.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinColumnMapping {
    pub column: Column,
    pub referenced_column: String,
}

impl JoinColumnMapping {
    pub fn new(column: impl Into<String>, sql_type: SqlType, referenced: impl Into<String>) -> Self {
        Self {
            column: Column::new(column, sql_type),
            referenced_column: referenced.into(),
        }
    }
}

/// An intermediate table holding pairs of foreign keys.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipJoinTable {
    pub table: String,
    /// Columns referencing the owning entity's key, in key order.
    pub owner_columns: Vec<JoinColumnMapping>,
    /// Columns referencing the target entity's key, in key order.
    pub target_columns: Vec<JoinColumnMapping>,
}

impl RelationshipJoinTable {
    pub fn new(
        table: impl Into<String>,
        owner_columns: Vec<JoinColumnMapping>,
        target_columns: Vec<JoinColumnMapping>,
    ) -> Self {
        Self {
            table: table.into(),
            owner_columns,
            target_columns,
        }
    }
}

/// How the relationship is stored.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinMapping {
    /// The other side owns the relationship (`mapped_by`).
    Inverse { mapped_by: String },
    /// Foreign-key columns.
    Columns(Vec<JoinColumnMapping>),
    /// Join table.
    Table(RelationshipJoinTable),
}

/// Links filled in when the entity model is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLink {
    pub target: EntityTypeId,
    /// For an owning side: the target attribute mapped by this one.
    /// For an inverse side: the owning attribute on the target.
    pub counterpart: Option<AttrId>,
}

/// Relationship descriptor attached to an attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub kind: RelationshipKind,
    /// Target entity name.
    pub target: String,
    pub mapping: JoinMapping,
    pub cascade: Cascade,
    pub fetch: FetchMode,
    pub(crate) resolved: Option<ResolvedLink>,
}

impl Relationship {
    fn with_mapping(kind: RelationshipKind, target: impl Into<String>, mapping: JoinMapping) -> Self {
        Self {
            kind,
            target: target.into(),
            mapping,
            cascade: Cascade::NONE,
            fetch: if kind.is_to_one() {
                FetchMode::Eager
            } else {
                FetchMode::Lazy
            },
            resolved: None,
        }
    }

    /// Owning many-to-one backed by foreign-key columns in this table.
    pub fn many_to_one(target: impl Into<String>, columns: Vec<JoinColumnMapping>) -> Self {
        Self::with_mapping(RelationshipKind::ManyToOne, target, JoinMapping::Columns(columns))
    }

    /// Owning one-to-one backed by foreign-key columns in this table.
    pub fn one_to_one(target: impl Into<String>, columns: Vec<JoinColumnMapping>) -> Self {
        Self::with_mapping(RelationshipKind::OneToOne, target, JoinMapping::Columns(columns))
    }

    /// Inverse side of a relationship owned by `mapped_by` on the target.
    pub fn mapped_by(
        kind: RelationshipKind,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self::with_mapping(
            kind,
            target,
            JoinMapping::Inverse {
                mapped_by: mapped_by.into(),
            },
        )
    }

    /// Unidirectional one-to-many; the columns live in the target table.
    pub fn one_to_many(target: impl Into<String>, columns: Vec<JoinColumnMapping>) -> Self {
        Self::with_mapping(RelationshipKind::OneToMany, target, JoinMapping::Columns(columns))
    }

    /// Owning to-many through a join table.
    pub fn join_table(
        kind: RelationshipKind,
        target: impl Into<String>,
        table: RelationshipJoinTable,
    ) -> Self {
        Self::with_mapping(kind, target, JoinMapping::Table(table))
    }

    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn fetch(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn eager(self) -> Self {
        self.fetch(FetchMode::Eager)
    }

    pub fn lazy(self) -> Self {
        self.fetch(FetchMode::Lazy)
    }

    pub fn is_owner(&self) -> bool {
        !matches!(self.mapping, JoinMapping::Inverse { .. })
    }

    pub fn mapped_by_name(&self) -> Option<&str> {
        match &self.mapping {
            JoinMapping::Inverse { mapped_by } => Some(mapped_by),
            _ => None,
        }
    }

    /// Foreign-key columns, when mapped that way.
    pub fn join_columns(&self) -> Option<&[JoinColumnMapping]> {
        match &self.mapping {
            JoinMapping::Columns(cols) => Some(cols),
            _ => None,
        }
    }

    pub fn join_table_mapping(&self) -> Option<&RelationshipJoinTable> {
        match &self.mapping {
            JoinMapping::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Whether the foreign key of this owning to-one lives in the owner's row.
    pub fn owns_foreign_key(&self) -> bool {
        self.kind.is_to_one() && matches!(self.mapping, JoinMapping::Columns(_))
    }

    /// Resolution data; `None` only for relationships outside a built model.
    pub fn link(&self) -> Option<ResolvedLink> {
        self.resolved
    }
}
