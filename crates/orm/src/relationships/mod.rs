//! Relationships Module
//!
//! Four relationship kinds, each a thin typed wrapper around a shared
//! [`RelationshipDescriptor`] exposing only the operations that make sense
//! for it. Targets may be named before they are registered; resolution
//! happens on first use.

pub mod descriptor;
pub mod many_to_many;
pub mod owned_to_many;
pub mod owned_to_one;
pub mod owning_to_one;
pub mod pivot;
pub mod pivot_manager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use descriptor::{RelationshipDescriptor, ResolvedRelationship};
pub use many_to_many::ManyToMany;
pub use owned_to_many::OwnedToMany;
pub use owned_to_one::OwnedToOne;
pub use owning_to_one::OwningToOne;
pub use pivot::{pivot_table_name, PivotConfig, PivotDescriptor};
pub use pivot_manager::{PivotManager, SyncResult, ToggleResult};

use crate::backends::{Record, StatementExecutor};
use crate::entity::{Entity, EntityRegistry, FromRow};
use crate::error::OrmResult;

/// Defines the kind of association between two entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// The parent holds the foreign key (belongs-to)
    OwnedToOne,
    /// The target holds the foreign key, at most one row (has-one)
    OwningToOne,
    /// The target holds the foreign key (has-many)
    OwnedToMany,
    /// Association rows live in a pivot table
    ManyToMany,
}

impl RelationshipKind {
    /// Returns true if this relationship returns a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::OwnedToMany | Self::ManyToMany)
    }

    /// Returns true if this relationship requires a pivot table
    pub fn requires_pivot(self) -> bool {
        matches!(self, Self::ManyToMany)
    }
}

/// Behaviour shared by every relationship kind
#[async_trait]
pub trait Relationship: Send + Sync {
    fn descriptor(&self) -> &RelationshipDescriptor;

    /// Related rows for `parent`; empty when the parent key is unset
    async fn load_records(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Vec<Record>> {
        self.descriptor().load_records(registry, parent, conn).await
    }
}

pub(crate) fn hydrate<R: FromRow>(rows: Vec<Record>) -> OrmResult<Vec<R>> {
    rows.iter().map(R::from_row).collect()
}

pub(crate) fn hydrate_first<R: FromRow>(rows: Vec<Record>) -> OrmResult<Option<R>> {
    rows.first().map(R::from_row).transpose()
}
