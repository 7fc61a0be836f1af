//! Owned-to-one: the parent carries the foreign key (belongs-to)

use async_trait::async_trait;

use super::{hydrate_first, Relationship, RelationshipDescriptor, RelationshipKind};
use crate::backends::StatementExecutor;
use crate::entity::{Entity, EntityRef, EntityRegistry, FromRow};
use crate::error::OrmResult;

/// `Comment` → its `Post`
///
/// The foreign key defaults to `lower(target name) + "_id"` on the parent and
/// is matched against the target's primary key unless `local_key` names
/// another target attribute.
#[derive(Debug, Clone)]
pub struct OwnedToOne {
    descriptor: RelationshipDescriptor,
}

impl OwnedToOne {
    pub fn new(target: impl Into<EntityRef>) -> Self {
        Self {
            descriptor: RelationshipDescriptor::new(RelationshipKind::OwnedToOne, target),
        }
    }

    pub fn on(mut self, source: impl Into<EntityRef>) -> Self {
        self.descriptor.set_source(source);
        self
    }

    pub fn foreign_key(mut self, key: impl Into<String>) -> Self {
        self.descriptor.set_foreign_key(key);
        self
    }

    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        self.descriptor.set_local_key(key);
        self
    }

    /// The owning row; `None` when the parent's foreign key is null
    pub async fn load<R: FromRow>(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Option<R>> {
        hydrate_first(self.descriptor.load_records(registry, parent, conn).await?)
    }
}

#[async_trait]
impl Relationship for OwnedToOne {
    fn descriptor(&self) -> &RelationshipDescriptor {
        &self.descriptor
    }
}
