//! Owning-to-one: at most one target row carries a foreign key to the parent

use async_trait::async_trait;

use super::{hydrate_first, Relationship, RelationshipDescriptor, RelationshipKind};
use crate::backends::{DatabaseValue, Record, StatementExecutor};
use crate::entity::{Entity, EntityRef, EntityRegistry, FromRow};
use crate::error::OrmResult;

/// One parent, one target (`User` → `Profile`)
#[derive(Debug, Clone)]
pub struct OwningToOne {
    descriptor: RelationshipDescriptor,
}

impl OwningToOne {
    pub fn new(target: impl Into<EntityRef>) -> Self {
        Self {
            descriptor: RelationshipDescriptor::new(RelationshipKind::OwningToOne, target),
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

    /// The owned target, or `None` when there is none or the parent is unsaved
    pub async fn load<R: FromRow>(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Option<R>> {
        hydrate_first(self.descriptor.load_records(registry, parent, conn).await?)
    }

    pub async fn create(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        attributes: &[(&str, DatabaseValue)],
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Record> {
        let resolved = self.descriptor.resolve(registry, parent.entity_name())?;
        resolved.create_owned(parent, attributes, conn).await
    }

    pub async fn save(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        child: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<u64> {
        let resolved = self.descriptor.resolve(registry, parent.entity_name())?;
        resolved.save_owned(parent, child, conn).await
    }

    /// Delete the owned target
    pub async fn delete(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<u64> {
        let resolved = self.descriptor.resolve(registry, parent.entity_name())?;
        resolved.delete_owned(parent, conn).await
    }
}

#[async_trait]
impl Relationship for OwningToOne {
    fn descriptor(&self) -> &RelationshipDescriptor {
        &self.descriptor
    }
}
