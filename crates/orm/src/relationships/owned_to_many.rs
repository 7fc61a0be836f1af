//! Owned-to-many: the target rows carry a foreign key to the parent

use async_trait::async_trait;

use super::{hydrate, Relationship, RelationshipDescriptor, RelationshipKind};
use crate::backends::{DatabaseValue, Record, StatementExecutor};
use crate::entity::{Entity, EntityRef, EntityRegistry, FromRow};
use crate::error::OrmResult;

/// One parent, many targets (`Author` → `Book`s)
///
/// Foreign key defaults to `lower(parent name) + "_id"` on the target; the
/// local key defaults to the parent's primary key.
#[derive(Debug, Clone)]
pub struct OwnedToMany {
    descriptor: RelationshipDescriptor,
}

impl OwnedToMany {
    pub fn new(target: impl Into<EntityRef>) -> Self {
        Self {
            descriptor: RelationshipDescriptor::new(RelationshipKind::OwnedToMany, target),
        }
    }

    /// Pin the source entity instead of taking it from the first parent
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

    pub async fn load<R: FromRow>(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Vec<R>> {
        hydrate(self.descriptor.load_records(registry, parent, conn).await?)
    }

    /// Insert a new target owned by `parent` and return the stored row
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

    /// Insert several targets owned by `parent` in one statement
    pub async fn create_many(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        rows: &[&[(&str, DatabaseValue)]],
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Vec<Record>> {
        let resolved = self.descriptor.resolve(registry, parent.entity_name())?;
        resolved.create_owned_many(parent, rows, conn).await
    }

    /// Attach `child` to `parent`, inserting it if it has no primary key yet
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

    pub async fn save_many(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        children: &[&dyn Entity],
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<u64> {
        let resolved = self.descriptor.resolve(registry, parent.entity_name())?;
        let mut affected = 0;
        for child in children {
            affected += resolved.save_owned(parent, *child, conn).await?;
        }
        Ok(affected)
    }

    pub async fn count(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<i64> {
        let resolved = self.descriptor.resolve(registry, parent.entity_name())?;
        resolved.count(parent, conn).await
    }

    /// Delete every target owned by `parent`
    pub async fn delete_all(
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
impl Relationship for OwnedToMany {
    fn descriptor(&self) -> &RelationshipDescriptor {
        &self.descriptor
    }
}
