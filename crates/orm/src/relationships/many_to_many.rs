//! Many-to-many through a pivot table

use async_trait::async_trait;

use super::pivot::PivotDescriptor;
use super::pivot_manager::{PivotManager, SyncResult, ToggleResult};
use super::{hydrate, Relationship, RelationshipDescriptor, RelationshipKind};
use crate::backends::{DatabaseValue, StatementExecutor};
use crate::entity::{Entity, EntityRef, EntityRegistry, FromRow};
use crate::error::{OrmError, OrmResult};

/// `Post` ⇄ `Tag` through `post_tag`
///
/// Without configuration the pivot is named after both tables sorted and
/// joined by `_`, with `lower(name) + "_id"` key columns for each side.
#[derive(Debug, Clone)]
pub struct ManyToMany {
    descriptor: RelationshipDescriptor,
}

impl ManyToMany {
    pub fn new(target: impl Into<EntityRef>) -> Self {
        Self {
            descriptor: RelationshipDescriptor::new(RelationshipKind::ManyToMany, target),
        }
    }

    pub fn on(mut self, source: impl Into<EntityRef>) -> Self {
        self.descriptor.set_source(source);
        self
    }

    pub fn pivot_table(mut self, table: impl Into<String>) -> Self {
        self.descriptor.pivot_config_mut().table = Some(table.into());
        self
    }

    /// Pivot column referencing the parent
    pub fn foreign_key(mut self, key: impl Into<String>) -> Self {
        self.descriptor.pivot_config_mut().foreign_key = Some(key.into());
        self
    }

    /// Pivot column referencing the target
    pub fn related_key(mut self, key: impl Into<String>) -> Self {
        self.descriptor.pivot_config_mut().related_key = Some(key.into());
        self
    }

    /// Parent attribute stored in the pivot (default: primary key)
    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        self.descriptor.set_local_key(key);
        self
    }

    /// Target attribute stored in the pivot (default: primary key)
    pub fn related_local_key(mut self, key: impl Into<String>) -> Self {
        self.descriptor.pivot_config_mut().related_local_key = Some(key.into());
        self
    }

    /// Extra pivot columns that attach/sync/toggle may fill
    pub fn with_pivot<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor
            .pivot_config_mut()
            .additional_columns
            .extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        self.descriptor.pivot_config_mut().with_timestamps = true;
        self
    }

    /// Resolved pivot shape for parents of entity `source_name`
    pub fn pivot(&self, registry: &EntityRegistry, source_name: &str) -> OrmResult<PivotDescriptor> {
        let resolved = self.descriptor.resolve(registry, source_name)?;
        resolved.pivot().cloned().ok_or_else(|| {
            OrmError::Configuration(format!(
                "relationship from {} to {} has no pivot",
                source_name,
                resolved.target().name()
            ))
        })
    }

    pub async fn load<R: FromRow>(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Vec<R>> {
        hydrate(self.descriptor.load_records(registry, parent, conn).await?)
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

    /// Target ids currently associated with `parent`
    pub async fn related_ids(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Vec<DatabaseValue>> {
        let pivot = self.pivot(registry, parent.entity_name())?;
        let resolved = self.descriptor.resolve(registry, parent.entity_name())?;
        match resolved.parent_key_value(parent) {
            Some(key) => {
                let manager = PivotManager::new(&pivot, key)?;
                manager.current_ids(conn).await
            }
            None => Ok(Vec::new()),
        }
    }

    pub async fn attach<I>(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        ids: I,
        extra: &[(&str, DatabaseValue)],
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<u64>
    where
        I: IntoIterator,
        I::Item: Into<DatabaseValue>,
    {
        let ids = collect_ids(ids);
        let (pivot, key) = self.pivot_for(registry, parent)?;
        let manager = PivotManager::new(&pivot, key)?;
        manager.attach(conn, &ids, extra).await
    }

    pub async fn detach<I>(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        ids: I,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<u64>
    where
        I: IntoIterator,
        I::Item: Into<DatabaseValue>,
    {
        let ids = collect_ids(ids);
        let (pivot, key) = self.pivot_for(registry, parent)?;
        let manager = PivotManager::new(&pivot, key)?;
        manager.detach(conn, Some(&ids)).await
    }

    /// Remove every association of `parent`
    pub async fn detach_all(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<u64> {
        let (pivot, key) = self.pivot_for(registry, parent)?;
        let manager = PivotManager::new(&pivot, key)?;
        manager.detach(conn, None).await
    }

    pub async fn sync<I>(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        ids: I,
        extra: &[(&str, DatabaseValue)],
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<SyncResult>
    where
        I: IntoIterator,
        I::Item: Into<DatabaseValue>,
    {
        let ids = collect_ids(ids);
        let (pivot, key) = self.pivot_for(registry, parent)?;
        let manager = PivotManager::new(&pivot, key)?;
        manager.sync(conn, &ids, extra).await
    }

    pub async fn sync_without_detaching<I>(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        ids: I,
        extra: &[(&str, DatabaseValue)],
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<u64>
    where
        I: IntoIterator,
        I::Item: Into<DatabaseValue>,
    {
        let ids = collect_ids(ids);
        let (pivot, key) = self.pivot_for(registry, parent)?;
        let manager = PivotManager::new(&pivot, key)?;
        manager.sync_without_detaching(conn, &ids, extra).await
    }

    pub async fn toggle<I>(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        ids: I,
        extra: &[(&str, DatabaseValue)],
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<ToggleResult>
    where
        I: IntoIterator,
        I::Item: Into<DatabaseValue>,
    {
        let ids = collect_ids(ids);
        let (pivot, key) = self.pivot_for(registry, parent)?;
        let manager = PivotManager::new(&pivot, key)?;
        manager.toggle(conn, &ids, extra).await
    }

    fn pivot_for(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
    ) -> OrmResult<(PivotDescriptor, DatabaseValue)> {
        let resolved = self.descriptor.resolve(registry, parent.entity_name())?;
        let key = resolved.require_parent_key(parent)?;
        let pivot = self.pivot(registry, parent.entity_name())?;
        Ok((pivot, key))
    }
}

fn collect_ids<I>(ids: I) -> Vec<DatabaseValue>
where
    I: IntoIterator,
    I::Item: Into<DatabaseValue>,
{
    ids.into_iter().map(Into::into).collect()
}

#[async_trait]
impl Relationship for ManyToMany {
    fn descriptor(&self) -> &RelationshipDescriptor {
        &self.descriptor
    }
}
