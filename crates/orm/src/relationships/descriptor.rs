//! Relationship descriptors and their resolved form
//!
//! A descriptor stores what was declared (target reference, key names, pivot
//! options). On first use it is resolved against the [`EntityRegistry`] into a
//! [`ResolvedRelationship`] that carries validated identifiers only, and the
//! result is cached on the descriptor.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::pivot::{PivotConfig, PivotDescriptor};
use super::RelationshipKind;
use crate::backends::{DatabaseValue, Record, StatementExecutor};
use crate::entity::{Entity, EntityDescriptor, EntityRef, EntityRegistry, LazyEntity};
use crate::error::{OrmError, OrmResult};
use crate::query::{ColumnRef, Condition, InsertStatement, SelectStatement, UpdateStatement};
use crate::security::Identifier;

/// One declared association from a source entity to a target entity
#[derive(Debug, Clone)]
pub struct RelationshipDescriptor {
    kind: RelationshipKind,
    source: Option<LazyEntity>,
    target: LazyEntity,
    foreign_key: Option<String>,
    local_key: Option<String>,
    pivot: Option<PivotConfig>,
    resolved: OnceCell<Arc<ResolvedRelationship>>,
}

impl RelationshipDescriptor {
    pub fn new(kind: RelationshipKind, target: impl Into<EntityRef>) -> Self {
        Self {
            kind,
            source: None,
            target: LazyEntity::new(target),
            foreign_key: None,
            local_key: None,
            pivot: kind.requires_pivot().then(PivotConfig::default),
            resolved: OnceCell::new(),
        }
    }

    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }

    pub fn target(&self) -> &LazyEntity {
        &self.target
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    pub(crate) fn set_source(&mut self, source: impl Into<EntityRef>) {
        self.source = Some(LazyEntity::new(source));
    }

    pub(crate) fn set_foreign_key(&mut self, key: impl Into<String>) {
        self.foreign_key = Some(key.into());
    }

    pub(crate) fn set_local_key(&mut self, key: impl Into<String>) {
        self.local_key = Some(key.into());
    }

    pub(crate) fn pivot_config_mut(&mut self) -> &mut PivotConfig {
        self.pivot.get_or_insert_with(PivotConfig::default)
    }

    /// Resolve against `registry` for a parent of entity `source_name`.
    ///
    /// Runs before any statement is built, so unknown targets and invalid
    /// identifiers surface here.
    pub fn resolve(
        &self,
        registry: &EntityRegistry,
        source_name: &str,
    ) -> OrmResult<Arc<ResolvedRelationship>> {
        let resolved = self
            .resolved
            .get_or_try_init(|| self.build(registry, source_name).map(Arc::new))?;

        if resolved.source.name() != source_name {
            return Err(OrmError::Configuration(format!(
                "{:?} relationship to {} is declared on {}, not {}",
                self.kind,
                resolved.target.name(),
                resolved.source.name(),
                source_name
            )));
        }
        Ok(resolved.clone())
    }

    fn build(&self, registry: &EntityRegistry, source_name: &str) -> OrmResult<ResolvedRelationship> {
        let source = match &self.source {
            Some(source) => source.resolve(registry)?.clone(),
            None => registry.lookup(source_name)?,
        };
        let target = self.target.resolve(registry)?.clone();

        let (parent_key, target_key) = match self.kind {
            RelationshipKind::OwningToOne | RelationshipKind::OwnedToMany => (
                self.local_key
                    .clone()
                    .unwrap_or_else(|| source.primary_key().to_string()),
                self.foreign_key
                    .clone()
                    .unwrap_or_else(|| source.foreign_key_name()),
            ),
            RelationshipKind::OwnedToOne => (
                self.foreign_key
                    .clone()
                    .unwrap_or_else(|| target.foreign_key_name()),
                self.local_key
                    .clone()
                    .unwrap_or_else(|| target.primary_key().to_string()),
            ),
            RelationshipKind::ManyToMany => (
                self.local_key
                    .clone()
                    .unwrap_or_else(|| source.primary_key().to_string()),
                self.pivot
                    .as_ref()
                    .and_then(|p| p.related_local_key.clone())
                    .unwrap_or_else(|| target.primary_key().to_string()),
            ),
        };

        // Validates the parent-side key even though only its value is used
        source.column_for(&parent_key)?;
        let target_column = target.column_for(&target_key)?;

        let pivot = match self.kind {
            RelationshipKind::ManyToMany => Some(PivotDescriptor::derive(
                &source,
                &target,
                &self.pivot.clone().unwrap_or_default(),
            )?),
            _ => None,
        };

        tracing::debug!(
            kind = ?self.kind,
            source = %source.name(),
            target = %target.name(),
            "resolved relationship"
        );

        Ok(ResolvedRelationship {
            kind: self.kind,
            source,
            target,
            parent_key,
            target_key,
            target_column,
            pivot,
        })
    }

    /// Resolve and load the related rows for `parent`
    pub async fn load_records(
        &self,
        registry: &EntityRegistry,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Vec<Record>> {
        let resolved = self.resolve(registry, parent.entity_name())?;
        match resolved.select_for(parent) {
            Some(select) => conn.fetch_all(&select.into()).await,
            None => {
                tracing::debug!(
                    source = %resolved.source.name(),
                    key = %resolved.parent_key,
                    "parent key unset, relationship is empty"
                );
                Ok(Vec::new())
            }
        }
    }
}

/// A relationship whose entities and identifiers have all been validated
#[derive(Debug, Clone)]
pub struct ResolvedRelationship {
    kind: RelationshipKind,
    source: Arc<EntityDescriptor>,
    target: Arc<EntityDescriptor>,
    parent_key: String,
    target_key: String,
    target_column: Identifier,
    pivot: Option<PivotDescriptor>,
}

impl ResolvedRelationship {
    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }

    pub fn source(&self) -> &Arc<EntityDescriptor> {
        &self.source
    }

    pub fn target(&self) -> &Arc<EntityDescriptor> {
        &self.target
    }

    /// Attribute read from the parent to filter the target
    pub fn parent_key(&self) -> &str {
        &self.parent_key
    }

    /// Attribute on the target matched against the parent key
    pub fn target_key(&self) -> &str {
        &self.target_key
    }

    pub fn target_column(&self) -> &Identifier {
        &self.target_column
    }

    pub fn pivot(&self) -> Option<&PivotDescriptor> {
        self.pivot.as_ref()
    }

    /// Parent's key value; `None` when unset or null
    pub fn parent_key_value(&self, parent: &dyn Entity) -> Option<DatabaseValue> {
        parent
            .attribute(&self.parent_key)
            .filter(|value| !value.is_null())
    }

    /// Parent's key value, required for writes
    pub fn require_parent_key(&self, parent: &dyn Entity) -> OrmResult<DatabaseValue> {
        self.parent_key_value(parent).ok_or_else(|| OrmError::MissingKey {
            attribute: self.parent_key.clone(),
        })
    }

    /// Select of the related rows; `None` when the parent key is unset
    pub fn select_for(&self, parent: &dyn Entity) -> Option<SelectStatement> {
        let key = self.parent_key_value(parent)?;
        let table = self.target.table();

        let select = match &self.pivot {
            Some(pivot) => SelectStatement::from(table)
                .inner_join(
                    pivot.table(),
                    ColumnRef::qualified(table, &self.target_column),
                    ColumnRef::qualified(pivot.table(), pivot.target_key()),
                )
                .filter(Condition::eq(
                    ColumnRef::qualified(pivot.table(), pivot.source_key()),
                    key,
                )),
            None => SelectStatement::from(table).filter(Condition::eq(
                ColumnRef::qualified(table, &self.target_column),
                key,
            )),
        };

        let select = select.filters(self.target.scope_conditions());
        Some(if self.kind.is_collection() {
            select
        } else {
            select.limit(1)
        })
    }

    /// Count of related rows; zero for an unset parent key
    pub async fn count(
        &self,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<i64> {
        let Some(mut select) = self.select_for(parent) else {
            return Ok(0);
        };
        select.limit = None;

        let row = conn.fetch_optional(&select.count().into()).await?;
        match row {
            Some(row) => row.get::<i64>("count"),
            None => Ok(0),
        }
    }

    /// Delete every target row owned by the parent (foreign key on the target)
    pub async fn delete_owned(
        &self,
        parent: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<u64> {
        let Some(key) = self.parent_key_value(parent) else {
            return Ok(0);
        };
        let delete = crate::query::DeleteStatement::from(self.target.table()).filter(
            Condition::eq(ColumnRef::bare(&self.target_column), key),
        );
        conn.execute(&delete.into()).await
    }

    /// Insert a target row owned by the parent and return it
    pub async fn create_owned(
        &self,
        parent: &dyn Entity,
        attributes: &[(&str, DatabaseValue)],
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Record> {
        let key = self.require_parent_key(parent)?;
        let owned: Vec<(String, DatabaseValue)> = attributes
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();

        let insert = self.owned_insert(&owned, key)?.returning();
        conn.fetch_optional(&insert.into())
            .await?
            .ok_or_else(|| {
                OrmError::Database(format!("insert into {} returned no row", self.target.table()))
            })
    }

    /// Insert several target rows owned by the parent in one statement.
    ///
    /// Every row must name the same attributes.
    pub async fn create_owned_many(
        &self,
        parent: &dyn Entity,
        rows: &[&[(&str, DatabaseValue)]],
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Vec<Record>> {
        let key = self.require_parent_key(parent)?;
        let mut insert: Option<InsertStatement> = None;
        for attributes in rows {
            let owned: Vec<(String, DatabaseValue)> = attributes
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect();
            insert = Some(match insert {
                None => self.owned_insert(&owned, key.clone())?,
                Some(insert) => {
                    let (columns, values) = self.owned_row(&owned, key.clone())?;
                    if columns != insert.columns {
                        return Err(OrmError::Configuration(format!(
                            "rows created on {} must all set the same attributes",
                            self.target.name()
                        )));
                    }
                    insert.row(values)?
                }
            });
        }

        match insert {
            Some(insert) => conn.fetch_all(&insert.returning().into()).await,
            None => Ok(Vec::new()),
        }
    }

    /// Point an existing child at the parent, or insert it when it has no key yet
    pub async fn save_owned(
        &self,
        parent: &dyn Entity,
        child: &dyn Entity,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<u64> {
        if child.entity_name() != self.target.name() {
            return Err(OrmError::Configuration(format!(
                "cannot save a {} through a relationship to {}",
                child.entity_name(),
                self.target.name()
            )));
        }
        let key = self.require_parent_key(parent)?;

        let child_key = child
            .attribute(self.target.primary_key())
            .filter(|value| !value.is_null());
        match child_key {
            Some(child_key) => {
                let update = UpdateStatement::table(self.target.table())
                    .set(&self.target_column, key)
                    .filter(Condition::eq(
                        ColumnRef::bare(self.target.primary_key_column()),
                        child_key,
                    ));
                conn.execute(&update.into()).await
            }
            None => {
                let insert = self.owned_insert(&child.attributes(), key)?;
                conn.execute(&insert.into()).await
            }
        }
    }

    fn owned_insert(
        &self,
        attributes: &[(String, DatabaseValue)],
        key: DatabaseValue,
    ) -> OrmResult<InsertStatement> {
        let (columns, values) = self.owned_row(attributes, key)?;
        InsertStatement::into_table(self.target.table(), columns).row(values)
    }

    /// Columns and values of one owned row, with the parent key last
    fn owned_row(
        &self,
        attributes: &[(String, DatabaseValue)],
        key: DatabaseValue,
    ) -> OrmResult<(Vec<Identifier>, Vec<DatabaseValue>)> {
        let mut columns = Vec::with_capacity(attributes.len() + 1);
        let mut values = Vec::with_capacity(attributes.len() + 1);
        for (name, value) in attributes {
            if *name == self.target_key {
                continue;
            }
            // Null primary keys are left to the database
            if name == self.target.primary_key() && value.is_null() {
                continue;
            }
            columns.push(self.target.require_column(name)?);
            values.push(value.clone());
        }
        columns.push(self.target_column.clone());
        values.push(key);
        Ok((columns, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRecord;

    fn registry() -> EntityRegistry {
        let registry = EntityRegistry::new();
        registry
            .register(EntityDescriptor::builder("Post").attribute("title").build().unwrap())
            .unwrap();
        registry
            .register(
                EntityDescriptor::builder("Tag")
                    .attribute("name")
                    .soft_deletes("deleted_at")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    fn post(id: Option<i64>) -> EntityRecord {
        EntityRecord::new("Post", Record::new().with("id", id).with("title", "hello"))
    }

    #[test]
    fn test_resolution_is_cached() {
        let registry = registry();
        let relationship = RelationshipDescriptor::new(RelationshipKind::ManyToMany, "Tag");
        assert!(!relationship.is_resolved());

        let first = relationship.resolve(&registry, "Post").unwrap();
        assert!(relationship.is_resolved());
        registry.unregister("Tag");
        let second = relationship.resolve(&registry, "Post").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unregistered_target_is_resolution_error() {
        let registry = EntityRegistry::new();
        registry
            .register(EntityDescriptor::builder("Post").build().unwrap())
            .unwrap();
        let relationship = RelationshipDescriptor::new(RelationshipKind::OwnedToMany, "Comment");

        match relationship.resolve(&registry, "Post") {
            Err(OrmError::Resolution { name }) => assert_eq!(name, "Comment"),
            other => panic!("expected Resolution, got {:?}", other),
        }
        assert!(!relationship.is_resolved());
    }

    #[test]
    fn test_wrong_source_is_rejected() {
        let registry = registry();
        let relationship = RelationshipDescriptor::new(RelationshipKind::ManyToMany, "Tag");
        relationship.resolve(&registry, "Post").unwrap();
        assert!(matches!(
            relationship.resolve(&registry, "Tag"),
            Err(OrmError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_declared_key_is_injection_risk() {
        let registry = registry();
        let mut relationship = RelationshipDescriptor::new(RelationshipKind::OwnedToMany, "Tag");
        relationship.set_foreign_key("post_id OR 1=1");
        assert!(matches!(
            relationship.resolve(&registry, "Post"),
            Err(OrmError::InjectionRisk { .. })
        ));
    }

    #[test]
    fn test_many_to_many_select_carries_scope_and_join() {
        let registry = registry();
        let relationship = RelationshipDescriptor::new(RelationshipKind::ManyToMany, "Tag");
        let resolved = relationship.resolve(&registry, "Post").unwrap();

        let select = resolved.select_for(&post(Some(1))).unwrap();
        assert_eq!(select.table.as_str(), "tag");
        assert_eq!(select.joins.len(), 1);
        assert_eq!(select.joins[0].table.as_str(), "post_tag");
        assert_eq!(select.conditions.len(), 2);
        assert_eq!(select.limit, None);

        assert!(resolved.select_for(&post(None)).is_none());
    }

    #[test]
    fn test_owned_to_one_reads_foreign_key_from_parent() {
        let registry = registry();
        registry
            .register(EntityDescriptor::builder("Comment").attribute("post_id").build().unwrap())
            .unwrap();
        let relationship = RelationshipDescriptor::new(RelationshipKind::OwnedToOne, "Post");
        let resolved = relationship.resolve(&registry, "Comment").unwrap();

        assert_eq!(resolved.parent_key(), "post_id");
        assert_eq!(resolved.target_column().as_str(), "id");

        let comment = EntityRecord::new("Comment", Record::new().with("id", 5).with("post_id", 1));
        let select = resolved.select_for(&comment).unwrap();
        assert_eq!(select.limit, Some(1));
        assert_eq!(select.conditions[0].values, vec![DatabaseValue::Int32(1)]);
    }
}
