//! Pivot Manager - attach/detach/sync/toggle over a join table
//!
//! The pivot table is treated as a set of `(parent key, target id, extra..)`
//! rows. Target ids are always bound parameters.
//!
//! `sync` and `toggle` issue several statements. They are not atomic and
//! concurrent calls on the same parent are not serialized: two callers
//! toggling the same id can both see it absent and both attach it. Run them
//! on a [`TransactionScope`](crate::context::TransactionScope) when the
//! combined effect has to be atomic.

use crate::backends::{DatabaseValue, StatementExecutor};
use crate::error::{OrmError, OrmResult};
use crate::query::{ColumnRef, Condition, DeleteStatement, InsertStatement, SelectStatement};
use crate::security::Identifier;

use super::pivot::PivotDescriptor;

/// Outcome of a toggle: ids that were attached and ids that were detached
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToggleResult {
    pub attached: Vec<DatabaseValue>,
    pub detached: Vec<DatabaseValue>,
}

/// Outcome of a sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub detached: u64,
    pub attached: u64,
}

/// Pivot operations for one parent
#[derive(Debug, Clone)]
pub struct PivotManager<'a> {
    pivot: &'a PivotDescriptor,
    parent_key: DatabaseValue,
}

impl<'a> PivotManager<'a> {
    /// The parent key must be set; unsaved parents cannot own pivot rows
    pub fn new(pivot: &'a PivotDescriptor, parent_key: DatabaseValue) -> OrmResult<Self> {
        if parent_key.is_null() {
            return Err(OrmError::MissingKey {
                attribute: pivot.source_key().to_string(),
            });
        }
        Ok(Self { pivot, parent_key })
    }

    pub fn pivot(&self) -> &PivotDescriptor {
        self.pivot
    }

    fn parent_condition(&self) -> Condition {
        Condition::eq(
            ColumnRef::bare(self.pivot.source_key()),
            self.parent_key.clone(),
        )
    }

    fn distinct_ids(&self, ids: &[DatabaseValue]) -> OrmResult<Vec<DatabaseValue>> {
        let mut distinct: Vec<DatabaseValue> = Vec::with_capacity(ids.len());
        for id in ids {
            if id.is_null() {
                return Err(OrmError::MissingKey {
                    attribute: self.pivot.target_key().to_string(),
                });
            }
            if !distinct.iter().any(|seen| seen.sql_eq(id)) {
                distinct.push(id.clone());
            }
        }
        Ok(distinct)
    }

    /// Idempotent insert of one pivot row per id
    pub fn attach_statement(
        &self,
        ids: &[DatabaseValue],
        extra: &[(Identifier, DatabaseValue)],
    ) -> OrmResult<InsertStatement> {
        let mut columns = vec![self.pivot.source_key().clone(), self.pivot.target_key().clone()];
        columns.extend(extra.iter().map(|(column, _)| column.clone()));

        let mut insert = InsertStatement::into_table(self.pivot.table(), columns);
        for id in ids {
            let mut row = vec![self.parent_key.clone(), id.clone()];
            row.extend(extra.iter().map(|(_, value)| value.clone()));
            insert = insert.row(row)?;
        }

        Ok(insert.on_conflict_ignore(vec![
            self.pivot.source_key().clone(),
            self.pivot.target_key().clone(),
        ]))
    }

    /// `None` removes every row of the parent; an empty slice removes nothing
    pub fn detach_statement(&self, ids: Option<&[DatabaseValue]>) -> Option<DeleteStatement> {
        let delete = DeleteStatement::from(self.pivot.table()).filter(self.parent_condition());
        match ids {
            None => Some(delete),
            Some([]) => None,
            Some(ids) => Some(delete.filter(Condition::is_in(
                ColumnRef::bare(self.pivot.target_key()),
                ids.to_vec(),
            ))),
        }
    }

    pub fn current_ids_statement(&self) -> SelectStatement {
        SelectStatement::from(self.pivot.table())
            .columns(vec![ColumnRef::bare(self.pivot.target_key())])
            .filter(self.parent_condition())
    }

    /// Target ids currently associated with the parent
    pub async fn current_ids(&self, conn: &mut dyn StatementExecutor) -> OrmResult<Vec<DatabaseValue>> {
        let rows = conn
            .fetch_all(&self.current_ids_statement().into())
            .await?;
        let column = self.pivot.target_key().as_str();
        Ok(rows
            .iter()
            .filter_map(|row| row.get_value(column).cloned())
            .collect())
    }

    /// Attach `ids`; already-attached ids are left alone. Returns rows inserted.
    pub async fn attach(
        &self,
        conn: &mut dyn StatementExecutor,
        ids: &[DatabaseValue],
        extra: &[(&str, DatabaseValue)],
    ) -> OrmResult<u64> {
        let ids = self.distinct_ids(ids)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let extra = self.pivot.extra_assignments(extra)?;

        let statement = self.attach_statement(&ids, &extra)?;
        match conn.execute(&statement.into()).await {
            Ok(inserted) => {
                tracing::debug!(pivot = %self.pivot.table(), requested = ids.len(), inserted, "attached");
                Ok(inserted)
            }
            Err(e) if e.is_unique_violation() => self.attach_missing(conn, &ids, &extra, e).await,
            Err(e) => Err(e),
        }
    }

    /// Recovery after a bulk attach hit a unique violation.
    ///
    /// Only ids already associated with this parent count as duplicates. When
    /// none of the requested ids is, the violation came from another
    /// constraint and is returned unchanged. Otherwise the remaining ids are
    /// inserted in one statement and any error from it propagates.
    async fn attach_missing(
        &self,
        conn: &mut dyn StatementExecutor,
        ids: &[DatabaseValue],
        extra: &[(Identifier, DatabaseValue)],
        violation: OrmError,
    ) -> OrmResult<u64> {
        // Fails inside an aborted transaction; the violation is the real cause
        let Ok(current) = self.current_ids(conn).await else {
            return Err(violation);
        };
        let missing: Vec<DatabaseValue> = ids
            .iter()
            .filter(|id| !current.iter().any(|c| c.sql_eq(id)))
            .cloned()
            .collect();

        if missing.len() == ids.len() {
            tracing::warn!(pivot = %self.pivot.table(), error = %violation, "attach rejected by a unique constraint");
            return Err(violation);
        }
        tracing::debug!(
            pivot = %self.pivot.table(),
            duplicates = ids.len() - missing.len(),
            "attach raced with an existing association, inserting the rest"
        );
        if missing.is_empty() {
            return Ok(0);
        }
        let statement = self.attach_statement(&missing, extra)?;
        conn.execute(&statement.into()).await
    }

    /// Detach the given ids, or every association when `ids` is `None`.
    /// Returns rows deleted.
    pub async fn detach(
        &self,
        conn: &mut dyn StatementExecutor,
        ids: Option<&[DatabaseValue]>,
    ) -> OrmResult<u64> {
        let ids = ids.map(|ids| self.distinct_ids(ids)).transpose()?;
        match self.detach_statement(ids.as_deref()) {
            Some(statement) => {
                let deleted = conn.execute(&statement.into()).await?;
                tracing::debug!(pivot = %self.pivot.table(), deleted, all = ids.is_none(), "detached");
                Ok(deleted)
            }
            None => Ok(0),
        }
    }

    /// Make the association set exactly `ids`: detach everything, then attach
    pub async fn sync(
        &self,
        conn: &mut dyn StatementExecutor,
        ids: &[DatabaseValue],
        extra: &[(&str, DatabaseValue)],
    ) -> OrmResult<SyncResult> {
        // Validate before the destructive half runs
        let ids = self.distinct_ids(ids)?;
        self.pivot.extra_assignments(extra)?;

        let detached = self.detach(conn, None).await?;
        let attached = self.attach(conn, &ids, extra).await?;
        Ok(SyncResult { detached, attached })
    }

    /// Attach the ids that are missing and keep everything else
    pub async fn sync_without_detaching(
        &self,
        conn: &mut dyn StatementExecutor,
        ids: &[DatabaseValue],
        extra: &[(&str, DatabaseValue)],
    ) -> OrmResult<u64> {
        self.attach(conn, ids, extra).await
    }

    /// Detach the requested ids that are present and attach the ones that are not
    pub async fn toggle(
        &self,
        conn: &mut dyn StatementExecutor,
        ids: &[DatabaseValue],
        extra: &[(&str, DatabaseValue)],
    ) -> OrmResult<ToggleResult> {
        let ids = self.distinct_ids(ids)?;
        self.pivot.extra_assignments(extra)?;

        let current = self.current_ids(conn).await?;
        let (detach, attach): (Vec<DatabaseValue>, Vec<DatabaseValue>) = ids
            .into_iter()
            .partition(|id| current.iter().any(|c| c.sql_eq(id)));

        if !detach.is_empty() {
            self.detach(conn, Some(&detach)).await?;
        }
        if !attach.is_empty() {
            self.attach(conn, &attach, extra).await?;
        }

        Ok(ToggleResult {
            attached: attach,
            detached: detach,
        })
    }
}
