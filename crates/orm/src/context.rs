//! Query execution context
//!
//! Ties a [`ConnectionRouter`] to an [`EntityRegistry`]: each call asks the
//! router for a connection matching the operation's shape, runs the
//! statement or relationship operation on it, and hands the connection back
//! whether or not the operation succeeded.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backends::{DatabaseTransaction, DatabaseValue, Record, StatementExecutor};
use crate::connection::{ConnectionRouter, PoolRole, RouteContext, RouteHint, RoutedConnection};
use crate::entity::{Entity, EntityRegistry, FromRow};
use crate::error::{OrmError, OrmResult};
use crate::query::Statement;
use crate::relationships::{
    ManyToMany, OwnedToMany, OwningToOne, Relationship, SyncResult, ToggleResult,
};

/// Router + registry handle passed through application code
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    router: Arc<ConnectionRouter>,
    registry: Arc<EntityRegistry>,
    route: RouteContext,
}

/// A read that can be replayed on another connection
#[async_trait]
trait ReadOperation: Send + Sync {
    type Output: Send;

    async fn run(
        &self,
        registry: &EntityRegistry,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Self::Output>;
}

struct FetchStatement<'a>(&'a Statement);

#[async_trait]
impl ReadOperation for FetchStatement<'_> {
    type Output = Vec<Record>;

    async fn run(&self, _registry: &EntityRegistry, conn: &mut dyn StatementExecutor) -> OrmResult<Vec<Record>> {
        conn.fetch_all(self.0).await
    }
}

struct LoadRelated<'a> {
    relationship: &'a dyn Relationship,
    parent: &'a dyn Entity,
}

#[async_trait]
impl ReadOperation for LoadRelated<'_> {
    type Output = Vec<Record>;

    async fn run(&self, registry: &EntityRegistry, conn: &mut dyn StatementExecutor) -> OrmResult<Vec<Record>> {
        self.relationship.load_records(registry, self.parent, conn).await
    }
}

struct CountRelated<'a> {
    relationship: &'a dyn Relationship,
    parent: &'a dyn Entity,
}

#[async_trait]
impl ReadOperation for CountRelated<'_> {
    type Output = i64;

    async fn run(&self, registry: &EntityRegistry, conn: &mut dyn StatementExecutor) -> OrmResult<i64> {
        let resolved = self
            .relationship
            .descriptor()
            .resolve(registry, self.parent.entity_name())?;
        resolved.count(self.parent, conn).await
    }
}

struct RelatedIds<'a> {
    relationship: &'a ManyToMany,
    parent: &'a dyn Entity,
}

#[async_trait]
impl ReadOperation for RelatedIds<'_> {
    type Output = Vec<DatabaseValue>;

    async fn run(
        &self,
        registry: &EntityRegistry,
        conn: &mut dyn StatementExecutor,
    ) -> OrmResult<Vec<DatabaseValue>> {
        self.relationship.related_ids(registry, self.parent, conn).await
    }
}

impl ExecutionContext {
    pub fn new(router: Arc<ConnectionRouter>, registry: Arc<EntityRegistry>) -> Self {
        Self {
            router,
            registry,
            route: RouteContext::default(),
        }
    }

    pub fn router(&self) -> &ConnectionRouter {
        &self.router
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn route_context(&self) -> RouteContext {
        self.route
    }

    /// A copy whose reads all go to the write pool
    pub fn force_write(&self) -> Self {
        let mut ctx = self.clone();
        ctx.route.force_write = true;
        ctx
    }

    /// A copy routed as if inside a caller-managed transaction
    pub fn in_transaction(&self) -> Self {
        let mut ctx = self.clone();
        ctx.route.in_transaction = true;
        ctx
    }

    /// Check out a routed connection; the caller must `release` it
    pub async fn connection(&self, hint: RouteHint) -> OrmResult<RoutedConnection> {
        self.router.acquire(hint, self.route).await
    }

    /// Run a read-only statement
    pub async fn fetch_all(&self, statement: &Statement) -> OrmResult<Vec<Record>> {
        if !statement.is_read_only() {
            let mut conn = self.connection(RouteHint::Write).await?;
            let result = conn.fetch_all(statement).await;
            return finish(conn, result).await;
        }
        self.read(FetchStatement(statement)).await
    }

    pub async fn fetch_optional(&self, statement: &Statement) -> OrmResult<Option<Record>> {
        Ok(self.fetch_all(statement).await?.into_iter().next())
    }

    /// Run a statement on the write pool and return the affected row count
    pub async fn execute(&self, statement: &Statement) -> OrmResult<u64> {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = conn.execute(statement).await;
        finish(conn, result).await
    }

    /// Related rows of `parent`, hydrated as `R`
    pub async fn load<R: FromRow>(
        &self,
        relationship: &dyn Relationship,
        parent: &dyn Entity,
    ) -> OrmResult<Vec<R>> {
        let rows = self.read(LoadRelated { relationship, parent }).await?;
        rows.iter().map(R::from_row).collect()
    }

    /// First related row of `parent`, for the single-valued kinds
    pub async fn load_first<R: FromRow>(
        &self,
        relationship: &dyn Relationship,
        parent: &dyn Entity,
    ) -> OrmResult<Option<R>> {
        let rows = self.read(LoadRelated { relationship, parent }).await?;
        rows.first().map(R::from_row).transpose()
    }

    /// Number of rows related to `parent`; zero when its key is unset
    pub async fn count(&self, relationship: &dyn Relationship, parent: &dyn Entity) -> OrmResult<i64> {
        self.read(CountRelated { relationship, parent }).await
    }

    /// Target ids in the pivot for `parent`, including soft-deleted targets
    pub async fn related_ids(
        &self,
        relationship: &ManyToMany,
        parent: &dyn Entity,
    ) -> OrmResult<Vec<DatabaseValue>> {
        self.read(RelatedIds { relationship, parent }).await
    }

    pub async fn create(
        &self,
        relationship: &OwnedToMany,
        parent: &dyn Entity,
        attributes: &[(&str, DatabaseValue)],
    ) -> OrmResult<Record> {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship
            .create(&self.registry, parent, attributes, &mut conn)
            .await;
        finish(conn, result).await
    }

    pub async fn create_many(
        &self,
        relationship: &OwnedToMany,
        parent: &dyn Entity,
        rows: &[&[(&str, DatabaseValue)]],
    ) -> OrmResult<Vec<Record>> {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship
            .create_many(&self.registry, parent, rows, &mut conn)
            .await;
        finish(conn, result).await
    }

    pub async fn save(
        &self,
        relationship: &OwnedToMany,
        parent: &dyn Entity,
        child: &dyn Entity,
    ) -> OrmResult<u64> {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship.save(&self.registry, parent, child, &mut conn).await;
        finish(conn, result).await
    }

    pub async fn save_many(
        &self,
        relationship: &OwnedToMany,
        parent: &dyn Entity,
        children: &[&dyn Entity],
    ) -> OrmResult<u64> {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship
            .save_many(&self.registry, parent, children, &mut conn)
            .await;
        finish(conn, result).await
    }

    pub async fn delete_all(&self, relationship: &OwnedToMany, parent: &dyn Entity) -> OrmResult<u64> {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship.delete_all(&self.registry, parent, &mut conn).await;
        finish(conn, result).await
    }

    pub async fn create_one(
        &self,
        relationship: &OwningToOne,
        parent: &dyn Entity,
        attributes: &[(&str, DatabaseValue)],
    ) -> OrmResult<Record> {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship
            .create(&self.registry, parent, attributes, &mut conn)
            .await;
        finish(conn, result).await
    }

    pub async fn save_one(
        &self,
        relationship: &OwningToOne,
        parent: &dyn Entity,
        child: &dyn Entity,
    ) -> OrmResult<u64> {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship.save(&self.registry, parent, child, &mut conn).await;
        finish(conn, result).await
    }

    pub async fn delete_one(&self, relationship: &OwningToOne, parent: &dyn Entity) -> OrmResult<u64> {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship.delete(&self.registry, parent, &mut conn).await;
        finish(conn, result).await
    }

    pub async fn attach<I>(
        &self,
        relationship: &ManyToMany,
        parent: &dyn Entity,
        ids: I,
        extra: &[(&str, DatabaseValue)],
    ) -> OrmResult<u64>
    where
        I: IntoIterator,
        I::Item: Into<DatabaseValue>,
    {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship
            .attach(&self.registry, parent, ids, extra, &mut conn)
            .await;
        finish(conn, result).await
    }

    pub async fn detach<I>(&self, relationship: &ManyToMany, parent: &dyn Entity, ids: I) -> OrmResult<u64>
    where
        I: IntoIterator,
        I::Item: Into<DatabaseValue>,
    {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship.detach(&self.registry, parent, ids, &mut conn).await;
        finish(conn, result).await
    }

    pub async fn detach_all(&self, relationship: &ManyToMany, parent: &dyn Entity) -> OrmResult<u64> {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship.detach_all(&self.registry, parent, &mut conn).await;
        finish(conn, result).await
    }

    /// Not atomic on its own; use [`begin`](Self::begin) when it must be
    pub async fn sync<I>(
        &self,
        relationship: &ManyToMany,
        parent: &dyn Entity,
        ids: I,
        extra: &[(&str, DatabaseValue)],
    ) -> OrmResult<SyncResult>
    where
        I: IntoIterator,
        I::Item: Into<DatabaseValue>,
    {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship
            .sync(&self.registry, parent, ids, extra, &mut conn)
            .await;
        finish(conn, result).await
    }

    pub async fn sync_without_detaching<I>(
        &self,
        relationship: &ManyToMany,
        parent: &dyn Entity,
        ids: I,
        extra: &[(&str, DatabaseValue)],
    ) -> OrmResult<u64>
    where
        I: IntoIterator,
        I::Item: Into<DatabaseValue>,
    {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship
            .sync_without_detaching(&self.registry, parent, ids, extra, &mut conn)
            .await;
        finish(conn, result).await
    }

    /// Not atomic on its own; concurrent toggles of the same id race
    pub async fn toggle<I>(
        &self,
        relationship: &ManyToMany,
        parent: &dyn Entity,
        ids: I,
        extra: &[(&str, DatabaseValue)],
    ) -> OrmResult<ToggleResult>
    where
        I: IntoIterator,
        I::Item: Into<DatabaseValue>,
    {
        let mut conn = self.connection(RouteHint::Write).await?;
        let result = relationship
            .toggle(&self.registry, parent, ids, extra, &mut conn)
            .await;
        finish(conn, result).await
    }

    /// Open a transaction scope; it routes as a write unless the router
    /// was told transactions need not force writes
    pub async fn begin(&self) -> OrmResult<TransactionScope> {
        self.begin_with(RouteHint::Write).await
    }

    pub async fn begin_with(&self, hint: RouteHint) -> OrmResult<TransactionScope> {
        let (tx, role) = self.router.begin_transaction(hint).await?;
        tracing::debug!("Transaction scope opened on the {} pool", role);
        Ok(TransactionScope {
            tx: Some(tx),
            role,
            registry: self.registry.clone(),
        })
    }

    /// Run a read; a connection error on the read pool retries once on the
    /// write pool, and a connection error there ends the fallback chain
    async fn read<O: ReadOperation>(&self, op: O) -> OrmResult<O::Output> {
        let mut conn = self.connection(RouteHint::Read).await?;
        match op.run(&self.registry, &mut conn).await {
            Err(e) if e.is_connection_error() && conn.role() == PoolRole::Read => {
                tracing::warn!("Read failed on the read pool ({}); retrying on the write pool", e);
                release_quietly(conn).await;

                let route = RouteContext {
                    force_write: true,
                    ..self.route
                };
                let mut conn = self.router.acquire(RouteHint::Read, route).await?;
                let result = match op.run(&self.registry, &mut conn).await {
                    Err(e) if e.is_connection_error() => {
                        Err(self.router.unavailable(PoolRole::Read, e))
                    }
                    result => result,
                };
                finish(conn, result).await
            }
            result => finish(conn, result).await,
        }
    }
}

/// Release the connection, then hand back the operation's result
async fn finish<T>(conn: RoutedConnection, result: OrmResult<T>) -> OrmResult<T> {
    match result {
        Ok(value) => {
            conn.release().await?;
            Ok(value)
        }
        Err(e) => {
            release_quietly(conn).await;
            Err(e)
        }
    }
}

async fn release_quietly(conn: RoutedConnection) {
    if let Err(e) = conn.release().await {
        tracing::warn!("Failed to release connection: {}", e);
    }
}

/// A transaction checked out through the router
///
/// Statements run on it directly, so everything inside the scope sees the
/// same pool. Dropping an unfinished scope rolls it back.
pub struct TransactionScope {
    tx: Option<Box<dyn DatabaseTransaction>>,
    role: PoolRole,
    registry: Arc<EntityRegistry>,
}

impl TransactionScope {
    pub fn role(&self) -> PoolRole {
        self.role
    }

    pub fn registry(&self) -> Arc<EntityRegistry> {
        self.registry.clone()
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    /// Related rows of `parent` as seen inside the transaction
    pub async fn load<R: FromRow>(
        &mut self,
        relationship: &dyn Relationship,
        parent: &dyn Entity,
    ) -> OrmResult<Vec<R>> {
        let registry = self.registry.clone();
        let rows = relationship.load_records(&registry, parent, self).await?;
        rows.iter().map(R::from_row).collect()
    }

    fn inner(&mut self) -> OrmResult<&mut Box<dyn DatabaseTransaction>> {
        self.tx
            .as_mut()
            .ok_or_else(|| OrmError::Transaction("Transaction has already been consumed".to_string()))
    }

    pub async fn commit(mut self) -> OrmResult<()> {
        match self.tx.take() {
            Some(tx) => {
                tracing::debug!("Committing transaction");
                tx.commit().await?;
                tracing::debug!("Transaction committed successfully");
                Ok(())
            }
            None => Err(OrmError::Transaction(
                "Transaction has already been consumed".to_string(),
            )),
        }
    }

    pub async fn rollback(mut self) -> OrmResult<()> {
        match self.tx.take() {
            Some(tx) => {
                tracing::debug!("Rolling back transaction");
                tx.rollback().await?;
                tracing::debug!("Transaction rolled back successfully");
                Ok(())
            }
            None => Err(OrmError::Transaction(
                "Transaction has already been consumed".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("role", &self.role)
            .field("active", &self.tx.is_some())
            .finish()
    }
}

#[async_trait]
impl StatementExecutor for TransactionScope {
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64> {
        self.inner()?.execute(statement).await
    }

    async fn fetch_all(&mut self, statement: &Statement) -> OrmResult<Vec<Record>> {
        self.inner()?.fetch_all(statement).await
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            tracing::warn!("Transaction scope dropped without commit or rollback; rolling back");
        }
    }
}
