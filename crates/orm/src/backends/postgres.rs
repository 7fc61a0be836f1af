//! PostgreSQL Backend Implementation
//!
//! Renders statements with `$n` placeholders and runs them through sqlx.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgConnection, PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres};

use super::core::*;
use crate::error::{OrmError, OrmResult};
use crate::query::Statement;
use crate::security::validate_parameter;

/// PostgreSQL database backend implementation
#[derive(Debug)]
pub struct PostgresBackend;

impl PostgresBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PostgresBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    async fn create_pool(
        &self,
        database_url: &str,
        config: DatabasePoolConfig,
    ) -> OrmResult<Arc<dyn DatabasePool>> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .test_before_acquire(config.test_before_acquire);

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        // Lazy so that an unreachable replica does not block router start-up;
        // the health monitor finds out soon enough.
        let sqlx_pool = options.connect_lazy(database_url).map_err(|e| {
            OrmError::Connection(format!("Failed to create PostgreSQL pool: {}", e))
        })?;

        Ok(Arc::new(PostgresPool::new(sqlx_pool)))
    }

    fn backend_type(&self) -> crate::backends::DatabaseBackendType {
        crate::backends::DatabaseBackendType::PostgreSQL
    }

    fn validate_database_url(&self, url: &str) -> OrmResult<()> {
        if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
            return Err(OrmError::Configuration(
                "Invalid PostgreSQL URL scheme".to_string(),
            ));
        }
        let parsed = url::Url::parse(url)
            .map_err(|e| OrmError::Configuration(format!("Invalid database URL: {}", e)))?;
        if parsed.host_str().is_none() {
            return Err(OrmError::Configuration(
                "Missing host in database URL".to_string(),
            ));
        }
        Ok(())
    }
}

/// PostgreSQL connection pool implementation
pub struct PostgresPool {
    pool: Pool<Postgres>,
}

impl PostgresPool {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| OrmError::Connection(format!("Failed to acquire connection: {}", e)))?;

        Ok(Box::new(PostgresConnection { conn: Some(conn) }))
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn stats(&self) -> DatabasePoolStats {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        DatabasePoolStats {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
        }
    }

    async fn health_check(&self) -> OrmResult<Duration> {
        let start = Instant::now();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| OrmError::Connection(format!("Health check failed: {}", e)))?;

        Ok(start.elapsed())
    }
}

/// PostgreSQL connection implementation
pub struct PostgresConnection {
    conn: Option<sqlx::pool::PoolConnection<Postgres>>,
}

impl PostgresConnection {
    fn inner(&mut self) -> OrmResult<&mut PgConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| OrmError::Connection("Connection already closed".to_string()))
    }
}

#[async_trait]
impl StatementExecutor for PostgresConnection {
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64> {
        execute_statement(self.inner()?, statement).await
    }

    async fn fetch_all(&mut self, statement: &Statement) -> OrmResult<Vec<Record>> {
        fetch_statement(self.inner()?, statement).await
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn close(&mut self) -> OrmResult<()> {
        // Dropping the pooled connection hands it back to sqlx
        self.conn.take();
        Ok(())
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn inner(&mut self) -> OrmResult<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl StatementExecutor for PostgresTransaction {
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64> {
        execute_statement(self.inner()?, statement).await
    }

    async fn fetch_all(&mut self, statement: &Statement) -> OrmResult<Vec<Record>> {
        fetch_statement(self.inner()?, statement).await
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;

        tx.commit()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;

        tx.rollback()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

async fn execute_statement(conn: &mut PgConnection, statement: &Statement) -> OrmResult<u64> {
    let (sql, params) = statement.to_sql(SqlDialect::PostgreSQL)?;
    tracing::debug!(sql = %sql, params = params.len(), "executing statement");

    let mut query = sqlx::query(&sql);
    for param in &params {
        query = bind_database_value(query, param)?;
    }

    let result = query.execute(conn).await?;
    Ok(result.rows_affected())
}

async fn fetch_statement(conn: &mut PgConnection, statement: &Statement) -> OrmResult<Vec<Record>> {
    let (sql, params) = statement.to_sql(SqlDialect::PostgreSQL)?;
    tracing::debug!(sql = %sql, params = params.len(), "fetching statement");

    let mut query = sqlx::query(&sql);
    for param in &params {
        query = bind_database_value(query, param)?;
    }

    let rows = query.fetch_all(conn).await?;
    rows.iter().map(row_to_record).collect()
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> OrmResult<sqlx::query::Query<'a, Postgres, PgArguments>> {
    match value {
        DatabaseValue::Null => Ok(query.bind(Option::<String>::None)),
        DatabaseValue::Bool(b) => Ok(query.bind(*b)),
        DatabaseValue::Int32(i) => Ok(query.bind(*i)),
        DatabaseValue::Int64(i) => Ok(query.bind(*i)),
        DatabaseValue::Float64(f) => Ok(query.bind(*f)),
        DatabaseValue::String(s) => {
            validate_parameter(s)?;
            Ok(query.bind(s.clone()))
        }
        DatabaseValue::Bytes(b) => Ok(query.bind(b.clone())),
        DatabaseValue::Uuid(u) => Ok(query.bind(*u)),
        DatabaseValue::DateTime(dt) => Ok(query.bind(*dt)),
        DatabaseValue::Json(j) => Ok(query.bind(j.clone())),
    }
}

fn row_to_record(row: &PgRow) -> OrmResult<Record> {
    use sqlx::{Column, Row};

    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        record.set(column.name(), postgres_value_to_database_value(row, index)?);
    }
    Ok(record)
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    use sqlx::{Column, Row, TypeInfo, ValueRef};

    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(row.try_get::<i16, _>(index)? as i32),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float64(row.try_get::<f32, _>(index)? as f64),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => DatabaseValue::String(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index)?),
        "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get(index)?;
            DatabaseValue::DateTime(naive.and_utc())
        }
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get::<JsonValue, _>(index)?),
        other => {
            let value: String = row.try_get(index).map_err(|e| {
                OrmError::Serialization(format!(
                    "Failed to read column of unsupported type '{}': {}",
                    other, e
                ))
            })?;
            DatabaseValue::String(value)
        }
    };
    Ok(value)
}
