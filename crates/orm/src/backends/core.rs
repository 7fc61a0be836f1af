//! Core Database Backend Traits
//!
//! Backends receive structured [`Statement`]s rather than SQL text, render
//! them in their own dialect and bind every value as a parameter. Rows come
//! back as [`Record`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::{OrmError, OrmResult};
use crate::query::Statement;

/// Something that can run structured statements: a pooled connection or an
/// open transaction.
#[async_trait]
pub trait StatementExecutor: Send {
    /// Execute a statement and return the affected row count
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64>;

    /// Execute a statement and return all result rows
    async fn fetch_all(&mut self, statement: &Statement) -> OrmResult<Vec<Record>>;

    /// Execute a statement and return the first result row
    async fn fetch_optional(&mut self, statement: &Statement) -> OrmResult<Option<Record>> {
        Ok(self.fetch_all(statement).await?.into_iter().next())
    }
}

/// Abstract database connection checked out of a pool
#[async_trait]
pub trait DatabaseConnection: StatementExecutor {
    /// Release the connection; it must not be used afterwards
    async fn close(&mut self) -> OrmResult<()>;
}

/// Abstract database transaction
#[async_trait]
pub trait DatabaseTransaction: StatementExecutor {
    async fn commit(self: Box<Self>) -> OrmResult<()>;

    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

#[async_trait]
impl StatementExecutor for Box<dyn DatabaseConnection> {
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64> {
        (**self).execute(statement).await
    }

    async fn fetch_all(&mut self, statement: &Statement) -> OrmResult<Vec<Record>> {
        (**self).fetch_all(statement).await
    }
}

#[async_trait]
impl StatementExecutor for Box<dyn DatabaseTransaction> {
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64> {
        (**self).execute(statement).await
    }

    async fn fetch_all(&mut self, statement: &Statement) -> OrmResult<Vec<Record>> {
        (**self).fetch_all(statement).await
    }
}

/// Abstract database connection pool
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Acquire a connection from the pool
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>>;

    /// Begin a transaction on a fresh connection
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>>;

    /// Close the pool
    async fn close(&self) -> OrmResult<()>;

    /// Get pool statistics
    fn stats(&self) -> DatabasePoolStats;

    /// Run a trivial round trip and report how long it took
    async fn health_check(&self) -> OrmResult<Duration>;
}

/// Database pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DatabasePoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Integer view regardless of width
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(*i as i64),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// SQL-style equality: integers compare across widths and NULL equals nothing
    pub fn sql_eq(&self, other: &DatabaseValue) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(
                b.iter()
                    .map(|&x| JsonValue::Number(serde_json::Number::from(x)))
                    .collect(),
            ),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// One result row: ordered column names with their values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append
    pub fn with(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column, replacing an existing value of the same name
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter().position(|c| *c == column) {
            Some(index) => self.values[index] = value,
            None => {
                self.columns.push(column);
                self.values.push(value);
            }
        }
    }

    pub fn get_value(&self, column: &str) -> Option<&DatabaseValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|index| &self.values[index])
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DatabaseValue)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Get a typed value from a column
    pub fn get<T>(&self, column: &str) -> OrmResult<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let value = self
            .get_value(column)
            .ok_or_else(|| OrmError::ColumnNotFound(column.to_string()))?;
        serde_json::from_value(value.to_json()).map_err(|e| {
            OrmError::Serialization(format!("Failed to deserialize column '{}': {}", column, e))
        })
    }

    /// Convert row to JSON object
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .iter()
            .map(|(column, value)| (column.to_string(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        JsonValue::Object(map)
    }

    /// Deserialize the whole row into `T`
    pub fn deserialize<T>(&self) -> OrmResult<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        Ok(serde_json::from_value(self.to_json())?)
    }

    pub fn to_map(&self) -> HashMap<String, DatabaseValue> {
        self.iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => '"',
            SqlDialect::MySQL => '`',
        }
    }

    pub fn supports_returning(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL | SqlDialect::SQLite)
    }
}

/// Database backend trait that provides database-specific implementations
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Create a connection pool from a database URL
    async fn create_pool(
        &self,
        database_url: &str,
        config: DatabasePoolConfig,
    ) -> OrmResult<Arc<dyn DatabasePool>>;

    /// Get the backend type
    fn backend_type(&self) -> crate::backends::DatabaseBackendType;

    /// Validate a database URL for this backend
    fn validate_database_url(&self, url: &str) -> OrmResult<()>;
}

/// Database pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600),
            max_lifetime_seconds: Some(1800),
            test_before_acquire: true,
        }
    }
}

/// Database backend registry for managing multiple backend implementations
pub struct DatabaseBackendRegistry {
    backends: HashMap<crate::backends::DatabaseBackendType, Arc<dyn DatabaseBackend>>,
}

impl DatabaseBackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Registry with the PostgreSQL and in-memory backends installed
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::backends::PostgresBackend::new()));
        registry.register(Arc::new(crate::backends::memory::InMemoryBackend::new()));
        registry
    }

    /// Register a database backend under its own type
    pub fn register(&mut self, backend: Arc<dyn DatabaseBackend>) {
        self.backends.insert(backend.backend_type(), backend);
    }

    pub fn get(
        &self,
        backend_type: &crate::backends::DatabaseBackendType,
    ) -> Option<Arc<dyn DatabaseBackend>> {
        self.backends.get(backend_type).cloned()
    }

    /// Create a connection pool using the backend matching the URL scheme
    pub async fn create_pool(
        &self,
        database_url: &str,
        config: DatabasePoolConfig,
    ) -> OrmResult<Arc<dyn DatabasePool>> {
        let backend_type = crate::backends::DatabaseBackendType::from_url(database_url)?;
        let backend = self.get(&backend_type).ok_or_else(|| {
            OrmError::Configuration(format!("No backend registered for {}", backend_type))
        })?;

        backend.validate_database_url(database_url)?;
        backend.create_pool(database_url, config).await
    }

    pub fn registered_backends(&self) -> Vec<crate::backends::DatabaseBackendType> {
        self.backends.keys().cloned().collect()
    }
}

impl Default for DatabaseBackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_eq_compares_integers_across_widths() {
        assert!(DatabaseValue::Int32(10).sql_eq(&DatabaseValue::Int64(10)));
        assert!(!DatabaseValue::Int32(10).sql_eq(&DatabaseValue::Int64(11)));
        assert!(DatabaseValue::from("a").sql_eq(&DatabaseValue::from("a")));
        assert!(!DatabaseValue::Null.sql_eq(&DatabaseValue::Null));
    }

    #[test]
    fn test_record_set_replaces_existing_column() {
        let mut record = Record::new().with("id", 1).with("title", "draft");
        record.set("title", "final");

        assert_eq!(record.len(), 2);
        assert_eq!(record.get::<String>("title").unwrap(), "final");
        assert_eq!(record.get::<i64>("id").unwrap(), 1);
    }

    #[test]
    fn test_record_missing_column() {
        let record = Record::new().with("id", 1);
        assert!(matches!(
            record.get::<i64>("missing"),
            Err(OrmError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_record_deserialize() {
        #[derive(serde::Deserialize)]
        struct Tag {
            id: i64,
            name: String,
        }

        let tag: Tag = Record::new()
            .with("id", 10)
            .with("name", "rust")
            .deserialize()
            .unwrap();
        assert_eq!(tag.id, 10);
        assert_eq!(tag.name, "rust");
    }

    #[test]
    fn test_dialect_placeholders() {
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(0), "$1");
        assert_eq!(SqlDialect::MySQL.parameter_placeholder(3), "?");
        assert_eq!(SqlDialect::MySQL.identifier_quote(), '`');
        assert!(!SqlDialect::MySQL.supports_returning());
    }
}
