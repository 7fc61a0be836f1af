//! Error types for the relationship and routing core
//!
//! Every failure a caller can observe is one of the `OrmError` variants below.
//! Resolution and injection-risk errors are raised before any statement is
//! sent; connection errors are raised only after the router's fallback chain
//! has been exhausted.

use crate::connection::PoolRole;

/// Result type alias for ORM operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for ORM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrmError {
    /// A relationship target name was never registered
    #[error("Cannot resolve entity '{name}': no entity with that name is registered")]
    Resolution { name: String },

    /// An identifier failed validation before being embedded in a statement
    #[error("Identifier '{identifier}' rejected: {reason}")]
    InjectionRisk { identifier: String, reason: String },

    /// No pool of the requested role could produce a connection
    #[error("No {role} connection available: {reason}")]
    ConnectionUnavailable { role: PoolRole, reason: String },

    /// An entity was registered twice under the same name
    #[error("Entity '{0}' is already registered")]
    DuplicateEntity(String),

    /// Invalid declaration or router configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Statement execution failed
    #[error("Database error: {0}")]
    Database(String),

    /// A unique constraint rejected the write
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Connection-level failure (acquire, I/O, closed pool)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction begin/commit/rollback failed
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Value conversion failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A key attribute needed for the operation has no value
    #[error("Attribute '{attribute}' has no value")]
    MissingKey { attribute: String },

    /// Column missing from a result row
    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    /// The backend cannot execute this statement shape
    #[error("Unsupported statement: {0}")]
    UnsupportedStatement(String),
}

impl OrmError {
    /// Build an injection-risk error for the given identifier
    pub fn injection_risk(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        OrmError::InjectionRisk {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// True for failures of the connection itself rather than of the statement
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            OrmError::Connection(_) | OrmError::ConnectionUnavailable { .. }
        )
    }

    /// True when the database rejected a duplicate key
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, OrmError::UniqueViolation(_))
    }

    /// Resolution and injection errors are deterministic and must never be retried
    pub fn is_retryable(&self) -> bool {
        self.is_connection_error()
    }
}

impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some("23505") {
                    OrmError::UniqueViolation(db_err.message().to_string())
                } else {
                    OrmError::Database(db_err.message().to_string())
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => OrmError::Connection(err.to_string()),
            sqlx::Error::ColumnNotFound(column) => OrmError::ColumnNotFound(column.clone()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                OrmError::Serialization(err.to_string())
            }
            _ => OrmError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Serialization(err.to_string())
    }
}

/// Database connection pool error types
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Connection acquisition failed: {0}")]
    AcquisitionFailed(String),

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    #[error("Health check failed: {reason}")]
    HealthCheckFailed { reason: String },
}

impl From<PoolError> for OrmError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::AcquisitionFailed(msg) => {
                OrmError::Connection(format!("Database connection failed: {}", msg))
            }
            PoolError::PoolClosed => OrmError::Connection("Database pool is closed".to_string()),
            PoolError::ConnectionTimeout { timeout_ms } => {
                OrmError::Connection(format!("Database connection timeout after {}ms", timeout_ms))
            }
            PoolError::HealthCheckFailed { reason } => {
                OrmError::Connection(format!("Database health check failed: {}", reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_retryable() {
        assert!(OrmError::Connection("reset".to_string()).is_retryable());
        assert!(OrmError::ConnectionUnavailable {
            role: PoolRole::Read,
            reason: "down".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_eager_errors_are_not_retryable() {
        assert!(!OrmError::Resolution { name: "Tag".to_string() }.is_retryable());
        assert!(!OrmError::injection_risk("a;b", "invalid character").is_retryable());
        assert!(!OrmError::UniqueViolation("dup".to_string()).is_retryable());
    }

    #[test]
    fn test_pool_error_maps_to_connection_error() {
        let err: OrmError = PoolError::PoolClosed.into();
        assert!(err.is_connection_error());
        assert_eq!(err.to_string(), "Connection error: Database pool is closed");

        let err: OrmError = PoolError::ConnectionTimeout { timeout_ms: 250 }.into();
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_error_messages_name_the_violated_invariant() {
        let err = OrmError::Resolution { name: "Tag".to_string() };
        assert!(err.to_string().contains("'Tag'"));

        let err = OrmError::ConnectionUnavailable {
            role: PoolRole::Write,
            reason: "retries exhausted".to_string(),
        };
        assert_eq!(err.to_string(), "No write connection available: retries exhausted");
    }
}
