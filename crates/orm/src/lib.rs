//! # elif-orm-core: relationships and connection routing for elif.rs
//!
//! The part of the ORM that sits between entity definitions and the
//! database:
//!
//! - an entity registry with lazy, name-based resolution so entities can
//!   reference each other before they are declared
//! - four relationship kinds, including many-to-many through a pivot table
//!   with `attach`/`detach`/`sync`/`toggle`
//! - a read/write connection router with per-pool health probing and
//!   fallback from replica to primary
//!
//! Every statement is built from validated [`Identifier`]s and bound values;
//! no caller-supplied string is ever spliced into SQL.

pub mod backends;
pub mod config;
pub mod connection;
pub mod context;
pub mod entity;
pub mod error;
pub mod query;
pub mod relationships;
pub mod security;

pub use backends::{
    DatabaseBackendRegistry, DatabaseConnection, DatabasePool, DatabasePoolConfig,
    DatabaseTransaction, DatabaseValue, Record, SqlDialect, StatementExecutor,
};
pub use config::{ConfigError, ConfigSource, DatabaseConfig};
pub use connection::{
    ConnectionRouter, HealthMonitorConfig, HealthStatus, ManagedPool, PoolRole, ReadPreference,
    RouteContext, RouteHint, RoutedConnection, RouterConfig, RouterStatus,
};
pub use context::{ExecutionContext, TransactionScope};
pub use entity::{Entity, EntityDescriptor, EntityRecord, EntityRef, EntityRegistry, FromRow, LazyEntity};
pub use error::{OrmError, OrmResult, PoolError};
pub use query::Statement;
pub use relationships::{
    pivot_table_name, ManyToMany, OwnedToMany, OwnedToOne, OwningToOne, PivotDescriptor,
    Relationship, RelationshipKind, SyncResult, ToggleResult,
};
pub use security::Identifier;
