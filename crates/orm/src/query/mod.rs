//! Structured statements
//!
//! Relationship loads and pivot mutations are expressed as [`Statement`]
//! values and rendered per dialect by the backend that runs them.

pub mod builder;
pub mod sql_generation;
pub mod types;

pub use types::{
    ColumnRef, Condition, DeleteStatement, InsertStatement, JoinClause, JoinType, OnConflict,
    Projection, QueryOperator, SelectStatement, Statement, UpdateStatement,
};
