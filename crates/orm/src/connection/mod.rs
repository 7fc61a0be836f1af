//! Connection Management
//!
//! Managed pools with health state, the background probe loop, and the
//! read/write router that picks a pool per operation.

pub mod health;
pub mod monitor;
pub mod pool;
pub mod router;

use serde::{Deserialize, Serialize};

pub use health::{HealthMonitorConfig, HealthSnapshot, HealthStatus, HealthTransition, PoolHealth};
pub use monitor::HealthMonitor;
pub use pool::{ManagedPool, PoolReport};
pub use router::{
    ConnectionRouter, ReadPreference, RouteContext, RouteDecision, RouteHint, RoutedConnection,
    RouterConfig, RouterMetrics, RouterMetricsSnapshot, RouterStatus,
};

/// Role a pool plays in routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolRole {
    /// Primary; takes every write and anything that must see them
    Write,
    /// Replica; serves read-hinted operations while routable
    Read,
}

impl std::fmt::Display for PoolRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolRole::Write => write!(f, "write"),
            PoolRole::Read => write!(f, "read"),
        }
    }
}
