//! Connection Pool Management
//!
//! [`ManagedPool`] wraps a backend pool with its routing role, acquisition
//! counters and the health cell its probe loop maintains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::health::{HealthMonitorConfig, HealthSnapshot, HealthStatus, HealthTransition, PoolHealth};
use super::PoolRole;
use crate::backends::{DatabaseConnection, DatabasePool, DatabasePoolStats, DatabaseTransaction};
use crate::error::{OrmResult, PoolError};

/// Managed connection pool wrapper with statistics and health monitoring
pub struct ManagedPool {
    role: PoolRole,
    label: String,
    pool: Arc<dyn DatabasePool>,
    health: PoolHealth,
    acquire_count: AtomicU64,
    acquire_errors: AtomicU64,
    created_at: Instant,
}

impl std::fmt::Debug for ManagedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedPool")
            .field("role", &self.role)
            .field("label", &self.label)
            .field("status", &self.health.status())
            .finish()
    }
}

impl ManagedPool {
    /// `label` is shown in logs and status reports; never pass a URL with credentials
    pub fn new(role: PoolRole, label: impl Into<String>, pool: Arc<dyn DatabasePool>) -> Self {
        Self {
            role,
            label: label.into(),
            pool,
            health: PoolHealth::new(),
            acquire_count: AtomicU64::new(0),
            acquire_errors: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn role(&self) -> PoolRole {
        self.role
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &dyn DatabasePool {
        &*self.pool
    }

    pub fn health(&self) -> &PoolHealth {
        &self.health
    }

    /// Current health with a single atomic read
    pub fn status(&self) -> HealthStatus {
        self.health.status()
    }

    /// Acquire a connection with statistics tracking
    pub async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>> {
        self.acquire_count.fetch_add(1, Ordering::Relaxed);

        match self.pool.acquire().await {
            Ok(conn) => {
                let stats = self.pool.stats();
                tracing::debug!(
                    "{} connection acquired from {} (total: {}, idle: {})",
                    self.role,
                    self.label,
                    stats.total_connections,
                    stats.idle_connections
                );
                Ok(conn)
            }
            Err(e) => {
                self.acquire_errors.fetch_add(1, Ordering::Relaxed);
                let pool_error = PoolError::AcquisitionFailed(e.to_string());
                tracing::error!("Failed to acquire {} connection from {}: {}", self.role, self.label, pool_error);
                Err(pool_error.into())
            }
        }
    }

    /// Begin a database transaction with statistics tracking
    pub async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        self.acquire_count.fetch_add(1, Ordering::Relaxed);

        match self.pool.begin_transaction().await {
            Ok(tx) => {
                tracing::debug!("Transaction started on {} pool {}", self.role, self.label);
                Ok(tx)
            }
            Err(e) => {
                self.acquire_errors.fetch_add(1, Ordering::Relaxed);
                let pool_error = PoolError::AcquisitionFailed(e.to_string());
                tracing::error!("Failed to begin transaction on {}: {}", self.label, pool_error);
                Err(pool_error.into())
            }
        }
    }

    /// Run one health probe and record its outcome
    ///
    /// Only the probe loop (or an explicit `probe_all`) calls this; routing
    /// never mutates health.
    pub async fn probe(&self, config: &HealthMonitorConfig) -> HealthTransition {
        let outcome = tokio::time::timeout(config.probe_timeout, self.pool.health_check()).await;

        let transition = match outcome {
            Ok(Ok(latency)) => self.health.record_success(latency, config),
            Ok(Err(e)) => {
                let reason = PoolError::HealthCheckFailed {
                    reason: e.to_string(),
                };
                self.health.record_failure(reason.to_string(), config)
            }
            Err(_) => {
                let reason = PoolError::ConnectionTimeout {
                    timeout_ms: config.probe_timeout.as_millis() as u64,
                };
                self.health.record_failure(reason.to_string(), config)
            }
        };

        self.log_transition(transition);
        transition
    }

    fn log_transition(&self, transition: HealthTransition) {
        if !transition.changed() {
            tracing::debug!("{} pool {} still {}", self.role, self.label, transition.current);
            return;
        }

        match transition.current {
            HealthStatus::Unhealthy => tracing::error!(
                "{} pool {} marked UNHEALTHY after {} consecutive failures",
                self.role,
                self.label,
                self.health.consecutive_failures()
            ),
            HealthStatus::Degraded => tracing::warn!(
                "{} pool {} degraded: {} -> {}",
                self.role,
                self.label,
                transition.previous,
                transition.current
            ),
            _ => tracing::info!(
                "{} pool {} is {} (was {})",
                self.role,
                self.label,
                transition.current,
                transition.previous
            ),
        }
    }

    pub fn stats(&self) -> DatabasePoolStats {
        self.pool.stats()
    }

    pub fn acquire_count(&self) -> u64 {
        self.acquire_count.load(Ordering::Relaxed)
    }

    pub fn acquire_errors(&self) -> u64 {
        self.acquire_errors.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Status row for operational tooling
    pub fn report(&self) -> PoolReport {
        let acquires = self.acquire_count();
        let errors = self.acquire_errors();
        PoolReport {
            role: self.role,
            label: self.label.clone(),
            health: self.health.snapshot(),
            pool: self.pool.stats(),
            total_acquires: acquires,
            total_errors: errors,
            error_rate: if acquires > 0 {
                (errors as f64 / acquires as f64) * 100.0
            } else {
                0.0
            },
            uptime_secs: self.uptime().as_secs(),
        }
    }

    /// Close the connection pool
    pub async fn close(&self) -> OrmResult<()> {
        self.pool.close().await?;
        tracing::info!("{} pool {} closed", self.role, self.label);
        Ok(())
    }
}

/// Per-pool status: role, health state, failure streak, last probe time
#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub role: PoolRole,
    pub label: String,
    pub health: HealthSnapshot,
    pub pool: DatabasePoolStats,
    pub total_acquires: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryDatabase, InMemoryPool};

    fn managed(role: PoolRole) -> (Arc<InMemoryPool>, ManagedPool) {
        let raw = Arc::new(InMemoryPool::new("test", InMemoryDatabase::new()));
        let managed = ManagedPool::new(role, "memory://test", raw.clone());
        (raw, managed)
    }

    #[tokio::test]
    async fn test_acquire_errors_are_counted() {
        let (raw, pool) = managed(PoolRole::Write);
        let mut conn = pool.acquire().await.unwrap();
        conn.close().await.unwrap();

        raw.set_available(false);
        assert!(matches!(pool.acquire().await, Err(e) if e.is_connection_error()));

        let report = pool.report();
        assert_eq!(report.total_acquires, 2);
        assert_eq!(report.total_errors, 1);
        assert_eq!(report.error_rate, 50.0);
    }

    #[tokio::test]
    async fn test_probe_records_failures_and_recovery() {
        let (raw, pool) = managed(PoolRole::Read);
        let config = HealthMonitorConfig::default();

        assert_eq!(pool.probe(&config).await.current, HealthStatus::Healthy);

        raw.set_available(false);
        for _ in 0..3 {
            pool.probe(&config).await;
        }
        assert_eq!(pool.status(), HealthStatus::Unhealthy);
        let report = pool.report();
        assert_eq!(report.health.consecutive_failures, 3);
        assert!(report.health.last_error.unwrap().contains("unreachable"));

        raw.set_available(true);
        let transition = pool.probe(&config).await;
        assert_eq!(transition.previous, HealthStatus::Unhealthy);
        assert_eq!(transition.current, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let (raw, pool) = managed(PoolRole::Read);
        let config = HealthMonitorConfig {
            probe_timeout: Duration::from_millis(10),
            failure_threshold: 1,
            ..Default::default()
        };

        raw.set_probe_latency(Duration::from_millis(200));
        let transition = pool.probe(&config).await;
        assert_eq!(transition.current, HealthStatus::Unhealthy);
        assert!(pool.report().health.last_error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_slow_probe_marks_degraded() {
        let (raw, pool) = managed(PoolRole::Read);
        let config = HealthMonitorConfig {
            degraded_threshold: Duration::from_millis(20),
            ..Default::default()
        };

        raw.set_probe_latency(Duration::from_millis(40));
        assert_eq!(pool.probe(&config).await.current, HealthStatus::Degraded);
        assert!(pool.status().is_routable());
    }
}
