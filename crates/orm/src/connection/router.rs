//! Read/Write Connection Router
//!
//! Decides per operation whether the write (primary) or read (replica) pool
//! serves it, then checks out a connection with the fallback and retry rules:
//!
//! - split disabled: everything goes to the write pool
//! - inside a transaction (when transactions force writes), `force_write`, or
//!   a write hint: write pool
//! - read hint: read pool while it is routable, otherwise the write pool
//!
//! A read checkout that fails with a connection error falls back to the write
//! pool once. Write checkouts are retried up to `max_retries` times. The
//! decision itself reads health with one atomic load and never probes.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::health::{HealthMonitorConfig, HealthStatus, HealthTransition};
use super::monitor::HealthMonitor;
use super::pool::{ManagedPool, PoolReport};
use super::PoolRole;
use crate::backends::{
    redact_url, DatabaseBackendRegistry, DatabaseConnection, DatabaseTransaction, Record,
    StatementExecutor,
};
use crate::config::DatabaseConfig;
use crate::error::{OrmError, OrmResult};
use crate::query::Statement;

/// Where read-hinted operations go when the split is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPreference {
    /// Replica while routable, primary otherwise
    #[default]
    Replica,
    /// Always the primary
    Primary,
}

impl std::str::FromStr for ReadPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replica" | "read" => Ok(ReadPreference::Replica),
            "primary" | "write" => Ok(ReadPreference::Primary),
            other => Err(format!("unknown read preference '{}'", other)),
        }
    }
}

/// Router behaviour switches
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    pub split_enabled: bool,
    pub read_preference: ReadPreference,
    pub transaction_forces_write: bool,
    pub retry_writes: bool,
    pub max_retries: u32,
    /// Base delay between write retries, multiplied by the attempt number
    pub retry_backoff: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            split_enabled: false,
            read_preference: ReadPreference::Replica,
            transaction_forces_write: true,
            retry_writes: true,
            max_retries: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Shape of the operation being routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteHint {
    Read,
    Write,
}

/// Per-call routing state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteContext {
    pub in_transaction: bool,
    pub force_write: bool,
}

impl RouteContext {
    pub fn transaction() -> Self {
        Self {
            in_transaction: true,
            force_write: false,
        }
    }

    pub fn forced_write() -> Self {
        Self {
            in_transaction: false,
            force_write: true,
        }
    }
}

/// Pool chosen for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    pub role: PoolRole,
    /// A read was downgraded to the write pool because the replica is unhealthy
    pub fell_back: bool,
}

/// Routing counters
#[derive(Debug, Default)]
pub struct RouterMetrics {
    reads_routed: AtomicU64,
    writes_routed: AtomicU64,
    fallbacks: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

impl RouterMetrics {
    fn record(&self, decision: RouteDecision) {
        match decision.role {
            PoolRole::Read => self.reads_routed.fetch_add(1, Ordering::Relaxed),
            PoolRole::Write => self.writes_routed.fetch_add(1, Ordering::Relaxed),
        };
        if decision.fell_back {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> RouterMetricsSnapshot {
        RouterMetricsSnapshot {
            reads_routed: self.reads_routed.load(Ordering::Relaxed),
            writes_routed: self.writes_routed.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterMetricsSnapshot {
    /// Decisions that picked the read pool
    pub reads_routed: u64,
    /// Decisions that picked the write pool
    pub writes_routed: u64,
    /// Reads served by the write pool because the replica was unusable
    pub fallbacks: u64,
    pub retries: u64,
    /// Operations that ended in `ConnectionUnavailable`
    pub failures: u64,
}

/// Introspection report for operational tooling
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub split_enabled: bool,
    pub read_preference: ReadPreference,
    /// Healthy only when every pool is
    pub overall: HealthStatus,
    pub pools: Vec<PoolReport>,
    pub metrics: RouterMetricsSnapshot,
}

/// Routes operations between a write pool and an optional read pool
pub struct ConnectionRouter {
    config: RouterConfig,
    health_config: HealthMonitorConfig,
    write: Arc<ManagedPool>,
    read: Option<Arc<ManagedPool>>,
    metrics: RouterMetrics,
    monitor: Mutex<Option<HealthMonitor>>,
}

impl std::fmt::Debug for ConnectionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRouter")
            .field("config", &self.config)
            .field("write", &self.write)
            .field("read", &self.read)
            .finish()
    }
}

impl ConnectionRouter {
    /// Router over already-built pools
    ///
    /// A read pool passed while the split is disabled is ignored.
    pub fn new(
        write: ManagedPool,
        read: Option<ManagedPool>,
        config: RouterConfig,
        health_config: HealthMonitorConfig,
    ) -> Self {
        let read = match read {
            Some(pool) if config.split_enabled => Some(Arc::new(pool)),
            Some(pool) => {
                tracing::info!("Read/write split disabled; ignoring read pool {}", pool.label());
                None
            }
            None => None,
        };

        tracing::info!(
            "Connection router initialized (split: {}, write: {}, read: {})",
            config.split_enabled,
            write.label(),
            read.as_ref().map(|p| p.label()).unwrap_or("none")
        );

        Self {
            config,
            health_config,
            write: Arc::new(write),
            read,
            metrics: RouterMetrics::default(),
            monitor: Mutex::new(None),
        }
    }

    /// Build pools from the configured URLs using the default backends
    pub async fn connect(config: &DatabaseConfig) -> OrmResult<Self> {
        Self::connect_with(&DatabaseBackendRegistry::with_defaults(), config).await
    }

    pub async fn connect_with(
        backends: &DatabaseBackendRegistry,
        config: &DatabaseConfig,
    ) -> OrmResult<Self> {
        config.validate()?;

        let write_pool = backends
            .create_pool(&config.write_url, config.pool.clone())
            .await?;
        let write = ManagedPool::new(PoolRole::Write, redact_url(&config.write_url), write_pool);

        let read = match (&config.read_url, config.router.split_enabled) {
            (Some(url), true) => {
                let read_pool = backends.create_pool(url, config.pool.clone()).await?;
                Some(ManagedPool::new(PoolRole::Read, redact_url(url), read_pool))
            }
            _ => None,
        };

        Ok(Self::new(
            write,
            read,
            config.router.clone(),
            config.health.clone(),
        ))
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn health_config(&self) -> &HealthMonitorConfig {
        &self.health_config
    }

    pub fn write_pool(&self) -> &ManagedPool {
        &self.write
    }

    pub fn read_pool(&self) -> Option<&ManagedPool> {
        self.read.as_deref()
    }

    pub fn metrics(&self) -> RouterMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Pick a pool; O(1), touches nothing but the metrics counters
    pub fn route(&self, hint: RouteHint, ctx: RouteContext) -> RouteDecision {
        let decision = self.decide(hint, ctx);
        self.metrics.record(decision);
        if decision.fell_back {
            tracing::warn!("Read pool unhealthy; routing read to the write pool");
        }
        decision
    }

    fn decide(&self, hint: RouteHint, ctx: RouteContext) -> RouteDecision {
        let write = RouteDecision {
            role: PoolRole::Write,
            fell_back: false,
        };

        if !self.config.split_enabled {
            return write;
        }
        if ctx.in_transaction && self.config.transaction_forces_write {
            return write;
        }
        if ctx.force_write || hint == RouteHint::Write {
            return write;
        }
        if self.config.read_preference == ReadPreference::Primary {
            return write;
        }

        match &self.read {
            Some(read) if read.status().is_routable() => RouteDecision {
                role: PoolRole::Read,
                fell_back: false,
            },
            Some(_) => RouteDecision {
                role: PoolRole::Write,
                fell_back: true,
            },
            None => write,
        }
    }

    fn pool(&self, role: PoolRole) -> &Arc<ManagedPool> {
        match (role, &self.read) {
            (PoolRole::Read, Some(read)) => read,
            _ => &self.write,
        }
    }

    /// Check out a connection for one operation
    pub async fn acquire(&self, hint: RouteHint, ctx: RouteContext) -> OrmResult<RoutedConnection> {
        let (conn, decision) = self
            .checkout(hint, ctx, |pool| async move { pool.acquire().await })
            .await?;
        Ok(RoutedConnection {
            conn,
            role: decision.role,
            fell_back: decision.fell_back,
        })
    }

    /// Begin a transaction; routed as an in-transaction operation
    pub async fn begin_transaction(
        &self,
        hint: RouteHint,
    ) -> OrmResult<(Box<dyn DatabaseTransaction>, PoolRole)> {
        let (tx, decision) = self
            .checkout(hint, RouteContext::transaction(), |pool| async move {
                pool.begin_transaction().await
            })
            .await?;
        Ok((tx, decision.role))
    }

    async fn checkout<T, F, Fut>(
        &self,
        hint: RouteHint,
        ctx: RouteContext,
        open: F,
    ) -> OrmResult<(T, RouteDecision)>
    where
        F: Fn(Arc<ManagedPool>) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        let decision = self.route(hint, ctx);

        if decision.role == PoolRole::Read {
            match open(self.pool(PoolRole::Read).clone()).await {
                Ok(value) => return Ok((value, decision)),
                Err(e) if e.is_connection_error() => {
                    tracing::warn!("Read connection failed ({}); falling back to the write pool", e);
                    self.metrics.fallbacks.fetch_add(1, Ordering::Relaxed);
                    let fallback = RouteDecision {
                        role: PoolRole::Write,
                        fell_back: true,
                    };
                    return match open(self.write.clone()).await {
                        Ok(value) => Ok((value, fallback)),
                        Err(e) => Err(self.unavailable(PoolRole::Read, e)),
                    };
                }
                Err(e) => return Err(e),
            }
        }

        let attempts = if self.config.retry_writes {
            self.config.max_retries + 1
        } else {
            1
        };

        let mut last_error = None;
        for attempt in 1..=attempts {
            match open(self.write.clone()).await {
                Ok(value) => return Ok((value, decision)),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "Write connection attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    last_error = Some(e);
                }
                Err(e) if e.is_retryable() => {
                    last_error = Some(e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let error = last_error
            .unwrap_or_else(|| OrmError::Connection("no connection attempt was made".to_string()));
        Err(self.unavailable(PoolRole::Write, error))
    }

    /// Count a failure and wrap `cause` as the end of the fallback chain
    pub(crate) fn unavailable(&self, role: PoolRole, cause: OrmError) -> OrmError {
        self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!("No {} connection available: {}", role, cause);
        OrmError::ConnectionUnavailable {
            role,
            reason: cause.to_string(),
        }
    }

    /// Probe every pool once now, outside the background loop
    pub async fn probe_all(&self) -> Vec<(PoolRole, HealthTransition)> {
        let mut transitions = vec![(PoolRole::Write, self.write.probe(&self.health_config).await)];
        if let Some(read) = &self.read {
            transitions.push((PoolRole::Read, read.probe(&self.health_config).await));
        }
        transitions
    }

    /// Spawn the probe loops; a second call while they run does nothing.
    /// Must be called from within a tokio runtime.
    pub fn start_health_monitoring(&self) -> OrmResult<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(OrmError::Configuration(
                "health monitoring needs a running tokio runtime".to_string(),
            ));
        }
        let mut monitor = self
            .monitor
            .lock()
            .map_err(|_| OrmError::Configuration("health monitor state poisoned".to_string()))?;
        if monitor.is_some() {
            return Ok(());
        }

        let mut pools = vec![self.write.clone()];
        pools.extend(self.read.iter().cloned());
        *monitor = Some(HealthMonitor::start(pools, self.health_config.clone()));
        tracing::info!(
            "Health monitoring started (interval: {:?})",
            self.health_config.check_interval
        );
        Ok(())
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .map(|m| m.is_some())
            .unwrap_or(false)
    }

    /// Per-pool health and routing counters
    pub fn status(&self) -> RouterStatus {
        let mut pools = vec![self.write.report()];
        pools.extend(self.read.iter().map(|p| p.report()));

        let overall = pools
            .iter()
            .map(|p| p.health.status)
            .max_by_key(|status| severity(*status))
            .unwrap_or(HealthStatus::Unknown);

        RouterStatus {
            split_enabled: self.config.split_enabled,
            read_preference: self.config.read_preference,
            overall,
            pools,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Stop probing and close every pool
    pub async fn shutdown(&self) -> OrmResult<()> {
        let monitor = match self.monitor.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }

        if let Some(read) = &self.read {
            read.close().await?;
        }
        self.write.close().await?;
        tracing::info!("Connection router shut down");
        Ok(())
    }
}

fn severity(status: HealthStatus) -> u8 {
    match status {
        HealthStatus::Healthy => 0,
        HealthStatus::Unknown => 1,
        HealthStatus::Degraded => 2,
        HealthStatus::Unhealthy => 3,
    }
}

/// A pooled connection tagged with the pool that produced it
pub struct RoutedConnection {
    conn: Box<dyn DatabaseConnection>,
    role: PoolRole,
    fell_back: bool,
}

impl RoutedConnection {
    pub fn role(&self) -> PoolRole {
        self.role
    }

    /// True when a read was served by the write pool
    pub fn fell_back(&self) -> bool {
        self.fell_back
    }

    /// Return the connection to its pool
    pub async fn release(mut self) -> OrmResult<()> {
        self.conn.close().await
    }
}

impl std::fmt::Debug for RoutedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedConnection")
            .field("role", &self.role)
            .field("fell_back", &self.fell_back)
            .finish()
    }
}

#[async_trait]
impl StatementExecutor for RoutedConnection {
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64> {
        self.conn.execute(statement).await
    }

    async fn fetch_all(&mut self, statement: &Statement) -> OrmResult<Vec<Record>> {
        self.conn.fetch_all(statement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryDatabase, InMemoryPool};

    struct Fixture {
        primary: Arc<InMemoryPool>,
        replica: Arc<InMemoryPool>,
        router: ConnectionRouter,
    }

    fn fixture(config: RouterConfig) -> Fixture {
        let primary = Arc::new(InMemoryPool::new("primary", InMemoryDatabase::new()));
        let replica = Arc::new(InMemoryPool::new("replica", InMemoryDatabase::new()));
        let router = ConnectionRouter::new(
            ManagedPool::new(PoolRole::Write, "memory://primary", primary.clone()),
            Some(ManagedPool::new(PoolRole::Read, "memory://replica", replica.clone())),
            config,
            HealthMonitorConfig {
                probe_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        Fixture {
            primary,
            replica,
            router,
        }
    }

    fn split() -> RouterConfig {
        RouterConfig {
            split_enabled: true,
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_split_disabled_routes_everything_to_write() {
        let f = fixture(RouterConfig::default());
        assert!(f.router.read_pool().is_none());
        for hint in [RouteHint::Read, RouteHint::Write] {
            let decision = f.router.route(hint, RouteContext::default());
            assert_eq!(decision.role, PoolRole::Write);
            assert!(!decision.fell_back);
        }
    }

    #[test]
    fn test_read_hint_uses_replica() {
        let f = fixture(split());
        assert_eq!(f.router.route(RouteHint::Read, RouteContext::default()).role, PoolRole::Read);
        assert_eq!(f.router.route(RouteHint::Write, RouteContext::default()).role, PoolRole::Write);
        assert_eq!(f.router.route(RouteHint::Read, RouteContext::forced_write()).role, PoolRole::Write);
    }

    #[test]
    fn test_transaction_forces_write_unless_disabled() {
        let f = fixture(split());
        assert_eq!(f.router.route(RouteHint::Read, RouteContext::transaction()).role, PoolRole::Write);

        let f = fixture(RouterConfig {
            transaction_forces_write: false,
            ..split()
        });
        assert_eq!(f.router.route(RouteHint::Read, RouteContext::transaction()).role, PoolRole::Read);
    }

    #[test]
    fn test_primary_preference_keeps_reads_on_write() {
        let f = fixture(RouterConfig {
            read_preference: ReadPreference::Primary,
            ..split()
        });
        assert_eq!(f.router.route(RouteHint::Read, RouteContext::default()).role, PoolRole::Write);
    }

    #[tokio::test]
    async fn test_unhealthy_replica_downgrades_reads() {
        let f = fixture(split());
        f.replica.set_available(false);
        for _ in 0..3 {
            f.router.probe_all().await;
        }
        assert_eq!(f.router.read_pool().unwrap().status(), HealthStatus::Unhealthy);

        let decision = f.router.route(RouteHint::Read, RouteContext::default());
        assert_eq!(decision.role, PoolRole::Write);
        assert!(decision.fell_back);
        assert_eq!(f.router.metrics().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_read_acquire_failure_falls_back_once() {
        let f = fixture(split());
        f.replica.set_available(false);

        let conn = f.router.acquire(RouteHint::Read, RouteContext::default()).await.unwrap();
        assert_eq!(conn.role(), PoolRole::Write);
        assert!(conn.fell_back());
        conn.release().await.unwrap();

        f.primary.set_available(false);
        let err = f
            .router
            .acquire(RouteHint::Read, RouteContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::ConnectionUnavailable { role: PoolRole::Read, .. }));
    }

    #[tokio::test]
    async fn test_write_retries_then_fails() {
        let f = fixture(split());
        f.primary.set_available(false);

        let err = f
            .router
            .acquire(RouteHint::Write, RouteContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::ConnectionUnavailable { role: PoolRole::Write, .. }));

        let metrics = f.router.metrics();
        assert_eq!(metrics.retries, 3);
        assert_eq!(metrics.failures, 1);
        assert_eq!(f.router.write_pool().acquire_errors(), 4);
    }

    #[tokio::test]
    async fn test_write_without_retries_fails_fast() {
        let f = fixture(RouterConfig {
            retry_writes: false,
            ..split()
        });
        f.primary.set_available(false);
        assert!(f.router.acquire(RouteHint::Write, RouteContext::default()).await.is_err());
        assert_eq!(f.router.write_pool().acquire_errors(), 1);
        assert_eq!(f.router.metrics().retries, 0);
    }

    #[tokio::test]
    async fn test_status_reports_each_pool() {
        let f = fixture(split());
        f.replica.set_available(false);
        for _ in 0..3 {
            f.router.probe_all().await;
        }

        let status = f.router.status();
        assert!(status.split_enabled);
        assert_eq!(status.overall, HealthStatus::Unhealthy);
        assert_eq!(status.pools.len(), 2);

        let replica = status.pools.iter().find(|p| p.role == PoolRole::Read).unwrap();
        assert_eq!(replica.health.status, HealthStatus::Unhealthy);
        assert_eq!(replica.health.consecutive_failures, 3);
        assert!(replica.health.last_check.is_some());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["pools"][1]["role"], "read");
        assert_eq!(json["overall"], "unhealthy");
    }

    #[tokio::test]
    async fn test_monitoring_starts_once_and_stops_on_shutdown() {
        let f = fixture(split());
        f.router.start_health_monitoring().unwrap();
        f.router.start_health_monitoring().unwrap();
        assert!(f.router.is_monitoring());

        f.router.shutdown().await.unwrap();
        assert!(!f.router.is_monitoring());
        assert!(f.router.acquire(RouteHint::Write, RouteContext::default()).await.is_err());
    }

    #[test]
    fn test_monitoring_outside_a_runtime_is_an_error() {
        let f = fixture(split());
        let err = f.router.start_health_monitoring().unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
        assert!(!f.router.is_monitoring());
    }

    #[test]
    fn test_read_preference_parsing() {
        assert_eq!("replica".parse::<ReadPreference>().unwrap(), ReadPreference::Replica);
        assert_eq!("PRIMARY".parse::<ReadPreference>().unwrap(), ReadPreference::Primary);
        assert!("nearest".parse::<ReadPreference>().is_err());
    }
}
