//! Connection Pool Health Monitoring
//!
//! Each pool carries a [`PoolHealth`] cell mutated only by its probe loop.
//! Routing reads the current [`HealthStatus`] with a single atomic load, so a
//! decision may observe state a probe interval old.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health status of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Not probed yet
    Unknown,
    /// Probe succeeded under the latency threshold
    Healthy,
    /// Probe succeeded but slowly
    Degraded,
    /// Too many consecutive probe failures
    Unhealthy,
}

impl HealthStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Degraded,
            3 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            HealthStatus::Unknown => 0,
            HealthStatus::Healthy => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        }
    }

    /// Whether reads may still be routed to the pool
    pub fn is_routable(self) -> bool {
        self != HealthStatus::Unhealthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "UNKNOWN"),
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// Health monitoring configuration
#[derive(Debug, Clone, PartialEq)]
pub struct HealthMonitorConfig {
    /// How often to probe each pool
    pub check_interval: Duration,
    /// A probe that takes longer than this counts as a failure
    pub probe_timeout: Duration,
    /// Successful probes at or above this latency mark the pool Degraded
    pub degraded_threshold: Duration,
    /// Consecutive failures before the pool is marked Unhealthy
    pub failure_threshold: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            degraded_threshold: Duration::from_millis(1000),
            failure_threshold: 3,
        }
    }
}

/// Outcome of recording one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub previous: HealthStatus,
    pub current: HealthStatus,
}

impl HealthTransition {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Lock-free health cell for one pool
#[derive(Debug)]
pub struct PoolHealth {
    status: AtomicU8,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    last_check_millis: AtomicI64,
    last_latency_micros: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Default for PoolHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(HealthStatus::Unknown.as_u8()),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            last_check_millis: AtomicI64::new(0),
            last_latency_micros: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// A successful probe; recovery from Unhealthy takes exactly one
    pub fn record_success(&self, latency: Duration, config: &HealthMonitorConfig) -> HealthTransition {
        let next = if latency >= config.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        self.consecutive_failures.store(0, Ordering::Release);
        self.consecutive_successes.fetch_add(1, Ordering::AcqRel);
        self.last_latency_micros
            .store(latency.as_micros() as u64, Ordering::Release);
        self.touch();
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = None;
        }

        let previous = HealthStatus::from_u8(self.status.swap(next.as_u8(), Ordering::AcqRel));
        HealthTransition {
            previous,
            current: next,
        }
    }

    /// A failed or timed-out probe
    pub fn record_failure(&self, error: impl Into<String>, config: &HealthMonitorConfig) -> HealthTransition {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.consecutive_successes.store(0, Ordering::Release);
        self.touch();
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = Some(error.into());
        }

        let previous = self.status();
        if failures >= config.failure_threshold.max(1) {
            self.status
                .store(HealthStatus::Unhealthy.as_u8(), Ordering::Release);
            HealthTransition {
                previous,
                current: HealthStatus::Unhealthy,
            }
        } else {
            HealthTransition {
                previous,
                current: previous,
            }
        }
    }

    fn touch(&self) {
        self.last_check_millis
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        match self.last_check_millis.load(Ordering::Acquire) {
            0 => None,
            millis => DateTime::from_timestamp_millis(millis),
        }
    }

    /// Point-in-time copy for reporting
    pub fn snapshot(&self) -> HealthSnapshot {
        let latency = self.last_latency_micros.load(Ordering::Acquire);
        HealthSnapshot {
            status: self.status(),
            consecutive_failures: self.consecutive_failures(),
            consecutive_successes: self.consecutive_successes.load(Ordering::Acquire),
            last_check: self.last_check(),
            last_latency_ms: (latency > 0).then(|| latency as f64 / 1000.0),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }
}

/// Serializable health view of one pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<f64>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HealthMonitorConfig {
        HealthMonitorConfig {
            degraded_threshold: Duration::from_millis(100),
            failure_threshold: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_starts_unknown_and_never_checked() {
        let health = PoolHealth::new();
        assert_eq!(health.status(), HealthStatus::Unknown);
        assert!(health.last_check().is_none());
        assert!(health.status().is_routable());
    }

    #[test]
    fn test_latency_classification() {
        let health = PoolHealth::new();
        let config = config();

        let t = health.record_success(Duration::from_millis(5), &config);
        assert_eq!(t.previous, HealthStatus::Unknown);
        assert_eq!(t.current, HealthStatus::Healthy);

        let t = health.record_success(Duration::from_millis(100), &config);
        assert_eq!(t.current, HealthStatus::Degraded);
        assert!(t.changed());

        let t = health.record_success(Duration::from_millis(1), &config);
        assert_eq!(t.current, HealthStatus::Healthy);
    }

    #[test]
    fn test_unhealthy_after_threshold_and_single_probe_recovery() {
        let health = PoolHealth::new();
        let config = config();
        health.record_success(Duration::from_millis(1), &config);

        assert_eq!(health.record_failure("timeout", &config).current, HealthStatus::Healthy);
        assert_eq!(health.record_failure("timeout", &config).current, HealthStatus::Healthy);
        let t = health.record_failure("timeout", &config);
        assert_eq!(t.current, HealthStatus::Unhealthy);
        assert!(!health.status().is_routable());
        assert_eq!(health.consecutive_failures(), 3);

        let snapshot = health.snapshot();
        assert_eq!(snapshot.last_error.as_deref(), Some("timeout"));
        assert!(snapshot.last_check.is_some());

        let t = health.record_success(Duration::from_millis(1), &config);
        assert_eq!(t.previous, HealthStatus::Unhealthy);
        assert_eq!(t.current, HealthStatus::Healthy);
        assert_eq!(health.consecutive_failures(), 0);
        assert!(health.snapshot().last_error.is_none());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let health = PoolHealth::new();
        let config = config();
        health.record_failure("refused", &config);
        health.record_failure("refused", &config);
        health.record_success(Duration::from_millis(1), &config);
        health.record_failure("refused", &config);
        assert_eq!(health.status(), HealthStatus::Healthy);
        assert_eq!(health.consecutive_failures(), 1);
    }
}
