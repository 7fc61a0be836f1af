//! Background probe loops
//!
//! One task per pool. A pool's health cell is written only by its own loop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::health::HealthMonitorConfig;
use super::pool::ManagedPool;

/// Handle over the running probe loops
#[derive(Debug)]
pub struct HealthMonitor {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawn a probe loop for every pool; the first probe runs immediately
    pub fn start(pools: Vec<Arc<ManagedPool>>, config: HealthMonitorConfig) -> Self {
        let (shutdown, receiver) = watch::channel(false);

        let handles = pools
            .into_iter()
            .map(|pool| {
                let config = config.clone();
                let mut shutdown = receiver.clone();
                tokio::spawn(async move {
                    tracing::debug!(
                        "Health probe loop started for {} pool {} (every {:?})",
                        pool.role(),
                        pool.label(),
                        config.check_interval
                    );
                    let mut ticker = interval(config.check_interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                pool.probe(&config).await;
                            }
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }

                    tracing::debug!("Health probe loop stopped for {} pool {}", pool.role(), pool.label());
                })
            })
            .collect();

        Self { shutdown, handles }
    }

    /// Number of running loops
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!("Health probe loop ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryDatabase, InMemoryPool};
    use crate::connection::{HealthStatus, PoolRole};
    use std::time::Duration;

    #[tokio::test]
    async fn test_loop_drives_pool_to_unhealthy_and_stops() {
        let raw = Arc::new(InMemoryPool::new("replica", InMemoryDatabase::new()));
        raw.set_available(false);
        let pool = Arc::new(ManagedPool::new(PoolRole::Read, "memory://replica", raw.clone()));

        let monitor = HealthMonitor::start(
            vec![pool.clone()],
            HealthMonitorConfig {
                check_interval: Duration::from_millis(5),
                probe_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        assert_eq!(monitor.len(), 1);

        let mut waited = 0;
        while pool.status() != HealthStatus::Unhealthy && waited < 200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            waited += 1;
        }
        assert_eq!(pool.status(), HealthStatus::Unhealthy);

        monitor.stop().await;
        let failures = pool.health().consecutive_failures();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.health().consecutive_failures(), failures);
    }
}
