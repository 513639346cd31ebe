//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every cache node
//! - Update node health state based on results

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::cache::MemcachedClient;
use crate::config::HealthCheckConfig;

pub struct NodeHealthMonitor {
    client: Arc<MemcachedClient>,
    config: HealthCheckConfig,
}

impl NodeHealthMonitor {
    pub fn new(client: Arc<MemcachedClient>, config: HealthCheckConfig) -> Self {
        Self { client, config }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            nodes = self.client.all_nodes().len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_all().await,
                _ = shutdown.cancelled() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every node concurrently and record the outcomes.
    pub async fn check_all(&self) {
        let probes = self.client.all_nodes().iter().map(|node| async move {
            let result = self.client.probe(node).await;
            match &result {
                Ok(version) => {
                    tracing::debug!(node = %node.addr, version = %version, "Health check passed")
                }
                Err(e) => tracing::warn!(node = %node.addr, error = %e, "Health check failed"),
            }
            self.client.record_outcome(node, &result);
        });
        join_all(probes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::resilience::retries::RetryPolicy;

    #[tokio::test]
    async fn test_unreachable_node_marked_unhealthy() {
        let config = CacheConfig {
            connect_timeout_ms: 100,
            unhealthy_threshold: 2,
            ..CacheConfig::default()
        };
        let client = Arc::new(MemcachedClient::new(["127.0.0.1:1"], &config, RetryPolicy::none()));
        let monitor = NodeHealthMonitor::new(client.clone(), HealthCheckConfig::default());

        monitor.check_all().await;
        assert!(client.all_nodes()[0].is_healthy());
        monitor.check_all().await;
        assert!(!client.all_nodes()[0].is_healthy());
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let client = Arc::new(MemcachedClient::new(
            Vec::<String>::new(),
            &CacheConfig::default(),
            RetryPolicy::none(),
        ));
        let monitor = NodeHealthMonitor::new(client, HealthCheckConfig::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        time::timeout(Duration::from_secs(1), monitor.run(shutdown))
            .await
            .unwrap();
    }
}
