//! Counter store construction.
//!
//! # Design Decisions
//! - Built once, shared by `Arc` with every invocation
//! - Discovery failure is fatal; there is no fallback node list

use std::sync::Arc;

use thiserror::Error;

use crate::cache::discovery::DiscoveryError;
use crate::cache::{CounterStore, MemcachedClient, MemoryStore};
use crate::config::{CacheBackend, TrackerConfig};
use crate::resilience::retries::RetryPolicy;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cache discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("cache cluster has no nodes")]
    NoNodes,
}

/// The counter store plus the memcached client behind it, when there is one.
pub struct Store {
    pub counters: Arc<dyn CounterStore>,
    pub memcached: Option<Arc<MemcachedClient>>,
}

/// Build the configured counter store.
pub async fn build_store(config: &TrackerConfig) -> Result<Store, StartupError> {
    match config.cache.backend {
        CacheBackend::Memory => {
            tracing::warn!("Using process-local counter store; counts are not shared");
            Ok(Store {
                counters: Arc::new(MemoryStore::new()),
                memcached: None,
            })
        }
        CacheBackend::Memcached => {
            let retry = RetryPolicy::from_config(&config.retries);
            let client = MemcachedClient::connect(&config.cache, retry).await?;
            if client.all_nodes().is_empty() {
                return Err(StartupError::NoNodes);
            }
            tracing::info!(nodes = client.all_nodes().len(), "Cache client ready");

            let client = Arc::new(client);
            Ok(Store {
                counters: client.clone(),
                memcached: Some(client),
            })
        }
    }
}
