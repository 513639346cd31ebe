//! Hashed multi-node memcached client.
//!
//! # Responsibilities
//! - Map each key to its owning node (rendezvous hashing over healthy nodes)
//! - Reuse pooled connections per node
//! - Apply signed deltas with auto-create on absent keys
//! - Feed command outcomes into node health (passive checks)

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cache::discovery::{discover, DiscoveryError};
use crate::cache::hash::{NodeSelector, Rendezvous};
use crate::cache::node::CacheNode;
use crate::cache::protocol::{Connection, CounterReply};
use crate::cache::{decode_counter, is_valid_key, CacheError, CounterStore, NodeStatus};
use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::resilience::retries::{retry, CommandKind, RetryPolicy};
use crate::resilience::timeouts::Timeouts;

/// memcached client spread over a fixed set of nodes.
#[derive(Debug)]
pub struct MemcachedClient {
    nodes: Vec<Arc<CacheNode>>,
    selector: Box<dyn NodeSelector>,
    timeouts: Timeouts,
    retry: RetryPolicy,
    healthy_threshold: usize,
    unhealthy_threshold: usize,
}

impl MemcachedClient {
    /// Create a client over explicit node addresses ("host:port").
    pub fn new<I, S>(addrs: I, config: &CacheConfig, retry: RetryPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dead_retry = Duration::from_millis(config.dead_retry_ms);
        let nodes = addrs
            .into_iter()
            .map(|addr| {
                Arc::new(CacheNode::new(addr, config.max_idle_per_node).with_dead_retry(dead_retry))
            })
            .collect();

        Self {
            nodes,
            selector: Box::new(Rendezvous::new()),
            timeouts: Timeouts::from_config(config),
            retry,
            healthy_threshold: config.healthy_threshold.max(1) as usize,
            unhealthy_threshold: config.unhealthy_threshold.max(1) as usize,
        }
    }

    /// Build a client from configuration, running discovery when enabled.
    pub async fn connect(config: &CacheConfig, retry: RetryPolicy) -> Result<Self, DiscoveryError> {
        let addrs = if config.discovery {
            let cluster = discover(&config.endpoint(), Timeouts::from_config(config)).await?;
            cluster
                .nodes
                .iter()
                .map(|node| node.connect_addr())
                .collect::<Vec<_>>()
        } else {
            config.nodes.clone()
        };

        for addr in &addrs {
            tracing::info!(node = %addr, "Cache node registered");
        }
        Ok(Self::new(addrs, config, retry))
    }

    /// Replace the key-to-node strategy.
    pub fn with_selector(mut self, selector: Box<dyn NodeSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn all_nodes(&self) -> &[Arc<CacheNode>] {
        &self.nodes
    }

    /// Node that currently owns `key`.
    pub fn node_for(&self, key: &str) -> Result<Arc<CacheNode>, CacheError> {
        self.selector
            .select(key, &self.nodes)
            .ok_or(CacheError::NoHealthyNodes)
    }

    /// Probe one node with `version` (active health checks).
    pub async fn probe(&self, node: &Arc<CacheNode>) -> Result<String, CacheError> {
        let mut conn = self.checkout(node).await?;
        let version = conn.version().await?;
        node.put_idle(conn);
        Ok(version)
    }

    /// Record a probe or command outcome against a node's health.
    pub fn record_outcome<T>(&self, node: &CacheNode, result: &Result<T, CacheError>) {
        match result {
            Ok(_) => {
                if node.mark_success(self.healthy_threshold) {
                    tracing::info!(node = %node.addr, "Cache node recovered");
                }
            }
            Err(e) if e.is_node_failure() => {
                if node.mark_failure(self.unhealthy_threshold) {
                    tracing::warn!(node = %node.addr, error = %e, "Cache node marked unhealthy");
                }
            }
            // the node answered; key/value problems say nothing about its health
            Err(_) => {}
        }
        metrics::record_node_health(&node.addr, node.is_healthy());
    }

    async fn checkout(&self, node: &CacheNode) -> Result<Connection, CacheError> {
        match node.take_idle() {
            Some(conn) => Ok(conn),
            None => Connection::connect(&node.addr, self.timeouts).await,
        }
    }

    async fn get_once(&self, key: &str) -> Result<Option<i64>, CacheError> {
        let node = self.node_for(key)?;
        let result = async {
            let mut conn = self.checkout(&node).await?;
            let raw = conn.get(key).await?;
            node.put_idle(conn);
            raw.map(|raw| decode_counter(key, &raw)).transpose()
        }
        .await;
        self.record_outcome(&node, &result);
        result
    }

    async fn apply_once(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let node = self.node_for(key)?;
        let result = async {
            let mut conn = self.checkout(&node).await?;
            let value = Self::apply_on(&mut conn, key, delta).await?;
            node.put_idle(conn);
            Ok::<_, CacheError>(value)
        }
        .await;
        self.record_outcome(&node, &result);
        result
    }

    /// incr/decr on one connection; creates the key when it is absent.
    async fn apply_on(conn: &mut Connection, key: &str, delta: i64) -> Result<i64, CacheError> {
        let by = delta.unsigned_abs();
        let reply = Self::counter_command(conn, key, delta, by).await?;

        let value = match reply {
            CounterReply::Value(v) => v,
            CounterReply::NotFound => {
                let initial = delta.max(0);
                if conn.add(key, initial.to_string().as_bytes()).await? {
                    return Ok(initial);
                }
                // Another worker created the key between our incr and add
                match Self::counter_command(conn, key, delta, by).await? {
                    CounterReply::Value(v) => v,
                    CounterReply::NotFound => {
                        return Err(CacheError::Protocol {
                            node: conn.node().to_string(),
                            reply: "NOT_FOUND after NOT_STORED".into(),
                        })
                    }
                }
            }
        };

        i64::try_from(value).map_err(|_| CacheError::InvalidValue {
            key: key.to_string(),
            raw: value.to_string(),
        })
    }

    async fn counter_command(
        conn: &mut Connection,
        key: &str,
        delta: i64,
        by: u64,
    ) -> Result<CounterReply, CacheError> {
        if delta >= 0 {
            conn.incr(key, by).await
        } else {
            conn.decr(key, by).await
        }
    }
}

#[async_trait]
impl CounterStore for MemcachedClient {
    async fn get(&self, key: &str) -> Result<Option<i64>, CacheError> {
        if !is_valid_key(key) {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        let start = Instant::now();
        let result = retry(&self.retry, CommandKind::Read, "get", move || self.get_once(key)).await;
        metrics::record_cache_op("get", &result, start);
        result
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        if !is_valid_key(key) {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        let op = if delta >= 0 { "incr" } else { "decr" };
        let start = Instant::now();
        let result = retry(&self.retry, CommandKind::Write, op, move || self.apply_once(key, delta)).await;
        metrics::record_cache_op(op, &result, start);
        result
    }

    fn nodes(&self) -> Vec<NodeStatus> {
        self.nodes.iter().map(|node| node.status()).collect()
    }
}
