//! Counter store subsystem.
//!
//! # Data Flow
//! ```text
//! Reconciler asks for get/increment(user, delta)
//!     → CounterStore (trait object shared by every invocation)
//!         - client.rs: memcached cluster
//!             → hash.rs (rendezvous hashing picks the node owning the key)
//!             → node.rs (health state + idle connection pool)
//!             → protocol.rs (text protocol round trip)
//!         - memory.rs: process-local map
//! Startup:
//!     discovery.rs (config get cluster) → node list → client.rs
//! ```
//!
//! # Design Decisions
//! - Absent keys are auto-created: the first delta creates the key holding
//!   `max(delta, 0)`
//! - Counters never go below zero (memcached `decr` saturates; every store
//!   follows the same rule)
//! - Built once at startup and injected; no global client

pub mod client;
pub mod discovery;
pub mod hash;
pub mod memory;
pub mod node;
pub mod protocol;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use client::MemcachedClient;
pub use memory::MemoryStore;

/// Longest key memcached accepts.
pub const MAX_KEY_LEN: usize = 250;

/// A shared store of per-user connection counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value, or `None` if the key was never set.
    async fn get(&self, key: &str) -> Result<Option<i64>, CacheError>;

    /// Atomically add `delta` (negative to decrement) and return the new value.
    ///
    /// An absent key is created holding `max(delta, 0)`; results are floored at zero.
    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    /// Health snapshot of the physical nodes behind this store.
    fn nodes(&self) -> Vec<NodeStatus> {
        Vec::new()
    }
}

/// Health snapshot of one cache node.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodeStatus {
    pub address: String,
    pub healthy: bool,
    pub consecutive_failures: usize,
    pub idle_connections: usize,
}

/// Errors that can occur talking to the counter store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// TCP connect failed; the command was never sent.
    #[error("connect to {node} failed: {source}")]
    Connect {
        node: String,
        #[source]
        source: std::io::Error,
    },

    /// TCP connect did not complete in time; the command was never sent.
    #[error("connect to {node} timed out after {elapsed:?}")]
    ConnectTimeout { node: String, elapsed: Duration },

    /// Writing to a pooled connection failed; the command never reached the node.
    #[error("pooled connection to {node} was closed")]
    StaleConnection { node: String },

    /// Read or write failed mid-command; the node may have applied it.
    #[error("I/O with {node} failed: {source}")]
    Io {
        node: String,
        #[source]
        source: std::io::Error,
    },

    /// No reply within the I/O deadline; the node may have applied it.
    #[error("{op} on {node} timed out after {elapsed:?}")]
    Timeout {
        node: String,
        op: &'static str,
        elapsed: Duration,
    },

    /// The node answered with something the protocol does not allow here.
    #[error("unexpected reply from {node}: {reply}")]
    Protocol { node: String, reply: String },

    /// The node reported ERROR / CLIENT_ERROR / SERVER_ERROR.
    #[error("error from {node}: {message}")]
    Server { node: String, message: String },

    /// The stored value cannot be decoded as an integer counter.
    #[error("value for key '{key}' is not an integer counter: {raw:?}")]
    InvalidValue { key: String, raw: String },

    #[error("invalid cache key {0:?}")]
    InvalidKey(String),

    #[error("no healthy cache nodes available")]
    NoHealthyNodes,
}

impl CacheError {
    /// The command never reached a node, so sending it again cannot double-apply it.
    pub fn is_unsent(&self) -> bool {
        matches!(
            self,
            CacheError::Connect { .. }
                | CacheError::ConnectTimeout { .. }
                | CacheError::StaleConnection { .. }
        )
    }

    /// The failure is transport-level and a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_unsent() || matches!(self, CacheError::Io { .. } | CacheError::Timeout { .. })
    }

    /// The failure says something about the node's health (as opposed to the key or value).
    pub fn is_node_failure(&self) -> bool {
        self.is_retryable() && !matches!(self, CacheError::StaleConnection { .. })
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::Connect { .. } => "connect",
            CacheError::ConnectTimeout { .. } => "connect_timeout",
            CacheError::StaleConnection { .. } => "stale_connection",
            CacheError::Io { .. } => "io",
            CacheError::Timeout { .. } => "timeout",
            CacheError::Protocol { .. } => "protocol",
            CacheError::Server { .. } => "server",
            CacheError::InvalidValue { .. } => "invalid_value",
            CacheError::InvalidKey(_) => "invalid_key",
            CacheError::NoHealthyNodes => "no_healthy_nodes",
        }
    }
}

/// Whether `key` can be used as a memcached key.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Decode a stored counter value.
pub fn decode_counter(key: &str, raw: &[u8]) -> Result<i64, CacheError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| CacheError::InvalidValue {
            key: key.to_string(),
            raw: String::from_utf8_lossy(raw).into_owned(),
        })
}
