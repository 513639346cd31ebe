//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the tracker.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the session tracker.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TrackerConfig {
    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Counter store (cache cluster) settings.
    pub cache: CacheConfig,

    /// Retry configuration for cache commands.
    pub retries: RetryConfig,

    /// Per-invocation reconciler settings.
    pub reconciler: ReconcilerConfig,

    /// Cache node health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted invocation body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout for the whole HTTP exchange, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 6 * 1024 * 1024, // 6MB
            request_timeout_secs: 60,
        }
    }
}

/// Which counter store implementation backs the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// memcached cluster reached over TCP.
    Memcached,
    /// Process-local map, for local runs and tests.
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,

    /// Cluster configuration endpoint host. Overridden by `ElastiCacheEndpoint`.
    pub endpoint_host: String,

    /// Cluster configuration endpoint port. Overridden by `ElastiCacheEndpointPort`.
    pub endpoint_port: u16,

    /// Resolve nodes with `config get cluster` against the endpoint.
    /// When false, `nodes` is used as-is.
    pub discovery: bool,

    /// Static node list ("host:port").
    pub nodes: Vec<String>,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Per-command read/write timeout in milliseconds.
    pub io_timeout_ms: u64,

    /// Idle connections kept per node.
    pub max_idle_per_node: usize,

    /// Consecutive failures before a node is excluded from hashing.
    pub unhealthy_threshold: u32,

    /// Consecutive successes before an excluded node is restored.
    pub healthy_threshold: u32,

    /// How long an unhealthy node sits out before commands try it again, in milliseconds.
    pub dead_retry_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memcached,
            endpoint_host: String::new(),
            endpoint_port: 11211,
            discovery: true,
            nodes: Vec::new(),
            connect_timeout_ms: 1000,
            io_timeout_ms: 1000,
            max_idle_per_node: 8,
            unhealthy_threshold: 3,
            healthy_threshold: 1,
            dead_retry_ms: 60_000,
        }
    }
}

impl CacheConfig {
    /// The configuration endpoint as "host:port".
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.endpoint_host, self.endpoint_port)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per cache command (1 = no retry).
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 20,
            max_delay_ms: 500,
        }
    }
}

/// Reconciler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Deadline for one invocation in milliseconds. Must stay below the
    /// request timeout by at least one record's worst-case retry time.
    pub deadline_ms: u64,

    /// Read each counter back after writing it, for logging only.
    pub observe_reads: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 30_000,
            observe_reads: true,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active node probing.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty for development, JSON for log aggregation.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
