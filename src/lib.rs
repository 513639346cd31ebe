//! Session tracker library.
//!
//! Reconciles batches of FTP session log events into per-user connection
//! counters held in a memcached cluster.

pub mod cache;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod reconcile;
pub mod resilience;

pub use cache::{CounterStore, MemcachedClient, MemoryStore};
pub use config::TrackerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use reconcile::Reconciler;
