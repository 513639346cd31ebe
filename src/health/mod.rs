//! Cache node health checking.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → `version` probe on every node
//!     → MemcachedClient::record_outcome
//!
//! Passive health checks (cache::client):
//!     Command failure observed
//!     → MemcachedClient::record_outcome
//!
//! State machine (cache::node):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - Only active probes can bring an excluded node back, since no keys hash to it
//! - Health state is per-node

pub mod active;

pub use active::NodeHealthMonitor;
