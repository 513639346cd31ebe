//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! reconcile / cache / http / health
//!     → logging.rs (structured log events, pretty or JSON)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (log shipper)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through the HTTP span into every log line
//! - Metric updates are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
