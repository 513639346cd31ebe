//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build counter store (discovery) → Spawn monitor → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Cancel root token → Drain invocations → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then store, then listeners
//! - Fail fast: discovery or bind failure is fatal
//! - One cancellation tree: every background task holds a child token

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_store, StartupError, Store};
