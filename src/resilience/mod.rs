//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Cache command:
//!     → timeouts.rs (enforce connect/io deadline)
//!     → On failure: retries.rs (check if safe to retry, retry with backoff)
//!     → backoff.rs (exponential delay with jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every cache round trip has a deadline
//! - Mutating commands retry only when the command never reached the node
//! - Jittered backoff prevents many workers retrying in lockstep

pub mod backoff;
pub mod retries;
pub mod timeouts;
