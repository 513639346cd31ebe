//! Timeout enforcement.
//!
//! # Responsibilities
//! - Hold the connect and per-command I/O deadlines for cache nodes
//! - Wrap futures so a stalled node surfaces as a distinct error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Connect timeouts are distinguishable from I/O timeouts so callers can
//!   tell whether a command may already have reached the node

use std::future::Future;
use std::time::Duration;

use crate::config::CacheConfig;

/// Deadlines applied to every cache round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub io: Duration,
}

impl Timeouts {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            connect: Duration::from_millis(config.connect_timeout_ms),
            io: Duration::from_millis(config.io_timeout_ms),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Marker returned when a deadline elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub Duration);

/// Run `fut` to completion or fail with [`Elapsed`] after `limit`.
pub async fn within<F, T>(limit: Duration, fut: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Elapsed(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_within_completes() {
        let value = within(Duration::from_millis(100), async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn test_within_elapses() {
        let limit = Duration::from_millis(10);
        let result = within(limit, tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(result, Err(Elapsed(limit)));
    }

    #[test]
    fn test_from_config() {
        let mut config = CacheConfig::default();
        config.connect_timeout_ms = 250;
        config.io_timeout_ms = 75;
        let t = Timeouts::from_config(&config);
        assert_eq!(t.connect, Duration::from_millis(250));
        assert_eq!(t.io, Duration::from_millis(75));
    }
}
