//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed cache command may be sent again
//! - Execute retries with exponential backoff + jitter
//!
//! # Design Decisions
//! - Reads retry any transport failure
//! - Writes (incr/decr/add) retry only failures where the command never
//!   reached a node; a lost reply is surfaced instead of double-applying
//!   the delta

use std::future::Future;

use crate::cache::CacheError;
use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Whether re-sending a command can change the stored value twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Read,
    Write,
}

/// Bounded retry policy for cache commands.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Check if a failed command of the given kind may be retried.
pub fn is_retryable(kind: CommandKind, err: &CacheError) -> bool {
    match kind {
        CommandKind::Read => err.is_retryable(),
        CommandKind::Write => err.is_unsent(),
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    kind: CommandKind,
    op: &'static str,
    mut attempt: F,
) -> Result<T, CacheError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CacheError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if attempts < policy.max_attempts && is_retryable(kind, &e) => {
                let delay = calculate_backoff(attempts, policy.base_delay_ms, policy.max_delay_ms);
                tracing::debug!(op, attempt = attempts, delay = ?delay, error = %e, "Retrying cache command");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
