//! Session event reconciliation.
//!
//! # Data Flow
//! ```text
//! invocation payload
//!     → payload.rs (base64 → gzip → JSON → record lines)
//!     → record.rs (line → SessionEvent or RecordError)
//!     → Reconciler (SessionEvent → CounterStore::increment)
//!     → BatchReport (per-record outcomes + BatchSummary)
//! ```
//!
//! # Design Decisions
//! - Records are applied sequentially in delivery order
//! - A record failure never aborts the batch; only an unreadable payload does
//! - The post-write read is for logging only and never gates the write
//! - Cancellation and the deadline are checked between records, never mid-record
//! - No per-session deduplication: a repeated CONNECTED counts twice

pub mod payload;
pub mod record;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cache::CounterStore;
use crate::observability::metrics;

pub use payload::{decode_payload, encode_payload, InvocationEvent, PayloadError};
pub use record::{RecordError, SessionAction, SessionEvent};

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Applied {
        user: String,
        action: SessionAction,
        count: i64,
    },
    Malformed {
        reason: String,
    },
    UnknownAction {
        user: String,
        action: String,
    },
    CacheError {
        user: String,
        action: SessionAction,
        error: String,
    },
    /// Not attempted: the invocation was cancelled or ran out of time.
    Skipped,
}

impl RecordOutcome {
    /// Metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            RecordOutcome::Applied { .. } => "applied",
            RecordOutcome::Malformed { .. } => "malformed",
            RecordOutcome::UnknownAction { .. } => "unknown_action",
            RecordOutcome::CacheError { .. } => "cache_error",
            RecordOutcome::Skipped => "skipped",
        }
    }
}

/// Aggregate counts for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub applied: usize,
    pub malformed: usize,
    pub unknown_action: usize,
    pub cache_errors: usize,
    pub skipped: usize,
    /// Records applied before the first cache error (equals `applied` when there was none).
    pub applied_before_first_cache_error: usize,
    /// Processing stopped early because of cancellation or the deadline.
    pub interrupted: bool,
}

impl BatchSummary {
    fn record(&mut self, outcome: &RecordOutcome) {
        self.total += 1;
        match outcome {
            RecordOutcome::Applied { .. } => {
                self.applied += 1;
                if self.cache_errors == 0 {
                    self.applied_before_first_cache_error += 1;
                }
            }
            RecordOutcome::Malformed { .. } => self.malformed += 1,
            RecordOutcome::UnknownAction { .. } => self.unknown_action += 1,
            RecordOutcome::CacheError { .. } => self.cache_errors += 1,
            RecordOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Worst severity encountered.
    pub fn status(&self) -> BatchStatus {
        if self.cache_errors > 0 {
            if self.applied == 0 {
                BatchStatus::CacheUnavailable
            } else {
                BatchStatus::PartialFailure
            }
        } else if self.interrupted {
            BatchStatus::Interrupted
        } else {
            BatchStatus::Complete
        }
    }
}

/// Batch-level verdict, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every record attempted, no cache errors (skipped malformed/unknown records are fine).
    Complete,
    /// Stopped early, no cache errors among the attempted records.
    Interrupted,
    /// Some records applied, at least one cache error.
    PartialFailure,
    /// At least one cache error and nothing applied.
    CacheUnavailable,
}

impl BatchStatus {
    pub fn status_code(self) -> u16 {
        match self {
            BatchStatus::Complete => 200,
            BatchStatus::Interrupted => 504,
            BatchStatus::PartialFailure => 500,
            BatchStatus::CacheUnavailable => 503,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Complete => "OK",
            BatchStatus::Interrupted => "interrupted",
            BatchStatus::PartialFailure => "partial failure",
            BatchStatus::CacheUnavailable => "cache unavailable",
        }
    }
}

/// Result of reconciling one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub outcomes: Vec<RecordOutcome>,
}

impl BatchReport {
    pub fn status(&self) -> BatchStatus {
        self.summary.status()
    }
}

/// Applies session events to the shared counter store.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn CounterStore>,
    observe_reads: bool,
}

impl Reconciler {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            observe_reads: true,
        }
    }

    /// Enable or disable the post-write read used for logging.
    pub fn with_observe_reads(mut self, observe_reads: bool) -> Self {
        self.observe_reads = observe_reads;
        self
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Decode an invocation payload and reconcile its records.
    pub async fn process(
        &self,
        data: &str,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<BatchReport, PayloadError> {
        let lines = decode_payload(data)?;
        tracing::debug!(records = lines.len(), "Payload decoded");
        Ok(self.reconcile(&lines, cancel, deadline).await)
    }

    /// Apply each record in order, best-effort.
    pub async fn reconcile<S>(
        &self,
        lines: &[S],
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> BatchReport
    where
        S: AsRef<str> + Sync,
    {
        let mut summary = BatchSummary::default();
        let mut outcomes = Vec::with_capacity(lines.len());

        for (index, line) in lines.iter().enumerate() {
            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            if cancel.is_cancelled() || expired {
                let remaining = lines.len() - index;
                tracing::warn!(
                    processed = index,
                    remaining,
                    deadline_expired = expired,
                    "Stopping batch early"
                );
                summary.interrupted = true;
                for _ in index..lines.len() {
                    summary.record(&RecordOutcome::Skipped);
                    outcomes.push(RecordOutcome::Skipped);
                }
                metrics::record_records("skipped", remaining);
                break;
            }

            let outcome = self.apply_line(index, line.as_ref()).await;
            metrics::record_records(outcome.label(), 1);
            summary.record(&outcome);
            outcomes.push(outcome);
        }

        BatchReport { summary, outcomes }
    }

    async fn apply_line(&self, index: usize, line: &str) -> RecordOutcome {
        tracing::debug!(index, message = %line, "Processing log event");

        let event = match SessionEvent::parse(line) {
            Ok(event) => event,
            Err(RecordError::Malformed { reason }) => {
                tracing::warn!(index, message = %line, reason, "Skipping malformed record");
                return RecordOutcome::Malformed {
                    reason: reason.to_string(),
                };
            }
            Err(RecordError::UnknownAction { user, action }) => {
                tracing::warn!(index, user = %user, action = %action, "Skipping unknown action");
                return RecordOutcome::UnknownAction { user, action };
            }
        };

        let count = match self.store.increment(&event.user, event.action.delta()).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    index,
                    user = %event.user,
                    session = %event.session,
                    action = %event.action,
                    error = %e,
                    "Failed to update connection count"
                );
                return RecordOutcome::CacheError {
                    user: event.user,
                    action: event.action,
                    error: e.to_string(),
                };
            }
        };

        self.log_count(&event, count).await;

        RecordOutcome::Applied {
            user: event.user,
            action: event.action,
            count,
        }
    }

    /// Log the counter after a write. Never affects the record's outcome.
    async fn log_count(&self, event: &SessionEvent, written: i64) {
        if !self.observe_reads {
            tracing::info!(user = %event.user, action = %event.action, count = written, "Connection count");
            return;
        }

        match self.store.get(&event.user).await {
            Ok(observed) => tracing::info!(
                user = %event.user,
                action = %event.action,
                count = ?observed,
                "Connection count"
            ),
            Err(e) => tracing::warn!(
                user = %event.user,
                action = %event.action,
                count = written,
                error = %e,
                "Connection count read-back failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Delegates to a MemoryStore; increments after the first `fail_after` fail.
    struct FlakyStore {
        inner: MemoryStore,
        fail_after: usize,
        increments: AtomicUsize,
        fail_reads: bool,
    }

    impl FlakyStore {
        fn new(fail_after: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_after,
                increments: AtomicUsize::new(0),
                fail_reads: false,
            }
        }
    }

    fn unavailable() -> CacheError {
        CacheError::Connect {
            node: "10.0.0.1:11211".into(),
            source: std::io::ErrorKind::ConnectionRefused.into(),
        }
    }

    #[async_trait]
    impl CounterStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<i64>, CacheError> {
            if self.fail_reads {
                return Err(unavailable());
            }
            self.inner.get(key).await
        }

        async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
            if self.increments.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(unavailable());
            }
            self.inner.increment(key, delta).await
        }
    }

    fn reconciler(store: &MemoryStore) -> Reconciler {
        Reconciler::new(Arc::new(store.clone()))
    }

    async fn run(reconciler: &Reconciler, lines: &[&str]) -> BatchReport {
        reconciler
            .reconcile(lines, &CancellationToken::new(), None)
            .await
    }

    #[tokio::test]
    async fn test_connect_for_absent_user() {
        let store = MemoryStore::new();
        let report = run(&reconciler(&store), &["alice.s1 CONNECTED"]).await;

        assert_eq!(store.get("alice").await.unwrap(), Some(1));
        assert_eq!(report.summary.applied, 1);
        assert_eq!(report.status(), BatchStatus::Complete);
        assert_eq!(
            report.outcomes[0],
            RecordOutcome::Applied {
                user: "alice".into(),
                action: SessionAction::Connected,
                count: 1
            }
        );
    }

    #[tokio::test]
    async fn test_connect_then_disconnect_payload() {
        let store = MemoryStore::new();
        let data = encode_payload(["alice.sess1 CONNECTED x", "alice.sess2 DISCONNECTED y"]).unwrap();

        let report = reconciler(&store)
            .process(&data, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(store.get("alice").await.unwrap(), Some(0));
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.applied, 2);
        assert_eq!(report.summary.malformed, 0);
        assert_eq!(report.summary.unknown_action, 0);
        assert_eq!(report.status().status_code(), 200);
    }

    #[tokio::test]
    async fn test_n_connects_m_disconnects_across_batches() {
        let store = MemoryStore::new();
        let reconciler = reconciler(&store);

        run(&reconciler, &["bob.a CONNECTED"; 5]).await;
        run(&reconciler, &["bob.b CONNECTED", "bob.a DISCONNECTED"]).await;
        run(&reconciler, &["bob.c DISCONNECTED"; 3]).await;

        assert_eq!(store.get("bob").await.unwrap(), Some(6 - 4));
    }

    #[tokio::test]
    async fn test_more_disconnects_than_connects_clamps_at_zero() {
        let store = MemoryStore::new();
        let reconciler = reconciler(&store);

        run(&reconciler, &["ivan.a CONNECTED"]).await;
        let report = run(&reconciler, &["ivan.a DISCONNECTED"; 3]).await;

        assert_eq!(store.get("ivan").await.unwrap(), Some(0));
        assert_eq!(report.summary.applied, 3);
        assert_eq!(report.status(), BatchStatus::Complete);

        // a later connect counts up from the floor, not from -2
        run(&reconciler, &["ivan.b CONNECTED"]).await;
        assert_eq!(store.get("ivan").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_do_not_touch_counters() {
        let store = MemoryStore::new();
        let report = run(
            &reconciler(&store),
            &["carol.s1", "carol.s1 LOGIN", "carol CONNECTED", "carol.s2 CONNECTED"],
        )
        .await;

        assert_eq!(report.summary.malformed, 2);
        assert_eq!(report.summary.unknown_action, 1);
        assert_eq!(report.summary.applied, 1);
        assert_eq!(report.status(), BatchStatus::Complete);
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.get("carol").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_cache_failure_on_second_record() {
        let store = Arc::new(FlakyStore::new(1));
        let reconciler = Reconciler::new(store.clone());

        let report = reconciler
            .reconcile(
                &["dave.s1 CONNECTED", "dave.s2 CONNECTED"],
                &CancellationToken::new(),
                None,
            )
            .await;

        assert_eq!(report.summary.applied, 1);
        assert_eq!(report.summary.cache_errors, 1);
        assert_eq!(report.summary.applied_before_first_cache_error, 1);
        assert_eq!(report.status(), BatchStatus::PartialFailure);
        assert_eq!(report.status().status_code(), 500);
        assert_eq!(store.inner.get("dave").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_cache_down_from_the_start() {
        let store = Arc::new(FlakyStore::new(0));
        let report = Reconciler::new(store)
            .reconcile(
                &["erin.s1 CONNECTED", "bad", "erin.s1 DISCONNECTED"],
                &CancellationToken::new(),
                None,
            )
            .await;

        assert_eq!(report.summary.applied, 0);
        assert_eq!(report.summary.cache_errors, 2);
        assert_eq!(report.summary.malformed, 1);
        assert_eq!(report.status(), BatchStatus::CacheUnavailable);
    }

    #[tokio::test]
    async fn test_read_back_failure_does_not_fail_record() {
        let mut flaky = FlakyStore::new(usize::MAX);
        flaky.fail_reads = true;
        let report = Reconciler::new(Arc::new(flaky))
            .reconcile(&["frank.s1 CONNECTED"], &CancellationToken::new(), None)
            .await;

        assert_eq!(report.summary.applied, 1);
        assert_eq!(report.status(), BatchStatus::Complete);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = reconciler(&store)
            .reconcile(&["gina.s1 CONNECTED", "gina.s2 CONNECTED"], &cancel, None)
            .await;

        assert!(report.summary.interrupted);
        assert_eq!(report.summary.skipped, 2);
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.status(), BatchStatus::Interrupted);
        assert_eq!(report.status().status_code(), 504);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_reports_partial_results() {
        let store = MemoryStore::new();
        let past = Instant::now() - Duration::from_millis(1);
        let report = reconciler(&store)
            .reconcile(&["hal.s1 CONNECTED"], &CancellationToken::new(), Some(past))
            .await;

        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.outcomes, vec![RecordOutcome::Skipped]);
    }

    #[tokio::test]
    async fn test_bad_payload_is_fatal() {
        let store = MemoryStore::new();
        let err = reconciler(&store)
            .process("%%%", &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PayloadError::Base64(_)));
    }

    #[test]
    fn test_status_severity_order() {
        assert!(BatchStatus::Complete < BatchStatus::Interrupted);
        assert!(BatchStatus::PartialFailure < BatchStatus::CacheUnavailable);

        let summary = BatchSummary {
            applied: 2,
            cache_errors: 1,
            interrupted: true,
            ..BatchSummary::default()
        };
        assert_eq!(summary.status(), BatchStatus::PartialFailure);
    }
}
