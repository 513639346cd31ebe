//! Cache node abstraction.
//!
//! # Responsibilities
//! - Represent a single memcached node
//! - Track health state (Healthy/Unhealthy) with hysteresis
//! - Let an unhealthy node take a trial command once its dead-retry window passes
//! - Hold a small pool of idle connections for reuse

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::cache::protocol::Connection;
use crate::cache::NodeStatus;

/// How long an unhealthy node sits out unless configured otherwise.
pub const DEFAULT_DEAD_RETRY: Duration = Duration::from_secs(60);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// A single cache node.
#[derive(Debug)]
pub struct CacheNode {
    /// Connect address ("host:port").
    pub addr: String,
    /// Maximum idle connections kept for reuse.
    pub max_idle: usize,
    /// Time an unhealthy node is skipped before it is tried again.
    pub dead_retry: Duration,

    idle: Mutex<Vec<Connection>>,
    /// When the node was last marked (or re-confirmed) unhealthy.
    down_since: Mutex<Option<Instant>>,

    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
}

impl CacheNode {
    /// Create a new node.
    pub fn new(addr: impl Into<String>, max_idle: usize) -> Self {
        Self {
            addr: addr.into(),
            max_idle,
            dead_retry: DEFAULT_DEAD_RETRY,
            idle: Mutex::new(Vec::new()),
            down_since: Mutex::new(None),
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }

    pub fn with_dead_retry(mut self, dead_retry: Duration) -> Self {
        self.dead_retry = dead_retry;
        self
    }

    /// Take a live idle connection, discarding any the peer has closed.
    pub fn take_idle(&self) -> Option<Connection> {
        let mut idle = self.idle.lock().ok()?;
        while let Some(mut conn) = idle.pop() {
            if conn.is_closed() {
                tracing::debug!(node = %self.addr, "Discarding closed idle connection");
                continue;
            }
            conn.mark_reused();
            return Some(conn);
        }
        None
    }

    /// Return a healthy connection to the pool; dropped if the pool is full.
    pub fn put_idle(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(conn);
            }
        }
    }

    /// Number of pooled idle connections.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Close every pooled connection.
    pub fn clear_idle(&self) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.clear();
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Return true if node is considered healthy (Healthy or Unknown).
    pub fn is_healthy(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    /// Whether commands may be routed here: healthy, or unhealthy for longer than `dead_retry`.
    pub fn is_available(&self) -> bool {
        if self.is_healthy() {
            return true;
        }
        match self.down_since.lock() {
            Ok(since) => since.map_or(true, |since| since.elapsed() >= self.dead_retry),
            Err(_) => false,
        }
    }

    fn set_down_since(&self, value: Option<Instant>) {
        if let Ok(mut since) = self.down_since.lock() {
            *since = value;
        }
    }

    /// Report a successful command/probe. Returns true on transition to Healthy.
    pub fn mark_success(&self, healthy_threshold: usize) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.state() == HealthState::Healthy {
            return false;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            let prev = self.state.swap(HealthState::Healthy as u8, Ordering::Relaxed);
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.set_down_since(None);
            return HealthState::from(prev) == HealthState::Unhealthy;
        }
        false
    }

    /// Report a failed command/probe. Returns true on transition to Unhealthy.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> bool {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if self.state() == HealthState::Unhealthy {
            // a failed trial starts a new wait
            self.set_down_since(Some(Instant::now()));
            return false;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            self.set_down_since(Some(Instant::now()));
            self.consecutive_failures.store(0, Ordering::Relaxed);
            // pooled connections to a failing node are not worth keeping
            self.clear_idle();
            return true;
        }
        false
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            address: self.addr.clone(),
            healthy: self.is_healthy(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            idle_connections: self.idle_count(),
        }
    }
}
