//! Process-local counter store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::{is_valid_key, CacheError, CounterStore};

/// A thread-safe in-memory counter map with memcached counter semantics.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, i64>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys that have been created.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Copy of every counter.
    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.inner
            .iter()
            .map(|r| (r.key().clone(), *r.value()))
            .collect()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, CacheError> {
        if !is_valid_key(key) {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.inner.get(key).map(|r| *r.value()))
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        if !is_valid_key(key) {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        // Entry guard holds the shard lock, so the read-modify-write is atomic
        let mut entry = self.inner.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(delta).max(0);
        Ok(*entry)
    }
}
