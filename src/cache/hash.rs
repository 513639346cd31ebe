//! Key-to-node selection.
//!
//! Rendezvous (highest random weight) hashing: every node is scored against
//! the key and the highest-scoring available node wins. Every worker computes
//! the same owner for a key without sharing state, and removing a node only
//! moves the keys that node owned.

use std::hash::Hasher;
use std::sync::Arc;

use fnv::FnvHasher;

use crate::cache::node::CacheNode;

/// Strategy for picking the node that owns a key.
pub trait NodeSelector: Send + Sync + std::fmt::Debug {
    fn select(&self, key: &str, nodes: &[Arc<CacheNode>]) -> Option<Arc<CacheNode>>;
}

/// Rendezvous hashing selector.
#[derive(Debug, Default)]
pub struct Rendezvous;

impl Rendezvous {
    pub fn new() -> Self {
        Self
    }

    /// Score of `key` on the node at `addr`.
    pub fn score(addr: &str, key: &str) -> u64 {
        let mut hasher = FnvHasher::default();
        hasher.write(addr.as_bytes());
        hasher.write_u8(0);
        hasher.write(key.as_bytes());
        mix64(hasher.finish())
    }
}

impl NodeSelector for Rendezvous {
    fn select(&self, key: &str, nodes: &[Arc<CacheNode>]) -> Option<Arc<CacheNode>> {
        nodes
            .iter()
            .filter(|node| node.is_available())
            .max_by_key(|node| Self::score(&node.addr, key))
            .cloned()
    }
}

/// 64-bit finalizer (murmur3 fmix64); FNV alone mixes high bits poorly.
fn mix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn nodes(n: usize) -> Vec<Arc<CacheNode>> {
        (0..n)
            .map(|i| Arc::new(CacheNode::new(format!("10.0.0.{}:11211", i + 1), 1)))
            .collect()
    }

    #[test]
    fn test_selection_is_stable() {
        let lb = Rendezvous::new();
        let nodes = nodes(3);
        let first = lb.select("alice", &nodes).unwrap();
        for _ in 0..10 {
            assert_eq!(lb.select("alice", &nodes).unwrap().addr, first.addr);
        }

        // Order of the node list does not matter
        let mut reversed = nodes.clone();
        reversed.reverse();
        assert_eq!(lb.select("alice", &reversed).unwrap().addr, first.addr);
    }

    #[test]
    fn test_keys_spread_across_nodes() {
        let lb = Rendezvous::new();
        let nodes = nodes(3);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for i in 0..300 {
            let node = lb.select(&format!("user{i}"), &nodes).unwrap();
            *counts.entry(node.addr.clone()).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c > 30));
    }

    #[test]
    fn test_unhealthy_node_only_moves_its_keys() {
        let lb = Rendezvous::new();
        let nodes = nodes(3);
        let before: Vec<String> = (0..100)
            .map(|i| lb.select(&format!("user{i}"), &nodes).unwrap().addr.clone())
            .collect();

        let dead = &nodes[0];
        dead.mark_failure(1);

        for (i, owner) in before.iter().enumerate() {
            let now = lb.select(&format!("user{i}"), &nodes).unwrap();
            if *owner != dead.addr {
                assert_eq!(&now.addr, owner);
            } else {
                assert_ne!(now.addr, dead.addr);
            }
        }
    }

    #[test]
    fn test_no_healthy_nodes() {
        let lb = Rendezvous::new();
        let nodes = nodes(2);
        for node in &nodes {
            node.mark_failure(1);
        }
        assert!(lb.select("alice", &nodes).is_none());
        assert!(lb.select("alice", &[]).is_none());
    }
}
