//! Consistent-hash ring mapping chunk names to seeder endpoints.
//!
//! Each endpoint contributes a fixed number of virtual points on a
//! `u64` ring; a key resolves to the first point at or after its own
//! hash. Assignment is deterministic for a given membership, so two
//! workers that observe the same failure converge on the same
//! replacement. Removal only reshuffles keys that hashed to the departed
//! endpoint.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Virtual points per endpoint.
const POINTS_PER_NODE: u32 = 20;

/// Consistent-hash ring over endpoint strings.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    points: BTreeMap<u64, String>,
    nodes: Vec<String>,
}

impl HashRing {
    /// Creates an empty ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct endpoints on the ring.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no endpoints remain.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds an endpoint; duplicates are ignored.
    pub fn add(&mut self, endpoint: &str) {
        if self.nodes.iter().any(|n| n == endpoint) {
            return;
        }
        self.nodes.push(endpoint.to_string());
        for replica in 0..POINTS_PER_NODE {
            self.points.insert(point_hash(endpoint, replica), endpoint.to_string());
        }
    }

    /// Removes an endpoint and all its virtual points.
    pub fn remove(&mut self, endpoint: &str) {
        self.nodes.retain(|n| n != endpoint);
        self.points.retain(|_, n| n != endpoint);
    }

    /// Endpoint responsible for `key`, or `None` on an empty ring.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = key_hash(key);
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, node)| node.as_str())
    }

    /// Up to `count` distinct endpoints for `key`, walking the ring clockwise.
    pub fn get_n(&self, key: &str, count: usize) -> Vec<String> {
        let mut picked: Vec<String> = Vec::new();
        if self.points.is_empty() || count == 0 {
            return picked;
        }

        let hash = key_hash(key);
        let walk = self.points.range(hash..).chain(self.points.range(..hash));
        for (_, node) in walk {
            if !picked.iter().any(|p| p == node) {
                picked.push(node.clone());
                if picked.len() == count {
                    break;
                }
            }
        }
        picked
    }
}

fn point_hash(endpoint: &str, replica: u32) -> u64 {
    key_hash(&format!("{endpoint}{replica}"))
}

fn key_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}
