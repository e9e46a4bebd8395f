//! The trivial per-node key/value map.
//!
//! Deliberately dumb: one owner per key at any instant, no persistence, no
//! replication. `DashMap` gives per-shard locking so request handlers and
//! the migrator can touch different keys without contending on a single
//! node-wide mutex.

use dashmap::DashMap;

/// In-memory string-to-string store, exclusively owned by one [`crate::node::Node`].
#[derive(Debug, Default)]
pub struct Storage {
    entries: DashMap<String, String>,
}

impl Storage {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn put(&self, key: String, value: String) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    /// Snapshot of all keys currently held, for the migrator to scan.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
