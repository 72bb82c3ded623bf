//! In-process key-value store for single-instance deployments.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::KvStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A `HashMap` behind an `RwLock`, with per-entry expiry. Expired entries are
/// pruned lazily when touched; no background sweep.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, String> {
        let now = Instant::now();
        {
            let entries = self.entries.read().expect("memory store lock poisoned");
            match entries.get(key) {
                Some(entry) if !entry.expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Entry was expired: prune it under the write lock.
        let mut entries = self.entries.write().expect("memory store lock poisoned");
        if entries.get(key).is_some_and(|e| e.expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), String> {
        let mut entries = self.entries.write().expect("memory store lock poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), String> {
        let mut entries = self.entries.write().expect("memory store lock poisoned");
        entries.remove(key);
        Ok(())
    }
}
