//! In-process key/value store.
//!
//! Provides a concurrent, sharded store with per-entry expiry for
//! single-process deployments and tests.

use crate::application::ports::{Clock, KeyStore, StoreError};
use crate::infrastructure::clock::SystemClock;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    expires_at_ms: Option<u64>,
}

impl StoredEntry {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|deadline| deadline <= now_ms)
    }
}

/// Thread-safe sharded store backed by DashMap.
///
/// DashMap provides lock-free reads and fine-grained locking for writes,
/// so trackers hashing to different shards never contend. Expired entries
/// are dropped lazily when read; [`ShardedStore::purge_expired`] reclaims
/// the rest on demand.
#[derive(Debug)]
pub struct ShardedStore {
    map: DashMap<String, StoredEntry>,
    clock: Arc<dyn Clock>,
}

impl ShardedStore {
    /// Create a store that evaluates expiry against the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store that evaluates expiry against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            map: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.map.len())
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.map.clear();
    }
}

impl Default for ShardedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for ShardedStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now_ms();
        if let Some(entry) = self.map.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Guard must be released before removal to avoid a shard deadlock
        self.map.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at_ms = ttl.map(|ttl| {
            let ttl_ms: u64 = ttl.as_millis().try_into().unwrap_or(u64::MAX);
            self.clock.now_ms().saturating_add(ttl_ms)
        });
        self.map.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at_ms,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.map.remove(key);
        Ok(())
    }
}
