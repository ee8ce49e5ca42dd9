//! Typed records over the raw key/value store.
//!
//! Components never talk to [`KeyStore`] directly. They go through
//! [`RecordStore`], which namespaces keys, serializes records with bincode
//! and provides fixed-expiry counters.

use crate::application::ports::{Clock, KeyStore, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default namespace for every key written by this crate.
pub const DEFAULT_KEY_PREFIX: &str = "admission:";

/// Counter whose expiry is fixed when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct CounterRecord {
    count: u64,
    expires_at_ms: u64,
}

/// Record adapter shared by all stateful components.
#[derive(Debug, Clone)]
pub struct RecordStore {
    store: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl RecordStore {
    /// Create an adapter writing under `prefix`.
    pub fn new(store: Arc<dyn KeyStore>, clock: Arc<dyn Clock>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            prefix: prefix.into(),
        }
    }

    /// Current time from the injected clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Full store key for a record key.
    pub fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Load and decode a record.
    ///
    /// Undecodable bytes are treated as absent and removed so a corrupted
    /// entry cannot wedge a tracker.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let full_key = self.key(key);
        let Some(bytes) = self.store.get(&full_key)? else {
            return Ok(None);
        };

        match bincode::deserialize::<T>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(error = %e, key = %full_key, "Discarding undecodable record");
                self.store.delete(&full_key)?;
                Ok(None)
            }
        }
    }

    /// Encode and store a record.
    pub fn save<T: Serialize>(
        &self,
        key: &str,
        record: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let bytes = bincode::serialize(record).map_err(|e| StoreError::Codec(e.to_string()))?;
        self.store.set(&self.key(key), bytes, ttl)
    }

    /// Remove a record.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(&self.key(key))
    }

    /// Increment a counter and return its new value.
    ///
    /// A new counter expires `ttl` after its first increment; later
    /// increments keep that deadline instead of extending it.
    pub fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = self.now_ms();
        let record = match self.load::<CounterRecord>(key)? {
            Some(existing) if existing.expires_at_ms > now => CounterRecord {
                count: existing.count.saturating_add(1),
                expires_at_ms: existing.expires_at_ms,
            },
            _ => CounterRecord {
                count: 1,
                expires_at_ms: now.saturating_add(ttl_ms(ttl)),
            },
        };

        let remaining = Duration::from_millis(record.expires_at_ms.saturating_sub(now));
        self.save(key, &record, Some(remaining))?;
        Ok(record.count)
    }

    /// Read a counter without modifying it. Missing or expired reads as zero.
    pub fn counter(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.now_ms();
        Ok(self
            .load::<CounterRecord>(key)?
            .filter(|record| record.expires_at_ms > now)
            .map_or(0, |record| record.count))
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    ttl.as_millis().try_into().unwrap_or(u64::MAX)
}
