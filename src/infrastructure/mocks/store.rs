//! Key/value store that can be made to fail on demand.

use crate::application::ports::{Clock, KeyStore, StoreError};
use crate::infrastructure::store::ShardedStore;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory store with a failure switch.
///
/// While failing, every operation returns [`StoreError::Unavailable`]
/// without touching the stored data, which simulates a store outage
/// that later recovers.
///
/// ```
/// use admission_control::infrastructure::mocks::{FaultyStore, MockClock};
/// use admission_control::KeyStore;
/// use std::sync::Arc;
///
/// let store = FaultyStore::new(Arc::new(MockClock::new(0)));
/// store.set("k", vec![1], None).unwrap();
///
/// store.set_failing(true);
/// assert!(store.get("k").is_err());
///
/// store.set_failing(false);
/// assert_eq!(store.get("k").unwrap(), Some(vec![1]));
/// ```
#[derive(Debug)]
pub struct FaultyStore {
    inner: ShardedStore,
    failing: AtomicBool,
    failed_calls: AtomicU64,
}

impl FaultyStore {
    /// Create a healthy store evaluating TTLs against `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: ShardedStore::with_clock(clock),
            failing: AtomicBool::new(false),
            failed_calls: AtomicU64::new(0),
        }
    }

    /// Switch the simulated outage on or off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls rejected while failing.
    pub fn failed_calls(&self) -> u64 {
        self.failed_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

impl KeyStore for FaultyStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key)
    }
}
