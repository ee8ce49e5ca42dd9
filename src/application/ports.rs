//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use std::fmt::Debug;
use std::time::Duration;

/// Port for obtaining current time.
///
/// Time is wall-clock epoch milliseconds so that records written by one
/// process remain meaningful to another process sharing the same store.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Error raised by a key/value store adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or rejected the command
    Unavailable(String),
    /// The operation did not complete within the adapter's deadline
    Timeout,
    /// A value could not be encoded or decoded
    Codec(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(reason) => write!(f, "store unavailable: {}", reason),
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::Codec(reason) => write!(f, "store codec error: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

/// Port for the shared key/value store holding all admission state.
///
/// Implementations must provide at least last-write-wins atomicity per key
/// and honor the TTL. Nothing else is assumed: admission control performs
/// plain read-modify-write cycles and tolerates the benign races that
/// result. Every call must return in bounded time.
pub trait KeyStore: Send + Sync + Debug {
    /// Fetch the value stored under `key`, if present and not expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// With `ttl = None` the entry never expires.
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
