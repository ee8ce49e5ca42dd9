//! Redis-backed key/value store.
//!
//! Lets several application instances share admission state. Values are
//! opaque bytes; namespacing and serialization happen in the record layer.
//!
//! ## Runtime
//!
//! The [`KeyStore`] port is synchronous. Inside a multi-threaded tokio
//! runtime each call runs through `block_in_place`; outside any runtime a
//! private current-thread runtime is spun up per call. Inside a
//! current-thread runtime the store cannot block, so every call fails with
//! [`StoreError::Unavailable`] and admission degrades toward admitting.
//!
//! Every command is bounded by [`RedisStoreConfig::operation_timeout`], so a
//! stalled server turns into [`StoreError::Timeout`] rather than a stalled
//! request.
//!
//! ## Example
//!
//! ```rust,ignore
//! use admission_control::{AdmissionController, Policy, RedisStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let controller = AdmissionController::builder()
//!         .with_store(Arc::new(store))
//!         .with_policy(Policy::fixed_window("default", 100, Duration::from_secs(60)).unwrap())
//!         .build()
//!         .unwrap();
//! }
//! ```

use crate::application::ports::{KeyStore, StoreError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};

const CURRENT_THREAD_RUNTIME: &str = "current-thread runtime cannot block";

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Upper bound for a single command (default: 250ms)
    pub operation_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(250),
        }
    }
}

/// Redis-backed store for distributed admission control.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection, config })
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    /// Delete every key starting with `prefix`. Returns how many were removed.
    pub async fn purge_prefix(&self, prefix: &str) -> Result<usize, RedisError> {
        let pattern = format!("{}*", prefix);
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: usize = conn.del(&keys).await?;
                removed += deleted;
            }

            if next == 0 {
                return Ok(removed);
            }
            cursor = next;
        }
    }

    fn run<T, F>(&self, command: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        block_on_bounded(self.config.operation_timeout, command)
    }
}

/// Run one command on the current runtime, or a private one, bounded by
/// `timeout`.
fn block_on_bounded<T, F>(timeout: Duration, command: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    let bounded = async move {
        match tokio::time::timeout(timeout, command).await {
            Ok(result) => result.map_err(|e| StoreError::Unavailable(e.to_string())),
            Err(_) => Err(StoreError::Timeout),
        }
    };

    match Handle::try_current() {
        // block_in_place panics on a current-thread runtime
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Err(StoreError::Unavailable(
                CURRENT_THREAD_RUNTIME.to_string(),
            )),
            _ => tokio::task::block_in_place(|| handle.block_on(bounded)),
        },
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .block_on(bounded),
    }
}

impl KeyStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection.clone();
        self.run(async move { conn.get(key).await })
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.run(async move {
            match ttl {
                Some(ttl) => {
                    // PSETEX rejects a zero expiry
                    let millis: u64 = ttl.as_millis().try_into().unwrap_or(u64::MAX).max(1);
                    conn.pset_ex(key, value, millis).await
                }
                None => conn.set(key, value).await,
            }
        })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.run(async move { conn.del(key).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdmissionController, Policy, TrackerKey};
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_millis(50);

    /// Store whose commands complete immediately but go through the same
    /// runtime bridge as Redis commands.
    #[derive(Debug)]
    struct BridgedStore;

    impl KeyStore for BridgedStore {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            block_on_bounded(TIMEOUT, async { Ok(None) })
        }

        fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<(), StoreError> {
            block_on_bounded(TIMEOUT, async { Ok(()) })
        }

        fn delete(&self, _key: &str) -> Result<(), StoreError> {
            block_on_bounded(TIMEOUT, async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_current_thread_runtime_is_unavailable() {
        let result = block_on_bounded(TIMEOUT, async { Ok::<u8, RedisError>(1) });
        assert_eq!(
            result,
            Err(StoreError::Unavailable(CURRENT_THREAD_RUNTIME.to_string()))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_multi_thread_runtime_blocks_in_place() {
        let result = block_on_bounded(TIMEOUT, async { Ok::<u8, RedisError>(2) });
        assert_eq!(result, Ok(2));
    }

    #[test]
    fn test_outside_runtime_uses_private_runtime() {
        let result = block_on_bounded(TIMEOUT, async { Ok::<u8, RedisError>(3) });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_stalled_command_times_out() {
        let stalled = std::future::pending::<Result<u8, RedisError>>();
        assert_eq!(block_on_bounded(TIMEOUT, stalled), Err(StoreError::Timeout));
    }

    #[tokio::test]
    async fn test_current_thread_runtime_degrades_admission() {
        let controller = AdmissionController::builder()
            .with_store(Arc::new(BridgedStore))
            .with_policy(Policy::fixed_window("default", 1, Duration::from_secs(60)).unwrap())
            .build()
            .unwrap();
        let alice = TrackerKey::user("alice");

        for _ in 0..3 {
            let decision = controller.admit(&alice, "/claims", "default").unwrap();
            assert!(decision.allowed);
            assert!(decision.degraded);
        }
    }
}
