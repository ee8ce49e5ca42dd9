//! # admission-control
//!
//! Per-key admission control for request-serving systems.
//!
//! For every incoming unit of work, identified by a tracker key (user,
//! wallet or client IP), the [`AdmissionController`] decides whether the
//! request may proceed. It combines three mechanisms over one shared,
//! TTL-capable key/value store:
//!
//! - **Rate limiting** with fixed-window or sliding-window counting per
//!   named [`Policy`], with an optional penalty block after a rejection
//! - **Circuit breaking** per tracker (optionally per tracker and policy),
//!   tripped by sustained rate-limit violations or reported failures
//! - **Violation monitoring**: hourly and daily counters, a daily violator
//!   ranking and anomaly signals for short bursts of violations
//!
//! ## Quick Start
//!
//! ```rust
//! use admission_control::{AdmissionController, Policy, TrackerKey};
//! use std::time::Duration;
//!
//! let controller = AdmissionController::builder()
//!     .with_policy(Policy::fixed_window("default", 100, Duration::from_secs(60)).unwrap())
//!     .with_policy(
//!         Policy::sliding_window("auth", 5, Duration::from_secs(900))
//!             .unwrap()
//!             .with_block_duration(Duration::from_secs(3600))
//!             .unwrap(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let tracker = TrackerKey::resolve(None, None, Some("203.0.113.7:51234"));
//! let decision = controller.admit(&tracker, "/login", "auth").unwrap();
//!
//! if decision.allowed {
//!     // ... do the work, then tell the breaker how it went
//!     controller.report_outcome(&tracker, true);
//! } else {
//!     for (name, value) in decision.headers() {
//!         println!("{}: {}", name, value);
//!     }
//! }
//! ```
//!
//! ## Degradation
//!
//! The store is the only shared dependency, and its failures never become
//! request failures:
//!
//! - The rate limiter fails open: the request is admitted and the decision
//!   is marked `degraded`.
//! - The circuit breaker treats an unreadable circuit as closed.
//! - The monitor drops the sample.
//!
//! Every absorbed failure is logged at `warn` level and counted in
//! [`Metrics::store_errors`]. The only errors returned to callers are
//! configuration errors ([`BuildError`]) and unknown policy names
//! ([`AdmissionError`]).
//!
//! ## Logging
//!
//! The crate logs through `tracing` and never installs a subscriber.
//! Anomaly signals are emitted at `error` level on the
//! `admission_control::security` target so they can be routed separately.
//!
//! ## Stores
//!
//! [`ShardedStore`] (the default) keeps state in process. With the
//! `redis-store` feature, `RedisStore` shares state between instances.
//! Any other backend can be plugged in by implementing [`KeyStore`].

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    circuit::CircuitState,
    decision::AdmissionDecision,
    policy::{Policy, PolicyError, PolicyTable, WindowAlgorithm},
    tracker::{normalize_ip, TrackerKey, TrackerKind},
};

pub use application::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitKey, CircuitStatus},
    config::{AdmissionConfig, BreakerScope, CircuitBreakerSettings, ConfigError},
    controller::{AdmissionController, AdmissionControllerBuilder, AdmissionError, BuildError},
    metrics::{Metrics, MetricsSnapshot},
    monitor::{
        AnomalySignal, MonitorConfig, ViolationDetails, ViolationMonitor, ViolationStats,
        ViolatorEntry, SECURITY_TARGET,
    },
    ports::{Clock, KeyStore, StoreError},
    rate_limiter::{RateLimitOutcome, RateLimiter},
    records::{RecordStore, DEFAULT_KEY_PREFIX},
};

pub use infrastructure::{clock::SystemClock, store::ShardedStore};

#[cfg(feature = "redis-store")]
pub use infrastructure::redis_store::{RedisStore, RedisStoreConfig};
