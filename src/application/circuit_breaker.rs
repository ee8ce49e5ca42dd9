//! Per-key circuit breaker.
//!
//! Implements the circuit breaker pattern per tracker (optionally per
//! tracker and resource scope). Each circuit's state lives in the record
//! store, so every instance sharing the store sees the same circuits.
//!
//! Store failures never block work: an unreadable circuit is treated as
//! closed, so an outage of the store cannot amplify an outage elsewhere.

use crate::application::config::ConfigError;
use crate::application::metrics::Metrics;
use crate::application::ports::StoreError;
use crate::application::records::RecordStore;
use crate::domain::circuit::{CircuitRecord, CircuitState, Thresholds};
use crate::domain::policy::duration_ms;
use crate::domain::tracker::TrackerKey;
use std::fmt;
use std::time::Duration;

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Number of successful probes before closing circuit
    pub success_threshold: u32,
    /// Duration to wait before attempting recovery
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Check that every threshold is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::ZeroSuccessThreshold);
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::ZeroRecoveryTimeout);
        }
        Ok(())
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout_ms: duration_ms(self.recovery_timeout),
        }
    }

    /// Lifetime of a stored circuit record.
    ///
    /// Long enough for an open circuit to be probed, short enough that a
    /// tracker that goes silent is eventually forgotten.
    fn record_ttl(&self) -> Duration {
        self.recovery_timeout.saturating_mul(2)
    }
}

/// Identity of one circuit: a tracker, optionally scoped to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CircuitKey(String);

impl CircuitKey {
    /// Circuit shared by every resource the tracker touches.
    pub fn tracker(tracker: &TrackerKey) -> Self {
        Self(format!("cb:{}", tracker))
    }

    /// Circuit for one tracker on one resource scope.
    pub fn scoped(tracker: &TrackerKey, scope: &str) -> Self {
        Self(format!("cb@{}:{}", scope, tracker))
    }

    /// Record key of this circuit.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CircuitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only view of a circuit for administrative callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitStatus {
    /// Circuit identity
    pub key: CircuitKey,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures counted while closed
    pub failure_count: u32,
    /// Successful probes counted while half-open
    pub success_count: u32,
    /// When the circuit last opened (epoch ms)
    pub opened_at_ms: Option<u64>,
    /// When an open circuit admits its next probe (epoch ms)
    pub next_probe_at_ms: Option<u64>,
}

/// Circuit breaker over the record store.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    records: RecordStore,
    config: CircuitBreakerConfig,
    metrics: Metrics,
}

impl CircuitBreaker {
    /// Create a circuit breaker with a validated configuration.
    pub fn new(
        records: RecordStore,
        config: CircuitBreakerConfig,
        metrics: Metrics,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            records,
            config,
            metrics,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check if the circuit should allow an operation.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// and lets the caller through as a probe. Callers arriving during the
    /// same instant may all be admitted as probes.
    pub fn can_execute(&self, key: &CircuitKey) -> bool {
        let thresholds = self.config.thresholds();
        let result = self.load(key).and_then(|mut record| {
            let before = record.state;
            let allowed = record.poll(self.records.now_ms(), &thresholds);
            if record.state != before {
                self.save(key, &record)?;
                tracing::info!(circuit = %key, "Circuit half-open, admitting probe");
            }
            Ok(allowed)
        });

        result.unwrap_or_else(|e| {
            self.store_failed(key, &e);
            true
        })
    }

    /// Record a successful operation.
    pub fn record_success(&self, key: &CircuitKey) {
        let thresholds = self.config.thresholds();
        let result = self.load(key).and_then(|mut record| {
            let before = record;
            record.record_success(&thresholds);
            if record != before {
                self.save(key, &record)?;
                if before.state == CircuitState::HalfOpen && record.state == CircuitState::Closed {
                    tracing::info!(circuit = %key, "Circuit closed after successful probes");
                }
            }
            Ok(())
        });

        if let Err(e) = result {
            self.store_failed(key, &e);
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self, key: &CircuitKey) {
        let thresholds = self.config.thresholds();
        let result = self.load(key).and_then(|mut record| {
            let before = record;
            record.record_failure(self.records.now_ms(), &thresholds);
            if record != before {
                self.save(key, &record)?;
                if record.state == CircuitState::Open {
                    tracing::info!(
                        circuit = %key,
                        from = %before.state,
                        failures = record.failure_count,
                        "Circuit opened"
                    );
                }
            }
            Ok(())
        });

        if let Err(e) = result {
            self.store_failed(key, &e);
        }
    }

    /// Reset the circuit to closed state, whatever its current state.
    pub fn reset(&self, key: &CircuitKey) {
        match self.records.remove(key.as_str()) {
            Ok(()) => tracing::info!(circuit = %key, "Circuit reset"),
            Err(e) => self.store_failed(key, &e),
        }
    }

    /// Current status of a circuit. Unreadable circuits report as closed.
    pub fn status(&self, key: &CircuitKey) -> CircuitStatus {
        let record = self.load(key).unwrap_or_else(|e| {
            self.store_failed(key, &e);
            CircuitRecord::default()
        });
        CircuitStatus {
            key: key.clone(),
            state: record.state,
            failure_count: record.failure_count,
            success_count: record.success_count,
            opened_at_ms: record.opened_at_ms,
            next_probe_at_ms: record.next_probe_at(&self.config.thresholds()),
        }
    }

    fn load(&self, key: &CircuitKey) -> Result<CircuitRecord, StoreError> {
        Ok(self
            .records
            .load::<CircuitRecord>(key.as_str())?
            .unwrap_or_default())
    }

    fn save(&self, key: &CircuitKey, record: &CircuitRecord) -> Result<(), StoreError> {
        self.records
            .save(key.as_str(), record, Some(self.config.record_ttl()))
    }

    fn store_failed(&self, key: &CircuitKey, error: &StoreError) {
        self.metrics.record_store_error();
        tracing::warn!(
            error = %error,
            circuit = %key,
            "Circuit store unavailable, treating circuit as closed"
        );
    }
}
