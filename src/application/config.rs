//! Declarative configuration for the admission controller.
//!
//! [`AdmissionConfig`] is plain data meant to be deserialized from whatever
//! format the host application uses. Durations are expressed in
//! milliseconds. Validation happens when the config is turned into a
//! controller, not when it is parsed.

use crate::application::circuit_breaker::CircuitBreakerConfig;
use crate::application::monitor::MonitorConfig;
use crate::application::records::DEFAULT_KEY_PREFIX;
use crate::domain::policy::{duration_ms, Policy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error returned when breaker or monitor settings are unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Failure threshold must be greater than zero
    ZeroFailureThreshold,
    /// Success threshold must be greater than zero
    ZeroSuccessThreshold,
    /// Recovery timeout must be greater than zero
    ZeroRecoveryTimeout,
    /// Anomaly threshold must be greater than zero
    ZeroAnomalyThreshold,
    /// The violator index must hold at least one tracker
    ZeroTrackedViolators,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroFailureThreshold => {
                write!(f, "circuit breaker failure_threshold must be greater than 0")
            }
            ConfigError::ZeroSuccessThreshold => {
                write!(f, "circuit breaker success_threshold must be greater than 0")
            }
            ConfigError::ZeroRecoveryTimeout => {
                write!(f, "circuit breaker recovery timeout must be greater than 0")
            }
            ConfigError::ZeroAnomalyThreshold => {
                write!(f, "monitor anomaly_threshold must be greater than 0")
            }
            ConfigError::ZeroTrackedViolators => {
                write!(f, "monitor max_tracked_violators must be greater than 0")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// How circuits are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    /// One circuit per tracker, shared by every policy
    #[default]
    PerTracker,
    /// One circuit per tracker and policy, so a flood on one resource
    /// class leaves the others usable
    PerPolicy,
}

/// Serializable form of [`CircuitBreakerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        CircuitBreakerConfig::default().into()
    }
}

impl From<CircuitBreakerConfig> for CircuitBreakerSettings {
    fn from(config: CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            recovery_timeout_ms: duration_ms(config.recovery_timeout),
        }
    }
}

impl From<CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            success_threshold: settings.success_threshold,
            recovery_timeout: Duration::from_millis(settings.recovery_timeout_ms),
        }
    }
}

/// Complete controller configuration.
///
/// # Example
/// ```
/// use admission_control::AdmissionConfig;
///
/// let config = AdmissionConfig::default();
/// assert_eq!(config.key_prefix, "admission:");
/// assert_eq!(config.circuit_breaker.failure_threshold, 5);
/// assert!(config.policies.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Namespace for every key written to the store
    pub key_prefix: String,
    /// Named policies; at least one is required to build a controller
    pub policies: Vec<Policy>,
    /// Circuit breaker thresholds
    pub circuit_breaker: CircuitBreakerSettings,
    /// Violation monitor settings
    pub monitor: MonitorConfig,
    /// How circuits are keyed
    pub breaker_scope: BreakerScope,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            policies: Vec::new(),
            circuit_breaker: CircuitBreakerSettings::default(),
            monitor: MonitorConfig::default(),
            breaker_scope: BreakerScope::default(),
        }
    }
}
