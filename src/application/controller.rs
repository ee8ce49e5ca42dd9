//! Admission controller: the single entry point callers use.
//!
//! For each request the controller consults the circuit breaker, then the
//! rate limiter, records the outcome with the violation monitor and feeds
//! the rate-limit verdict back into the breaker. A flood from one tracker
//! is therefore first throttled and, if it persists, cut off entirely.

use crate::application::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitKey, CircuitStatus,
};
use crate::application::config::{AdmissionConfig, BreakerScope, ConfigError};
use crate::application::metrics::Metrics;
use crate::application::monitor::{
    MonitorConfig, ViolationDetails, ViolationMonitor, ViolationStats, ViolatorEntry,
};
use crate::application::ports::{Clock, KeyStore};
use crate::application::rate_limiter::RateLimiter;
use crate::application::records::{RecordStore, DEFAULT_KEY_PREFIX};
use crate::domain::circuit::CircuitState;
use crate::domain::decision::AdmissionDecision;
use crate::domain::policy::{Policy, PolicyError, PolicyTable};
use crate::domain::tracker::TrackerKey;
use crate::domain::window::ceil_secs;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::store::ShardedStore;
use std::sync::Arc;

/// Error returned when building an [`AdmissionController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// At least one policy must be registered
    NoPolicies,
    /// A policy is invalid or duplicated
    Policy(PolicyError),
    /// Breaker or monitor settings are invalid
    Config(ConfigError),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::NoPolicies => write!(f, "at least one policy must be configured"),
            BuildError::Policy(e) => write!(f, "policy configuration error: {}", e),
            BuildError::Config(e) => write!(f, "configuration error: {}", e),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::NoPolicies => None,
            BuildError::Policy(e) => Some(e),
            BuildError::Config(e) => Some(e),
        }
    }
}

impl From<PolicyError> for BuildError {
    fn from(e: PolicyError) -> Self {
        BuildError::Policy(e)
    }
}

impl From<ConfigError> for BuildError {
    fn from(e: ConfigError) -> Self {
        BuildError::Config(e)
    }
}

/// Error returned by admission operations.
///
/// Store failures never surface here; they degrade toward admitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// No policy is registered under this name
    UnknownPolicy(String),
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::UnknownPolicy(name) => write!(f, "unknown policy '{}'", name),
        }
    }
}

impl std::error::Error for AdmissionError {}

/// Decides, per request, whether a tracker may proceed.
///
/// Cheap to clone; clones share the store, policies and metrics.
///
/// # Example
/// ```
/// use admission_control::{AdmissionController, Policy, TrackerKey};
/// use std::time::Duration;
///
/// let controller = AdmissionController::builder()
///     .with_policy(Policy::fixed_window("default", 2, Duration::from_secs(60)).unwrap())
///     .build()
///     .unwrap();
///
/// let alice = TrackerKey::user("alice");
/// assert!(controller.admit(&alice, "/claims", "default").unwrap().allowed);
/// assert!(controller.admit(&alice, "/claims", "default").unwrap().allowed);
///
/// let denied = controller.admit(&alice, "/claims", "default").unwrap();
/// assert!(!denied.allowed);
/// assert_eq!(denied.remaining, 0);
/// assert!(denied.retry_after_secs.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct AdmissionController {
    policies: Arc<PolicyTable>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    monitor: ViolationMonitor,
    scope: BreakerScope,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl AdmissionController {
    /// Create a builder for configuring the controller.
    pub fn builder() -> AdmissionControllerBuilder {
        AdmissionControllerBuilder::new()
    }

    /// Decide whether `tracker` may perform one unit of work on `path`
    /// under the named policy.
    ///
    /// # Errors
    ///
    /// Only an unregistered policy name is an error. Store failures are
    /// absorbed and produce an admitting, `degraded` decision.
    pub fn admit(
        &self,
        tracker: &TrackerKey,
        path: &str,
        policy_name: &str,
    ) -> Result<AdmissionDecision, AdmissionError> {
        let policy = self.policy(policy_name)?;

        if let Some(decision) = self.refuse_if_open(tracker, path, policy) {
            return Ok(decision);
        }

        let outcome = self.limiter.check(tracker, policy);
        self.monitor.record_outcome(tracker, path, outcome.allowed);

        let circuit = self.policy_circuit(tracker, policy);
        if outcome.allowed {
            self.metrics.record_admitted();
            self.breaker.record_success(&circuit);
        } else {
            self.metrics.record_rate_limited();
            self.monitor.record_violation(
                tracker,
                path,
                &ViolationDetails {
                    policy: policy.name.clone(),
                    limit: policy.max_requests,
                    retry_after_secs: outcome.retry_after_secs,
                    circuit_open: false,
                },
            );
            self.breaker.record_failure(&circuit);
        }

        Ok(AdmissionDecision {
            allowed: outcome.allowed,
            policy: policy.name.clone(),
            limit: outcome.limit,
            remaining: outcome.remaining,
            reset_at_ms: outcome.reset_at_ms,
            retry_after_secs: outcome.retry_after_secs,
            circuit_open: false,
            degraded: outcome.degraded,
        })
    }

    /// Check every circuit guarding this request; refuse on the first open one.
    fn refuse_if_open(
        &self,
        tracker: &TrackerKey,
        path: &str,
        policy: &Policy,
    ) -> Option<AdmissionDecision> {
        let open = self
            .guarding_circuits(tracker, policy)
            .into_iter()
            .find(|circuit| !self.breaker.can_execute(circuit))?;

        self.metrics.record_circuit_rejected();
        self.monitor.record_outcome(tracker, path, false);

        let now = self.clock.now_ms();
        let reset_at_ms = self
            .breaker
            .status(&open)
            .next_probe_at_ms
            .unwrap_or_else(|| now.saturating_add(self.recovery_timeout_ms()));

        tracing::debug!(
            tracker = %tracker,
            circuit = %open,
            policy = %policy.name,
            "Request refused by open circuit"
        );

        Some(AdmissionDecision {
            allowed: false,
            policy: policy.name.clone(),
            limit: policy.max_requests,
            remaining: 0,
            reset_at_ms,
            retry_after_secs: Some(ceil_secs(reset_at_ms.saturating_sub(now))),
            circuit_open: true,
            degraded: false,
        })
    }

    /// Report how a previously admitted unit of work turned out.
    ///
    /// Feeds the tracker-level circuit.
    pub fn report_outcome(&self, tracker: &TrackerKey, succeeded: bool) {
        let circuit = CircuitKey::tracker(tracker);
        if succeeded {
            self.breaker.record_success(&circuit);
        } else {
            self.breaker.record_failure(&circuit);
        }
    }

    /// Report an outcome against the circuit that guards `policy_name`.
    ///
    /// Identical to [`AdmissionController::report_outcome`] unless the
    /// breaker scope is [`BreakerScope::PerPolicy`].
    pub fn report_outcome_for(
        &self,
        tracker: &TrackerKey,
        policy_name: &str,
        succeeded: bool,
    ) -> Result<(), AdmissionError> {
        let circuit = self.policy_circuit(tracker, self.policy(policy_name)?);
        if succeeded {
            self.breaker.record_success(&circuit);
        } else {
            self.breaker.record_failure(&circuit);
        }
        Ok(())
    }

    /// Force every circuit of `tracker` closed.
    pub fn reset_circuit(&self, tracker: &TrackerKey) {
        self.breaker.reset(&CircuitKey::tracker(tracker));
        if self.scope == BreakerScope::PerPolicy {
            for policy in self.policies.iter() {
                self.breaker.reset(&CircuitKey::scoped(tracker, &policy.name));
            }
        }
    }

    /// Status of the tracker-level circuit.
    pub fn circuit_status(&self, tracker: &TrackerKey) -> CircuitStatus {
        self.breaker.status(&CircuitKey::tracker(tracker))
    }

    /// Status of the circuit that guards `policy_name` for `tracker`.
    pub fn circuit_status_for(
        &self,
        tracker: &TrackerKey,
        policy_name: &str,
    ) -> Result<CircuitStatus, AdmissionError> {
        let circuit = self.policy_circuit(tracker, self.policy(policy_name)?);
        Ok(self.breaker.status(&circuit))
    }

    /// Whether any circuit of `tracker` is currently open.
    pub fn is_circuit_open(&self, tracker: &TrackerKey) -> bool {
        let open = |circuit: &CircuitKey| self.breaker.status(circuit).state == CircuitState::Open;
        open(&CircuitKey::tracker(tracker))
            || (self.scope == BreakerScope::PerPolicy
                && self
                    .policies
                    .iter()
                    .any(|policy| open(&CircuitKey::scoped(tracker, &policy.name))))
    }

    /// Aggregated violation counters for `tracker`.
    pub fn violation_stats(&self, tracker: &TrackerKey) -> ViolationStats {
        self.monitor.violation_stats(tracker)
    }

    /// Trackers with the most violations today.
    pub fn top_violators(&self, limit: usize) -> Vec<ViolatorEntry> {
        self.monitor.top_violators(limit)
    }

    /// Violations recorded today against `path`.
    pub fn endpoint_violations(&self, path: &str) -> u64 {
        self.monitor.endpoint_violations(path)
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Registered policies.
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// How circuits are keyed.
    pub fn breaker_scope(&self) -> BreakerScope {
        self.scope
    }

    fn policy(&self, name: &str) -> Result<&Policy, AdmissionError> {
        self.policies
            .get(name)
            .ok_or_else(|| AdmissionError::UnknownPolicy(name.to_string()))
    }

    /// Circuit fed by rate-limit verdicts for this policy.
    fn policy_circuit(&self, tracker: &TrackerKey, policy: &Policy) -> CircuitKey {
        match self.scope {
            BreakerScope::PerTracker => CircuitKey::tracker(tracker),
            BreakerScope::PerPolicy => CircuitKey::scoped(tracker, &policy.name),
        }
    }

    /// Circuits consulted before admitting. In per-policy mode the
    /// tracker-level circuit, fed by `report_outcome`, still applies.
    fn guarding_circuits(&self, tracker: &TrackerKey, policy: &Policy) -> Vec<CircuitKey> {
        match self.scope {
            BreakerScope::PerTracker => vec![CircuitKey::tracker(tracker)],
            BreakerScope::PerPolicy => vec![
                CircuitKey::tracker(tracker),
                CircuitKey::scoped(tracker, &policy.name),
            ],
        }
    }

    fn recovery_timeout_ms(&self) -> u64 {
        crate::domain::policy::duration_ms(self.breaker.config().recovery_timeout)
    }
}

/// Builder for constructing an [`AdmissionController`].
#[derive(Debug, Clone)]
pub struct AdmissionControllerBuilder {
    store: Option<Arc<dyn KeyStore>>,
    clock: Option<Arc<dyn Clock>>,
    policies: Vec<Policy>,
    circuit_breaker: CircuitBreakerConfig,
    monitor: MonitorConfig,
    scope: BreakerScope,
    key_prefix: String,
}

impl AdmissionControllerBuilder {
    fn new() -> Self {
        Self {
            store: None,
            clock: None,
            policies: Vec::new(),
            circuit_breaker: CircuitBreakerConfig::default(),
            monitor: MonitorConfig::default(),
            scope: BreakerScope::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Start from a deserialized configuration.
    ///
    /// Store and clock still default to the in-memory store and system
    /// clock; override them with [`with_store`](Self::with_store) and
    /// [`with_clock`](Self::with_clock).
    pub fn from_config(config: AdmissionConfig) -> Self {
        Self {
            policies: config.policies,
            circuit_breaker: config.circuit_breaker.into(),
            monitor: config.monitor,
            scope: config.breaker_scope,
            key_prefix: config.key_prefix,
            ..Self::new()
        }
    }

    /// Use `store` for all state. Defaults to an in-memory [`ShardedStore`].
    pub fn with_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register a policy.
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Register several policies.
    pub fn with_policies(mut self, policies: impl IntoIterator<Item = Policy>) -> Self {
        self.policies.extend(policies);
        self
    }

    /// Set circuit breaker thresholds.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set violation monitor settings.
    pub fn with_monitor(mut self, config: MonitorConfig) -> Self {
        self.monitor = config;
        self
    }

    /// Choose how circuits are keyed.
    pub fn with_breaker_scope(mut self, scope: BreakerScope) -> Self {
        self.scope = scope;
        self
    }

    /// Namespace every stored key under `prefix`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    ///
    /// Returns `BuildError` if no policy is registered, a policy is invalid
    /// or duplicated, or the breaker or monitor settings are invalid.
    pub fn build(self) -> Result<AdmissionController, BuildError> {
        if self.policies.is_empty() {
            return Err(BuildError::NoPolicies);
        }
        let policies = PolicyTable::new(self.policies)?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(ShardedStore::with_clock(Arc::clone(&clock))));
        let records = RecordStore::new(store, Arc::clone(&clock), self.key_prefix);
        let metrics = Metrics::new();

        let breaker = CircuitBreaker::new(records.clone(), self.circuit_breaker, metrics.clone())?;
        let monitor = ViolationMonitor::new(records.clone(), self.monitor, metrics.clone())?;
        let limiter = RateLimiter::new(records, metrics.clone());

        tracing::debug!(
            policies = ?policies.names(),
            scope = ?self.scope,
            "Admission controller built"
        );

        Ok(AdmissionController {
            policies: Arc::new(policies),
            limiter,
            breaker,
            monitor,
            scope: self.scope,
            clock,
            metrics,
        })
    }
}

impl Default for AdmissionControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
