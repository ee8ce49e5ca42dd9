//! Integration tests for building a controller from deserialized config.

use admission_control::infrastructure::mocks::MockClock;
use admission_control::{
    AdmissionConfig, AdmissionControllerBuilder, BreakerScope, BuildError, Clock, PolicyError,
    TrackerKey, WindowAlgorithm,
};
use std::sync::Arc;
use std::time::Duration;

const FULL_CONFIG: &str = r#"{
    "key_prefix": "svc:",
    "breaker_scope": "per_policy",
    "circuit_breaker": {
        "failure_threshold": 3,
        "success_threshold": 2,
        "recovery_timeout_ms": 5000
    },
    "monitor": { "anomaly_threshold": 20 },
    "policies": [
        { "name": "default", "window_ms": 60000, "max_requests": 100 },
        {
            "name": "auth",
            "window_ms": 900000,
            "max_requests": 5,
            "block_duration_ms": 3600000,
            "algorithm": "sliding_window"
        }
    ]
}"#;

#[test]
fn test_parse_full_config() {
    let config: AdmissionConfig = serde_json::from_str(FULL_CONFIG).unwrap();

    assert_eq!(config.key_prefix, "svc:");
    assert_eq!(config.breaker_scope, BreakerScope::PerPolicy);
    assert_eq!(config.circuit_breaker.recovery_timeout_ms, 5000);
    assert_eq!(config.monitor.anomaly_threshold, 20);
    // Unspecified monitor fields keep their defaults
    assert_eq!(config.monitor.max_tracked_violators, 1000);

    let auth = &config.policies[1];
    assert_eq!(auth.algorithm, WindowAlgorithm::SlidingWindow);
    assert_eq!(auth.block_duration_ms, Some(3_600_000));
    assert_eq!(config.policies[0].algorithm, WindowAlgorithm::FixedWindow);
    assert_eq!(config.policies[0].block_duration_ms, None);
}

#[test]
fn test_minimal_config_uses_defaults() {
    let config: AdmissionConfig = serde_json::from_str(
        r#"{ "policies": [{ "name": "default", "window_ms": 1000, "max_requests": 3 }] }"#,
    )
    .unwrap();

    assert_eq!(config.key_prefix, "admission:");
    assert_eq!(config.breaker_scope, BreakerScope::PerTracker);
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.circuit_breaker.success_threshold, 1);
    assert_eq!(config.circuit_breaker.recovery_timeout_ms, 30_000);
}

#[test]
fn test_build_from_config() {
    let config: AdmissionConfig = serde_json::from_str(FULL_CONFIG).unwrap();
    let clock: Arc<dyn Clock> = Arc::new(MockClock::new(1_700_000_000_000));
    let controller = AdmissionControllerBuilder::from_config(config)
        .with_clock(clock)
        .build()
        .unwrap();

    assert_eq!(controller.policies().names(), vec!["auth", "default"]);
    assert_eq!(controller.breaker_scope(), BreakerScope::PerPolicy);

    let alice = TrackerKey::user("alice");
    for _ in 0..5 {
        assert!(controller.admit(&alice, "/login", "auth").unwrap().allowed);
    }
    let denied = controller.admit(&alice, "/login", "auth").unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after_secs, Some(3600));

    // Per-policy scope: the default resource is unaffected
    assert!(controller.admit(&alice, "/claims", "default").unwrap().allowed);
}

#[test]
fn test_invalid_policy_rejected_at_build() {
    let config: AdmissionConfig = serde_json::from_str(
        r#"{ "policies": [{ "name": "default", "window_ms": 0, "max_requests": 3 }] }"#,
    )
    .unwrap();

    let err = AdmissionControllerBuilder::from_config(config)
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        BuildError::Policy(PolicyError::ZeroWindow("default".to_string()))
    );
    assert_eq!(
        err.to_string(),
        "policy configuration error: policy 'default': window_ms must be greater than 0"
    );
}

#[test]
fn test_empty_config_rejected_at_build() {
    let config: AdmissionConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(
        AdmissionControllerBuilder::from_config(config)
            .build()
            .unwrap_err(),
        BuildError::NoPolicies
    );
}

#[test]
fn test_unknown_algorithm_fails_to_parse() {
    let result: Result<AdmissionConfig, _> = serde_json::from_str(
        r#"{ "policies": [{ "name": "x", "window_ms": 1, "max_requests": 1, "algorithm": "leaky" }] }"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_config_round_trips_through_json() {
    let config: AdmissionConfig = serde_json::from_str(FULL_CONFIG).unwrap();
    let json = serde_json::to_string(&config).unwrap();
    let parsed: AdmissionConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
    assert_eq!(
        Duration::from_millis(parsed.circuit_breaker.recovery_timeout_ms),
        Duration::from_secs(5)
    );
}
