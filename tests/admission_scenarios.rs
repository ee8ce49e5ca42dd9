//! End-to-end admission scenarios driven through the public API.

use admission_control::infrastructure::mocks::{FaultyStore, MockClock};
use admission_control::{
    AdmissionController, CircuitBreakerConfig, CircuitState, Clock, KeyStore, Policy,
    ShardedStore, TrackerKey,
};
use std::sync::Arc;
use std::time::Duration;

const EPOCH: u64 = 1_700_000_000_000;

fn controller_at(clock: &MockClock, policies: Vec<Policy>) -> AdmissionController {
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    AdmissionController::builder()
        .with_clock(Arc::clone(&shared))
        .with_store(Arc::new(ShardedStore::with_clock(shared)))
        .with_policies(policies)
        .build()
        .unwrap()
}

#[test]
fn test_fixed_window_timeline() {
    let clock = MockClock::new(EPOCH);
    let policy = Policy::fixed_window("default", 3, Duration::from_millis(1000)).unwrap();
    let controller = controller_at(&clock, vec![policy]);
    let alice = TrackerKey::user("alice");

    let mut results = Vec::new();
    for t in [0, 100, 200, 300, 1100] {
        clock.set(EPOCH + t);
        results.push(controller.admit(&alice, "/claims", "default").unwrap().allowed);
    }

    assert_eq!(results, vec![true, true, true, false, true]);
}

#[test]
fn test_remaining_is_monotonic_within_window() {
    let clock = MockClock::new(EPOCH);
    let policy = Policy::fixed_window("default", 5, Duration::from_secs(60)).unwrap();
    let controller = controller_at(&clock, vec![policy]);
    let bob = TrackerKey::user("bob");

    let mut previous = u64::MAX;
    for _ in 0..8 {
        let decision = controller.admit(&bob, "/claims", "default").unwrap();
        assert!(decision.remaining <= previous);
        previous = decision.remaining;
        clock.advance(Duration::from_secs(1));
    }
    assert_eq!(previous, 0);
}

#[test]
fn test_sliding_window_never_exceeds_quota() {
    for (max, window_ms) in [(1u64, 1000u64), (2, 1000), (3, 2000), (5, 600), (4, 10_000)] {
        let clock = MockClock::new(EPOCH);
        let policy =
            Policy::sliding_window("sliding", max, Duration::from_millis(window_ms)).unwrap();
        let controller = controller_at(&clock, vec![policy]);
        let carol = TrackerKey::user("carol");

        let mut admitted = Vec::new();
        for step in 0..40 {
            let now = EPOCH + step * (window_ms / 2);
            clock.set(now);
            if controller.admit(&carol, "/feed", "sliding").unwrap().allowed {
                admitted.push(now);
            }
        }

        for &end in &admitted {
            let in_span = admitted
                .iter()
                .filter(|&&t| t <= end && t + window_ms > end)
                .count() as u64;
            assert!(
                in_span <= max,
                "max={} window={}: {} admitted in span ending at {}",
                max,
                window_ms,
                in_span,
                end
            );
        }
    }
}

#[test]
fn test_breaker_recovery_timeline() {
    let clock = MockClock::new(EPOCH);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let controller = AdmissionController::builder()
        .with_clock(shared)
        .with_policy(Policy::fixed_window("default", 100, Duration::from_secs(60)).unwrap())
        .with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(5000),
        })
        .build()
        .unwrap();
    let dave = TrackerKey::wallet("0xDAVE");

    for _ in 0..3 {
        controller.report_outcome(&dave, false);
    }
    let refused = controller.admit(&dave, "/pay", "default").unwrap();
    assert!(refused.circuit_open);
    assert_eq!(refused.reset_at_ms, EPOCH + 5000);

    clock.advance(Duration::from_millis(5001));
    let probe = controller.admit(&dave, "/pay", "default").unwrap();
    assert!(probe.allowed);
    assert!(!probe.circuit_open);

    let status = controller.circuit_status(&dave);
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);
}

#[test]
fn test_reset_circuit_is_idempotent() {
    let clock = MockClock::new(EPOCH);
    let policy = Policy::fixed_window("default", 10, Duration::from_secs(1)).unwrap();
    let controller = controller_at(&clock, vec![policy]);
    let erin = TrackerKey::user("erin");

    controller.reset_circuit(&erin);
    assert!(controller.admit(&erin, "/", "default").unwrap().allowed);

    for _ in 0..5 {
        controller.report_outcome(&erin, false);
    }
    assert!(controller.admit(&erin, "/", "default").unwrap().circuit_open);

    controller.reset_circuit(&erin);
    controller.reset_circuit(&erin);
    assert!(controller.admit(&erin, "/", "default").unwrap().allowed);
}

#[test]
fn test_ip_variants_share_quota() {
    let clock = MockClock::new(EPOCH);
    let policy = Policy::fixed_window("default", 2, Duration::from_secs(60)).unwrap();
    let controller = controller_at(&clock, vec![policy]);

    let first = TrackerKey::resolve(None, None, Some("192.0.2.10:443"));
    let second = TrackerKey::resolve(Some(""), None, Some("::ffff:192.0.2.10, 10.0.0.1"));
    let third = TrackerKey::resolve(None, Some("  "), Some("192.0.2.10"));
    assert_eq!(first, second);

    assert!(controller.admit(&first, "/", "default").unwrap().allowed);
    assert!(controller.admit(&second, "/", "default").unwrap().allowed);
    assert!(!controller.admit(&third, "/", "default").unwrap().allowed);
}

#[test]
fn test_block_duration_outlasts_window() {
    let clock = MockClock::new(EPOCH);
    let policy = Policy::fixed_window("auth", 1, Duration::from_secs(1))
        .unwrap()
        .with_block_duration(Duration::from_secs(30))
        .unwrap();
    let controller = controller_at(&clock, vec![policy]);
    let frank = TrackerKey::user("frank");

    assert!(controller.admit(&frank, "/login", "auth").unwrap().allowed);
    let denied = controller.admit(&frank, "/login", "auth").unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after_secs, Some(30));

    // The window has rolled over but the block holds
    clock.advance(Duration::from_secs(5));
    let still_blocked = controller.admit(&frank, "/login", "auth").unwrap();
    assert!(!still_blocked.allowed);
    assert_eq!(still_blocked.reset_at_ms, EPOCH + 30_000);

    clock.advance(Duration::from_secs(26));
    assert!(controller.admit(&frank, "/login", "auth").unwrap().allowed);
}

#[test]
fn test_instances_share_state_through_store() {
    let clock = MockClock::new(EPOCH);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let store: Arc<dyn KeyStore> = Arc::new(ShardedStore::with_clock(Arc::clone(&shared)));
    let policy = Policy::fixed_window("default", 2, Duration::from_secs(60)).unwrap();

    let build = || {
        AdmissionController::builder()
            .with_clock(Arc::clone(&shared))
            .with_store(Arc::clone(&store))
            .with_policy(policy.clone())
            .build()
            .unwrap()
    };
    let node_a = build();
    let node_b = build();
    let grace = TrackerKey::user("grace");

    assert!(node_a.admit(&grace, "/", "default").unwrap().allowed);
    assert!(node_b.admit(&grace, "/", "default").unwrap().allowed);
    assert!(!node_a.admit(&grace, "/", "default").unwrap().allowed);
    assert_eq!(node_b.violation_stats(&grace).violations_today, 1);
}

#[test]
fn test_store_outage_degrades_to_allow() {
    let clock = MockClock::new(EPOCH);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let store = Arc::new(FaultyStore::new(Arc::clone(&shared)));
    let controller = AdmissionController::builder()
        .with_clock(shared)
        .with_store(store.clone())
        .with_policy(Policy::fixed_window("default", 1, Duration::from_secs(60)).unwrap())
        .build()
        .unwrap();
    let heidi = TrackerKey::user("heidi");

    assert!(controller.admit(&heidi, "/", "default").unwrap().allowed);
    assert!(!controller.admit(&heidi, "/", "default").unwrap().allowed);

    store.set_failing(true);
    let decision = controller.admit(&heidi, "/", "default").unwrap();
    assert!(decision.allowed);
    assert!(decision.degraded);
    assert!(store.failed_calls() > 0);

    store.set_failing(false);
    assert!(!controller.admit(&heidi, "/", "default").unwrap().allowed);
}

#[test]
fn test_concurrent_admission_across_trackers() {
    use std::thread;

    let clock = MockClock::new(EPOCH);
    let policy = Policy::fixed_window("default", 10, Duration::from_secs(60)).unwrap();
    let controller = controller_at(&clock, vec![policy]);
    let mut handles = vec![];

    for i in 0..8 {
        let controller = controller.clone();
        handles.push(thread::spawn(move || {
            let tracker = TrackerKey::user(&format!("user{}", i));
            (0..15)
                .filter(|_| controller.admit(&tracker, "/", "default").unwrap().allowed)
                .count()
        }));
    }

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 10);
    }
    assert_eq!(controller.metrics().admitted(), 80);
    assert_eq!(controller.metrics().rate_limited(), 40);
}
