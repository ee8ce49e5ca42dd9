//! Observability metrics for admission control.
//!
//! Process-local counters; the persisted per-tracker statistics live in
//! the violation monitor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking admission statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Requests admitted
    admitted: AtomicU64,
    /// Requests denied by the rate limiter
    rate_limited: AtomicU64,
    /// Requests refused by an open circuit
    circuit_rejected: AtomicU64,
    /// Store failures absorbed by fail-open handling
    store_errors: AtomicU64,
    /// Attack-pattern signals raised
    anomalies: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub(crate) fn record_admitted(&self) {
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limited(&self) {
        self.inner.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_circuit_rejected(&self) {
        self.inner.circuit_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_error(&self) {
        self.inner.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_anomaly(&self) {
        self.inner.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the total number of admitted requests.
    pub fn admitted(&self) -> u64 {
        self.inner.admitted.load(Ordering::Relaxed)
    }

    /// Get the total number of rate-limited requests.
    pub fn rate_limited(&self) -> u64 {
        self.inner.rate_limited.load(Ordering::Relaxed)
    }

    /// Get the total number of requests refused by an open circuit.
    pub fn circuit_rejected(&self) -> u64 {
        self.inner.circuit_rejected.load(Ordering::Relaxed)
    }

    /// Get the total number of absorbed store errors.
    pub fn store_errors(&self) -> u64 {
        self.inner.store_errors.load(Ordering::Relaxed)
    }

    /// Get the total number of anomaly signals.
    pub fn anomalies(&self) -> u64 {
        self.inner.anomalies.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted(),
            rate_limited: self.rate_limited(),
            circuit_rejected: self.circuit_rejected(),
            store_errors: self.store_errors(),
            anomalies: self.anomalies(),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.inner.admitted.store(0, Ordering::Relaxed);
        self.inner.rate_limited.store(0, Ordering::Relaxed);
        self.inner.circuit_rejected.store(0, Ordering::Relaxed);
        self.inner.store_errors.store(0, Ordering::Relaxed);
        self.inner.anomalies.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests admitted
    pub admitted: u64,
    /// Requests denied by the rate limiter
    pub rate_limited: u64,
    /// Requests refused by an open circuit
    pub circuit_rejected: u64,
    /// Store failures absorbed by fail-open handling
    pub store_errors: u64,
    /// Attack-pattern signals raised
    pub anomalies: u64,
}

impl MetricsSnapshot {
    /// Total admission requests evaluated.
    pub fn total_requests(&self) -> u64 {
        self.admitted
            .saturating_add(self.rate_limited)
            .saturating_add(self.circuit_rejected)
    }

    /// Fraction of requests denied for any reason (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been processed.
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.rate_limited.saturating_add(self.circuit_rejected) as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initial_state() {
        let metrics = Metrics::new();
        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                admitted: 0,
                rate_limited: 0,
                circuit_rejected: 0,
                store_errors: 0,
                anomalies: 0,
            }
        );
    }

    #[test]
    fn test_snapshot() {
        let metrics = Metrics::new();
        metrics.record_admitted();
        metrics.record_admitted();
        metrics.record_rate_limited();
        metrics.record_circuit_rejected();
        metrics.record_store_error();
        metrics.record_anomaly();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.admitted, 2);
        assert_eq!(snapshot.rate_limited, 1);
        assert_eq!(snapshot.circuit_rejected, 1);
        assert_eq!(snapshot.store_errors, 1);
        assert_eq!(snapshot.anomalies, 1);
        assert_eq!(snapshot.total_requests(), 4);
    }

    #[test]
    fn test_rejection_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().rejection_rate(), 0.0);

        metrics.record_admitted();
        metrics.record_rate_limited();
        assert!((metrics.snapshot().rejection_rate() - 0.5).abs() < f64::EPSILON);

        metrics.record_circuit_rejected();
        metrics.record_rate_limited();
        assert!((metrics.snapshot().rejection_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        metrics.record_admitted();
        metrics.record_store_error();

        metrics.reset();
        assert_eq!(metrics.admitted(), 0);
        assert_eq!(metrics.store_errors(), 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics1 = Metrics::new();
        let metrics2 = metrics1.clone();
        metrics1.record_admitted();
        metrics2.record_admitted();
        assert_eq!(metrics1.admitted(), 2);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::thread;

        let metrics = Metrics::new();
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    m.record_admitted();
                    m.record_rate_limited();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.admitted(), 1000);
        assert_eq!(metrics.rate_limited(), 1000);
    }
}
