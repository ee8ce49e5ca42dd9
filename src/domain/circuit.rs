//! Circuit breaker state machine.
//!
//! The machine is pure: every transition takes the current time and the
//! thresholds explicitly and reports what changed, so it can be persisted
//! in any key/value store between calls.

use serde::{Deserialize, Serialize};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CircuitState {
    /// Operating normally, all work is attempted
    #[default]
    Closed,
    /// Tripped, work is refused until the recovery timeout elapses
    Open,
    /// Probing whether the tracker has recovered
    HalfOpen,
}

impl CircuitState {
    /// Lowercase name used in logs and status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds a circuit is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Failures while closed before the circuit opens
    pub failure_threshold: u32,
    /// Successes while half-open before the circuit closes
    pub success_threshold: u32,
    /// How long an open circuit refuses work (ms)
    pub timeout_ms: u64,
}

/// Persisted circuit state for one key.
///
/// `failure_count` only accumulates while closed and `success_count` only
/// while half-open. Opening clears `success_count`; closing clears both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CircuitRecord {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures while closed
    pub failure_count: u32,
    /// Consecutive successes while half-open
    pub success_count: u32,
    /// When the circuit last opened (epoch ms)
    pub opened_at_ms: Option<u64>,
}

impl CircuitRecord {
    /// Decide whether work may be attempted at `now`.
    ///
    /// An open circuit whose timeout has elapsed moves to half-open and
    /// admits the caller as a probe. Concurrent callers racing through the
    /// same transition are all admitted as probes.
    pub fn poll(&mut self, now_ms: u64, thresholds: &Thresholds) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = self.opened_at_ms.unwrap_or(0);
                if now_ms.saturating_sub(opened_at) > thresholds.timeout_ms {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful unit of work.
    pub fn record_success(&mut self, thresholds: &Thresholds) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count = self.success_count.saturating_add(1);
                if self.success_count >= thresholds.success_threshold {
                    self.close();
                }
            }
            CircuitState::Open => {
                // Late completion from before the trip
            }
        }
    }

    /// Record a failed unit of work.
    pub fn record_failure(&mut self, now_ms: u64, thresholds: &Thresholds) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = self.failure_count.saturating_add(1);
                if self.failure_count >= thresholds.failure_threshold {
                    self.open(now_ms);
                }
            }
            CircuitState::HalfOpen => self.open(now_ms),
            CircuitState::Open => {}
        }
    }

    /// When the next probe will be admitted, if the circuit is open.
    pub fn next_probe_at(&self, thresholds: &Thresholds) -> Option<u64> {
        match (self.state, self.opened_at_ms) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(opened_at.saturating_add(thresholds.timeout_ms))
            }
            _ => None,
        }
    }

    fn open(&mut self, now_ms: u64) {
        self.state = CircuitState::Open;
        self.opened_at_ms = Some(now_ms);
        self.success_count = 0;
    }

    fn close(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: Thresholds = Thresholds {
        failure_threshold: 3,
        success_threshold: 2,
        timeout_ms: 5_000,
    };

    fn opened_at(now: u64) -> CircuitRecord {
        let mut record = CircuitRecord::default();
        for _ in 0..THRESHOLDS.failure_threshold {
            record.record_failure(now, &THRESHOLDS);
        }
        record
    }

    #[test]
    fn test_initial_state() {
        let mut record = CircuitRecord::default();
        assert_eq!(record.state, CircuitState::Closed);
        assert!(record.poll(0, &THRESHOLDS));
    }

    #[test]
    fn test_failure_threshold_opens() {
        let mut record = CircuitRecord::default();
        record.record_failure(10, &THRESHOLDS);
        record.record_failure(20, &THRESHOLDS);
        assert_eq!(record.state, CircuitState::Closed);
        assert_eq!(record.failure_count, 2);

        record.record_failure(30, &THRESHOLDS);
        assert_eq!(record.state, CircuitState::Open);
        assert_eq!(record.opened_at_ms, Some(30));
        assert!(!record.poll(30, &THRESHOLDS));
    }

    #[test]
    fn test_success_resets_failures_while_closed() {
        let mut record = CircuitRecord::default();
        record.record_failure(0, &THRESHOLDS);
        record.record_failure(0, &THRESHOLDS);
        record.record_success(&THRESHOLDS);
        assert_eq!(record.failure_count, 0);
        record.record_failure(0, &THRESHOLDS);
        assert_eq!(record.state, CircuitState::Closed);
    }

    #[test]
    fn test_timeout_is_exclusive() {
        let mut record = opened_at(1_000);
        assert!(!record.poll(6_000, &THRESHOLDS));
        assert_eq!(record.state, CircuitState::Open);
        assert!(record.poll(6_001, &THRESHOLDS));
        assert_eq!(record.state, CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_admits_every_probe() {
        let mut record = opened_at(0);
        assert!(record.poll(5_001, &THRESHOLDS));
        assert!(record.poll(5_001, &THRESHOLDS));
        assert!(record.poll(5_002, &THRESHOLDS));
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let mut record = opened_at(0);
        record.poll(5_001, &THRESHOLDS);

        record.record_success(&THRESHOLDS);
        assert_eq!(record.state, CircuitState::HalfOpen);
        assert_eq!(record.success_count, 1);

        record.record_success(&THRESHOLDS);
        assert_eq!(record, CircuitRecord::default());
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_timestamp() {
        let mut record = opened_at(0);
        record.poll(5_001, &THRESHOLDS);
        record.record_success(&THRESHOLDS);

        record.record_failure(7_000, &THRESHOLDS);
        assert_eq!(record.state, CircuitState::Open);
        assert_eq!(record.opened_at_ms, Some(7_000));
        assert_eq!(record.success_count, 0);
        assert!(!record.poll(10_000, &THRESHOLDS));
    }

    #[test]
    fn test_failures_do_not_accumulate_while_open() {
        let mut record = opened_at(0);
        let before = record;
        record.record_failure(100, &THRESHOLDS);
        record.record_success(&THRESHOLDS);
        assert_eq!(record, before);
    }

    #[test]
    fn test_next_probe_at() {
        let record = opened_at(2_000);
        assert_eq!(record.next_probe_at(&THRESHOLDS), Some(7_000));
        assert_eq!(CircuitRecord::default().next_probe_at(&THRESHOLDS), None);
    }
}
