//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly, enabling deterministic
/// testing of windows, circuit timeouts and store TTLs.
///
/// # Examples
///
/// ```
/// use admission_control::infrastructure::mocks::MockClock;
/// use admission_control::application::ports::Clock;
/// use std::time::Duration;
///
/// let clock = MockClock::new(1_000);
/// assert_eq!(clock.now_ms(), 1_000);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now_ms(), 11_000);
///
/// clock.set(50);
/// assert_eq!(clock.now_ms(), 50);
/// ```
///
/// # Thread Safety
///
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_ms: Arc<AtomicU64>,
}

impl MockClock {
    /// Create a mock clock starting at `start_ms` epoch milliseconds.
    pub fn new(start_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let delta: u64 = duration.as_millis().try_into().unwrap_or(u64::MAX);
        self.current_ms.fetch_add(delta, Ordering::SeqCst);
    }

    /// Set the clock to a specific epoch millisecond.
    pub fn set(&self, now_ms: u64) {
        self.current_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }
}
