//! Window counting algorithms.
//!
//! Both algorithms are pure functions over plain epoch-millisecond
//! timestamps. Persistence is the caller's concern.

use crate::domain::policy::Policy;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Result of registering one request against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowVerdict {
    /// Whether the request fits in the quota
    pub allowed: bool,
    /// Requests left in the window, clamped at zero
    pub remaining: u64,
    /// When the quota is next replenished (epoch ms)
    pub reset_at_ms: u64,
    /// Seconds to wait before retrying, set only on rejection
    pub retry_after_secs: Option<u64>,
}

/// Fixed-window state: one hit counter per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounter {
    /// Requests counted in the current window
    pub hits: u64,
    /// Start of the current window (epoch ms)
    pub window_start_ms: u64,
}

impl WindowCounter {
    /// Open a window at `now` holding the triggering request.
    pub fn start(now_ms: u64) -> Self {
        Self {
            hits: 1,
            window_start_ms: now_ms,
        }
    }

    /// End of this window (epoch ms).
    pub fn reset_at(&self, policy: &Policy) -> u64 {
        self.window_start_ms.saturating_add(policy.window_ms)
    }

    /// Whether this window has elapsed at `now`.
    pub fn is_expired(&self, policy: &Policy, now_ms: u64) -> bool {
        now_ms >= self.reset_at(policy)
    }

    /// Register a request, rolling the window over when it has elapsed.
    ///
    /// Returns the new counter and the verdict. A fresh window always
    /// admits its first request.
    pub fn register(current: Option<Self>, policy: &Policy, now_ms: u64) -> (Self, WindowVerdict) {
        let counter = match current {
            Some(existing) if !existing.is_expired(policy, now_ms) => Self {
                hits: existing.hits.saturating_add(1),
                window_start_ms: existing.window_start_ms,
            },
            _ => Self::start(now_ms),
        };

        let reset_at_ms = counter.reset_at(policy);
        let allowed = counter.hits <= policy.max_requests;
        let verdict = WindowVerdict {
            allowed,
            remaining: policy.max_requests.saturating_sub(counter.hits),
            reset_at_ms,
            retry_after_secs: (!allowed).then(|| ceil_secs(reset_at_ms.saturating_sub(now_ms))),
        };
        (counter, verdict)
    }
}

/// Sliding-window state: timestamps of requests in the trailing window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingLog {
    /// Request timestamps (epoch ms), oldest first
    pub timestamps: VecDeque<u64>,
}

impl SlidingLog {
    /// Drop every entry with `timestamp <= now - window`.
    pub fn purge(&mut self, policy: &Policy, now_ms: u64) {
        let horizon = now_ms.saturating_sub(policy.window_ms);
        while let Some(&oldest) = self.timestamps.front() {
            if oldest <= horizon && now_ms >= policy.window_ms {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Register a request at `now`.
    ///
    /// The request is logged whether or not it is admitted, so a caller
    /// that keeps hammering a full window keeps it full.
    pub fn register(&mut self, policy: &Policy, now_ms: u64) -> WindowVerdict {
        self.purge(policy, now_ms);
        self.timestamps.push_back(now_ms);

        let count = self.timestamps.len() as u64;
        let allowed = count <= policy.max_requests;
        let retry_after_secs = if allowed {
            None
        } else {
            let oldest = self.timestamps.front().copied().unwrap_or(now_ms);
            let next_slot = oldest.saturating_add(policy.window_ms);
            Some(ceil_secs(next_slot.saturating_sub(now_ms)))
        };

        WindowVerdict {
            allowed,
            remaining: policy.max_requests.saturating_sub(count),
            reset_at_ms: now_ms.saturating_add(policy.window_ms),
            retry_after_secs,
        }
    }

    /// Number of logged requests.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Round milliseconds up to whole seconds, never below one.
pub fn ceil_secs(ms: u64) -> u64 {
    (ms / 1000 + u64::from(ms % 1000 != 0)).max(1)
}
