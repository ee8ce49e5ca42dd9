//! Windowed request-rate limiting per (policy, tracker) pair.
//!
//! The limiter is stateless: every check is one read-modify-write cycle
//! against the record store. Concurrent checks for the same tracker may
//! under-count slightly, which is accepted because rate limiting is
//! approximate by nature.

use crate::application::metrics::Metrics;
use crate::application::ports::StoreError;
use crate::application::records::RecordStore;
use crate::domain::policy::{Policy, WindowAlgorithm};
use crate::domain::tracker::TrackerKey;
use crate::domain::window::{ceil_secs, SlidingLog, WindowCounter, WindowVerdict};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Extra lifetime given to sliding logs beyond their window.
const SLIDING_LOG_GRACE: Duration = Duration::from_secs(1);

/// Result of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOutcome {
    /// Whether the request fits in the quota
    pub allowed: bool,
    /// Quota of the policy
    pub limit: u64,
    /// Requests left, clamped at zero
    pub remaining: u64,
    /// When the quota is next replenished (epoch ms)
    pub reset_at_ms: u64,
    /// Seconds to wait before retrying, on rejection
    pub retry_after_secs: Option<u64>,
    /// The tracker is serving a penalty block
    pub blocked: bool,
    /// The store failed and the request was let through
    pub degraded: bool,
}

/// Penalty block written after a rejection under a policy with a block duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct BlockRecord {
    blocked_until_ms: u64,
}

/// Checks requests against named policies.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    records: RecordStore,
    metrics: Metrics,
}

impl RateLimiter {
    /// Create a limiter over a record store.
    pub fn new(records: RecordStore, metrics: Metrics) -> Self {
        Self { records, metrics }
    }

    /// Count one request and decide whether it fits in the quota.
    ///
    /// # Fail-Open Behavior
    /// Store errors are not retried. The request is allowed, the outcome is
    /// marked `degraded` and a warning is logged: an unavailable store must
    /// not turn into an outage of its own.
    pub fn check(&self, tracker: &TrackerKey, policy: &Policy) -> RateLimitOutcome {
        match self.try_check(tracker, policy) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_store_error();
                tracing::warn!(
                    error = %e,
                    tracker = %tracker,
                    policy = %policy.name,
                    "Rate limit store unavailable, failing open"
                );
                let now = self.records.now_ms();
                RateLimitOutcome {
                    allowed: true,
                    limit: policy.max_requests,
                    remaining: policy.max_requests,
                    reset_at_ms: now.saturating_add(policy.window_ms),
                    retry_after_secs: None,
                    blocked: false,
                    degraded: true,
                }
            }
        }
    }

    /// Like [`RateLimiter::check`] but surfaces store errors.
    pub fn try_check(
        &self,
        tracker: &TrackerKey,
        policy: &Policy,
    ) -> Result<RateLimitOutcome, StoreError> {
        let now = self.records.now_ms();

        if let Some(block) = self.active_block(tracker, policy, now)? {
            return Ok(RateLimitOutcome {
                allowed: false,
                limit: policy.max_requests,
                remaining: 0,
                reset_at_ms: block.blocked_until_ms,
                retry_after_secs: Some(ceil_secs(block.blocked_until_ms.saturating_sub(now))),
                blocked: true,
                degraded: false,
            });
        }

        let verdict = match policy.algorithm {
            WindowAlgorithm::FixedWindow => self.check_fixed(tracker, policy, now)?,
            WindowAlgorithm::SlidingWindow => self.check_sliding(tracker, policy, now)?,
        };

        let mut outcome = RateLimitOutcome {
            allowed: verdict.allowed,
            limit: policy.max_requests,
            remaining: verdict.remaining,
            reset_at_ms: verdict.reset_at_ms,
            retry_after_secs: verdict.retry_after_secs,
            blocked: false,
            degraded: false,
        };

        if !verdict.allowed {
            if let Some(block_ms) = policy.block_duration_ms {
                let blocked_until_ms = now.saturating_add(block_ms);
                self.records.save(
                    &block_key(tracker, policy),
                    &BlockRecord { blocked_until_ms },
                    Some(Duration::from_millis(block_ms)),
                )?;
                outcome.reset_at_ms = blocked_until_ms;
                outcome.retry_after_secs = Some(ceil_secs(block_ms));
                outcome.blocked = true;
            }

            tracing::debug!(
                tracker = %tracker,
                policy = %policy.name,
                retry_after_secs = ?outcome.retry_after_secs,
                "Request rate limited"
            );
        }

        Ok(outcome)
    }

    fn active_block(
        &self,
        tracker: &TrackerKey,
        policy: &Policy,
        now: u64,
    ) -> Result<Option<BlockRecord>, StoreError> {
        if policy.block_duration_ms.is_none() {
            return Ok(None);
        }
        Ok(self
            .records
            .load::<BlockRecord>(&block_key(tracker, policy))?
            .filter(|block| block.blocked_until_ms > now))
    }

    fn check_fixed(
        &self,
        tracker: &TrackerKey,
        policy: &Policy,
        now: u64,
    ) -> Result<WindowVerdict, StoreError> {
        let key = window_key(tracker, policy);
        let current = self.records.load::<WindowCounter>(&key)?;
        let (counter, verdict) = WindowCounter::register(current, policy, now);

        let ttl = Duration::from_millis(counter.reset_at(policy).saturating_sub(now));
        self.records.save(&key, &counter, Some(ttl))?;
        Ok(verdict)
    }

    fn check_sliding(
        &self,
        tracker: &TrackerKey,
        policy: &Policy,
        now: u64,
    ) -> Result<WindowVerdict, StoreError> {
        let key = window_key(tracker, policy);
        let mut log = self
            .records
            .load::<SlidingLog>(&key)?
            .unwrap_or_default();
        let verdict = log.register(policy, now);

        self.records
            .save(&key, &log, Some(policy.window() + SLIDING_LOG_GRACE))?;
        Ok(verdict)
    }
}

fn window_key(tracker: &TrackerKey, policy: &Policy) -> String {
    format!("rl:{}:{}", policy.name, tracker)
}

fn block_key(tracker: &TrackerKey, policy: &Policy) -> String {
    format!("rl-block:{}:{}", policy.name, tracker)
}
