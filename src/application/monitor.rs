//! Violation and attack-pattern monitoring.
//!
//! The monitor aggregates admission outcomes into time-bucketed counters
//! and flags trackers whose rejection rate over the last minute looks like
//! an attack. It is purely observational: nothing it records ever changes
//! an admission decision.
//!
//! # Buckets
//!
//! | Counter                 | Key                                   | Lifetime |
//! |-------------------------|---------------------------------------|----------|
//! | outcomes per tracker    | `vm:hour:{hour}:{tracker}`            | 1 hour   |
//! | violations per tracker  | `vm:day:{day}:tracker:{tracker}`      | 24 hours |
//! | violations per path     | `vm:day:{day}:path:{path}`            | 24 hours |
//! | burst counter           | `vm:minute:{tracker}`                 | 60 s     |
//! | violator index shard    | `vm:day:{day}:violators:{shard}`      | 24 hours |
//!
//! `hour` and `day` are whole epoch hours and days.
//!
//! # Violator index
//!
//! The index only records *which* trackers violated today; the ranking
//! reads their counts from the per-tracker daily counters, so the two can
//! never disagree. Trackers are spread over [`INDEX_SHARDS`] records by a
//! stable hash and a tracker is written to its shard only when it joins,
//! so repeat violations cost a single read of one small shard. Shard
//! updates are serialized within a process; across processes only
//! trackers joining the same shard at the same instant can race.
//!
//! Capacity is enforced when a tracker joins an index that is already
//! full: the tracker with the fewest violations is dropped.

use crate::application::config::ConfigError;
use crate::application::metrics::Metrics;
use crate::application::ports::StoreError;
use crate::application::records::RecordStore;
use crate::domain::tracker::TrackerKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Number of records the daily violator index is split across.
pub const INDEX_SHARDS: usize = 16;

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;
const HOUR: Duration = Duration::from_millis(HOUR_MS);
const DAY: Duration = Duration::from_millis(DAY_MS);
const MINUTE: Duration = Duration::from_secs(60);

/// Log target for anomaly signals, so hosts can route them separately.
pub const SECURITY_TARGET: &str = "admission_control::security";

/// Violation monitor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Violations per tracker per minute above which an anomaly is raised
    pub anomaly_threshold: u64,
    /// Trackers kept in the daily violator index
    pub max_tracked_violators: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: 10,
            max_tracked_violators: 1000,
        }
    }
}

impl MonitorConfig {
    /// Check that the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.anomaly_threshold == 0 {
            return Err(ConfigError::ZeroAnomalyThreshold);
        }
        if self.max_tracked_violators == 0 {
            return Err(ConfigError::ZeroTrackedViolators);
        }
        Ok(())
    }
}

/// Context attached to a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationDetails {
    /// Policy the request was checked against
    pub policy: String,
    /// Quota of that policy
    pub limit: u64,
    /// Retry-after handed back to the caller
    pub retry_after_secs: Option<u64>,
    /// The rejection came from an open circuit rather than the quota
    pub circuit_open: bool,
}

/// Suspected attack pattern: too many violations from one tracker in a minute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalySignal {
    /// Offending tracker
    pub tracker: String,
    /// Resource path of the violation that crossed the threshold
    pub path: String,
    /// Violations counted in the current minute
    pub violations_last_minute: u64,
    /// Configured threshold
    pub threshold: u64,
}

/// Aggregated counters for one tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationStats {
    /// Tracker the stats belong to
    pub tracker: String,
    /// Requests admitted in the current hour
    pub allowed_this_hour: u64,
    /// Requests refused in the current hour
    pub blocked_this_hour: u64,
    /// Violations recorded today
    pub violations_today: u64,
    /// Violations in the current burst minute
    pub violations_last_minute: u64,
}

/// One entry of the daily violator ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolatorEntry {
    /// Tracker key, e.g. `ip:203.0.113.9`
    pub tracker: String,
    /// Violations recorded today
    pub violations: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct OutcomeCounts {
    allowed: u64,
    blocked: u64,
}

/// Trackers of one index shard that violated on a given day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexShard {
    members: BTreeSet<String>,
}

/// Records admission outcomes and flags short-burst attack patterns.
#[derive(Debug, Clone)]
pub struct ViolationMonitor {
    records: RecordStore,
    config: MonitorConfig,
    metrics: Metrics,
    index_locks: Arc<[Mutex<()>; INDEX_SHARDS]>,
}

impl ViolationMonitor {
    /// Create a monitor with validated settings.
    pub fn new(
        records: RecordStore,
        config: MonitorConfig,
        metrics: Metrics,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            records,
            config,
            metrics,
            index_locks: Arc::new(std::array::from_fn(|_| Mutex::new(()))),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Count one admission outcome in the tracker's hourly bucket.
    pub fn record_outcome(&self, tracker: &TrackerKey, path: &str, allowed: bool) {
        let key = hour_key(self.records.now_ms(), tracker);
        let result = self
            .records
            .load::<OutcomeCounts>(&key)
            .and_then(|counts| {
                let mut counts = counts.unwrap_or_default();
                if allowed {
                    counts.allowed = counts.allowed.saturating_add(1);
                } else {
                    counts.blocked = counts.blocked.saturating_add(1);
                }
                self.records.save(&key, &counts, Some(HOUR))
            });

        if let Err(e) = result {
            self.store_failed(tracker, path, &e);
        }
    }

    /// Record a rejected request.
    ///
    /// Returns an [`AnomalySignal`] when the tracker's violations in the
    /// current minute exceed the anomaly threshold. The signal is also
    /// logged at `error` level on [`SECURITY_TARGET`].
    pub fn record_violation(
        &self,
        tracker: &TrackerKey,
        path: &str,
        details: &ViolationDetails,
    ) -> Option<AnomalySignal> {
        match self.try_record_violation(tracker, path, details) {
            Ok(signal) => signal,
            Err(e) => {
                self.store_failed(tracker, path, &e);
                None
            }
        }
    }

    fn try_record_violation(
        &self,
        tracker: &TrackerKey,
        path: &str,
        details: &ViolationDetails,
    ) -> Result<Option<AnomalySignal>, StoreError> {
        let day = self.records.now_ms() / DAY_MS;

        self.records
            .increment(&tracker_day_key(day, tracker.as_str()), DAY)?;
        self.records.increment(&path_day_key(day, path), DAY)?;
        self.update_index(day, tracker)?;

        let last_minute = self.records.increment(&minute_key(tracker), MINUTE)?;
        if last_minute <= self.config.anomaly_threshold {
            return Ok(None);
        }

        self.metrics.record_anomaly();
        tracing::error!(
            target: SECURITY_TARGET,
            tracker = %tracker,
            path = %path,
            policy = %details.policy,
            circuit_open = details.circuit_open,
            violations_last_minute = last_minute,
            threshold = self.config.anomaly_threshold,
            "Suspected attack pattern"
        );
        Ok(Some(AnomalySignal {
            tracker: tracker.to_string(),
            path: path.to_string(),
            violations_last_minute: last_minute,
            threshold: self.config.anomaly_threshold,
        }))
    }

    /// Add `tracker` to today's index unless it is already a member.
    fn update_index(&self, day: u64, tracker: &TrackerKey) -> Result<(), StoreError> {
        let shard = shard_of(tracker.as_str());
        let key = index_key(day, shard);
        {
            let _guard = lock(&self.index_locks[shard]);
            let mut current = self.records.load::<IndexShard>(&key)?.unwrap_or_default();
            if !current.members.insert(tracker.as_str().to_string()) {
                return Ok(());
            }
            self.records.save(&key, &current, Some(DAY))?;
        }
        self.enforce_capacity(day)
    }

    /// Drop the weakest members until the index fits its capacity.
    fn enforce_capacity(&self, day: u64) -> Result<(), StoreError> {
        let mut entries = self.index_entries(day)?;
        if entries.len() <= self.config.max_tracked_violators {
            return Ok(());
        }
        let excess = entries.len() - self.config.max_tracked_violators;

        entries.sort_by(|(_, a), (_, b)| {
            a.violations
                .cmp(&b.violations)
                .then_with(|| b.tracker.cmp(&a.tracker))
        });
        for (shard, weakest) in entries.into_iter().take(excess) {
            let key = index_key(day, shard);
            let _guard = lock(&self.index_locks[shard]);
            if let Some(mut current) = self.records.load::<IndexShard>(&key)? {
                if current.members.remove(&weakest.tracker) {
                    self.records.save(&key, &current, Some(DAY))?;
                }
            }
        }
        Ok(())
    }

    /// Every indexed tracker with its live daily count, tagged with its shard.
    fn index_entries(&self, day: u64) -> Result<Vec<(usize, ViolatorEntry)>, StoreError> {
        let mut entries = Vec::new();
        for shard in 0..INDEX_SHARDS {
            let Some(current) = self.records.load::<IndexShard>(&index_key(day, shard))? else {
                continue;
            };
            for tracker in current.members {
                let violations = self.records.counter(&tracker_day_key(day, &tracker))?;
                if violations > 0 {
                    entries.push((
                        shard,
                        ViolatorEntry {
                            tracker,
                            violations,
                        },
                    ));
                }
            }
        }
        Ok(entries)
    }

    /// Current counters for one tracker. Unreadable counters read as zero.
    pub fn violation_stats(&self, tracker: &TrackerKey) -> ViolationStats {
        let now = self.records.now_ms();
        let result = self
            .records
            .load::<OutcomeCounts>(&hour_key(now, tracker))
            .and_then(|hour| {
                let hour = hour.unwrap_or_default();
                Ok(ViolationStats {
                    tracker: tracker.to_string(),
                    allowed_this_hour: hour.allowed,
                    blocked_this_hour: hour.blocked,
                    violations_today: self
                        .records
                        .counter(&tracker_day_key(now / DAY_MS, tracker.as_str()))?,
                    violations_last_minute: self.records.counter(&minute_key(tracker))?,
                })
            });

        result.unwrap_or_else(|e| {
            self.metrics.record_store_error();
            tracing::warn!(error = %e, tracker = %tracker, "Violation store unavailable, reporting zeros");
            ViolationStats {
                tracker: tracker.to_string(),
                ..ViolationStats::default()
            }
        })
    }

    /// Trackers with the most violations today, most first.
    pub fn top_violators(&self, limit: usize) -> Vec<ViolatorEntry> {
        let day = self.records.now_ms() / DAY_MS;
        match self.index_entries(day) {
            Ok(entries) => {
                let mut ranked: Vec<ViolatorEntry> =
                    entries.into_iter().map(|(_, entry)| entry).collect();
                ranked.sort_by(|a, b| {
                    b.violations
                        .cmp(&a.violations)
                        .then_with(|| a.tracker.cmp(&b.tracker))
                });
                ranked.truncate(limit);
                ranked
            }
            Err(e) => {
                self.metrics.record_store_error();
                tracing::warn!(error = %e, "Violation store unavailable, no ranking");
                Vec::new()
            }
        }
    }

    /// Violations recorded today against one resource path.
    pub fn endpoint_violations(&self, path: &str) -> u64 {
        let day = self.records.now_ms() / DAY_MS;
        self.records
            .counter(&path_day_key(day, path))
            .unwrap_or_else(|e| {
                self.metrics.record_store_error();
                tracing::warn!(error = %e, path = %path, "Violation store unavailable");
                0
            })
    }

    fn store_failed(&self, tracker: &TrackerKey, path: &str, error: &StoreError) {
        self.metrics.record_store_error();
        tracing::warn!(
            error = %error,
            tracker = %tracker,
            path = %path,
            "Violation store unavailable, outcome not recorded"
        );
    }
}

fn hour_key(now_ms: u64, tracker: &TrackerKey) -> String {
    format!("vm:hour:{}:{}", now_ms / HOUR_MS, tracker)
}

fn tracker_day_key(day: u64, tracker: &str) -> String {
    format!("vm:day:{}:tracker:{}", day, tracker)
}

fn path_day_key(day: u64, path: &str) -> String {
    format!("vm:day:{}:path:{}", day, path)
}

fn minute_key(tracker: &TrackerKey) -> String {
    format!("vm:minute:{}", tracker)
}

fn index_key(day: u64, shard: usize) -> String {
    format!("vm:day:{}:violators:{}", day, shard)
}

/// Stable across processes and builds: FNV-1a over the tracker bytes.
fn shard_of(tracker: &str) -> usize {
    let hash = tracker.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    (hash % INDEX_SHARDS as u64) as usize
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
