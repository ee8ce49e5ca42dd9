//! Named rate-limit policies.
//!
//! A policy is static configuration: it is validated when the policy table
//! is built and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Algorithm used to count requests inside a policy window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAlgorithm {
    /// One counter per window. O(1) state, but up to `2 × max_requests`
    /// may pass around a window boundary.
    #[default]
    FixedWindow,
    /// Timestamp log of the trailing window. Exact, O(window) state.
    ///
    /// Rejected requests are logged too, so a tracker that keeps flooding
    /// grows its log with every request and each request re-encodes the
    /// whole log. Prefer fixed windows for policies keyed by IP or shared
    /// by anonymous callers.
    SlidingWindow,
}

/// Error returned when a policy or policy table is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Policy name is empty or whitespace
    EmptyName,
    /// Window length must be greater than zero
    ZeroWindow(String),
    /// Quota must be greater than zero
    ZeroMaxRequests(String),
    /// Block duration, when present, must be greater than zero
    ZeroBlockDuration(String),
    /// Two policies share a name
    DuplicateName(String),
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::EmptyName => write!(f, "policy name must not be empty"),
            PolicyError::ZeroWindow(name) => {
                write!(f, "policy '{}': window_ms must be greater than 0", name)
            }
            PolicyError::ZeroMaxRequests(name) => {
                write!(f, "policy '{}': max_requests must be greater than 0", name)
            }
            PolicyError::ZeroBlockDuration(name) => {
                write!(
                    f,
                    "policy '{}': block_duration_ms must be greater than 0",
                    name
                )
            }
            PolicyError::DuplicateName(name) => {
                write!(f, "policy '{}' is defined more than once", name)
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Named quota for one resource class.
///
/// # Example
/// ```
/// use admission_control::Policy;
/// use std::time::Duration;
///
/// let policy = Policy::fixed_window("auth", 5, Duration::from_secs(900))
///     .unwrap()
///     .with_block_duration(Duration::from_secs(3600))
///     .unwrap();
///
/// assert_eq!(policy.max_requests, 5);
/// assert_eq!(policy.block_duration_ms, Some(3_600_000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy name, e.g. `default`, `auth`, `claims-create`
    pub name: String,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window
    pub max_requests: u64,
    /// Optional penalty block applied after a rejection
    #[serde(default)]
    pub block_duration_ms: Option<u64>,
    /// Counting algorithm
    #[serde(default)]
    pub algorithm: WindowAlgorithm,
}

impl Policy {
    /// Create a validated policy.
    pub fn new(
        name: impl Into<String>,
        algorithm: WindowAlgorithm,
        max_requests: u64,
        window: Duration,
    ) -> Result<Self, PolicyError> {
        let policy = Self {
            name: name.into(),
            window_ms: duration_ms(window),
            max_requests,
            block_duration_ms: None,
            algorithm,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Create a fixed-window policy.
    pub fn fixed_window(
        name: impl Into<String>,
        max_requests: u64,
        window: Duration,
    ) -> Result<Self, PolicyError> {
        Self::new(name, WindowAlgorithm::FixedWindow, max_requests, window)
    }

    /// Create a sliding-window policy.
    pub fn sliding_window(
        name: impl Into<String>,
        max_requests: u64,
        window: Duration,
    ) -> Result<Self, PolicyError> {
        Self::new(name, WindowAlgorithm::SlidingWindow, max_requests, window)
    }

    /// Block the tracker for `duration` after any rejection under this policy.
    pub fn with_block_duration(mut self, duration: Duration) -> Result<Self, PolicyError> {
        self.block_duration_ms = Some(duration_ms(duration));
        self.validate()?;
        Ok(self)
    }

    /// Check the policy invariants.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.name.trim().is_empty() {
            return Err(PolicyError::EmptyName);
        }
        if self.window_ms == 0 {
            return Err(PolicyError::ZeroWindow(self.name.clone()));
        }
        if self.max_requests == 0 {
            return Err(PolicyError::ZeroMaxRequests(self.name.clone()));
        }
        if self.block_duration_ms == Some(0) {
            return Err(PolicyError::ZeroBlockDuration(self.name.clone()));
        }
        Ok(())
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Immutable lookup table of validated policies.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<String, Policy>,
}

impl PolicyTable {
    /// Build a table, validating every policy and rejecting duplicate names.
    pub fn new(policies: impl IntoIterator<Item = Policy>) -> Result<Self, PolicyError> {
        let mut table = HashMap::new();
        for policy in policies {
            policy.validate()?;
            if table.contains_key(&policy.name) {
                return Err(PolicyError::DuplicateName(policy.name));
            }
            table.insert(policy.name.clone(), policy);
        }
        Ok(Self { policies: table })
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    /// Policy names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Iterate over all policies.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Check if the table has no policies.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
