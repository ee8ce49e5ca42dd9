//! The value returned to callers for every admission request.

/// Outcome of one admission request.
///
/// Ephemeral: never persisted. HTTP-style callers expose it verbatim via
/// [`AdmissionDecision::headers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Whether the unit of work may proceed
    pub allowed: bool,
    /// Policy the request was evaluated under
    pub policy: String,
    /// Quota of that policy
    pub limit: u64,
    /// Requests left in the current window, never below zero
    pub remaining: u64,
    /// When the quota or circuit next frees up (epoch ms)
    pub reset_at_ms: u64,
    /// Seconds the caller should wait before retrying, on denial
    pub retry_after_secs: Option<u64>,
    /// The request was refused by an open circuit
    pub circuit_open: bool,
    /// The decision was made without the backing store (fail-open)
    pub degraded: bool,
}

impl AdmissionDecision {
    /// Response headers derived from this decision.
    ///
    /// `X-RateLimit-Reset` is expressed in epoch seconds, rounded up.
    ///
    /// ```
    /// use admission_control::AdmissionDecision;
    ///
    /// let decision = AdmissionDecision {
    ///     allowed: false,
    ///     policy: "default".into(),
    ///     limit: 10,
    ///     remaining: 0,
    ///     reset_at_ms: 1_700_000_000_500,
    ///     retry_after_secs: Some(3),
    ///     circuit_open: false,
    ///     degraded: false,
    /// };
    ///
    /// let headers = decision.headers();
    /// assert!(headers.contains(&("X-RateLimit-Reset", "1700000001".to_string())));
    /// assert!(headers.contains(&("Retry-After", "3".to_string())));
    /// ```
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            (
                "X-RateLimit-Reset",
                self.reset_at_ms.div_ceil(1000).to_string(),
            ),
        ];
        if let Some(retry_after) = self.retry_after_secs {
            headers.push(("Retry-After", retry_after.to_string()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(allowed: bool, retry_after_secs: Option<u64>) -> AdmissionDecision {
        AdmissionDecision {
            allowed,
            policy: "default".into(),
            limit: 100,
            remaining: 42,
            reset_at_ms: 60_000,
            retry_after_secs,
            circuit_open: false,
            degraded: false,
        }
    }

    #[test]
    fn test_headers_when_allowed() {
        let headers = decision(true, None).headers();
        assert_eq!(
            headers,
            vec![
                ("X-RateLimit-Limit", "100".to_string()),
                ("X-RateLimit-Remaining", "42".to_string()),
                ("X-RateLimit-Reset", "60".to_string()),
            ]
        );
    }

    #[test]
    fn test_headers_include_retry_after() {
        let headers = decision(false, Some(12)).headers();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[3], ("Retry-After", "12".to_string()));
    }
}
