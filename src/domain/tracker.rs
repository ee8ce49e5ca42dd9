//! Tracker key resolution.
//!
//! Every admission decision is scoped to a tracker key. The key is taken
//! from the strongest identity available on the request: authenticated
//! user, then wallet/account, then client IP.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Which identity a tracker key was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerKind {
    /// Authenticated user id
    User,
    /// Wallet or account identifier
    Wallet,
    /// Normalized client IP address
    Ip,
    /// No identity available
    Anonymous,
}

/// Identifier that admission state is keyed by.
///
/// # Example
/// ```
/// use admission_control::{TrackerKey, TrackerKind};
///
/// let key = TrackerKey::resolve(None, Some("0xABCdef"), Some("10.0.0.1"));
/// assert_eq!(key.as_str(), "wallet:0xabcdef");
/// assert_eq!(key.kind(), TrackerKind::Wallet);
///
/// let key = TrackerKey::resolve(None, None, Some("::ffff:192.0.2.7, 10.0.0.1"));
/// assert_eq!(key.as_str(), "ip:192.0.2.7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerKey {
    key: String,
    kind: TrackerKind,
}

impl TrackerKey {
    /// Resolve a key by precedence: user > wallet > client IP > anonymous.
    ///
    /// Blank values are ignored. `client_ip` may be a forwarded list, in
    /// which case the first entry is used.
    pub fn resolve(user_id: Option<&str>, wallet: Option<&str>, client_ip: Option<&str>) -> Self {
        if let Some(user) = non_blank(user_id) {
            return Self::user(user);
        }
        if let Some(wallet) = non_blank(wallet) {
            return Self::wallet(wallet);
        }
        if let Some(ip) = client_ip.and_then(|raw| non_blank(raw.split(',').next())) {
            return Self::ip(ip);
        }
        Self::anonymous()
    }

    /// Key for an authenticated user.
    pub fn user(id: &str) -> Self {
        Self {
            key: format!("user:{}", id.trim()),
            kind: TrackerKind::User,
        }
    }

    /// Key for a wallet address. Addresses are compared case-insensitively.
    pub fn wallet(address: &str) -> Self {
        Self {
            key: format!("wallet:{}", address.trim().to_ascii_lowercase()),
            kind: TrackerKind::Wallet,
        }
    }

    /// Key for a client IP, normalized.
    pub fn ip(raw: &str) -> Self {
        Self {
            key: format!("ip:{}", normalize_ip(raw)),
            kind: TrackerKind::Ip,
        }
    }

    /// Key shared by all requests without any identity.
    pub fn anonymous() -> Self {
        Self {
            key: "anonymous".to_string(),
            kind: TrackerKind::Anonymous,
        }
    }

    /// The key as stored.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Identity source of this key.
    pub fn kind(&self) -> TrackerKind {
        self.kind
    }
}

impl fmt::Display for TrackerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Canonical textual form of a client address.
///
/// Strips ports and brackets, collapses IPv4-mapped IPv6 addresses and
/// falls back to the lowercased input when the value does not parse.
pub fn normalize_ip(raw: &str) -> String {
    let trimmed = raw.trim();
    let parsed = trimmed
        .parse::<IpAddr>()
        .ok()
        .or_else(|| trimmed.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
        .or_else(|| {
            trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .and_then(|inner| inner.parse::<IpAddr>().ok())
        })
        .or_else(|| {
            // IPv4 host with a malformed port
            trimmed
                .rsplit_once(':')
                .filter(|(host, _)| !host.contains(':'))
                .and_then(|(host, _)| host.parse::<IpAddr>().ok())
        });

    match parsed {
        Some(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        Some(ip) => ip.to_string(),
        None => trimmed.to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let key = TrackerKey::resolve(Some("42"), Some("0xabc"), Some("1.2.3.4"));
        assert_eq!(key.as_str(), "user:42");
        assert_eq!(key.kind(), TrackerKind::User);

        let key = TrackerKey::resolve(None, Some("0xABC"), Some("1.2.3.4"));
        assert_eq!(key.as_str(), "wallet:0xabc");

        let key = TrackerKey::resolve(None, None, Some("1.2.3.4"));
        assert_eq!(key.as_str(), "ip:1.2.3.4");
        assert_eq!(key.kind(), TrackerKind::Ip);
    }

    #[test]
    fn test_blank_identities_ignored() {
        let key = TrackerKey::resolve(Some("  "), Some(""), Some(" 10.0.0.1 "));
        assert_eq!(key.as_str(), "ip:10.0.0.1");
    }

    #[test]
    fn test_anonymous_fallback() {
        let key = TrackerKey::resolve(None, None, None);
        assert_eq!(key, TrackerKey::anonymous());
        assert_eq!(key.kind(), TrackerKind::Anonymous);

        let key = TrackerKey::resolve(None, None, Some(" , 1.2.3.4"));
        assert_eq!(key.kind(), TrackerKind::Anonymous);
    }

    #[test]
    fn test_forwarded_list_uses_first_entry() {
        let key = TrackerKey::resolve(None, None, Some("203.0.113.9, 10.0.0.1, 10.0.0.2"));
        assert_eq!(key.as_str(), "ip:203.0.113.9");
    }

    #[test]
    fn test_normalize_ip() {
        assert_eq!(normalize_ip("::ffff:192.0.2.1"), "192.0.2.1");
        assert_eq!(normalize_ip("192.0.2.1:8080"), "192.0.2.1");
        assert_eq!(normalize_ip("[2001:DB8::1]:443"), "2001:db8::1");
        assert_eq!(normalize_ip("[2001:db8::1]"), "2001:db8::1");
        assert_eq!(normalize_ip("2001:0db8:0000::0001"), "2001:db8::1");
        assert_eq!(normalize_ip("Unknown-Host"), "unknown-host");
    }

    #[test]
    fn test_display() {
        assert_eq!(TrackerKey::user("alice").to_string(), "user:alice");
    }
}
