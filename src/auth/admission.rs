//! Source-host admission against a configured allow-list.
//!
//! The allow-list is loaded once from configuration (`IP_ALLOW_LIST`) and is
//! immutable afterwards. Entries come in two forms:
//!
//! - **Exact hosts** (`127.0.0.1`, `gateway-peer.internal`): compared as strings
//! - **CIDR ranges** (`10.0.0.0/8`, `::1/128`): matched when the source host
//!   parses as an IP address
//!
//! A request whose source host could not be resolved is never admitted.

use std::collections::HashSet;
use std::net::IpAddr;

use tracing::{debug, warn};

/// Default allow-list: the IPv4 loopback host only.
pub const DEFAULT_ALLOWED_HOST: &str = "127.0.0.1";

/// Parsed CIDR network range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    /// Network address
    network: IpAddr,
    /// Prefix length (e.g., 24 for /24)
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare IP address is accepted as an implicit /32 or /128.
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();

        let Some((addr, prefix)) = cidr.split_once('/') else {
            let ip: IpAddr = cidr.parse().ok()?;
            return Some(Self {
                network: ip,
                prefix_len: max_prefix(&ip),
            });
        };

        let ip: IpAddr = addr.parse().ok()?;
        let prefix_len: u8 = prefix.parse().ok()?;

        if prefix_len > max_prefix(&ip) {
            return None;
        }

        Some(Self {
            network: ip,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            // IPv4 and IPv6 don't match
            _ => false,
        }
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// IP allow-list check run first in the auth pipeline.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    hosts: HashSet<String>,
    ranges: Vec<CidrRange>,
}

impl AdmissionPolicy {
    /// Build a policy from configured allow-list entries.
    ///
    /// Entries containing `/` are parsed as CIDR ranges; malformed ranges are
    /// logged and skipped. Everything else is an exact host match.
    pub fn new(entries: &[String]) -> Self {
        let mut hosts = HashSet::new();
        let mut ranges = Vec::new();

        for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
            if entry.contains('/') {
                match CidrRange::parse(entry) {
                    Some(range) => ranges.push(range),
                    None => warn!(entry, "Invalid CIDR range in IP_ALLOW_LIST, skipping"),
                }
            } else {
                hosts.insert(entry.to_string());
            }
        }

        if hosts.is_empty() && ranges.is_empty() {
            warn!("IP allow-list is empty: every request will be denied");
        }

        Self { hosts, ranges }
    }

    /// Policy admitting only [`DEFAULT_ALLOWED_HOST`].
    pub fn loopback_only() -> Self {
        Self::new(&[DEFAULT_ALLOWED_HOST.to_string()])
    }

    /// Decide whether a caller may proceed to credential checks.
    pub fn admit(&self, source_host: Option<&str>) -> bool {
        let Some(host) = source_host else {
            debug!("Source host unresolved, not admitted");
            return false;
        };

        if self.hosts.contains(host) {
            return true;
        }

        match host.parse::<IpAddr>() {
            Ok(ip) => self.ranges.iter().any(|range| range.contains(&ip)),
            Err(_) => false,
        }
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::loopback_only()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn policy(entries: &[&str]) -> AdmissionPolicy {
        AdmissionPolicy::new(&entries.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_default_admits_loopback_only() {
        let policy = AdmissionPolicy::default();
        assert!(policy.admit(Some("127.0.0.1")));
        assert!(!policy.admit(Some("10.0.0.5")));
        assert!(!policy.admit(Some("::1")));
    }

    #[test]
    fn test_absent_host_is_not_admitted() {
        assert!(!AdmissionPolicy::default().admit(None));
    }

    #[test]
    fn test_exact_hostname_entry() {
        let policy = policy(&["localhost", "127.0.0.1"]);
        assert!(policy.admit(Some("localhost")));
        assert!(!policy.admit(Some("LOCALHOST.example")));
    }

    #[test]
    fn test_cidr_entries() {
        let policy = policy(&["10.0.0.0/8", "2001:db8::/32"]);
        assert!(policy.admit(Some("10.20.30.40")));
        assert!(policy.admit(Some("2001:db8::1")));
        assert!(!policy.admit(Some("11.0.0.1")));
        assert!(!policy.admit(Some("not-an-ip")));
    }

    #[test]
    fn test_invalid_cidr_is_skipped() {
        let policy = policy(&["10.0.0.0/99", "127.0.0.1"]);
        assert!(policy.admit(Some("127.0.0.1")));
        assert!(!policy.admit(Some("10.0.0.1")));
    }

    #[test]
    fn test_empty_allow_list_denies_everything() {
        let policy = policy(&[]);
        assert!(!policy.admit(Some("127.0.0.1")));
    }

    #[test]
    fn test_cidr_parse_bare_ip() {
        let range = CidrRange::parse("192.168.1.1").unwrap();
        assert!(range.contains(&"192.168.1.1".parse().unwrap()));
        assert!(!range.contains(&"192.168.1.2".parse().unwrap()));
    }

    #[test]
    fn test_cidr_zero_prefix_matches_all() {
        let range = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(range.contains(&"8.8.8.8".parse().unwrap()));
        assert!(!range.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_parse_rejects_garbage() {
        assert!(CidrRange::parse("10.0.0.0/abc").is_none());
        assert!(CidrRange::parse("nope/8").is_none());
        assert!(CidrRange::parse("::/129").is_none());
    }
}
