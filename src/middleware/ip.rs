//! Source host resolution for the IP allow-list.
//!
//! The source host is the peer address of the TCP connection, taken from
//! Axum's `ConnectInfo<SocketAddr>` extension (installed by
//! `into_make_service_with_connect_info`). IPv4-mapped IPv6 peers are
//! canonicalised, so `::ffff:127.0.0.1` resolves to `127.0.0.1`.
//!
//! # Proxy Headers
//!
//! `X-Forwarded-For` and `X-Real-IP` are **only** honoured when the direct
//! peer is inside `TRUSTED_PROXIES`. Otherwise any client could claim to be
//! `127.0.0.1` by setting a header. With no trusted proxies configured
//! (the default) headers are ignored entirely.
//!
//! ```text
//! peer in TRUSTED_PROXIES? ──no──► peer IP
//!          │
//!         yes
//!          ▼
//! X-Forwarded-For (first entry) ─► X-Real-IP ─► peer IP
//! ```
//!
//! No `ConnectInfo` and no trusted header means the host is unresolved,
//! which the admission check denies.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

use crate::auth::admission::CidrRange;

/// Reverse proxies whose forwarding headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Malformed entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges = cidrs
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr, "Invalid CIDR in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

/// Borrowed view of the forwarding headers; no allocation.
#[inline]
fn extract_ip_from_headers<B>(req: &Request<B>) -> ExtractedIp<'_> {
    // "client, proxy1, proxy2": the first entry is the client
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
        && !first_ip.trim().is_empty()
    {
        return ExtractedIp::FromXff(first_ip.trim());
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return ExtractedIp::FromRealIp(value.trim());
    }

    ExtractedIp::NotFound
}

/// Canonical textual form of an address taken from a header, if it is one.
fn canonical(candidate: &str) -> Option<String> {
    candidate
        .parse::<IpAddr>()
        .ok()
        .map(|ip| ip.to_canonical().to_string())
}

/// Resolve the host the allow-list is checked against.
pub fn resolve_source_host<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> Option<String> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical());

    let Some(peer) = peer else {
        debug!("No connection info on request, source host unresolved");
        return None;
    };

    if !trusted.is_enabled() || !trusted.is_trusted(&peer) {
        return Some(peer.to_string());
    }

    match extract_ip_from_headers(req) {
        ExtractedIp::FromXff(ip) => match canonical(ip) {
            Some(host) => {
                debug!(peer = %peer, client_ip = %host, "Source host from X-Forwarded-For");
                Some(host)
            }
            None => {
                warn!(peer = %peer, value = ip, "Unparseable X-Forwarded-For from trusted proxy");
                None
            }
        },
        ExtractedIp::FromRealIp(ip) => match canonical(ip) {
            Some(host) => {
                debug!(peer = %peer, client_ip = %host, "Source host from X-Real-IP");
                Some(host)
            }
            None => {
                warn!(peer = %peer, value = ip, "Unparseable X-Real-IP from trusted proxy");
                None
            }
        },
        ExtractedIp::NotFound => Some(peer.to_string()),
    }
}
