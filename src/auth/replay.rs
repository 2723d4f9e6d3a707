//! Replay protection: request freshness and nonce acceptance.
//!
//! # Freshness
//!
//! A request is stale when `now - timestamp >= window`. Timestamps in the
//! future are accepted, so the window is asymmetric.
//!
//! # Nonce Policies
//!
//! | Policy               | Rejects                                        |
//! |----------------------|------------------------------------------------|
//! | [`CeilingNoncePolicy`] | nonces greater than a fixed ceiling          |
//! | [`NonceCache`]         | an `(access_key, nonce)` pair seen within TTL |
//!
//! The ceiling policy is the default and is only a magnitude bound, not real
//! replay protection. `NonceCache` gives exactly-once acceptance per pair
//! within its TTL: the check and the insert happen under one shard lock.
//!
//! Acceptance has two steps. [`NoncePolicy::check`] is a read-only
//! pre-check run before the signature is verified. [`NoncePolicy::commit`]
//! records the nonce and runs only for a request that has passed every
//! other stage, so forged or stale requests never consume a nonce.

use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

/// Default freshness window in seconds (5 minutes).
pub const DEFAULT_FRESHNESS_WINDOW_SECS: i64 = 300;

/// Default upper bound for the ceiling nonce policy.
pub const DEFAULT_NONCE_CEILING: i64 = 10_000;

/// Check that a request timestamp is inside the freshness window.
pub fn check_freshness(timestamp_seconds: i64, now: i64, window_seconds: i64) -> bool {
    now.saturating_sub(timestamp_seconds) < window_seconds
}

/// Pluggable nonce acceptance.
///
/// Implementations must be safe to call concurrently. A store-backed policy
/// must reject a duplicate exactly once even when both copies race.
pub trait NoncePolicy: Send + Sync {
    /// Read-only check of `nonce` for `access_key` at time `now` (Unix seconds).
    fn check(&self, access_key: &str, nonce: i64, now: i64) -> bool;

    /// Record `nonce` as used. Returns `false` when a concurrent request
    /// committed the same nonce first.
    fn commit(&self, _access_key: &str, _nonce: i64, _now: i64) -> bool {
        true
    }

    /// Drop state that can no longer affect decisions. Returns entries removed.
    fn purge_expired(&self, _now: i64) -> usize {
        0
    }

    /// Number of live entries held, for stateful policies.
    fn tracked_entries(&self) -> usize {
        0
    }
}

/// Rejects any nonce strictly greater than the ceiling.
#[derive(Debug, Clone, Copy)]
pub struct CeilingNoncePolicy {
    ceiling: i64,
}

impl CeilingNoncePolicy {
    pub fn new(ceiling: i64) -> Self {
        Self { ceiling }
    }
}

impl Default for CeilingNoncePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_CEILING)
    }
}

impl NoncePolicy for CeilingNoncePolicy {
    fn check(&self, _access_key: &str, nonce: i64, _now: i64) -> bool {
        nonce <= self.ceiling
    }
}

/// TTL-bounded set of seen `(access_key, nonce)` pairs.
///
/// Each entry stores its expiry (Unix seconds). An expired entry behaves as
/// absent and is overwritten on the next commit of the same pair.
#[derive(Debug)]
pub struct NonceCache {
    seen: DashMap<(String, i64), i64>,
    ttl_seconds: i64,
}

impl NonceCache {
    /// Create a cache whose entries live for `ttl_seconds`.
    ///
    /// The TTL should equal the freshness window: a nonce older than the
    /// window is already rejected by the timestamp check.
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            seen: DashMap::new(),
            ttl_seconds,
        }
    }
}

impl NoncePolicy for NonceCache {
    fn check(&self, access_key: &str, nonce: i64, now: i64) -> bool {
        match self.seen.get(&(access_key.to_string(), nonce)) {
            Some(expires_at) if *expires_at > now => {
                debug!(access_key, nonce, "Nonce already seen within TTL");
                false
            }
            _ => true,
        }
    }

    fn commit(&self, access_key: &str, nonce: i64, now: i64) -> bool {
        let expires_at = now.saturating_add(self.ttl_seconds);

        match self.seen.entry((access_key.to_string(), nonce)) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    debug!(access_key, nonce, "Nonce committed concurrently");
                    false
                } else {
                    entry.insert(expires_at);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        }
    }

    fn purge_expired(&self, now: i64) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, expires_at| *expires_at > now);
        let removed = before.saturating_sub(self.seen.len());
        trace!(removed, remaining = self.seen.len(), "Nonce cache swept");
        removed
    }

    fn tracked_entries(&self) -> usize {
        self.seen.len()
    }
}

/// Which nonce policy the gateway runs with (`NONCE_POLICY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoncePolicyKind {
    /// Magnitude bound (`ceiling`)
    #[default]
    Ceiling,
    /// Seen-nonce store (`cache`)
    Cache,
}

impl FromStr for NoncePolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ceiling" => Ok(Self::Ceiling),
            "cache" => Ok(Self::Cache),
            other => Err(format!("unknown nonce policy '{other}' (expected ceiling|cache)")),
        }
    }
}

/// Freshness window plus nonce policy.
#[derive(Clone)]
pub struct ReplayGuard {
    nonce_policy: Arc<dyn NoncePolicy>,
    window_seconds: i64,
}

impl ReplayGuard {
    pub fn new(nonce_policy: Arc<dyn NoncePolicy>, window_seconds: i64) -> Self {
        Self {
            nonce_policy,
            window_seconds,
        }
    }

    /// Build the guard selected by configuration.
    pub fn from_kind(kind: NoncePolicyKind, ceiling: i64, window_seconds: i64) -> Self {
        let policy: Arc<dyn NoncePolicy> = match kind {
            NoncePolicyKind::Ceiling => Arc::new(CeilingNoncePolicy::new(ceiling)),
            NoncePolicyKind::Cache => Arc::new(NonceCache::new(window_seconds)),
        };
        Self::new(policy, window_seconds)
    }

    pub fn check_nonce(&self, access_key: &str, nonce: i64, now: i64) -> bool {
        self.nonce_policy.check(access_key, nonce, now)
    }

    /// Mark the nonce of an authenticated request as used.
    pub fn commit_nonce(&self, access_key: &str, nonce: i64, now: i64) -> bool {
        self.nonce_policy.commit(access_key, nonce, now)
    }

    pub fn check_freshness(&self, timestamp_seconds: i64, now: i64) -> bool {
        check_freshness(timestamp_seconds, now, self.window_seconds)
    }

    pub fn window_seconds(&self) -> i64 {
        self.window_seconds
    }

    /// Sweep expired nonce state. Called by the background sweeper.
    pub fn purge_expired(&self, now: i64) -> usize {
        self.nonce_policy.purge_expired(now)
    }

    pub fn tracked_nonces(&self) -> usize {
        self.nonce_policy.tracked_entries()
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(
            Arc::new(CeilingNoncePolicy::default()),
            DEFAULT_FRESHNESS_WINDOW_SECS,
        )
    }
}

impl std::fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayGuard")
            .field("window_seconds", &self.window_seconds)
            .field("tracked_nonces", &self.nonce_policy.tracked_entries())
            .finish()
    }
}
