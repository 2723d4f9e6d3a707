//! External collaborators of the edge filter.
//!
//! The filter depends on three services it does not own:
//!
//! - [`CredentialStore`]: `accessKey → secretKey` lookup (read-only)
//! - [`InterfaceRegistry`]: does the requested interface exist?
//! - [`UsageLedger`]: per-call invocation counting (best-effort)
//!
//! Each is an async trait object so a database- or RPC-backed implementation
//! can be plugged in without touching the filter. The in-process
//! implementations here are what the binary runs with and what tests use.

use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::metrics;

/// A caller's key pair. The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_key: String,
    pub secret_key: String,
}

impl Credential {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Parse `access:secret` pairs separated by commas.
    ///
    /// The secret may itself contain `:`; only the first colon splits.
    pub fn parse_list(raw: &str) -> GatewayResult<Vec<Self>> {
        raw.split(',')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once(':') {
                Some((ak, sk)) if !ak.trim().is_empty() && !sk.is_empty() => {
                    Ok(Self::new(ak.trim(), sk))
                }
                _ => Err(GatewayError::ConfigError(
                    "GATEWAY_CREDENTIALS entries must be accessKey:secretKey".to_string(),
                )),
            })
            .collect()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when the key is unknown; `Err` only when the store failed.
    async fn lookup_credential(&self, access_key: &str) -> GatewayResult<Option<Credential>>;
}

/// Metric label for paths the registry does not name individually.
pub const ANY_ROUTE_LABEL: &str = "*";

#[async_trait]
pub trait InterfaceRegistry: Send + Sync {
    async fn interface_exists(&self, route_id: &str) -> GatewayResult<bool>;

    /// Bounded label for per-route metrics. Must draw from a fixed set so
    /// callers cannot mint new series by varying the path.
    fn route_label(&self, _route_id: &str) -> String {
        ANY_ROUTE_LABEL.to_string()
    }
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Count one invocation. At-least-once semantics are acceptable.
    async fn record_invocation(&self, access_key: &str, route_id: &str) -> GatewayResult<()>;
}

/// Credentials held in memory, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    by_access_key: HashMap<String, Credential>,
}

impl StaticCredentialStore {
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            by_access_key: credentials
                .into_iter()
                .map(|c| (c.access_key.clone(), c))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_access_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_access_key.is_empty()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn lookup_credential(&self, access_key: &str) -> GatewayResult<Option<Credential>> {
        Ok(self.by_access_key.get(access_key).cloned())
    }
}

/// Route table for the interface-existence check.
///
/// With no routes configured the registry is open and every route exists.
/// Entries ending in `/*` match any path under that prefix.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaceRegistry {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl StaticInterfaceRegistry {
    pub fn new(routes: &[String]) -> Self {
        let mut exact = HashSet::new();
        let mut prefixes = Vec::new();

        for route in routes.iter().map(|r| r.trim()).filter(|r| !r.is_empty()) {
            match route.strip_suffix("/*") {
                Some(prefix) => prefixes.push(format!("{prefix}/")),
                None => {
                    exact.insert(route.to_string());
                }
            }
        }

        Self { exact, prefixes }
    }

    pub fn is_open(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty()
    }
}

#[async_trait]
impl InterfaceRegistry for StaticInterfaceRegistry {
    async fn interface_exists(&self, route_id: &str) -> GatewayResult<bool> {
        if self.is_open() {
            return Ok(true);
        }

        Ok(self.exact.contains(route_id)
            || self.prefixes.iter().any(|p| route_id.starts_with(p.as_str())))
    }

    /// The configured entry that matched: the exact path, or `prefix/*`.
    fn route_label(&self, route_id: &str) -> String {
        if self.exact.contains(route_id) {
            return route_id.to_string();
        }
        self.prefixes
            .iter()
            .find(|p| route_id.starts_with(p.as_str()))
            .map(|p| format!("{p}*"))
            .unwrap_or_else(|| ANY_ROUTE_LABEL.to_string())
    }
}

/// Ledger that counts invocations as Prometheus counters.
///
/// Counters are labelled by access key only; only authenticated keys reach
/// the ledger, so the label set is bounded by the configured credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsUsageLedger;

#[async_trait]
impl UsageLedger for MetricsUsageLedger {
    async fn record_invocation(&self, access_key: &str, route_id: &str) -> GatewayResult<()> {
        metrics::record_invocation(access_key);
        debug!(access_key, route = route_id, "Invocation recorded");
        Ok(())
    }
}
