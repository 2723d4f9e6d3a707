//! Gateway configuration loaded from environment variables.
//!
//! All values have development defaults; a `.env` file is honoured when
//! present. Nothing is reloaded at runtime: the allow-list, credentials and
//! route table are fixed for the life of the process.
//!
//! # Security Configuration
//!
//! - `IP_ALLOW_LIST`: hosts or CIDR ranges admitted to credential checks
//!   (default: `127.0.0.1`)
//! - `TRUSTED_PROXIES`: peers whose `X-Forwarded-For`/`X-Real-IP` are believed
//!   (default: none, headers ignored)
//! - `GATEWAY_CREDENTIALS`: `accessKey:secretKey` pairs, comma-separated
//!
//! # Replay Protection
//!
//! - `NONCE_POLICY`: `ceiling` (default) or `cache`
//! - `NONCE_CEILING`: largest accepted nonce under `ceiling` (default: 10000)
//! - `FRESHNESS_WINDOW_SECS`: maximum request age (default: 300)
//! - `NONCE_SWEEP_INTERVAL_SECS`: cache purge period (default: 60)

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::auth::admission::DEFAULT_ALLOWED_HOST;
use crate::auth::replay::{DEFAULT_FRESHNESS_WINDOW_SECS, DEFAULT_NONCE_CEILING, NoncePolicyKind};
use crate::collaborators::Credential;
use crate::error::{GatewayError, GatewayResult};
use crate::middleware::edge_filter::{DEFAULT_BYPASS_PATHS, InvocationCountPolicy};
use crate::middleware::intercept::DEFAULT_PREVIEW_BYTES;

#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    /// Base URL every allowed request is forwarded to
    /// Default: "http://127.0.0.1:8123"
    pub upstream_url: String,

    /// Whole-request timeout for upstream calls (default: 30 seconds)
    pub upstream_timeout: Duration,

    /// Largest request body buffered for forwarding (default: 10MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Admission and Credentials
    // =========================================================================
    pub ip_allow_list: Vec<String>,

    /// Proxy CIDR ranges (e.g., "10.0.0.0/8,172.16.0.0/12")
    pub trusted_proxies: Vec<String>,

    pub credentials: Vec<Credential>,

    // =========================================================================
    // Replay Protection
    // =========================================================================
    pub nonce_policy: NoncePolicyKind,

    pub nonce_ceiling: i64,

    pub freshness_window_secs: i64,

    /// How often expired entries leave the nonce cache
    pub nonce_sweep_interval: Duration,

    // =========================================================================
    // Routing and Accounting
    // =========================================================================
    pub invocation_count_policy: InvocationCountPolicy,

    /// Interfaces known to the gateway. Empty means every path exists.
    /// Entries ending in `/*` match a whole subtree.
    pub registered_routes: Vec<String>,

    /// Paths served without authentication (default: "/gateway/health")
    pub filter_bypass_paths: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Bytes of each response chunk shown in debug logs (default: 1024)
    pub response_preview_bytes: usize,

    /// `RUST_LOG` filter directive (e.g., "info", "edge_gateway=debug")
    pub log_level: String,

    /// "json" for structured output, anything else for human-readable
    pub log_format: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConfigError` when a value does not parse or the
    /// combination is invalid.
    pub fn from_env() -> GatewayResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,

            // Upstream
            upstream_url: env::var("UPSTREAM_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8123".to_string()),
            upstream_timeout: Duration::from_secs(Self::parse_env("UPSTREAM_TIMEOUT_SECS", 30)?),
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024)?, // 10MB

            // Admission and credentials
            ip_allow_list: Self::parse_list("IP_ALLOW_LIST", DEFAULT_ALLOWED_HOST),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),
            credentials: Credential::parse_list(
                &env::var("GATEWAY_CREDENTIALS").unwrap_or_default(),
            )?,

            // Replay protection
            nonce_policy: Self::parse_env("NONCE_POLICY", NoncePolicyKind::Ceiling)?,
            nonce_ceiling: Self::parse_env("NONCE_CEILING", DEFAULT_NONCE_CEILING)?,
            freshness_window_secs: Self::parse_env(
                "FRESHNESS_WINDOW_SECS",
                DEFAULT_FRESHNESS_WINDOW_SECS,
            )?,
            nonce_sweep_interval: Duration::from_secs(Self::parse_env(
                "NONCE_SWEEP_INTERVAL_SECS",
                60,
            )?),

            // Routing and accounting
            invocation_count_policy: Self::parse_env(
                "INVOCATION_COUNT_POLICY",
                InvocationCountPolicy::BackendSuccess,
            )?,
            registered_routes: Self::parse_list("REGISTERED_ROUTES", ""),
            filter_bypass_paths: Self::parse_bypass_paths(),

            // Observability
            response_preview_bytes: Self::parse_env(
                "RESPONSE_PREVIEW_BYTES",
                DEFAULT_PREVIEW_BYTES,
            )?,
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    pub fn validate(&self) -> GatewayResult<()> {
        if !(self.upstream_url.starts_with("http://") || self.upstream_url.starts_with("https://"))
        {
            return Err(GatewayError::ConfigError(format!(
                "UPSTREAM_URL must start with http:// or https:// (got '{}')",
                self.upstream_url
            )));
        }

        if self.upstream_timeout.is_zero() {
            return Err(GatewayError::ConfigError(
                "UPSTREAM_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(GatewayError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.freshness_window_secs <= 0 {
            return Err(GatewayError::ConfigError(
                "FRESHNESS_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.nonce_ceiling < 0 {
            return Err(GatewayError::ConfigError(
                "NONCE_CEILING must not be negative".to_string(),
            ));
        }

        if self.nonce_sweep_interval.is_zero() {
            return Err(GatewayError::ConfigError(
                "NONCE_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        if self.metrics_enabled() {
            Some(SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> GatewayResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| GatewayError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Comma-separated list; blank entries are dropped.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        split_list(&env::var(name).unwrap_or_else(|_| default.to_string()))
    }

    /// Only absolute paths are kept.
    fn parse_bypass_paths() -> Vec<String> {
        Self::parse_list("FILTER_BYPASS_PATHS", &DEFAULT_BYPASS_PATHS.join(","))
            .into_iter()
            .filter(|p| p.starts_with('/'))
            .collect()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Carries no credentials; production deployments should use
/// `Config::from_env()`.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            // Upstream
            upstream_url: "http://127.0.0.1:8123".to_string(),
            upstream_timeout: Duration::from_secs(30),
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            // Admission and credentials
            ip_allow_list: vec![DEFAULT_ALLOWED_HOST.to_string()],
            trusted_proxies: vec![],
            credentials: vec![],
            // Replay protection
            nonce_policy: NoncePolicyKind::Ceiling,
            nonce_ceiling: DEFAULT_NONCE_CEILING,
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
            nonce_sweep_interval: Duration::from_secs(60),
            // Routing and accounting
            invocation_count_policy: InvocationCountPolicy::BackendSuccess,
            registered_routes: vec![],
            filter_bypass_paths: DEFAULT_BYPASS_PATHS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            // Observability
            response_preview_bytes: DEFAULT_PREVIEW_BYTES,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            metrics_port: 9090,
        }
    }
}
