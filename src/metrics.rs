//! Prometheus metrics for gateway observability.
//!
//! Metrics are exposed via a dedicated HTTP listener (`METRICS_PORT`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_auth_decisions_total` - Pipeline verdicts (labels: outcome, reason)
//! - `gateway_invocations_total` - Counted invocations (labels: access_key)
//! - `gateway_response_bytes_total` - Bytes observed by the response interceptor
//!   (labels: route, the registry's route pattern, never the raw path)
//! - `gateway_intercepted_streams_total` - Intercepted streams by outcome
//!   (completed, degraded, cancelled, upstream_error)
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - Time to response head (labels: method, status)
//!
//! ## Gauges
//! - `gateway_tracked_nonces` - Live entries in the nonce cache
//!
//! # Usage
//!
//! ```rust,ignore
//! use edge_gateway::metrics::{init_metrics, record_auth_decision};
//!
//! init_metrics(addr)?;
//! record_auth_decision("denied", "timestamp_expired");
//! ```

use axum::http::Method;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const AUTH_DECISIONS_TOTAL: &str = "gateway_auth_decisions_total";
    pub const INVOCATIONS_TOTAL: &str = "gateway_invocations_total";
    pub const RESPONSE_BYTES_TOTAL: &str = "gateway_response_bytes_total";
    pub const INTERCEPTED_STREAMS_TOTAL: &str = "gateway_intercepted_streams_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const TRACKED_NONCES: &str = "gateway_tracked_nonces";
}

/// Initialize the Prometheus metrics exporter on `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::AUTH_DECISIONS_TOTAL,
        "Authentication verdicts by outcome and deny reason"
    );
    describe_counter!(
        names::INVOCATIONS_TOTAL,
        "Backend invocations counted for usage accounting"
    );
    describe_counter!(
        names::RESPONSE_BYTES_TOTAL,
        "Response body bytes observed in transit"
    );
    describe_counter!(
        names::INTERCEPTED_STREAMS_TOTAL,
        "Intercepted response streams by final outcome"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Time from request arrival to response head in seconds"
    );
    describe_gauge!(
        names::TRACKED_NONCES,
        "Nonces currently held by the replay cache"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_auth_decision(outcome: &'static str, reason: &'static str) {
    counter!(names::AUTH_DECISIONS_TOTAL, "outcome" => outcome, "reason" => reason).increment(1);
}

pub fn record_invocation(access_key: &str) {
    counter!(names::INVOCATIONS_TOTAL, "access_key" => access_key.to_string()).increment(1);
}

/// `route` must be a bounded label (see `InterfaceRegistry::route_label`).
pub fn record_response_bytes(route: &str, bytes: u64) {
    counter!(names::RESPONSE_BYTES_TOTAL, "route" => route.to_string()).increment(bytes);
}

/// Outcome is one of `completed`, `degraded`, `cancelled`, `upstream_error`.
pub fn record_intercepted_stream(outcome: &'static str) {
    counter!(names::INTERCEPTED_STREAMS_TOTAL, "outcome" => outcome).increment(1);
}

/// Extension methods collapse to `OTHER`.
pub fn record_request_duration(method: &Method, status: u16, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method_label(method), "status" => status.to_string())
        .record(duration_secs);
}

fn method_label(method: &Method) -> &'static str {
    match method.as_str() {
        "GET" => "GET",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "PATCH" => "PATCH",
        "HEAD" => "HEAD",
        "OPTIONS" => "OPTIONS",
        "CONNECT" => "CONNECT",
        "TRACE" => "TRACE",
        _ => "OTHER",
    }
}

pub fn set_tracked_nonces(count: usize) {
    gauge!(names::TRACKED_NONCES).set(count as f64);
}
