//! Gateway routing with the middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Adds X-Request-Id header
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response spans
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Edge Filter    │ ← 403/404/500 (bypassed for /gateway/health)
//! └────────┬─────────┘
//!          ▼
//!   /gateway/health  or  fallback → upstream
//! ```

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::RequestIdLayer;
use crate::state::GatewayState;

/// Path of the gateway's own health endpoint.
pub const HEALTH_PATH: &str = "/gateway/health";

/// Build the gateway router: every path except [`HEALTH_PATH`] is forwarded
/// upstream once the edge filter allows it.
pub fn build_router(state: GatewayState) -> Router {
    let config = &state.config;

    info!(
        upstream = %config.upstream_url,
        allow_list = ?config.ip_allow_list,
        trusted_proxies = config.trusted_proxies.len(),
        credentials = config.credentials.len(),
        nonce_policy = ?config.nonce_policy,
        count_policy = ?config.invocation_count_policy,
        "Edge filter configured"
    );

    // Layers wrap bottom to top: the last one added runs first
    Router::new()
        .route(HEALTH_PATH, get(handlers::health_check))
        .fallback(handlers::forward_to_upstream)
        .layer(state.edge_filter())
        .layer(TraceLayer::new_for_http())
        .layer(RequestIdLayer::new())
        .with_state(state)
}
