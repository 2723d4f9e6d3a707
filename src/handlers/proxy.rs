//! Catch-all handler forwarding authenticated requests upstream.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response};
use axum::response::IntoResponse;

use crate::state::GatewayState;

/// Any path not served by the gateway itself goes to `UPSTREAM_URL`.
pub async fn forward_to_upstream(
    State(state): State<GatewayState>,
    req: Request<Body>,
) -> Response<Body> {
    match state
        .upstream
        .forward(req, state.config.max_request_body_size)
        .await
    {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}
