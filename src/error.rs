use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Gateway-wide internal faults with their HTTP status mapping.
///
/// These are distinct from [`DenyReason`](crate::auth::DenyReason): a deny
/// is an expected outcome of authentication and always maps to 403, while a
/// `GatewayError` means something inside the gateway or one of its
/// collaborators misbehaved.
///
/// # Response Bodies
///
/// Every variant renders with an **empty body**. The full error is logged
/// server-side; callers only learn the status code.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Credential store lookup failed: {0}")]
    CredentialStore(String),

    #[error("Interface registry lookup failed: {0}")]
    Registry(String),

    #[error("Usage ledger update failed: {0}")]
    Ledger(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status code this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // Anything touching the auth decision or routing metadata is a 500
            GatewayError::CredentialStore(_)
            | GatewayError::Registry(_)
            | GatewayError::Ledger(_)
            | GatewayError::ConfigError(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,

            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log the full error details server-side, never echo them to the caller
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        status.into_response()
    }
}

/// Convenience type alias for Results with GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_faults_map_to_500() {
        assert_eq!(
            GatewayError::CredentialStore("db down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::Registry("timeout".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upstream_faults_map_to_gateway_statuses() {
        assert_eq!(
            GatewayError::Upstream("refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamTimeout("30s".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::PayloadTooLarge { limit: 10 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[tokio::test]
    async fn test_error_response_has_empty_body() {
        use http_body_util::BodyExt;

        let response =
            GatewayError::CredentialStore("secret detail".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }
}
