//! Correlation IDs for gateway requests.
//!
//! Every request passing the gateway gets a [`RequestId`]:
//!
//! 1. An incoming `X-Request-Id` header is reused when it is a sane token
//!    (non-empty, at most [`MAX_REQUEST_ID_LEN`] visible ASCII characters)
//! 2. Otherwise a UUIDv4 is generated
//!
//! The ID is stored as a request extension (read by the edge filter for its
//! decision logs), forwarded upstream in the header, and echoed on the
//! response so callers can correlate a 403 with gateway logs.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::debug;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longer client-supplied IDs are replaced.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Request extension carrying the correlation ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_request<B>(req: &Request<B>) -> Self {
        req.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| is_acceptable(v))
            .map(|v| Self(v.into()))
            .unwrap_or_else(Self::generate)
    }

    fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_acceptable(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value.bytes().all(|b| b.is_ascii_graphic())
}

#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let request_id = RequestId::from_request(&req);
        let header = request_id.header_value();

        if let Some(value) = header.clone() {
            req.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        req.extensions_mut().insert(request_id.clone());
        debug!(request_id = %request_id, path = %req.uri().path(), "Request received");

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;

            if let Some(value) = header {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }

            Ok(response)
        })
    }
}

/// Read the correlation ID installed by [`RequestIdLayer`].
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&RequestId>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<&RequestId> {
        self.extensions().get::<RequestId>()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[test]
    fn test_existing_request_id_is_reused() {
        let req = Request::builder()
            .header("x-request-id", "existing-id-123")
            .body(Body::empty())
            .unwrap();

        assert_eq!(RequestId::from_request(&req).as_str(), "existing-id-123");
    }

    #[test]
    fn test_missing_request_id_is_generated() {
        let req = Request::builder().body(Body::empty()).unwrap();
        let id = RequestId::from_request(&req);
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_unacceptable_request_id_is_replaced() {
        let too_long = "x".repeat(MAX_REQUEST_ID_LEN + 1);
        for bad in ["", "has space", too_long.as_str()] {
            let req = Request::builder()
                .header("x-request-id", bad)
                .body(Body::empty())
                .unwrap();
            let id = RequestId::from_request(&req);
            assert!(Uuid::parse_str(id.as_str()).is_ok(), "input {bad:?}");
        }
    }

    #[tokio::test]
    async fn test_layer_sets_extension_and_echoes_header() {
        let service = RequestIdLayer::new().layer(tower::service_fn(
            |req: Request<Body>| async move {
                let seen = req.request_id().map(|id| id.to_string());
                assert_eq!(seen.as_deref(), Some("corr-1"));
                Ok::<_, std::convert::Infallible>(
                    Response::builder()
                        .status(StatusCode::OK)
                        .body(Body::empty())
                        .unwrap(),
                )
            },
        ));

        let response = service
            .oneshot(
                Request::builder()
                    .header("x-request-id", "corr-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "corr-1");
    }

    #[test]
    fn test_request_id_ext_absent_without_layer() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert!(req.request_id().is_none());
    }
}
