//! Forwarding of allowed requests to the configured upstream.
//!
//! The request body is buffered (bounded by `MAX_REQUEST_BODY_SIZE`) before
//! the upstream call; the response body is streamed back frame by frame so
//! the response interceptor sees the upstream's own chunking.
//!
//! The upstream timeout bounds connecting and receiving the response head.
//! Once the head has arrived the body streams for as long as the upstream
//! keeps sending.
//!
//! Hop-by-hop headers (RFC 9110 §7.6.1) and `Host` are not forwarded in
//! either direction.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Request, Response};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_forwardable(name: &HeaderName) -> bool {
    let name = name.as_str();
    name != "host" && name != "content-length" && !HOP_BY_HOP_HEADERS.contains(&name)
}

fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_forwardable(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// HTTP client bound to a single upstream base URL.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: Arc<str>,
    head_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(base_url: &str, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to build upstream client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').into(),
            head_timeout: timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn target_url<B>(&self, req: &Request<B>) -> String {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}{}", self.base_url, path_and_query)
    }

    /// Send `req` upstream and stream the answer back.
    ///
    /// # Errors
    ///
    /// - `PayloadTooLarge` when the body exceeds `max_body_bytes`
    /// - `UpstreamTimeout` when the upstream does not answer in time
    /// - `Upstream` for connection and protocol failures
    pub async fn forward(
        &self,
        req: Request<Body>,
        max_body_bytes: usize,
    ) -> GatewayResult<Response<Body>> {
        let url = self.target_url(&req);
        let (parts, body) = req.into_parts();

        let body = match Limited::new(body, max_body_bytes).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                return Err(GatewayError::PayloadTooLarge {
                    limit: max_body_bytes,
                });
            }
            Err(e) => {
                return Err(GatewayError::Internal(format!(
                    "Failed to read request body: {e}"
                )));
            }
        };

        debug!(method = %parts.method, url = %url, body_bytes = body.len(), "Forwarding upstream");

        let send = self
            .client
            .request(parts.method, &url)
            .headers(forwardable_headers(&parts.headers))
            .body(body)
            .send();

        let upstream = match tokio::time::timeout(self.head_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => {
                warn!(url = %url, "Upstream connect timed out");
                return Err(GatewayError::UpstreamTimeout(url));
            }
            Ok(Err(e)) => return Err(GatewayError::Upstream(e.to_string())),
            Err(_) => {
                warn!(url = %url, timeout = ?self.head_timeout, "Upstream response head timed out");
                return Err(GatewayError::UpstreamTimeout(url));
            }
        };

        let status = upstream.status();
        let headers = forwardable_headers(upstream.headers());

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Ok(response)
    }
}
