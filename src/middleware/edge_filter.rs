//! The edge filter: authenticates, forwards, counts and observes.
//!
//! # Flow
//!
//! ```text
//! Request
//!   │ bypass path? ─────────────────────────────────────────► inner service
//!   ▼
//! resolve source host (ConnectInfo / trusted proxy headers)
//!   ▼
//! AuthDecisionPipeline::decide ──Denied──► 403 (empty)
//!   │                          └─fault──► 500 (empty)
//!   ▼ Allowed { access_key }
//! InterfaceRegistry::interface_exists ──false──► 404 (empty)
//!   │                                  └─fault──► 500 (empty)
//!   ▼
//! inner service (upstream) ──► response head
//!   ├─► spawn UsageLedger::record_invocation (per InvocationCountPolicy)
//!   └─► ResponseInterceptor wraps the body ──► caller
//! ```
//!
//! All logs emitted while handling one request carry the request's
//! correlation ID through the `edge_filter` span.

use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{Instrument, debug, info, info_span, warn};

use super::intercept::ResponseInterceptor;
use super::ip::{TrustedProxyConfig, resolve_source_host};
use super::request_id::RequestIdExt;
use crate::auth::{AuthDecisionPipeline, Verdict};
use crate::collaborators::{InterfaceRegistry, UsageLedger};
use crate::metrics;

/// Paths that skip the filter unless configured otherwise.
pub const DEFAULT_BYPASS_PATHS: [&str; 1] = ["/gateway/health"];

/// Which forwarded calls are counted against the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationCountPolicy {
    /// Every allowed call that reached the backend.
    EveryAllowedCall,
    /// Only calls the backend answered with 2xx.
    #[default]
    BackendSuccess,
}

impl InvocationCountPolicy {
    pub fn should_count(&self, backend_status: StatusCode) -> bool {
        match self {
            InvocationCountPolicy::EveryAllowedCall => true,
            InvocationCountPolicy::BackendSuccess => backend_status.is_success(),
        }
    }
}

impl FromStr for InvocationCountPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "every" => Ok(InvocationCountPolicy::EveryAllowedCall),
            "success" => Ok(InvocationCountPolicy::BackendSuccess),
            other => Err(format!(
                "unknown invocation count policy '{other}' (expected 'every' or 'success')"
            )),
        }
    }
}

/// Tower layer installing the edge filter in front of a service.
#[derive(Clone)]
pub struct EdgeFilter {
    pipeline: Arc<AuthDecisionPipeline>,
    registry: Arc<dyn InterfaceRegistry>,
    ledger: Arc<dyn UsageLedger>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    bypass_paths: Arc<Vec<String>>,
    count_policy: InvocationCountPolicy,
    interceptor: ResponseInterceptor,
}

impl EdgeFilter {
    pub fn new(
        pipeline: Arc<AuthDecisionPipeline>,
        registry: Arc<dyn InterfaceRegistry>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        Self {
            pipeline,
            registry,
            ledger,
            trusted_proxies: Arc::new(TrustedProxyConfig::default()),
            bypass_paths: Arc::new(
                DEFAULT_BYPASS_PATHS
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect(),
            ),
            count_policy: InvocationCountPolicy::default(),
            interceptor: ResponseInterceptor::default(),
        }
    }

    pub fn with_trusted_proxies(mut self, trusted_proxies: TrustedProxyConfig) -> Self {
        self.trusted_proxies = Arc::new(trusted_proxies);
        self
    }

    /// Exact, case-sensitive path matches. Query strings are ignored.
    pub fn with_bypass_paths(mut self, bypass_paths: Vec<String>) -> Self {
        self.bypass_paths = Arc::new(bypass_paths);
        self
    }

    pub fn with_count_policy(mut self, count_policy: InvocationCountPolicy) -> Self {
        self.count_policy = count_policy;
        self
    }

    pub fn with_interceptor(mut self, interceptor: ResponseInterceptor) -> Self {
        self.interceptor = interceptor;
        self
    }

    fn is_bypassed(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| p == path)
    }

    /// Fire-and-forget; a slow or failing ledger never delays the response.
    fn dispatch_invocation(&self, access_key: String, route: String) {
        let ledger = self.ledger.clone();
        tokio::spawn(
            async move {
                if let Err(e) = ledger.record_invocation(&access_key, &route).await {
                    warn!(
                        error = %e,
                        access_key = %access_key,
                        route = %route,
                        "Failed to record invocation"
                    );
                }
            }
            .in_current_span(),
        );
    }

    async fn process<S>(
        &self,
        req: Request<Body>,
        mut inner: S,
    ) -> Result<Response<Body>, S::Error>
    where
        S: Service<Request<Body>, Response = Response<Body>>,
    {
        let path = req.uri().path().to_string();
        let source_host = resolve_source_host(&req, &self.trusted_proxies);

        info!(
            method = %req.method(),
            path = %path,
            query = req.uri().query().unwrap_or(""),
            source_host = source_host.as_deref().unwrap_or("unresolved"),
            "Inbound request"
        );

        let access_key = match self
            .pipeline
            .decide(source_host.as_deref(), req.headers())
            .await
        {
            Ok(Verdict::Allowed { access_key }) => access_key,
            Ok(Verdict::Denied(reason)) => return Ok(reason.status_code().into_response()),
            Err(e) => return Ok(e.into_response()),
        };

        match self.registry.interface_exists(&path).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    path = %path,
                    access_key = %access_key,
                    "Requested interface does not exist"
                );
                return Ok(StatusCode::NOT_FOUND.into_response());
            }
            Err(e) => return Ok(e.into_response()),
        }

        let response = inner.call(req).await?;
        let status = response.status();
        debug!(path = %path, status = status.as_u16(), "Backend responded");

        if self.count_policy.should_count(status) {
            self.dispatch_invocation(access_key, path.clone());
        } else {
            debug!(
                path = %path,
                status = status.as_u16(),
                "Invocation not counted for non-success backend response"
            );
        }

        let route_label = self.registry.route_label(&path);
        Ok(self.interceptor.intercept(response, &route_label))
    }
}

impl<S> Layer<S> for EdgeFilter {
    type Service = EdgeFilterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        EdgeFilterService {
            inner,
            filter: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct EdgeFilterService<S> {
    inner: S,
    filter: EdgeFilter,
}

impl<S> Service<Request<Body>> for EdgeFilterService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let filter = self.filter.clone();
        let mut inner = self.inner.clone();

        if filter.is_bypassed(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let span = info_span!(
            "edge_filter",
            request_id = req.request_id().map(|id| id.as_str()).unwrap_or("-"),
        );

        Box::pin(
            async move {
                let started = Instant::now();
                let method = req.method().clone();

                let response = filter.process(req, inner).await?;

                metrics::record_request_duration(
                    &method,
                    response.status().as_u16(),
                    started.elapsed().as_secs_f64(),
                );
                Ok(response)
            }
            .instrument(span),
        )
    }
}
