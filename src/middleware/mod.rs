//! HTTP middleware for gateway admission and observability.
//!
//! - **Edge filter**: signed-request authentication, interface check,
//!   invocation counting and response interception
//! - **Source IP**: peer address resolution with trusted-proxy headers
//! - **Request ID**: generation and propagation for correlation
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Trace → Edge Filter → Upstream → Response
//!               ↓                    ↓
//!        X-Request-Id header   403 / 404 / 500 (empty body)
//! ```

pub mod edge_filter;
pub mod intercept;
pub mod ip;
pub mod request_id;

pub use edge_filter::{EdgeFilter, EdgeFilterService, InvocationCountPolicy};
pub use intercept::{BodyObserver, LoggingObserver, ObservedBody, ResponseInterceptor};
pub use ip::{TrustedProxyConfig, resolve_source_host};
pub use request_id::{RequestId, RequestIdExt, RequestIdLayer};
