//! # Edge Gateway
//!
//! An API gateway edge filter built on Axum and Tower. Every request to a
//! backend interface passes through one pipeline:
//!
//! - **Admission**: source IP allow-list (exact hosts or CIDR ranges)
//! - **Authentication**: `accessKey`/`nonce`/`timestamp`/`sign`/`body`
//!   headers, credential lookup, replay protection, HMAC-SHA256 signature
//! - **Forwarding**: interface existence check, then the upstream call
//! - **Accounting**: best-effort invocation counting per access key
//! - **Observation**: a pass-through response body interceptor for logging
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → Edge Filter)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  AuthDecisionPipeline (admission, replay, signature)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Collaborators (CredentialStore, InterfaceRegistry,         │
//! │                 UsageLedger)                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  UpstreamClient (reqwest, streamed responses)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edge_gateway::{Config, GatewayState, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = GatewayState::new(config)?;
//!     let app = build_router(state);
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     Ok(())
//! }
//! ```
//!
//! ## Credentials
//!
//! ```bash
//! GATEWAY_CREDENTIALS="dingyu:Hello world" IP_ALLOW_LIST=127.0.0.1 cargo run
//! ```

pub mod auth;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod upstream;
pub mod utils;

// Re-exports for convenience
pub use auth::{AuthDecisionPipeline, DenyReason, Verdict};
pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use routes::build_router;
pub use state::GatewayState;
