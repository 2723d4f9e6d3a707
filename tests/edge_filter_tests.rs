//! In-process tests of the edge filter in front of a counting backend.
//!
//! The filter is built from `GatewayState` exactly as the binary builds it,
//! then layered over a local router instead of the upstream client so the
//! tests can observe whether the backend was reached.
//!
//! Run with: `cargo test --test edge_filter_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;

use edge_gateway::auth::replay::NoncePolicyKind;
use edge_gateway::auth::signature;
use edge_gateway::collaborators::{
    Credential, CredentialStore, InterfaceRegistry, StaticCredentialStore,
    StaticInterfaceRegistry, UsageLedger,
};
use edge_gateway::middleware::InvocationCountPolicy;
use edge_gateway::{Config, GatewayError, GatewayResult, GatewayState};

const ACCESS_KEY: &str = "dingyu";
const SECRET: &str = "Hello world";

#[derive(Default)]
struct RecordingLedger {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingLedger {
    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Invocation counting is spawned; give it a moment to land.
    async fn settled_count(&self, expected: usize) -> usize {
        for _ in 0..50 {
            if self.count() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.count()
    }
}

#[async_trait]
impl UsageLedger for RecordingLedger {
    async fn record_invocation(&self, access_key: &str, route_id: &str) -> GatewayResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((access_key.to_string(), route_id.to_string()));
        Ok(())
    }
}

struct UnavailableStore;

#[async_trait]
impl CredentialStore for UnavailableStore {
    async fn lookup_credential(&self, _: &str) -> GatewayResult<Option<Credential>> {
        Err(GatewayError::CredentialStore("database unavailable".into()))
    }
}

struct Harness {
    app: Router,
    hits: Arc<AtomicUsize>,
    ledger: Arc<RecordingLedger>,
}

impl Harness {
    fn new(adjust: impl FnOnce(&mut Config)) -> Self {
        Self::with_store(
            adjust,
            Arc::new(StaticCredentialStore::new([Credential::new(
                ACCESS_KEY, SECRET,
            )])),
        )
    }

    fn with_store(adjust: impl FnOnce(&mut Config), store: Arc<dyn CredentialStore>) -> Self {
        let mut config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        adjust(&mut config);

        let registry: Arc<dyn InterfaceRegistry> =
            Arc::new(StaticInterfaceRegistry::new(&config.registered_routes));
        let ledger = Arc::new(RecordingLedger::default());
        let state =
            GatewayState::with_collaborators(config, store, registry, ledger.clone()).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let failing_counter = hits.clone();

        let app = Router::new()
            .route(
                "/api/name",
                get(move || {
                    let hits = counter.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "hello from backend"
                    }
                }),
            )
            .route(
                "/api/broken",
                get(move || {
                    let hits = failing_counter.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        (StatusCode::INTERNAL_SERVER_ERROR, "backend exploded")
                    }
                }),
            )
            .route("/gateway/health", get(|| async { "ok" }))
            .layer(state.edge_filter());

        Self { app, hits, ledger }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    fn backend_hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

struct SignedRequest {
    path: &'static str,
    peer: Option<&'static str>,
    access_key: &'static str,
    nonce: i64,
    timestamp: i64,
    body: &'static str,
    extra_headers: Vec<(&'static str, &'static str)>,
}

impl SignedRequest {
    fn valid() -> Self {
        Self {
            path: "/api/name",
            peer: Some("127.0.0.1:40000"),
            access_key: ACCESS_KEY,
            nonce: 42,
            timestamp: Utc::now().timestamp() - 10,
            body: "ping",
            extra_headers: vec![],
        }
    }

    fn build(self) -> Request<Body> {
        let mut builder = Request::builder()
            .uri(self.path)
            .header("accessKey", self.access_key)
            .header("nonce", self.nonce.to_string())
            .header("timestamp", self.timestamp.to_string())
            .header("sign", signature::sign(self.body, SECRET).unwrap())
            .header("body", self.body);
        for (name, value) in self.extra_headers {
            builder = builder.header(name, value);
        }

        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = self.peer {
            let addr: SocketAddr = peer.parse().unwrap();
            req.extensions_mut().insert(ConnectInfo(addr));
        }
        req
    }
}

fn bare_request(path: &str, peer: &str) -> Request<Body> {
    let mut req = Request::builder().uri(path).body(Body::empty()).unwrap();
    let addr: SocketAddr = peer.parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

// =============================================================================
// Allow path
// =============================================================================

#[tokio::test]
async fn test_valid_signed_request_reaches_backend() {
    let harness = Harness::new(|_| {});

    let (status, body) = harness.send(SignedRequest::valid().build()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hello from backend");
    assert_eq!(harness.backend_hits(), 1);
    assert_eq!(harness.ledger.settled_count(1).await, 1);
    assert_eq!(
        harness.ledger.calls.lock().unwrap()[0],
        (ACCESS_KEY.to_string(), "/api/name".to_string())
    );
}

#[tokio::test]
async fn test_credential_header_names_are_case_insensitive() {
    let harness = Harness::new(|_| {});
    let now = Utc::now().timestamp();

    let mut req = Request::builder()
        .uri("/api/name")
        .header("ACCESSKEY", ACCESS_KEY)
        .header("Nonce", "7")
        .header("TimeStamp", (now - 1).to_string())
        .header("SIGN", signature::sign("ping", SECRET).unwrap())
        .header("Body", "ping")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut()
        .insert(ConnectInfo("127.0.0.1:1".parse::<SocketAddr>().unwrap()));

    let (status, _) = harness.send(req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_bypass_path_needs_no_credentials() {
    let harness = Harness::new(|_| {});

    let (status, body) = harness
        .send(bare_request("/gateway/health", "10.0.0.5:1234"))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

// =============================================================================
// Deny path
// =============================================================================

#[tokio::test]
async fn test_expired_timestamp_is_forbidden_and_backend_untouched() {
    let harness = Harness::new(|_| {});
    let req = SignedRequest {
        timestamp: Utc::now().timestamp() - 400,
        ..SignedRequest::valid()
    };

    let (status, body) = harness.send(req.build()).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.is_empty());
    assert_eq!(harness.backend_hits(), 0);
    assert_eq!(harness.ledger.count(), 0);
}

#[tokio::test]
async fn test_unknown_access_key_is_forbidden() {
    let harness = Harness::new(|_| {});
    let req = SignedRequest {
        access_key: "unknown",
        ..SignedRequest::valid()
    };

    let (status, body) = harness.send(req.build()).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.is_empty());
    assert_eq!(harness.backend_hits(), 0);
}

#[tokio::test]
async fn test_source_outside_allow_list_is_forbidden() {
    let harness = Harness::new(|_| {});
    let req = SignedRequest {
        peer: Some("10.0.0.5:40000"),
        ..SignedRequest::valid()
    };

    let (status, _) = harness.send(req.build()).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(harness.backend_hits(), 0);
}

#[tokio::test]
async fn test_source_outside_allow_list_without_headers_is_forbidden() {
    let harness = Harness::new(|_| {});

    let (status, _) = harness
        .send(bare_request("/api/name", "10.0.0.5:40000"))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_missing_connection_info_is_forbidden() {
    let harness = Harness::new(|_| {});
    let req = SignedRequest {
        peer: None,
        ..SignedRequest::valid()
    };

    let (status, _) = harness.send(req.build()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_missing_credentials_are_forbidden() {
    let harness = Harness::new(|_| {});

    let (status, body) = harness
        .send(bare_request("/api/name", "127.0.0.1:40000"))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.is_empty());
    assert_eq!(harness.backend_hits(), 0);
}

#[tokio::test]
async fn test_nonce_above_ceiling_is_forbidden() {
    let harness = Harness::new(|_| {});
    let req = SignedRequest {
        nonce: 10_001,
        ..SignedRequest::valid()
    };

    let (status, _) = harness.send(req.build()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_replayed_nonce_is_forbidden_with_cache_policy() {
    let harness = Harness::new(|c| c.nonce_policy = NoncePolicyKind::Cache);

    let (first, _) = harness.send(SignedRequest::valid().build()).await;
    let (replay, _) = harness.send(SignedRequest::valid().build()).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(replay, StatusCode::FORBIDDEN);
    assert_eq!(harness.backend_hits(), 1);
}

#[tokio::test]
async fn test_forged_signature_does_not_burn_nonce_with_cache_policy() {
    let harness = Harness::new(|c| c.nonce_policy = NoncePolicyKind::Cache);
    let mut forged = SignedRequest::valid().build();
    forged
        .headers_mut()
        .insert("sign", axum::http::HeaderValue::from_static("deadbeef"));

    let (forged_status, _) = harness.send(forged).await;
    let (genuine_status, _) = harness.send(SignedRequest::valid().build()).await;

    assert_eq!(forged_status, StatusCode::FORBIDDEN);
    assert_eq!(genuine_status, StatusCode::OK);
    assert_eq!(harness.backend_hits(), 1);
}

#[tokio::test]
async fn test_tampered_body_is_forbidden() {
    let harness = Harness::new(|_| {});
    let mut req = SignedRequest::valid().build();
    req.headers_mut()
        .insert("body", axum::http::HeaderValue::from_static("pong"));

    let (status, _) = harness.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// =============================================================================
// Trusted proxies
// =============================================================================

#[tokio::test]
async fn test_forwarded_for_honoured_from_trusted_proxy() {
    let harness = Harness::new(|c| c.trusted_proxies = vec!["192.168.0.0/16".to_string()]);
    let req = SignedRequest {
        peer: Some("192.168.10.2:40000"),
        extra_headers: vec![("x-forwarded-for", "127.0.0.1, 192.168.10.2")],
        ..SignedRequest::valid()
    };

    let (status, _) = harness.send(req.build()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_forwarded_for_ignored_from_untrusted_peer() {
    let harness = Harness::new(|c| c.trusted_proxies = vec!["192.168.0.0/16".to_string()]);
    let req = SignedRequest {
        peer: Some("10.0.0.5:40000"),
        extra_headers: vec![("x-forwarded-for", "127.0.0.1")],
        ..SignedRequest::valid()
    };

    let (status, _) = harness.send(req.build()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// =============================================================================
// Interfaces, faults and accounting
// =============================================================================

#[tokio::test]
async fn test_unregistered_interface_is_not_found() {
    let harness = Harness::new(|c| c.registered_routes = vec!["/api/name".to_string()]);
    let req = SignedRequest {
        path: "/api/broken",
        ..SignedRequest::valid()
    };

    let (status, body) = harness.send(req.build()).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
    assert_eq!(harness.backend_hits(), 0);
}

#[tokio::test]
async fn test_credential_store_fault_is_internal_error() {
    let harness = Harness::with_store(|_| {}, Arc::new(UnavailableStore));

    let (status, body) = harness.send(SignedRequest::valid().build()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
    assert_eq!(harness.backend_hits(), 0);
}

#[tokio::test]
async fn test_backend_error_status_passes_through_uncounted() {
    let harness = Harness::new(|_| {});
    let req = SignedRequest {
        path: "/api/broken",
        ..SignedRequest::valid()
    };

    let (status, body) = harness.send(req.build()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, b"backend exploded");
    assert_eq!(harness.backend_hits(), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.ledger.count(), 0);
}

#[tokio::test]
async fn test_every_policy_counts_backend_errors() {
    let harness =
        Harness::new(|c| c.invocation_count_policy = InvocationCountPolicy::EveryAllowedCall);
    let req = SignedRequest {
        path: "/api/broken",
        ..SignedRequest::valid()
    };

    harness.send(req.build()).await;

    assert_eq!(harness.ledger.settled_count(1).await, 1);
}
