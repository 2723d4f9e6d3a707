//! Shared gateway state.
//!
//! Holds the immutable configuration, the authentication pipeline, the
//! collaborator trait objects and the upstream client. Everything is behind
//! `Arc`, so cloning per request is cheap and lock-free.
//!
//! # Structured Concurrency
//!
//! Background tasks (the nonce cache sweeper) are managed with
//! `tokio_util::task::TaskTracker` and a `CancellationToken`. Call
//! `shutdown()` to stop them before the process exits.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::auth::replay::NoncePolicyKind;
use crate::auth::{AdmissionPolicy, AuthDecisionPipeline, ReplayGuard};
use crate::collaborators::{
    CredentialStore, InterfaceRegistry, MetricsUsageLedger, StaticCredentialStore,
    StaticInterfaceRegistry, UsageLedger,
};
use crate::config::Config;
use crate::error::GatewayResult;
use crate::metrics;
use crate::middleware::intercept::ResponseInterceptor;
use crate::middleware::{EdgeFilter, TrustedProxyConfig};
use crate::upstream::UpstreamClient;

#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub pipeline: Arc<AuthDecisionPipeline>,
    pub registry: Arc<dyn InterfaceRegistry>,
    pub ledger: Arc<dyn UsageLedger>,
    pub upstream: UpstreamClient,
    /// Timestamp when the gateway started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl GatewayState {
    /// Build state with the in-process collaborators derived from `config`.
    ///
    /// Must be called inside a Tokio runtime when `NONCE_POLICY=cache`,
    /// since the sweeper task is spawned here.
    pub fn new(config: Config) -> GatewayResult<Self> {
        if config.credentials.is_empty() {
            warn!("No GATEWAY_CREDENTIALS configured: every signed request will be denied");
        }
        let credentials = Arc::new(StaticCredentialStore::new(config.credentials.clone()));
        let registry = Arc::new(StaticInterfaceRegistry::new(&config.registered_routes));
        if registry.is_open() {
            info!("No REGISTERED_ROUTES configured: every path is an existing interface");
        }

        Self::with_collaborators(config, credentials, registry, Arc::new(MetricsUsageLedger))
    }

    /// Build state around externally provided collaborators.
    pub fn with_collaborators(
        config: Config,
        credentials: Arc<dyn CredentialStore>,
        registry: Arc<dyn InterfaceRegistry>,
        ledger: Arc<dyn UsageLedger>,
    ) -> GatewayResult<Self> {
        let replay = ReplayGuard::from_kind(
            config.nonce_policy,
            config.nonce_ceiling,
            config.freshness_window_secs,
        );
        let pipeline = AuthDecisionPipeline::new(
            AdmissionPolicy::new(&config.ip_allow_list),
            replay,
            credentials,
        );
        let upstream = UpstreamClient::new(&config.upstream_url, config.upstream_timeout)?;

        let state = Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            registry,
            ledger,
            upstream,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if state.config.nonce_policy == NoncePolicyKind::Cache {
            state.spawn_nonce_sweeper();
        }

        Ok(state)
    }

    /// The filter layer configured from this state.
    pub fn edge_filter(&self) -> EdgeFilter {
        EdgeFilter::new(
            self.pipeline.clone(),
            self.registry.clone(),
            self.ledger.clone(),
        )
        .with_trusted_proxies(TrustedProxyConfig::new(&self.config.trusted_proxies))
        .with_bypass_paths(self.config.filter_bypass_paths.clone())
        .with_count_policy(self.config.invocation_count_policy)
        .with_interceptor(ResponseInterceptor::new(
            self.config.response_preview_bytes,
        ))
    }

    /// Periodically evict expired nonces and publish the cache size.
    fn spawn_nonce_sweeper(&self) {
        let pipeline = self.pipeline.clone();
        let period = self.config.nonce_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Nonce sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let guard = pipeline.replay_guard();
                        let purged = guard.purge_expired(Utc::now().timestamp());
                        let tracked = guard.tracked_nonces();
                        metrics::set_tracked_nonces(tracked);
                        trace!(purged, tracked, "Nonce cache swept");
                    }
                }
            }

            debug!("Nonce sweeper shutting down");
        });
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
