//! Ordered allow/deny decision for a single request.
//!
//! # Stages
//!
//! ```text
//! admit(source) ─► fields present ─► credential lookup ─► nonce ─► freshness ─► signature ─► commit nonce ─► Allowed
//!      │                 │                  │               │          │            │              │
//!  IpNotWhitelisted  MissingCredential  UnknownAccessKey  Nonce-   Timestamp-   Signature-     Nonce-
//!                    Field                                Rejected Expired      Mismatch       Rejected
//! ```
//!
//! Each stage short-circuits. The nonce stage is read-only; the nonce is
//! recorded only after the signature verifies, so a denied request leaves
//! no state behind. Losing a commit race to a concurrent duplicate is a
//! `NonceRejected`.
//!
//! A credential store *fault* is not a deny: it surfaces as
//! [`GatewayError`] and becomes a 500.

use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::admission::AdmissionPolicy;
use super::context::AuthContext;
use super::replay::ReplayGuard;
use super::signature;
use crate::collaborators::CredentialStore;
use crate::error::GatewayResult;
use crate::metrics;

/// Why a request was denied. Every reason maps to 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    IpNotWhitelisted,
    MissingCredentialField,
    UnknownAccessKey,
    NonceRejected,
    TimestampExpired,
    SignatureMismatch,
}

impl DenyReason {
    /// Stable snake_case label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::IpNotWhitelisted => "ip_not_whitelisted",
            DenyReason::MissingCredentialField => "missing_credential_field",
            DenyReason::UnknownAccessKey => "unknown_access_key",
            DenyReason::NonceRejected => "nonce_rejected",
            DenyReason::TimestampExpired => "timestamp_expired",
            DenyReason::SignatureMismatch => "signature_mismatch",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::FORBIDDEN
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the pipeline. Produced at most once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed { access_key: String },
    Denied(DenyReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed { .. })
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Verdict::Allowed { .. } => None,
            Verdict::Denied(reason) => Some(*reason),
        }
    }
}

/// Admission → credential presence → lookup → replay → signature.
#[derive(Clone)]
pub struct AuthDecisionPipeline {
    admission: AdmissionPolicy,
    replay: ReplayGuard,
    credentials: Arc<dyn CredentialStore>,
}

impl AuthDecisionPipeline {
    pub fn new(
        admission: AdmissionPolicy,
        replay: ReplayGuard,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            admission,
            replay,
            credentials,
        }
    }

    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.replay
    }

    /// Decide against the current wall clock.
    pub async fn decide(
        &self,
        source_host: Option<&str>,
        headers: &HeaderMap,
    ) -> GatewayResult<Verdict> {
        self.decide_at(source_host, headers, Utc::now().timestamp())
            .await
    }

    /// Decide with an explicit `now` in Unix seconds.
    pub async fn decide_at(
        &self,
        source_host: Option<&str>,
        headers: &HeaderMap,
        now: i64,
    ) -> GatewayResult<Verdict> {
        let verdict = self.evaluate(source_host, headers, now).await?;

        match &verdict {
            Verdict::Allowed { access_key } => {
                info!(access_key = %access_key, source_host, "Request authenticated");
                metrics::record_auth_decision("allowed", "none");
            }
            Verdict::Denied(reason) => {
                warn!(reason = %reason, source_host, "Request denied");
                metrics::record_auth_decision("denied", reason.as_str());
            }
        }

        Ok(verdict)
    }

    async fn evaluate(
        &self,
        source_host: Option<&str>,
        headers: &HeaderMap,
        now: i64,
    ) -> GatewayResult<Verdict> {
        // 1. Source admission happens before any header is parsed
        if !self.admission.admit(source_host) {
            return Ok(Verdict::Denied(DenyReason::IpNotWhitelisted));
        }

        // 2. All five credential fields, with numeric fields validated
        let ctx = match AuthContext::from_headers(headers) {
            Ok(ctx) => ctx,
            Err(e) => {
                debug!(error = %e, "Credential headers rejected");
                return Ok(Verdict::Denied(DenyReason::MissingCredentialField));
            }
        };

        // 3. Credential lookup (a store fault propagates as a 500)
        let Some(credential) = self.credentials.lookup_credential(&ctx.access_key).await? else {
            debug!(access_key = %ctx.access_key, "Unknown access key");
            return Ok(Verdict::Denied(DenyReason::UnknownAccessKey));
        };

        // 4. Nonce (read-only)
        if !self.replay.check_nonce(&ctx.access_key, ctx.nonce, now) {
            debug!(access_key = %ctx.access_key, nonce = ctx.nonce, "Nonce rejected");
            return Ok(Verdict::Denied(DenyReason::NonceRejected));
        }

        // 5. Freshness
        if !self.replay.check_freshness(ctx.timestamp_seconds, now) {
            debug!(
                access_key = %ctx.access_key,
                timestamp = ctx.timestamp_seconds,
                now,
                window_secs = self.replay.window_seconds(),
                "Request timestamp outside freshness window"
            );
            return Ok(Verdict::Denied(DenyReason::TimestampExpired));
        }

        // 6. Signature
        if !signature::verify(&ctx.signature, &ctx.canonical_body, &credential.secret_key) {
            debug!(access_key = %ctx.access_key, "Signature mismatch");
            return Ok(Verdict::Denied(DenyReason::SignatureMismatch));
        }

        // 7. Consume the nonce
        if !self.replay.commit_nonce(&ctx.access_key, ctx.nonce, now) {
            debug!(access_key = %ctx.access_key, nonce = ctx.nonce, "Nonce lost commit race");
            return Ok(Verdict::Denied(DenyReason::NonceRejected));
        }

        Ok(Verdict::Allowed {
            access_key: ctx.access_key,
        })
    }
}
