//! Per-request authentication context extracted from headers.

use axum::http::HeaderMap;
use thiserror::Error;

/// Header carrying the caller's public access key.
pub const ACCESS_KEY_HEADER: &str = "accesskey";
/// Header carrying the decimal nonce.
pub const NONCE_HEADER: &str = "nonce";
/// Header carrying the decimal Unix timestamp in seconds.
pub const TIMESTAMP_HEADER: &str = "timestamp";
/// Header carrying the hex signature.
pub const SIGN_HEADER: &str = "sign";
/// Header carrying the canonical body the signature covers.
pub const BODY_HEADER: &str = "body";

/// Why credential headers could not be turned into an [`AuthContext`].
///
/// Both variants map to the same deny reason; the split only helps logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialFieldError {
    #[error("header `{0}` is missing or blank")]
    Missing(&'static str),

    #[error("header `{0}` is not a decimal integer")]
    Malformed(&'static str),
}

/// Credential fields of a single request. Dropped once a verdict exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub access_key: String,
    pub nonce: i64,
    pub timestamp_seconds: i64,
    pub signature: String,
    pub canonical_body: String,
}

impl AuthContext {
    /// Extract and validate all five credential headers.
    ///
    /// Presence of every field is checked before any numeric parsing, so a
    /// request missing `sign` reports `sign` even when `nonce` is garbage.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, CredentialFieldError> {
        let access_key = required(headers, ACCESS_KEY_HEADER)?;
        let nonce = required(headers, NONCE_HEADER)?;
        let timestamp = required(headers, TIMESTAMP_HEADER)?;
        let signature = required(headers, SIGN_HEADER)?;
        let canonical_body = required(headers, BODY_HEADER)?;

        Ok(Self {
            access_key: access_key.to_string(),
            nonce: decimal(nonce, NONCE_HEADER)?,
            timestamp_seconds: decimal(timestamp, TIMESTAMP_HEADER)?,
            signature: signature.to_string(),
            canonical_body: canonical_body.to_string(),
        })
    }
}

/// First value of `name`, rejecting absent, non-UTF-8 and whitespace-only values.
fn required<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<&'a str, CredentialFieldError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .ok_or(CredentialFieldError::Missing(name))
}

fn decimal(value: &str, name: &'static str) -> Result<i64, CredentialFieldError> {
    value
        .parse::<i64>()
        .map_err(|_| CredentialFieldError::Malformed(name))
}
