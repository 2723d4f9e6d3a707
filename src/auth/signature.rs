//! Keyed request signatures.
//!
//! Callers sign the canonical body with their secret key using HMAC-SHA256
//! and send the lowercase hex digest in the `sign` header. Verification
//! recomputes the digest and compares it in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("secret key rejected by HMAC: {0}")]
    InvalidKey(String),
}

/// Compute the hex signature of `canonical_body` under `secret_key`.
pub fn sign(canonical_body: &str, secret_key: &str) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    mac.update(canonical_body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a caller-supplied signature against the expected one.
///
/// Byte-for-byte equality with [`sign`], so an uppercase hex digest does not
/// verify. A signing failure verifies as `false`.
pub fn verify(candidate_signature: &str, canonical_body: &str, secret_key: &str) -> bool {
    match sign(canonical_body, secret_key) {
        Ok(expected) => expected
            .as_bytes()
            .ct_eq(candidate_signature.as_bytes())
            .into(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to compute expected signature");
            false
        }
    }
}
