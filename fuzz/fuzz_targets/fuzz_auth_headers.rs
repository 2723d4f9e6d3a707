//! Fuzz testing for credential header parsing and source admission.
//!
//! Checks that arbitrary header values, allow-list entries and signatures
//! never cause a panic, and that a parsed context always carries non-blank
//! fields.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_auth_headers -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use edge_gateway::auth::context::{
    ACCESS_KEY_HEADER, AuthContext, BODY_HEADER, NONCE_HEADER, SIGN_HEADER, TIMESTAMP_HEADER,
};
use edge_gateway::auth::{AdmissionPolicy, CidrRange, signature};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    access_key: Vec<u8>,
    nonce: Vec<u8>,
    timestamp: Vec<u8>,
    sign: Vec<u8>,
    body: Vec<u8>,
    allow_entry: String,
    source_host: String,
    secret: String,
}

fn put(headers: &mut HeaderMap, name: &'static str, raw: &[u8]) {
    if let Ok(value) = HeaderValue::from_bytes(raw) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fuzz_target!(|input: Input| {
    let mut headers = HeaderMap::new();
    put(&mut headers, ACCESS_KEY_HEADER, &input.access_key);
    put(&mut headers, NONCE_HEADER, &input.nonce);
    put(&mut headers, TIMESTAMP_HEADER, &input.timestamp);
    put(&mut headers, SIGN_HEADER, &input.sign);
    put(&mut headers, BODY_HEADER, &input.body);

    if let Ok(ctx) = AuthContext::from_headers(&headers) {
        assert!(!ctx.access_key.trim().is_empty());
        assert!(!ctx.signature.trim().is_empty());
        assert!(!ctx.canonical_body.trim().is_empty());
        let _ = signature::verify(&ctx.signature, &ctx.canonical_body, &input.secret);
    }

    let _ = CidrRange::parse(&input.allow_entry);
    let policy = AdmissionPolicy::new(&[input.allow_entry.clone()]);
    let _ = policy.admit(Some(&input.source_host));
});
