//! Request-signature canonicalization and approval-challenge construction
//! (spec.md §4.3).

use crate::primitives::{ed25519_sign, ed25519_verify, sha256};

/// Build the canonical payload a request signature is computed over:
/// `TIMESTAMP_ASCII || ":" || METHOD || ":" || PATH || ":" || HEX_LOWER(SHA256(BODY))`.
///
/// `timestamp` is unsigned decimal milliseconds since epoch rendered in
/// ASCII, `method` is upper-cased by the caller (e.g. `"POST"`), and
/// `path` excludes the query string.
pub fn canonical_request_payload(timestamp: i64, method: &str, path: &str, body: &[u8]) -> Vec<u8> {
    let body_digest = hex_lower(&sha256(body));
    format!("{timestamp}:{method}:{path}:{body_digest}").into_bytes()
}

/// Sign a request with the agent or phone's Ed25519 key.
pub fn sign_request(
    priv32: &[u8; 32],
    timestamp: i64,
    method: &str,
    path: &str,
    body: &[u8],
) -> [u8; 64] {
    let payload = canonical_request_payload(timestamp, method, path, body);
    ed25519_sign(priv32, &payload)
}

/// Verify a signed request: freshness window, then the Ed25519 check.
/// A single boolean result, matching spec.md §4.3's "no side channels
/// distinguishing the failure cause".
pub fn verify_request(
    pub32: &[u8; 32],
    sig: &[u8; 64],
    timestamp: i64,
    now_ms: i64,
    max_age_ms: i64,
    method: &str,
    path: &str,
    body: &[u8],
) -> bool {
    if timestamp < 0 {
        return false;
    }
    if (now_ms - timestamp).abs() > max_age_ms {
        return false;
    }
    let payload = canonical_request_payload(timestamp, method, path, body);
    ed25519_verify(pub32, &payload, sig)
}

/// Default freshness window per spec.md §4.3.
pub const DEFAULT_MAX_AGE_MS: i64 = 60_000;

/// Build an approval challenge: `random32 || secret_id || SHA256(reason_utf8)`.
///
/// The challenge is what the phone signs to approve a request and what
/// doubles as the HKDF salt for [`crate::flows::red_kek`] at critical
/// tier, so it must be unique per approval request.
pub fn build_challenge(random32: &[u8; 32], secret_id: &str, reason: &str) -> Vec<u8> {
    let reason_digest = sha256(reason.as_bytes());
    let mut challenge = Vec::with_capacity(32 + secret_id.len() + 32);
    challenge.extend_from_slice(random32);
    challenge.extend_from_slice(secret_id.as_bytes());
    challenge.extend_from_slice(&reason_digest);
    challenge
}

/// Sign an approval challenge with the phone's Ed25519 key.
pub fn sign_challenge(priv32: &[u8; 32], challenge: &[u8]) -> [u8; 64] {
    ed25519_sign(priv32, challenge)
}

/// Verify a phone's approval signature over its challenge.
pub fn verify_challenge(pub32: &[u8; 32], challenge: &[u8], sig: &[u8; 64]) -> bool {
    ed25519_verify(pub32, challenge, sig)
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out
}
