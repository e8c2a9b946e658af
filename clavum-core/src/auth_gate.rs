//! Request authentication and replay rejection (spec.md §4.4).
//!
//! Two near-identical pipelines — one keyed on agent identity, one on
//! phone identity — share this single implementation, parameterized by
//! a [`PublicKeyLookup`] supplied per call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ClavumError, Result};
use crate::models::NonceRecord;
use crate::primitives::sha256;
use crate::signing::{verify_request, DEFAULT_MAX_AGE_MS};
use crate::storage::NonceStore;

/// Raw material presented on an inbound request, already split from HTTP
/// headers by the transport adapter. `identity` is the opaque agent or
/// phone id string from `X-Agent-Id`/`X-Phone-Id`.
pub struct SignedRequest<'a> {
    pub identity: &'a str,
    pub timestamp_ms: i64,
    pub signature: [u8; 64],
    pub method: &'a str,
    pub path: &'a str,
    pub body: &'a [u8],
}

/// Resolves an opaque identity string to its registered Ed25519 public
/// key. Implemented once for agents, once for phones.
#[async_trait]
pub trait PublicKeyLookup: Send + Sync {
    async fn ed25519_public_key(&self, identity: &str) -> Option<[u8; 32]>;
}

/// Authenticates signed requests and rejects replays, per spec.md §4.4.
/// Indifferent to the handler it authenticates for; carries no
/// request-specific state between calls.
pub struct AuthGate {
    nonces: Arc<dyn NonceStore>,
    max_age_ms: i64,
    nonce_ttl_factor: i64,
    gc_stride: u32,
    calls: AtomicU64,
}

impl AuthGate {
    pub fn new(nonces: Arc<dyn NonceStore>, max_age_ms: i64, nonce_ttl_factor: i64, gc_stride: u32) -> Self {
        Self {
            nonces,
            max_age_ms,
            nonce_ttl_factor,
            gc_stride,
            calls: AtomicU64::new(0),
        }
    }

    /// Default 60 s freshness window, 2x nonce TTL factor (spec.md §9
    /// open question: the multiplier is a policy knob, not a correctness
    /// requirement; see DESIGN.md), GC sweep every 50th call.
    pub fn with_defaults(nonces: Arc<dyn NonceStore>) -> Self {
        Self::new(nonces, DEFAULT_MAX_AGE_MS, 2, 50)
    }

    /// Run the full pipeline for one request. Returns the authenticated
    /// identity string on success.
    ///
    /// Never distinguishes among "missing key material", "unknown
    /// identity", or "bad signature" in its error — all surface as
    /// [`ClavumError::Unauthenticated`] — to avoid identity enumeration
    /// (spec.md §4.4 step 3).
    pub async fn authenticate(
        &self,
        lookup: &dyn PublicKeyLookup,
        now_ms: i64,
        request: &SignedRequest<'_>,
    ) -> Result<String> {
        let Some(pub32) = lookup.ed25519_public_key(request.identity).await else {
            return Err(ClavumError::Unauthenticated);
        };

        let verified = verify_request(
            &pub32,
            &request.signature,
            request.timestamp_ms,
            now_ms,
            self.max_age_ms,
            request.method,
            request.path,
            request.body,
        );
        if !verified {
            return Err(ClavumError::Unauthenticated);
        }

        let digest = sha256(&request.signature);
        let expires_at =
            chrono::Utc::now() + chrono::Duration::milliseconds(self.max_age_ms * self.nonce_ttl_factor);
        self.nonces
            .record_if_new(NonceRecord {
                signature_digest: digest,
                expires_at,
            })
            .await?;

        let calls = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.gc_stride > 0 && calls % self.gc_stride as u64 == 0 {
            self.nonces.garbage_collect().await?;
        }

        Ok(request.identity.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::ed25519_keygen;
    use crate::signing::sign_request;
    use crate::storage::InMemoryNonceStore;

    struct StaticLookup(Option<[u8; 32]>);

    #[async_trait]
    impl PublicKeyLookup for StaticLookup {
        async fn ed25519_public_key(&self, _identity: &str) -> Option<[u8; 32]> {
            self.0
        }
    }

    fn gate() -> AuthGate {
        AuthGate::with_defaults(Arc::new(InMemoryNonceStore::default()))
    }

    #[tokio::test]
    async fn authenticates_a_valid_request() {
        let (priv32, pub32) = ed25519_keygen();
        let ts = 1_700_000_000_000;
        let sig = sign_request(&priv32, ts, "POST", "/api/secrets/foo/retrieve", b"{}");
        let gate = gate();
        let lookup = StaticLookup(Some(pub32));

        let request = SignedRequest {
            identity: "agent-1",
            timestamp_ms: ts,
            signature: sig,
            method: "POST",
            path: "/api/secrets/foo/retrieve",
            body: b"{}",
        };

        let identity = gate.authenticate(&lookup, ts, &request).await.unwrap();
        assert_eq!(identity, "agent-1");
    }

    #[tokio::test]
    async fn unknown_identity_is_unauthenticated_not_not_found() {
        let gate = gate();
        let lookup = StaticLookup(None);
        let request = SignedRequest {
            identity: "ghost",
            timestamp_ms: 1_700_000_000_000,
            signature: [0u8; 64],
            method: "GET",
            path: "/api/secrets",
            body: b"",
        };

        let err = gate
            .authenticate(&lookup, 1_700_000_000_000, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ClavumError::Unauthenticated));
    }

    #[tokio::test]
    async fn bad_signature_is_unauthenticated() {
        let (_priv32, pub32) = ed25519_keygen();
        let gate = gate();
        let lookup = StaticLookup(Some(pub32));
        let request = SignedRequest {
            identity: "agent-1",
            timestamp_ms: 1_700_000_000_000,
            signature: [7u8; 64],
            method: "GET",
            path: "/api/secrets",
            body: b"",
        };

        let err = gate
            .authenticate(&lookup, 1_700_000_000_000, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ClavumError::Unauthenticated));
    }

    #[tokio::test]
    async fn replayed_signature_is_rejected_on_second_use() {
        let (priv32, pub32) = ed25519_keygen();
        let ts = 1_700_000_000_000;
        let sig = sign_request(&priv32, ts, "GET", "/api/secrets", b"");
        let gate = gate();
        let lookup = StaticLookup(Some(pub32));
        let request = SignedRequest {
            identity: "agent-1",
            timestamp_ms: ts,
            signature: sig,
            method: "GET",
            path: "/api/secrets",
            body: b"",
        };

        gate.authenticate(&lookup, ts, &request).await.unwrap();
        let err = gate.authenticate(&lookup, ts, &request).await.unwrap_err();
        assert!(matches!(err, ClavumError::Replayed));
    }

    #[tokio::test]
    async fn stale_timestamp_is_unauthenticated() {
        let (priv32, pub32) = ed25519_keygen();
        let ts = 1_700_000_000_000;
        let sig = sign_request(&priv32, ts, "GET", "/api/secrets", b"");
        let gate = gate();
        let lookup = StaticLookup(Some(pub32));
        let request = SignedRequest {
            identity: "agent-1",
            timestamp_ms: ts,
            signature: sig,
            method: "GET",
            path: "/api/secrets",
            body: b"",
        };

        let err = gate
            .authenticate(&lookup, ts + 61_000, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ClavumError::Unauthenticated));
    }

    #[tokio::test]
    async fn sweeps_expired_nonces_every_gc_stride_calls() {
        let nonces = Arc::new(InMemoryNonceStore::default());
        // max_age_ms = 1, ttl_factor = 1: nonces expire almost immediately.
        let gate = AuthGate::new(nonces.clone(), 1, 1, 3);
        let (priv32, pub32) = ed25519_keygen();
        let lookup = StaticLookup(Some(pub32));

        for i in 0..2u32 {
            let ts = 1_700_000_000_000 + i as i64;
            let path = format!("/api/secrets/{i}");
            let sig = sign_request(&priv32, ts, "GET", &path, b"");
            let request = SignedRequest {
                identity: "agent-1",
                timestamp_ms: ts,
                signature: sig,
                method: "GET",
                path: &path,
                body: b"",
            };
            gate.authenticate(&lookup, ts, &request).await.unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let ts = 1_700_000_000_002;
        let path = "/api/secrets/2".to_string();
        let sig = sign_request(&priv32, ts, "GET", &path, b"");
        let request = SignedRequest {
            identity: "agent-1",
            timestamp_ms: ts,
            signature: sig,
            method: "GET",
            path: &path,
            body: b"",
        };
        gate.authenticate(&lookup, ts, &request).await.unwrap();

        // the 3rd call (gc_stride = 3) should have already swept the first
        // two nonces, which expired while we slept.
        assert_eq!(nonces.garbage_collect().await.unwrap(), 0);
    }
}
