//! Bridges spec.md §6's `X-Agent-Id`/`X-Phone-Id` header convention onto
//! [`clavum_core::auth_gate::AuthGate`].

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use clavum_core::prelude::*;

use crate::error::ApiError;
use crate::state::AppState;

pub struct AgentLookup(pub std::sync::Arc<dyn AgentStore>);

#[async_trait]
impl PublicKeyLookup for AgentLookup {
    async fn ed25519_public_key(&self, identity: &str) -> Option<[u8; 32]> {
        self.0
            .get(&AgentId::from(identity.to_string()))
            .await
            .ok()
            .map(|a| a.ed25519_public)
    }
}

pub struct PhoneLookup(pub std::sync::Arc<dyn PhoneStore>);

#[async_trait]
impl PublicKeyLookup for PhoneLookup {
    async fn ed25519_public_key(&self, identity: &str) -> Option<[u8; 32]> {
        self.0
            .get(&PhoneId::from(identity.to_string()))
            .await
            .ok()
            .map(|p| p.ed25519_public)
    }
}

/// Parsed `X-Timestamp`/`X-Signature` pair, shared by the agent and phone
/// pipelines.
struct Headers {
    timestamp_ms: i64,
    signature: [u8; 64],
}

fn parse_headers(headers: &HeaderMap) -> Result<Headers, ApiError> {
    let timestamp_ms = headers
        .get("X-Timestamp")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(ApiError(ClavumError::Unauthenticated))?;

    let sig_b64 = headers
        .get("X-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError(ClavumError::Unauthenticated))?;
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| ApiError(ClavumError::Unauthenticated))?;
    if sig_bytes.len() != 64 {
        return Err(ApiError(ClavumError::Unauthenticated));
    }
    let mut signature = [0u8; 64];
    signature.copy_from_slice(&sig_bytes);

    Ok(Headers {
        timestamp_ms,
        signature,
    })
}

/// Authenticate the caller as an agent, using the raw request body to
/// reconstruct the signed payload (spec.md §4.3).
pub async fn authenticate_agent(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<AgentId, ApiError> {
    let identity = headers
        .get("X-Agent-Id")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError(ClavumError::Unauthenticated))?
        .to_string();
    let parsed = parse_headers(headers)?;

    let lookup = AgentLookup(state.agents.clone());
    let request = SignedRequest {
        identity: &identity,
        timestamp_ms: parsed.timestamp_ms,
        signature: parsed.signature,
        method,
        path,
        body,
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    let verified = state
        .auth_gate
        .authenticate(&lookup, now_ms, &request)
        .await?;
    Ok(AgentId::from(verified))
}

/// Authenticate the caller as a phone.
pub async fn authenticate_phone(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<PhoneId, ApiError> {
    let identity = headers
        .get("X-Phone-Id")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError(ClavumError::Unauthenticated))?
        .to_string();
    let parsed = parse_headers(headers)?;

    let lookup = PhoneLookup(state.phones.clone());
    let request = SignedRequest {
        identity: &identity,
        timestamp_ms: parsed.timestamp_ms,
        signature: parsed.signature,
        method,
        path,
        body,
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    let verified = state
        .auth_gate
        .authenticate(&lookup, now_ms, &request)
        .await?;
    Ok(PhoneId::from(verified))
}
