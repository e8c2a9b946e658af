//! HTTP route handlers implementing the endpoint contract of spec.md §6.
//!
//! Each handler re-derives the canonical signed payload from the raw
//! request body before touching JSON, since the signature covers the
//! body's SHA-256 digest, not its parsed shape (spec.md §4.3).

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use clavum_core::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{authenticate_agent, authenticate_phone};
use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/secrets/register", post(register_secret))
        .route("/api/secrets", get(list_secrets))
        .route("/api/secrets/:id", delete(delete_secret))
        .route("/api/secrets/:id/retrieve", post(retrieve_secret))
        .route("/api/secrets/:id/retrieve/status", get(retrieve_status))
        .route("/api/approvals/pending", get(list_pending_approvals))
        .route("/api/approvals/:id/approve", post(approve))
        .route("/api/approvals/:id/reject", post(reject))
        .route("/api/audit", get(list_audit))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

fn decode32(field: &str, s: &str) -> Result<[u8; 32], ApiError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|_| ApiError(ClavumError::BadRequest(format!("{field}: invalid base64url"))))?;
    if bytes.len() != 32 {
        return Err(ApiError(ClavumError::BadRequest(format!("{field}: expected 32 bytes"))));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn decode64(field: &str, s: &str) -> Result<[u8; 64], ApiError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|_| ApiError(ClavumError::BadRequest(format!("{field}: invalid base64url"))))?;
    if bytes.len() != 64 {
        return Err(ApiError(ClavumError::BadRequest(format!("{field}: expected 64 bytes"))));
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(ClavumError::BadRequest(format!("invalid body: {e}"))))
}

// ==================== Secrets ====================

#[derive(Debug, Deserialize)]
struct RegisterSecretRequest {
    secret_id: String,
    name: String,
    tier: Tier,
}

#[derive(Debug, Serialize)]
struct SecretResponse {
    id: String,
    name: String,
    tier: Tier,
}

async fn register_secret(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<SecretResponse>), ApiError> {
    let agent_id = authenticate_agent(&state, &headers, "POST", "/api/secrets/register", &body).await?;
    let req: RegisterSecretRequest = parse_body(&body)?;

    let agent = state.agents.get(&agent_id).await?;
    let secret = SecretMetadata {
        id: SecretId::from(req.secret_id),
        tenant: agent.tenant,
        owning_agent: agent_id,
        name: req.name,
        tier: req.tier,
    };
    state.secrets.insert(secret.clone()).await?;

    Ok((
        StatusCode::CREATED,
        Json(SecretResponse {
            id: secret.id.0,
            name: secret.name,
            tier: secret.tier,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct SecretListResponse {
    secrets: Vec<SecretResponse>,
}

async fn list_secrets(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<SecretListResponse>, ApiError> {
    let agent_id = authenticate_agent(&state, &headers, "GET", "/api/secrets", b"").await?;
    let secrets = state.secrets.list_for_owner(&agent_id).await?;

    Ok(Json(SecretListResponse {
        secrets: secrets
            .into_iter()
            .map(|s| SecretResponse {
                id: s.id.0,
                name: s.name,
                tier: s.tier,
            })
            .collect(),
    }))
}

async fn delete_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: axum::http::HeaderMap,
) -> Result<StatusCode, ApiError> {
    let path = format!("/api/secrets/{id}");
    let agent_id = authenticate_agent(&state, &headers, "DELETE", &path, b"").await?;

    let secret_id = SecretId::from(id);
    let secret = state.secrets.get(&secret_id).await?;
    if secret.owning_agent != agent_id {
        return Err(ApiError(ClavumError::Forbidden));
    }
    state.secrets.delete(&secret_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// ==================== Retrieval ====================

#[derive(Debug, Deserialize)]
struct RetrieveRequestBody {
    eph_x25519_pub: String,
    kek_salt: String,
    reason: String,
}

/// Shape depends on the outcome: key material on auto-grant/approval, a
/// poll token while a human decision is outstanding.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RetrieveResponse {
    Ready {
        enc_kek: String,
        enc_kek_iv: String,
        enc_kek_tag: String,
    },
    Pending {
        status: &'static str,
        approval_id: String,
        expires_at: DateTime<Utc>,
    },
}

fn outcome_response(outcome: RetrievalOutcome) -> (StatusCode, RetrieveResponse) {
    match outcome {
        RetrievalOutcome::Ready(wrapped) => (
            StatusCode::OK,
            RetrieveResponse::Ready {
                enc_kek: wrapped.enc_kek,
                enc_kek_iv: wrapped.enc_kek_iv,
                enc_kek_tag: wrapped.enc_kek_tag,
            },
        ),
        RetrievalOutcome::Pending { approval_id, expires_at } => (
            StatusCode::ACCEPTED,
            RetrieveResponse::Pending {
                status: "pending",
                approval_id: approval_id.0,
                expires_at,
            },
        ),
    }
}

async fn retrieve_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<RetrieveResponse>), ApiError> {
    let path = format!("/api/secrets/{id}/retrieve");
    let agent_id = authenticate_agent(&state, &headers, "POST", &path, &body).await?;
    let req: RetrieveRequestBody = parse_body(&body)?;

    let eph_x25519_pub = decode32("eph_x25519_pub", &req.eph_x25519_pub)?;
    let kek_salt = decode32("kek_salt", &req.kek_salt)?;

    let outcome = state
        .coordinator
        .retrieve(
            &agent_id,
            RetrievalRequest {
                secret_id: SecretId::from(id),
                eph_x25519_pub,
                kek_salt,
                reason: req.reason,
            },
        )
        .await?;

    let (status, response) = outcome_response(outcome);
    Ok((status, Json(response)))
}

#[derive(Debug, Deserialize)]
struct RetrieveStatusQuery {
    approval_id: String,
    eph_x25519_pub: String,
    kek_salt: String,
}

async fn retrieve_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<RetrieveStatusQuery>,
    headers: axum::http::HeaderMap,
) -> Result<(StatusCode, Json<RetrieveResponse>), ApiError> {
    let path = format!("/api/secrets/{id}/retrieve/status");
    let agent_id = authenticate_agent(&state, &headers, "GET", &path, b"").await?;

    let eph_x25519_pub = decode32("eph_x25519_pub", &q.eph_x25519_pub)?;
    let kek_salt = decode32("kek_salt", &q.kek_salt)?;
    let approval_id = ApprovalId::from(q.approval_id);
    let secret_id = SecretId::from(id);

    let outcome = state
        .coordinator
        .poll_sensitive(&agent_id, &secret_id, &approval_id, eph_x25519_pub, kek_salt)
        .await?;

    let (_, response) = outcome_response(outcome);
    Ok((StatusCode::OK, Json(response)))
}

// ==================== Approvals ====================

#[derive(Debug, Serialize)]
struct PendingApproval {
    id: String,
    secret: String,
    reason: String,
    challenge: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct PendingApprovalsResponse {
    approvals: Vec<PendingApproval>,
}

async fn list_pending_approvals(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<PendingApprovalsResponse>, ApiError> {
    let phone_id = authenticate_phone(&state, &headers, "GET", "/api/approvals/pending", b"").await?;
    let pending = state.approvals.list_pending_for_phone(&phone_id).await?;

    Ok(Json(PendingApprovalsResponse {
        approvals: pending
            .into_iter()
            .map(|r| PendingApproval {
                id: r.id.0,
                secret: r.secret.0,
                reason: r.reason,
                challenge: URL_SAFE_NO_PAD.encode(r.challenge_bytes),
                created_at: r.created_at,
                expires_at: r.expires_at,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct ApproveRequest {
    signature: String,
}

#[derive(Debug, Serialize)]
struct ApprovalResponse {
    id: String,
    status: ApprovalStatus,
    responded_at: Option<DateTime<Utc>>,
}

async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let path = format!("/api/approvals/{id}/approve");
    let phone_id = authenticate_phone(&state, &headers, "POST", &path, &body).await?;
    let req: ApproveRequest = parse_body(&body)?;
    let signature = decode64("signature", &req.signature)?;

    let phone = state.phones.get(&phone_id).await?;
    let approval_id = ApprovalId::from(id);
    let updated = state
        .approvals
        .approve(&approval_id, &phone_id, signature, &phone.ed25519_public)
        .await?;

    Ok(Json(ApprovalResponse {
        id: updated.id.0,
        status: updated.status,
        responded_at: updated.responded_at,
    }))
}

async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: axum::http::HeaderMap,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let path = format!("/api/approvals/{id}/reject");
    let phone_id = authenticate_phone(&state, &headers, "POST", &path, b"").await?;

    let approval_id = ApprovalId::from(id);
    let updated = state.approvals.reject(&approval_id, &phone_id).await?;

    Ok(Json(ApprovalResponse {
        id: updated.id.0,
        status: updated.status,
        responded_at: updated.responded_at,
    }))
}

// ==================== Audit ====================

#[derive(Debug, Deserialize)]
struct AuditQueryParams {
    secret_id: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct AuditEntryResponse {
    id: Uuid,
    secret: String,
    reason: String,
    tier: Tier,
    result: AuditResult,
    created_at: DateTime<Utc>,
    latency_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct AuditListResponse {
    entries: Vec<AuditEntryResponse>,
}

async fn list_audit(
    State(state): State<AppState>,
    Query(q): Query<AuditQueryParams>,
    headers: axum::http::HeaderMap,
) -> Result<Json<AuditListResponse>, ApiError> {
    let agent_id = authenticate_agent(&state, &headers, "GET", "/api/audit", b"").await?;

    let query = AuditQuery {
        secret_id: q.secret_id.map(SecretId::from),
        from: q.from,
        to: q.to,
        limit: q.limit,
    };
    let entries = state.audit.query(query).await?;

    Ok(Json(AuditListResponse {
        entries: entries
            .into_iter()
            .filter(|e| e.agent == agent_id)
            .map(|e| AuditEntryResponse {
                id: e.id,
                secret: e.secret.0,
                reason: e.reason,
                tier: e.tier,
                result: e.result,
                created_at: e.created_at,
                latency_ms: e.latency_ms,
            })
            .collect(),
    }))
}
