//! Sensitive-tier approval state machine (spec.md §4.5).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{ClavumError, Result};
use crate::models::{ApprovalId, ApprovalRequest, ApprovalStatus, PhoneId, SecretId};
use crate::primitives::{csprng, ed25519_verify};
use crate::signing::build_challenge;
use crate::storage::ApprovalStore;

/// Default approval timeout, per spec.md §4.5.
pub const DEFAULT_TIMEOUT_MS: i64 = 300_000;

/// `(status, responded_at, challenge)` returned by [`ApprovalMachine::get_status`].
/// A missing record is represented by `None` at the call site rather than
/// a sentinel variant here, matching spec.md's "missing record returns a
/// sentinel 'none'".
pub struct ApprovalStatusView {
    pub status: ApprovalStatus,
    pub secret: SecretId,
    pub phone: PhoneId,
    pub reason: String,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub challenge: Vec<u8>,
    pub approval_signature: Option<[u8; 64]>,
}

pub struct ApprovalMachine {
    store: Arc<dyn ApprovalStore>,
}

impl ApprovalMachine {
    pub fn new(store: Arc<dyn ApprovalStore>) -> Self {
        Self { store }
    }

    /// Create a pending approval. The challenge is built once here and
    /// never rewritten (spec.md §3's `ApprovalRequest` invariant).
    pub async fn create(
        &self,
        secret_id: &SecretId,
        phone_id: PhoneId,
        reason: String,
        timeout_ms: Option<i64>,
    ) -> Result<ApprovalRequest> {
        let timeout_ms = timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let mut random32 = [0u8; 32];
        random32.copy_from_slice(&csprng(32));
        let challenge = build_challenge(&random32, &secret_id.0, &reason);

        let now = Utc::now();
        let request = ApprovalRequest {
            id: ApprovalId::generate(),
            phone: phone_id,
            secret: secret_id.clone(),
            reason,
            challenge_bytes: challenge,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + Duration::milliseconds(timeout_ms),
            responded_at: None,
            approval_signature: None,
        };

        self.store.insert(request.clone()).await?;
        Ok(request)
    }

    /// Approve a pending request. Failure checks run in the exact order
    /// spec.md §4.5 specifies: missing, wrong phone, already resolved,
    /// expired, bad signature. The caller's phone identity must match the
    /// phone the approval was created for; the challenge being in
    /// cleartext on the pending list is not itself a consent proof.
    pub async fn approve(
        &self,
        approval_id: &ApprovalId,
        phone_id: &PhoneId,
        signature: [u8; 64],
        phone_pub: &[u8; 32],
    ) -> Result<ApprovalRequest> {
        let current = self.store.get(approval_id).await?;

        if &current.phone != phone_id {
            return Err(ClavumError::Forbidden);
        }

        if current.status != ApprovalStatus::Pending {
            return Err(ClavumError::AlreadyResolved(current.status));
        }

        let now = Utc::now();
        if now >= current.expires_at {
            let expired = expire(&current, now);
            return match self
                .store
                .compare_and_swap(approval_id, ApprovalStatus::Pending, expired)
                .await
            {
                Ok(_) => Err(ClavumError::Expired),
                // Another caller resolved it first; that resolution wins
                // and we report against it, not our own expiry attempt.
                Err(ClavumError::AlreadyResolved(status)) => {
                    Err(ClavumError::AlreadyResolved(status))
                }
                Err(other) => Err(other),
            };
        }

        if !ed25519_verify(phone_pub, &current.challenge_bytes, &signature) {
            return Err(ClavumError::InvalidSignature);
        }

        let mut approved = current.clone();
        approved.status = ApprovalStatus::Approved;
        approved.approval_signature = Some(signature);
        approved.responded_at = Some(now);

        self.store
            .compare_and_swap(approval_id, ApprovalStatus::Pending, approved)
            .await
    }

    /// Reject a pending request. Only the phone it was created for may
    /// reject it.
    pub async fn reject(&self, approval_id: &ApprovalId, phone_id: &PhoneId) -> Result<ApprovalRequest> {
        let current = self.store.get(approval_id).await?;

        if &current.phone != phone_id {
            return Err(ClavumError::Forbidden);
        }

        if current.status != ApprovalStatus::Pending {
            return Err(ClavumError::AlreadyResolved(current.status));
        }

        let now = Utc::now();
        if now >= current.expires_at {
            let expired = expire(&current, now);
            return match self
                .store
                .compare_and_swap(approval_id, ApprovalStatus::Pending, expired)
                .await
            {
                Ok(_) => Err(ClavumError::Expired),
                Err(ClavumError::AlreadyResolved(status)) => {
                    Err(ClavumError::AlreadyResolved(status))
                }
                Err(other) => Err(other),
            };
        }

        let mut denied = current.clone();
        denied.status = ApprovalStatus::Denied;
        denied.responded_at = Some(now);

        self.store
            .compare_and_swap(approval_id, ApprovalStatus::Pending, denied)
            .await
    }

    /// All pending records for a phone, lazily expiring any that are past
    /// their deadline before returning, ordered by `created_at` ascending.
    pub async fn list_pending_for_phone(&self, phone: &PhoneId) -> Result<Vec<ApprovalRequest>> {
        let now = Utc::now();
        let candidates = self.store.list_pending_for_phone(phone).await?;

        let mut still_pending = Vec::with_capacity(candidates.len());
        for request in candidates {
            if now >= request.expires_at {
                let expired = expire(&request, now);
                let _ = self
                    .store
                    .compare_and_swap(&request.id, ApprovalStatus::Pending, expired)
                    .await;
                continue;
            }
            still_pending.push(request);
        }

        still_pending.sort_by_key(|r| r.created_at);
        Ok(still_pending)
    }

    /// Lazily expire a single record if past its deadline, then report
    /// its current view.
    pub async fn get_status(&self, approval_id: &ApprovalId) -> Result<ApprovalStatusView> {
        let current = self.store.get(approval_id).await?;

        if current.status == ApprovalStatus::Pending && Utc::now() >= current.expires_at {
            let expired = expire(&current, Utc::now());
            let resolved = match self
                .store
                .compare_and_swap(approval_id, ApprovalStatus::Pending, expired)
                .await
            {
                Ok(record) => record,
                Err(ClavumError::AlreadyResolved(_)) => self.store.get(approval_id).await?,
                Err(other) => return Err(other),
            };
            return Ok(ApprovalStatusView {
                status: resolved.status,
                secret: resolved.secret,
                phone: resolved.phone,
                reason: resolved.reason,
                responded_at: resolved.responded_at,
                expires_at: resolved.expires_at,
                challenge: resolved.challenge_bytes,
                approval_signature: resolved.approval_signature,
            });
        }

        Ok(ApprovalStatusView {
            status: current.status,
            secret: current.secret,
            phone: current.phone,
            reason: current.reason,
            responded_at: current.responded_at,
            expires_at: current.expires_at,
            challenge: current.challenge_bytes,
            approval_signature: current.approval_signature,
        })
    }
}

fn expire(current: &ApprovalRequest, now: DateTime<Utc>) -> ApprovalRequest {
    let mut expired = current.clone();
    expired.status = ApprovalStatus::Expired;
    expired.responded_at = Some(now);
    expired
}
