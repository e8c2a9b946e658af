//! Tier-routed retrieval orchestration (spec.md §4.6): the entry point
//! reached once [`crate::auth_gate::AuthGate`] has authenticated the
//! caller as an agent.

use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::audit::AuditManager;
use crate::error::{ClavumError, Result};
use crate::flows::{green_kek, red_kek};
use crate::models::{
    Agent, AgentId, ApprovalStatus, AuditResult, PhoneId, SecretId, SecretMetadata, Tenant, Tier,
};
use crate::primitives::{aesgcm_encrypt, x25519_shared, SealedBytes};
use crate::storage::{AgentStore, PhoneStore, SecretStore, TenantStore};

/// Base64url-encoded KEK transport triple returned for an auto-granted
/// retrieval, or once a sensitive/critical poll resolves.
pub struct WrappedKek {
    pub enc_kek: String,
    pub enc_kek_iv: String,
    pub enc_kek_tag: String,
}

/// Result of a retrieval call: either key material or a pending token
/// for the caller to poll.
pub enum RetrievalOutcome {
    Ready(WrappedKek),
    Pending {
        approval_id: crate::models::ApprovalId,
        expires_at: DateTime<Utc>,
    },
}

/// Decoded, validated retrieval parameters (spec.md §4.6's "Inputs
/// (retrieval)"). Byte fields arrive base64url-encoded at the transport
/// boundary; decoding them here is the adapter's job, not the
/// coordinator's, but the coordinator enforces shape.
pub struct RetrievalRequest {
    pub secret_id: SecretId,
    pub eph_x25519_pub: [u8; 32],
    pub kek_salt: [u8; 32],
    pub reason: String,
}

pub struct RetrievalCoordinator {
    tenants: Arc<dyn TenantStore>,
    agents: Arc<dyn AgentStore>,
    phones: Arc<dyn PhoneStore>,
    secrets: Arc<dyn SecretStore>,
    audit: Arc<AuditManager>,
    approvals: Arc<crate::approval::ApprovalMachine>,
}

impl RetrievalCoordinator {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        agents: Arc<dyn AgentStore>,
        phones: Arc<dyn PhoneStore>,
        secrets: Arc<dyn SecretStore>,
        audit: Arc<AuditManager>,
        approvals: Arc<crate::approval::ApprovalMachine>,
    ) -> Self {
        Self {
            tenants,
            agents,
            phones,
            secrets,
            audit,
            approvals,
        }
    }

    /// Entry point for `POST /api/secrets/:id/retrieve`.
    pub async fn retrieve(
        &self,
        authenticated_agent: &AgentId,
        request: RetrievalRequest,
    ) -> Result<RetrievalOutcome> {
        if request.reason.trim().is_empty() {
            return Err(ClavumError::BadRequest("reason must be non-empty".to_string()));
        }

        let started = Instant::now();
        let (secret, agent) = self
            .load_and_authorize(&request.secret_id, authenticated_agent)
            .await?;

        match secret.tier {
            Tier::Routine => {
                let wrapped = self
                    .retrieve_routine(&secret, &agent, &request, started)
                    .await?;
                Ok(RetrievalOutcome::Ready(wrapped))
            }
            Tier::Sensitive | Tier::Critical => {
                let phones = self.phones.list_for_tenant(&agent.tenant).await?;
                let phone = phones
                    .into_iter()
                    .next()
                    .ok_or_else(|| ClavumError::Internal("tenant has no registered phone".to_string()))?;

                let approval = self
                    .approvals
                    .create(&secret.id, phone.id, request.reason.clone(), None)
                    .await?;

                Ok(RetrievalOutcome::Pending {
                    approval_id: approval.id,
                    expires_at: approval.expires_at,
                })
            }
        }
    }

    /// Poll companion for the sensitive and critical tiers:
    /// `GET …/retrieve/status`. On `approved`, derives and wraps the KEK
    /// — `GreenKEK` for sensitive, `RedKEK` for critical (spec.md §4.6's
    /// "Critical tier": the server already holds the phone's X25519
    /// public key from pairing, so no extra wire contribution is needed
    /// to compute its ECDH leg) — tagging the audit entry
    /// `human_approved`/`device_unlocked` with the approval signature as
    /// proof.
    pub async fn poll_sensitive(
        &self,
        authenticated_agent: &AgentId,
        secret_id: &SecretId,
        approval_id: &crate::models::ApprovalId,
        eph_x25519_pub: [u8; 32],
        kek_salt: [u8; 32],
    ) -> Result<RetrievalOutcome> {
        let (secret, agent) = self.load_and_authorize(secret_id, authenticated_agent).await?;
        let started = Instant::now();
        let status = self.approvals.get_status(approval_id).await?;

        if &status.secret != secret_id {
            return Err(ClavumError::NotFound(format!(
                "approval {approval_id} is not for secret {secret_id}"
            )));
        }

        match status.status {
            ApprovalStatus::Pending => Ok(RetrievalOutcome::Pending {
                approval_id: approval_id.clone(),
                expires_at: status.expires_at,
            }),
            ApprovalStatus::Denied => {
                self.write_audit(
                    &agent.id,
                    &secret.id,
                    &status.reason,
                    secret.tier,
                    AuditResult::Denied,
                    started,
                    None,
                )
                .await?;
                Err(ClavumError::Conflict("approval denied".to_string()))
            }
            ApprovalStatus::Expired => {
                self.write_audit(
                    &agent.id,
                    &secret.id,
                    &status.reason,
                    secret.tier,
                    AuditResult::Expired,
                    started,
                    None,
                )
                .await?;
                Err(ClavumError::Expired)
            }
            ApprovalStatus::Approved => {
                let tenant = self.tenants.get(&agent.tenant).await?;
                let server_priv = tenant_server_priv(&tenant);

                let (kek, result) = match secret.tier {
                    Tier::Sensitive => {
                        let kek = green_kek(&server_priv, &eph_x25519_pub, &kek_salt, &secret.id)?;
                        (kek, AuditResult::HumanApproved)
                    }
                    Tier::Critical => {
                        let phone = self.phones.get(&status.phone).await?;
                        let kek = red_kek(
                            &server_priv,
                            &agent.x25519_public,
                            &phone.x25519_public,
                            &status.challenge,
                            &secret.id,
                        )?;
                        (kek, AuditResult::DeviceUnlocked)
                    }
                    Tier::Routine => {
                        return Err(ClavumError::Internal(
                            "routine-tier secret has an approval record".to_string(),
                        ))
                    }
                };

                let session = x25519_shared(&server_priv, &agent.x25519_public)?;
                let mut session_key = [0u8; 32];
                session_key.copy_from_slice(session.as_bytes());

                let sealed = aesgcm_encrypt(&session_key, kek.as_bytes(), b"", None)?;

                self.write_audit(
                    &agent.id,
                    &secret.id,
                    &status.reason,
                    secret.tier,
                    result,
                    started,
                    status.approval_signature,
                )
                .await?;

                Ok(RetrievalOutcome::Ready(encode_sealed(sealed)))
            }
        }
    }

    async fn retrieve_routine(
        &self,
        secret: &SecretMetadata,
        agent: &Agent,
        request: &RetrievalRequest,
        started: Instant,
    ) -> Result<WrappedKek> {
        let tenant = self.tenants.get(&agent.tenant).await?;
        let server_priv = tenant_server_priv(&tenant);

        let kek = green_kek(&server_priv, &request.eph_x25519_pub, &request.kek_salt, &secret.id)?;
        let session = x25519_shared(&server_priv, &agent.x25519_public)?;
        let mut session_key = [0u8; 32];
        session_key.copy_from_slice(session.as_bytes());

        let sealed = aesgcm_encrypt(&session_key, kek.as_bytes(), b"", None)?;

        self.write_audit(
            &agent.id,
            &secret.id,
            &request.reason,
            secret.tier,
            AuditResult::AutoGranted,
            started,
            None,
        )
        .await?;

        Ok(encode_sealed(sealed))
    }

    /// Load the secret, verify it belongs to the authenticated agent
    /// (spec.md §3 invariant e), and return both it and its owning
    /// agent record.
    async fn load_and_authorize(
        &self,
        secret_id: &SecretId,
        authenticated_agent: &AgentId,
    ) -> Result<(SecretMetadata, Agent)> {
        let secret = self.secrets.get(secret_id).await?;
        if &secret.owning_agent != authenticated_agent {
            return Err(ClavumError::Forbidden);
        }
        let agent = self.agents.get(authenticated_agent).await?;
        Ok((secret, agent))
    }

    /// Audit writes happen after the KEK bytes are already prepared and
    /// MUST NOT roll back a response that has already been handed key
    /// material; a sink failure here surfaces as
    /// [`ClavumError::Internal`] (spec.md §4.6 "Atomicity of audit
    /// writes"). The AAD convention (`secret_id || tier || agent_id`)
    /// is not involved in audit entries; it is reserved for the AEAD
    /// layer in [`crate::flows`].
    async fn write_audit(
        &self,
        agent: &AgentId,
        secret: &SecretId,
        reason: &str,
        tier: Tier,
        result: AuditResult,
        started: Instant,
        proof: Option<[u8; 64]>,
    ) -> Result<()> {
        self.audit
            .record(agent, secret, reason, tier, result, started, proof)
            .await
    }
}

fn tenant_server_priv(tenant: &Tenant) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf.copy_from_slice(tenant.x25519_private.as_bytes());
    buf
}

fn encode_sealed(sealed: SealedBytes) -> WrappedKek {
    WrappedKek {
        enc_kek: URL_SAFE_NO_PAD.encode(sealed.ciphertext),
        enc_kek_iv: URL_SAFE_NO_PAD.encode(sealed.iv),
        enc_kek_tag: URL_SAFE_NO_PAD.encode(sealed.tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApprovalStatus, SecretMetadata, TenantId};
    use crate::primitives::{ed25519_keygen, x25519_keygen, SecretBytes};
    use crate::storage::{
        InMemoryAgentStore, InMemoryApprovalStore, InMemoryAuditSink, InMemoryPhoneStore,
        InMemorySecretStore, InMemoryTenantStore,
    };
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    struct Fixture {
        coordinator: RetrievalCoordinator,
        audit: Arc<AuditManager>,
        approvals: Arc<crate::approval::ApprovalMachine>,
        tenant_id: TenantId,
        agent_id: AgentId,
        agent_x25519_priv: [u8; 32],
        server_pub: [u8; 32],
        phone_id: Option<PhoneId>,
        phone_ed25519_priv: Option<[u8; 32]>,
    }

    async fn setup(tier: Tier) -> (Fixture, SecretId) {
        let tenants = Arc::new(InMemoryTenantStore::default());
        let agents = Arc::new(InMemoryAgentStore::default());
        let phones = Arc::new(InMemoryPhoneStore::default());
        let secrets = Arc::new(InMemorySecretStore::default());
        let audit = Arc::new(AuditManager::new(Arc::new(InMemoryAuditSink::default())));
        let approval_store = Arc::new(InMemoryApprovalStore::default());
        let approvals = Arc::new(crate::approval::ApprovalMachine::new(approval_store));

        let (server_priv, server_pub) = x25519_keygen();
        let (agent_x25519_priv, agent_x25519_pub) = x25519_keygen();
        let (_agent_ed_priv, agent_ed_pub) = ed25519_keygen();

        let tenant_id = TenantId::generate();
        tenants
            .insert(Tenant {
                id: tenant_id.clone(),
                x25519_public: server_pub,
                x25519_private: SecretBytes::new(server_priv.to_vec()),
            })
            .await
            .unwrap();

        let agent_id = AgentId::generate();
        agents
            .insert(Agent {
                id: agent_id.clone(),
                tenant: tenant_id.clone(),
                x25519_public: agent_x25519_pub,
                ed25519_public: agent_ed_pub,
            })
            .await
            .unwrap();

        let mut phone_id = None;
        let mut phone_ed25519_priv = None;
        if tier != Tier::Routine {
            let (_phone_x25519_priv, phone_x25519_pub) = x25519_keygen();
            let (phone_ed_priv, phone_ed_pub) = ed25519_keygen();
            let id = PhoneId::generate();
            phones
                .insert(crate::models::Phone {
                    id: id.clone(),
                    tenant: tenant_id.clone(),
                    x25519_public: phone_x25519_pub,
                    ed25519_public: phone_ed_pub,
                })
                .await
                .unwrap();
            phone_id = Some(id);
            phone_ed25519_priv = Some(phone_ed_priv);
        }

        let secret_id = SecretId::generate();
        secrets
            .insert(SecretMetadata {
                id: secret_id.clone(),
                tenant: tenant_id.clone(),
                owning_agent: agent_id.clone(),
                name: "db-password".to_string(),
                tier,
            })
            .await
            .unwrap();

        let coordinator = RetrievalCoordinator::new(
            tenants,
            agents,
            phones,
            secrets,
            audit.clone(),
            approvals.clone(),
        );

        (
            Fixture {
                coordinator,
                audit,
                approvals,
                tenant_id,
                agent_id,
                agent_x25519_priv,
                server_pub,
                phone_id,
                phone_ed25519_priv,
            },
            secret_id,
        )
    }

    #[tokio::test]
    async fn routine_retrieval_round_trips_the_kek() {
        let (fx, secret_id) = setup(Tier::Routine).await;
        let (eph_priv, eph_pub) = x25519_keygen();
        let kek_salt = [1u8; 32];

        let outcome = fx
            .coordinator
            .retrieve(
                &fx.agent_id,
                RetrievalRequest {
                    secret_id: secret_id.clone(),
                    eph_x25519_pub: eph_pub,
                    kek_salt,
                    reason: "ci deploy".to_string(),
                },
            )
            .await
            .unwrap();

        let wrapped = match outcome {
            RetrievalOutcome::Ready(w) => w,
            RetrievalOutcome::Pending { .. } => panic!("expected ready outcome"),
        };

        // Client-side: derive the same KEK locally and confirm it
        // matches what the server wrapped.
        let expected_kek = green_kek(&eph_priv, &fx.server_pub, &kek_salt, &secret_id).unwrap();

        let session = x25519_shared(&fx.agent_x25519_priv, &fx.server_pub).unwrap();
        let mut session_key = [0u8; 32];
        session_key.copy_from_slice(session.as_bytes());

        let ciphertext = URL_SAFE_NO_PAD.decode(wrapped.enc_kek).unwrap();
        let iv_bytes = URL_SAFE_NO_PAD.decode(wrapped.enc_kek_iv).unwrap();
        let tag_bytes = URL_SAFE_NO_PAD.decode(wrapped.enc_kek_tag).unwrap();
        let mut iv = [0u8; 12];
        iv.copy_from_slice(&iv_bytes);
        let mut tag = [0u8; 16];
        tag.copy_from_slice(&tag_bytes);

        let recovered =
            crate::primitives::aesgcm_decrypt(&session_key, &ciphertext, &iv, b"", &tag).unwrap();
        assert_eq!(recovered.as_bytes(), expected_kek.as_bytes());

        let entries = fx.audit.query(Default::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result, AuditResult::AutoGranted);
        assert_eq!(entries[0].reason, "ci deploy");
    }

    #[tokio::test]
    async fn routine_retrieval_rejects_non_owning_agent() {
        let (fx, secret_id) = setup(Tier::Routine).await;
        let other_agent = AgentId::generate();
        let (_eph_priv, eph_pub) = x25519_keygen();

        let err = fx
            .coordinator
            .retrieve(
                &other_agent,
                RetrievalRequest {
                    secret_id,
                    eph_x25519_pub: eph_pub,
                    kek_salt: [0u8; 32],
                    reason: "steal it".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClavumError::Forbidden));
    }

    #[tokio::test]
    async fn sensitive_retrieval_returns_pending_then_resolves_on_approval() {
        let (fx, secret_id) = setup(Tier::Sensitive).await;
        let (eph_priv, eph_pub) = x25519_keygen();
        let kek_salt = [2u8; 32];

        let outcome = fx
            .coordinator
            .retrieve(
                &fx.agent_id,
                RetrievalRequest {
                    secret_id: secret_id.clone(),
                    eph_x25519_pub: eph_pub,
                    kek_salt,
                    reason: "rotate prod key".to_string(),
                },
            )
            .await
            .unwrap();

        let approval_id = match outcome {
            RetrievalOutcome::Pending { approval_id, .. } => approval_id,
            RetrievalOutcome::Ready(_) => panic!("expected pending outcome"),
        };

        let phone_id = fx.phone_id.clone().unwrap();
        let phone_priv = fx.phone_ed25519_priv.unwrap();

        let pending = fx.approvals.list_pending_for_phone(&phone_id).await.unwrap();
        let request = pending.into_iter().find(|r| r.id == approval_id).unwrap();
        assert_eq!(request.status, ApprovalStatus::Pending);

        let phone_sig = crate::primitives::ed25519_sign(&phone_priv, &request.challenge_bytes);
        let phone_pub = ed25519_pub_for(&fx, &phone_id).await;
        fx.approvals
            .approve(&approval_id, &phone_id, phone_sig, &phone_pub)
            .await
            .unwrap();

        let outcome = fx
            .coordinator
            .poll_sensitive(&fx.agent_id, &secret_id, &approval_id, eph_pub, kek_salt)
            .await
            .unwrap();

        let wrapped = match outcome {
            RetrievalOutcome::Ready(w) => w,
            RetrievalOutcome::Pending { .. } => panic!("expected ready outcome after approval"),
        };

        let expected_kek = green_kek(&eph_priv, &fx.server_pub, &kek_salt, &secret_id).unwrap();
        let session = x25519_shared(&fx.agent_x25519_priv, &fx.server_pub).unwrap();
        let mut session_key = [0u8; 32];
        session_key.copy_from_slice(session.as_bytes());

        let ciphertext = URL_SAFE_NO_PAD.decode(wrapped.enc_kek).unwrap();
        let iv_bytes = URL_SAFE_NO_PAD.decode(wrapped.enc_kek_iv).unwrap();
        let tag_bytes = URL_SAFE_NO_PAD.decode(wrapped.enc_kek_tag).unwrap();
        let mut iv = [0u8; 12];
        iv.copy_from_slice(&iv_bytes);
        let mut tag = [0u8; 16];
        tag.copy_from_slice(&tag_bytes);
        let recovered =
            crate::primitives::aesgcm_decrypt(&session_key, &ciphertext, &iv, b"", &tag).unwrap();
        assert_eq!(recovered.as_bytes(), expected_kek.as_bytes());

        let entries = fx.audit.query(Default::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result, AuditResult::HumanApproved);
        assert_eq!(entries[0].proof, Some(phone_sig));
    }

    #[tokio::test]
    async fn sensitive_retrieval_denied_yields_no_kek() {
        let (fx, secret_id) = setup(Tier::Sensitive).await;
        let (_eph_priv, eph_pub) = x25519_keygen();
        let kek_salt = [3u8; 32];

        let outcome = fx
            .coordinator
            .retrieve(
                &fx.agent_id,
                RetrievalRequest {
                    secret_id: secret_id.clone(),
                    eph_x25519_pub: eph_pub,
                    kek_salt,
                    reason: "rotate prod key".to_string(),
                },
            )
            .await
            .unwrap();
        let approval_id = match outcome {
            RetrievalOutcome::Pending { approval_id, .. } => approval_id,
            RetrievalOutcome::Ready(_) => panic!("expected pending outcome"),
        };

        let phone_id = fx.phone_id.clone().unwrap();
        fx.approvals.reject(&approval_id, &phone_id).await.unwrap();

        let err = fx
            .coordinator
            .poll_sensitive(&fx.agent_id, &secret_id, &approval_id, eph_pub, kek_salt)
            .await
            .unwrap_err();
        assert!(matches!(err, ClavumError::Conflict(_)));

        let entries = fx.audit.query(Default::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result, AuditResult::Denied);
    }

    #[tokio::test]
    async fn critical_retrieval_returns_pending_then_resolves_via_red_kek() {
        let (fx, secret_id) = setup(Tier::Critical).await;
        let (_eph_priv, eph_pub) = x25519_keygen();
        let kek_salt = [4u8; 32];

        let outcome = fx
            .coordinator
            .retrieve(
                &fx.agent_id,
                RetrievalRequest {
                    secret_id: secret_id.clone(),
                    eph_x25519_pub: eph_pub,
                    kek_salt,
                    reason: "unlock vault".to_string(),
                },
            )
            .await
            .unwrap();

        let approval_id = match outcome {
            RetrievalOutcome::Pending { approval_id, .. } => approval_id,
            RetrievalOutcome::Ready(_) => panic!("expected pending outcome"),
        };

        let phone_id = fx.phone_id.clone().unwrap();
        let phone_priv = fx.phone_ed25519_priv.unwrap();

        let pending = fx.approvals.list_pending_for_phone(&phone_id).await.unwrap();
        let request = pending.into_iter().find(|r| r.id == approval_id).unwrap();

        let phone_sig = crate::primitives::ed25519_sign(&phone_priv, &request.challenge_bytes);
        let phone_pub = ed25519_pub_for(&fx, &phone_id).await;
        fx.approvals
            .approve(&approval_id, &phone_id, phone_sig, &phone_pub)
            .await
            .unwrap();

        let outcome = fx
            .coordinator
            .poll_sensitive(&fx.agent_id, &secret_id, &approval_id, eph_pub, kek_salt)
            .await
            .unwrap();

        assert!(matches!(outcome, RetrievalOutcome::Ready(_)));

        let entries = fx.audit.query(Default::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result, AuditResult::DeviceUnlocked);
        assert_eq!(entries[0].proof, Some(phone_sig));
    }

    #[tokio::test]
    async fn poll_sensitive_rejects_an_approval_id_from_a_different_secret() {
        let (fx, secret_id) = setup(Tier::Sensitive).await;
        let (_eph_priv, eph_pub) = x25519_keygen();
        let kek_salt = [5u8; 32];

        let other_secret_id = SecretId::generate();
        fx.coordinator
            .secrets
            .insert(SecretMetadata {
                id: other_secret_id.clone(),
                tenant: fx.tenant_id.clone(),
                owning_agent: fx.agent_id.clone(),
                name: "other-secret".to_string(),
                tier: Tier::Sensitive,
            })
            .await
            .unwrap();

        let outcome = fx
            .coordinator
            .retrieve(
                &fx.agent_id,
                RetrievalRequest {
                    secret_id: secret_id.clone(),
                    eph_x25519_pub: eph_pub,
                    kek_salt,
                    reason: "rotate prod key".to_string(),
                },
            )
            .await
            .unwrap();
        let approval_id = match outcome {
            RetrievalOutcome::Pending { approval_id, .. } => approval_id,
            RetrievalOutcome::Ready(_) => panic!("expected pending outcome"),
        };

        let err = fx
            .coordinator
            .poll_sensitive(&fx.agent_id, &other_secret_id, &approval_id, eph_pub, kek_salt)
            .await
            .unwrap_err();
        assert!(matches!(err, ClavumError::NotFound(_)));
    }

    async fn ed25519_pub_for(fx: &Fixture, phone_id: &PhoneId) -> [u8; 32] {
        fx.coordinator.phones.get(phone_id).await.unwrap().ed25519_public
    }
}
