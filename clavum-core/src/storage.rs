//! Storage contracts the core depends on, plus in-memory reference
//! implementations used by tests and the `memory-store` feature.
//!
//! The core never dictates a persistence technology (spec.md §1's
//! "storage backend" out-of-scope collaborator). Each trait here is the
//! seam a real deployment plugs a database into; the `InMemory*` structs
//! exist so the rest of the crate, and its tests, have something to run
//! against without one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{ClavumError, Result};
use crate::models::{
    Agent, AgentId, ApprovalId, ApprovalRequest, AuditEntry, AuditQuery, NonceRecord, Phone,
    PhoneId, SecretId, SecretMetadata, Tenant, TenantId,
};

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get(&self, id: &TenantId) -> Result<Tenant>;
    async fn insert(&self, tenant: Tenant) -> Result<()>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get(&self, id: &AgentId) -> Result<Agent>;
    async fn insert(&self, agent: Agent) -> Result<()>;
}

#[async_trait]
pub trait PhoneStore: Send + Sync {
    async fn get(&self, id: &PhoneId) -> Result<Phone>;
    /// All phones registered to a tenant, in registration order. Resolves
    /// the "which phone approves for this agent" open question: callers
    /// take the first-registered phone (spec.md open question, see
    /// DESIGN.md).
    async fn list_for_tenant(&self, tenant: &TenantId) -> Result<Vec<Phone>>;
    async fn insert(&self, phone: Phone) -> Result<()>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, id: &SecretId) -> Result<SecretMetadata>;
    /// Rejects a duplicate `id` or a duplicate `(owning_agent, name)` pair
    /// with [`ClavumError::Conflict`] (spec.md §3's uniqueness invariant).
    async fn insert(&self, secret: SecretMetadata) -> Result<()>;
    async fn list_for_owner(&self, owner: &AgentId) -> Result<Vec<SecretMetadata>>;
    async fn delete(&self, id: &SecretId) -> Result<()>;
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn get(&self, id: &ApprovalId) -> Result<ApprovalRequest>;
    async fn insert(&self, request: ApprovalRequest) -> Result<()>;
    /// Atomically replace a request iff its stored status still matches
    /// `expected_status`, returning the updated record. This is the
    /// primitive the approval state machine builds its at-most-one
    /// transition guarantee on (spec.md §4.5).
    async fn compare_and_swap(
        &self,
        id: &ApprovalId,
        expected_status: crate::models::ApprovalStatus,
        updated: ApprovalRequest,
    ) -> Result<ApprovalRequest>;
    async fn list_pending_for_phone(&self, phone: &PhoneId) -> Result<Vec<ApprovalRequest>>;
}

#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Record a signature digest as seen. Returns `Ok(())` the first
    /// time, [`ClavumError::Replayed`] on a repeat within the digest's
    /// freshness window.
    async fn record_if_new(&self, record: NonceRecord) -> Result<()>;
    /// Drop nonce records whose `expires_at` has passed. Returns how many
    /// were removed.
    async fn garbage_collect(&self) -> Result<usize>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, entry: AuditEntry) -> Result<()>;
    async fn query(&self, query: AuditQuery) -> Result<Vec<AuditEntry>>;
}

/// In-memory [`TenantStore`], keyed by [`TenantId`].
#[derive(Default)]
pub struct InMemoryTenantStore {
    tenants: Arc<RwLock<HashMap<TenantId, Tenant>>>,
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get(&self, id: &TenantId) -> Result<Tenant> {
        let tenants = self.tenants.read().await;
        tenants
            .get(id)
            .map(|t| Tenant {
                id: t.id.clone(),
                x25519_public: t.x25519_public,
                x25519_private: t.x25519_private.clone(),
            })
            .ok_or_else(|| ClavumError::NotFound(format!("tenant {id}")))
    }

    async fn insert(&self, tenant: Tenant) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        tenants.insert(tenant.id.clone(), tenant);
        Ok(())
    }
}

/// In-memory [`AgentStore`], keyed by [`AgentId`].
#[derive(Default)]
pub struct InMemoryAgentStore {
    agents: Arc<RwLock<HashMap<AgentId, Agent>>>,
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn get(&self, id: &AgentId) -> Result<Agent> {
        let agents = self.agents.read().await;
        agents
            .get(id)
            .cloned()
            .ok_or_else(|| ClavumError::NotFound(format!("agent {id}")))
    }

    async fn insert(&self, agent: Agent) -> Result<()> {
        let mut agents = self.agents.write().await;
        agents.insert(agent.id.clone(), agent);
        Ok(())
    }
}

/// In-memory [`PhoneStore`], keyed by [`PhoneId`].
#[derive(Default)]
pub struct InMemoryPhoneStore {
    phones: Arc<RwLock<HashMap<PhoneId, Phone>>>,
    /// Registration order, per tenant, so `list_for_tenant` can resolve
    /// "first registered" without re-sorting by an unrelated timestamp.
    order: Arc<RwLock<HashMap<TenantId, Vec<PhoneId>>>>,
}

#[async_trait]
impl PhoneStore for InMemoryPhoneStore {
    async fn get(&self, id: &PhoneId) -> Result<Phone> {
        let phones = self.phones.read().await;
        phones
            .get(id)
            .cloned()
            .ok_or_else(|| ClavumError::NotFound(format!("phone {id}")))
    }

    async fn list_for_tenant(&self, tenant: &TenantId) -> Result<Vec<Phone>> {
        let order = self.order.read().await;
        let phones = self.phones.read().await;
        let ids = order.get(tenant).cloned().unwrap_or_default();
        Ok(ids.iter().filter_map(|id| phones.get(id).cloned()).collect())
    }

    async fn insert(&self, phone: Phone) -> Result<()> {
        let mut order = self.order.write().await;
        order.entry(phone.tenant.clone()).or_default().push(phone.id.clone());
        let mut phones = self.phones.write().await;
        phones.insert(phone.id.clone(), phone);
        Ok(())
    }
}

/// In-memory [`SecretStore`], keyed by [`SecretId`].
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: Arc<RwLock<HashMap<SecretId, SecretMetadata>>>,
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, id: &SecretId) -> Result<SecretMetadata> {
        let secrets = self.secrets.read().await;
        secrets
            .get(id)
            .cloned()
            .ok_or_else(|| ClavumError::NotFound(format!("secret {id}")))
    }

    async fn insert(&self, secret: SecretMetadata) -> Result<()> {
        let mut secrets = self.secrets.write().await;
        if secrets.contains_key(&secret.id) {
            return Err(ClavumError::Conflict(format!("secret {} already exists", secret.id)));
        }
        if secrets
            .values()
            .any(|s| s.owning_agent == secret.owning_agent && s.name == secret.name)
        {
            return Err(ClavumError::Conflict(format!(
                "secret named {} already exists for this agent",
                secret.name
            )));
        }
        secrets.insert(secret.id.clone(), secret);
        Ok(())
    }

    async fn list_for_owner(&self, owner: &AgentId) -> Result<Vec<SecretMetadata>> {
        let secrets = self.secrets.read().await;
        Ok(secrets.values().filter(|s| &s.owning_agent == owner).cloned().collect())
    }

    async fn delete(&self, id: &SecretId) -> Result<()> {
        let mut secrets = self.secrets.write().await;
        secrets
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ClavumError::NotFound(format!("secret {id}")))
    }
}

/// In-memory [`ApprovalStore`], keyed by [`ApprovalId`]. The write lock
/// held across the read-check-write of `compare_and_swap` is what gives
/// us the at-most-one-transition guarantee spec.md §4.5 requires.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    approvals: Arc<RwLock<HashMap<ApprovalId, ApprovalRequest>>>,
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn get(&self, id: &ApprovalId) -> Result<ApprovalRequest> {
        let approvals = self.approvals.read().await;
        approvals
            .get(id)
            .cloned()
            .ok_or_else(|| ClavumError::NotFound(format!("approval {id}")))
    }

    async fn insert(&self, request: ApprovalRequest) -> Result<()> {
        let mut approvals = self.approvals.write().await;
        approvals.insert(request.id.clone(), request);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        id: &ApprovalId,
        expected_status: crate::models::ApprovalStatus,
        updated: ApprovalRequest,
    ) -> Result<ApprovalRequest> {
        let mut approvals = self.approvals.write().await;
        let current = approvals
            .get(id)
            .ok_or_else(|| ClavumError::NotFound(format!("approval {id}")))?;

        if current.status != expected_status {
            return Err(ClavumError::AlreadyResolved(current.status));
        }

        approvals.insert(id.clone(), updated.clone());
        Ok(updated)
    }

    async fn list_pending_for_phone(&self, phone: &PhoneId) -> Result<Vec<ApprovalRequest>> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .values()
            .filter(|a| &a.phone == phone && a.status == crate::models::ApprovalStatus::Pending)
            .cloned()
            .collect())
    }
}

/// In-memory [`NonceStore`], keyed by signature digest.
#[derive(Default)]
pub struct InMemoryNonceStore {
    nonces: Arc<RwLock<HashMap<[u8; 32], NonceRecord>>>,
}

#[async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn record_if_new(&self, record: NonceRecord) -> Result<()> {
        let mut nonces = self.nonces.write().await;
        if nonces.contains_key(&record.signature_digest) {
            return Err(ClavumError::Replayed);
        }
        nonces.insert(record.signature_digest, record);
        Ok(())
    }

    async fn garbage_collect(&self) -> Result<usize> {
        let now = chrono::Utc::now();
        let mut nonces = self.nonces.write().await;
        let before = nonces.len();
        nonces.retain(|_, record| record.expires_at > now);
        let removed = before - nonces.len();
        if removed > 0 {
            tracing::debug!(removed, "garbage collected expired nonces");
        }
        Ok(removed)
    }
}

/// In-memory [`AuditSink`], append-only, matching the teacher's
/// `AuditManager`.
#[derive(Default)]
pub struct InMemoryAuditSink {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn write(&self, entry: AuditEntry) -> Result<()> {
        tracing::info!(
            agent = %entry.agent,
            secret = %entry.secret,
            tier = ?entry.tier,
            result = ?entry.result,
            "audit event"
        );
        let mut entries = self.entries.write().await;
        entries.push(entry);
        Ok(())
    }

    async fn query(&self, query: AuditQuery) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(entries
            .iter()
            .filter(|e| {
                if let Some(ref secret_id) = query.secret_id {
                    if &e.secret != secret_id {
                        return false;
                    }
                }
                if let Some(from) = query.from {
                    if e.created_at < from {
                        return false;
                    }
                }
                if let Some(to) = query.to {
                    if e.created_at > to {
                        return false;
                    }
                }
                true
            })
            .take(limit)
            .cloned()
            .collect())
    }
}
