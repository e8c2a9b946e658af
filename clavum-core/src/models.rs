//! Data model for the Clavum core (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::primitives::SecretBytes;

macro_rules! opaque_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Mint a new collision-resistant identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(TenantId, "Opaque identifier for a tenant.");
opaque_id!(AgentId, "Opaque identifier for an agent.");
opaque_id!(PhoneId, "Opaque identifier for a phone.");
opaque_id!(SecretId, "Opaque identifier for a secret's metadata record.");
opaque_id!(ApprovalId, "Opaque identifier for an approval request.");

/// An isolation boundary owning one long-lived X25519 keypair.
pub struct Tenant {
    pub id: TenantId,
    pub x25519_public: [u8; 32],
    pub x25519_private: SecretBytes,
}

/// A paired machine identity: X25519 for ECDH with the server, Ed25519 for
/// request signing. The server only ever stores the public halves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub tenant: TenantId,
    pub x25519_public: [u8; 32],
    pub ed25519_public: [u8; 32],
}

/// A phone identity, symmetric to [`Agent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phone {
    pub id: PhoneId,
    pub tenant: TenantId,
    pub x25519_public: [u8; 32],
    pub ed25519_public: [u8; 32],
}

/// The three tiers of spec.md §1, in ascending order of required consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Agent + server. No human in the loop.
    Routine,
    /// Agent + server + explicit human (phone) consent.
    Sensitive,
    /// Agent + server + phone, all three contributing key material.
    Critical,
}

/// `(id, tenant, owning_agent, name, tier)`, unique on `(owning_agent, name)`.
/// Tier is immutable after creation; the core never stores ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub id: SecretId,
    pub tenant: TenantId,
    pub owning_agent: AgentId,
    pub name: String,
    pub tier: Tier,
}

/// Lifecycle of a human-approval request. Only `Pending` is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

/// A human-approval request bound to one secret retrieval (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub phone: PhoneId,
    pub secret: SecretId,
    pub reason: String,
    /// Fixed at creation by the §4.3 challenge builder; never rewritten.
    pub challenge_bytes: Vec<u8>,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub approval_signature: Option<[u8; 64]>,
}

/// `(signature_digest, expires_at)`, `signature_digest` unique. Presence of
/// a row means "this exact request signature has been observed".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceRecord {
    pub signature_digest: [u8; 32],
    pub expires_at: DateTime<Utc>,
}

/// Terminal outcome of a retrieval or approval flow, as written to the
/// append-only audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    AutoGranted,
    HumanApproved,
    DeviceUnlocked,
    Denied,
    Expired,
    Error,
}

/// `(id, agent, secret, reason, tier, result, created_at, latency_ms?,
/// proof?)`. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub agent: AgentId,
    pub secret: SecretId,
    pub reason: String,
    pub tier: Tier,
    pub result: AuditResult,
    pub created_at: DateTime<Utc>,
    pub latency_ms: Option<u64>,
    pub proof: Option<[u8; 64]>,
}

/// Query filters accepted by the agent-facing `GET /api/audit` endpoint
/// contract (spec.md §6). Carried here because it is shared by the
/// storage trait and any HTTP adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub secret_id: Option<SecretId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}
