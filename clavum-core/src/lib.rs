//! # Clavum core
//!
//! Tiered secret-retrieval substrate for autonomous AI agents.
//!
//! Every secret declares one of three tiers governing how many
//! independent parties must participate in decryption:
//!
//! - **Routine** — agent + server, no human in the loop.
//! - **Sensitive** — agent + server + explicit human (phone) approval.
//! - **Critical** — agent + server + phone, all three contributing key
//!   material.
//!
//! This crate implements the four subsystems that make up the core:
//! cryptographic primitives and flows, request authentication and
//! replay protection, the sensitive-tier approval state machine, and
//! the tier-routed retrieval coordinator. Transport (HTTP/JSON framing),
//! the agent-side vault, and the pairing handshake are deliberately out
//! of scope — see `clavum-server` for an illustrative transport
//! binding.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use clavum_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let tenants = Arc::new(InMemoryTenantStore::default());
//!     let agents = Arc::new(InMemoryAgentStore::default());
//!     let phones = Arc::new(InMemoryPhoneStore::default());
//!     let secrets = Arc::new(InMemorySecretStore::default());
//!     let audit = Arc::new(AuditManager::new(Arc::new(InMemoryAuditSink::default())));
//!     let approvals = Arc::new(ApprovalMachine::new(Arc::new(InMemoryApprovalStore::default())));
//!
//!     let coordinator = RetrievalCoordinator::new(tenants, agents, phones, secrets, audit, approvals);
//!     let _ = coordinator;
//!     Ok(())
//! }
//! ```

pub mod approval;
pub mod audit;
pub mod auth_gate;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod flows;
pub mod models;
pub mod primitives;
pub mod signing;
pub mod storage;

pub use config::Config;
pub use error::{ClavumError, Result};

/// Crate version, for inclusion in audit metadata or status endpoints.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commonly used types, re-exported for downstream binaries like
/// `clavum-server`.
pub mod prelude {
    pub use crate::approval::{ApprovalMachine, ApprovalStatusView, DEFAULT_TIMEOUT_MS};
    pub use crate::audit::AuditManager;
    pub use crate::auth_gate::{AuthGate, PublicKeyLookup, SignedRequest};
    pub use crate::config::Config;
    pub use crate::coordinator::{
        RetrievalCoordinator, RetrievalOutcome, RetrievalRequest, WrappedKek,
    };
    pub use crate::error::{ClavumError, Result};
    pub use crate::flows::{build_aad, encrypt_secret, green_kek, red_kek, unwrap_dek, wrap_dek};
    pub use crate::models::{
        Agent, AgentId, ApprovalId, ApprovalRequest, ApprovalStatus, AuditEntry, AuditQuery,
        AuditResult, NonceRecord, Phone, PhoneId, SecretId, SecretMetadata, Tenant, TenantId,
        Tier,
    };
    pub use crate::primitives::{SealedBytes, SecretBytes};
    pub use crate::signing::{build_challenge, sign_challenge, sign_request, verify_challenge};
    pub use crate::storage::{
        AgentStore, ApprovalStore, AuditSink, InMemoryAgentStore, InMemoryApprovalStore,
        InMemoryAuditSink, InMemoryNonceStore, InMemoryPhoneStore, InMemorySecretStore,
        InMemoryTenantStore, NonceStore, PhoneStore, SecretStore, TenantStore,
    };
}
