//! Shared application state handed to every handler.

use std::sync::Arc;

use clavum_core::prelude::*;

#[derive(Clone)]
pub struct AppState(pub Arc<Inner>);

pub struct Inner {
    pub tenants: Arc<dyn TenantStore>,
    pub agents: Arc<dyn AgentStore>,
    pub phones: Arc<dyn PhoneStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub audit: Arc<AuditManager>,
    pub approvals: Arc<ApprovalMachine>,
    pub coordinator: Arc<RetrievalCoordinator>,
    pub auth_gate: Arc<AuthGate>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let tenants: Arc<dyn TenantStore> = Arc::new(InMemoryTenantStore::default());
        let agents: Arc<dyn AgentStore> = Arc::new(InMemoryAgentStore::default());
        let phones: Arc<dyn PhoneStore> = Arc::new(InMemoryPhoneStore::default());
        let secrets: Arc<dyn SecretStore> = Arc::new(InMemorySecretStore::default());
        let audit = Arc::new(AuditManager::new(Arc::new(InMemoryAuditSink::default())));
        let approvals = Arc::new(ApprovalMachine::new(Arc::new(InMemoryApprovalStore::default())));
        let nonces: Arc<dyn NonceStore> = Arc::new(InMemoryNonceStore::default());

        let coordinator = Arc::new(RetrievalCoordinator::new(
            tenants.clone(),
            agents.clone(),
            phones.clone(),
            secrets.clone(),
            audit.clone(),
            approvals.clone(),
        ));

        let auth_gate = Arc::new(AuthGate::new(
            nonces,
            config.auth_gate.max_age.as_millis() as i64,
            config.nonce.ttl_factor,
            config.nonce.gc_stride,
        ));

        Self(Arc::new(Inner {
            tenants,
            agents,
            phones,
            secrets,
            audit,
            approvals,
            coordinator,
            auth_gate,
        }))
    }
}

impl std::ops::Deref for AppState {
    type Target = Inner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
