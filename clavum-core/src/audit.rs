//! Audit-entry recording (spec.md §4.6's "Atomicity of audit writes").
//!
//! Thin façade over an [`AuditSink`] so the coordinator depends on one
//! well-named collaborator instead of threading sink calls through
//! several call sites.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::error::{ClavumError, Result};
use crate::models::{AgentId, AuditEntry, AuditQuery, AuditResult, SecretId, Tier};
use crate::storage::AuditSink;

pub struct AuditManager {
    sink: Arc<dyn AuditSink>,
}

impl AuditManager {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record one terminal outcome of a retrieval or approval flow.
    /// `started` anchors the latency measurement at coordinator entry,
    /// per spec.md §4.6.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        agent: &AgentId,
        secret: &SecretId,
        reason: &str,
        tier: Tier,
        result: AuditResult,
        started: Instant,
        proof: Option<[u8; 64]>,
    ) -> Result<()> {
        let entry = AuditEntry {
            id: uuid::Uuid::new_v4(),
            agent: agent.clone(),
            secret: secret.clone(),
            reason: reason.to_string(),
            tier,
            result,
            created_at: Utc::now(),
            latency_ms: Some(started.elapsed().as_millis() as u64),
            proof,
        };

        // A lost audit write must surface before key material is
        // returned to the caller (spec.md §4.6); it is never silently
        // dropped or retried here.
        self.sink
            .write(entry)
            .await
            .map_err(|e| ClavumError::Internal(format!("audit write failed: {e}")))
    }

    pub async fn query(&self, query: AuditQuery) -> Result<Vec<AuditEntry>> {
        self.sink.query(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryAuditSink;

    #[tokio::test]
    async fn record_then_query_round_trips() {
        let manager = AuditManager::new(Arc::new(InMemoryAuditSink::default()));
        let agent = AgentId::generate();
        let secret = SecretId::generate();

        manager
            .record(
                &agent,
                &secret,
                "ci deploy",
                Tier::Routine,
                AuditResult::AutoGranted,
                Instant::now(),
                None,
            )
            .await
            .unwrap();

        let entries = manager.query(AuditQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, "ci deploy");
        assert_eq!(entries[0].result, AuditResult::AutoGranted);
    }
}
