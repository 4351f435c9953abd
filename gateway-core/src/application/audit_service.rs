// SPDX-License-Identifier: AGPL-3.0
//! Read-side facade over [`AuditRepository`] for the HTTP API and SIEM
//! replay tooling. Writing audit events is [`InvocationPipeline`]'s job;
//! this service only serves them back out.
//!
//! [`InvocationPipeline`]: super::invocation_pipeline::InvocationPipeline

use std::sync::Arc;

use crate::domain::audit::AuditEvent;
use crate::domain::ids::CorrelationId;
use crate::domain::repository::AuditRepository;

pub struct AuditEmitter {
    repository: Arc<dyn AuditRepository>,
}

impl AuditEmitter {
    pub fn new(repository: Arc<dyn AuditRepository>) -> Self {
        Self { repository }
    }

    pub async fn trace(&self, correlation_id: &CorrelationId) -> anyhow::Result<Vec<AuditEvent>> {
        self.repository.find_by_correlation_id(correlation_id).await
    }

    pub async fn recent(&self, limit: usize) -> anyhow::Result<Vec<AuditEvent>> {
        self.repository.recent(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::{AuditEventType, Severity};
    use crate::infrastructure::repositories::InMemoryAuditRepository;

    #[tokio::test]
    async fn trace_returns_events_for_the_same_correlation_id() {
        let repo = Arc::new(InMemoryAuditRepository::new());
        let correlation_id = CorrelationId::new();
        repo.append(
            AuditEvent::builder(AuditEventType::InvocationSucceeded, Severity::Low, "req-1")
                .correlation_id(correlation_id)
                .build(),
        )
        .await
        .unwrap();
        repo.append(AuditEvent::builder(AuditEventType::InvocationSucceeded, Severity::Low, "req-2").build())
            .await
            .unwrap();

        let emitter = AuditEmitter::new(repo);
        let traced = emitter.trace(&correlation_id).await.unwrap();
        assert_eq!(traced.len(), 1);
    }
}
