// SPDX-License-Identifier: AGPL-3.0
//! Login/logout orchestration for the HTTP API: wraps [`SessionStore`] with
//! the audit events spec §6's `/auth/*` surface expects on every branch.

use std::sync::Arc;

use crate::domain::audit::{AuditEvent, AuditEventType, Severity};
use crate::domain::ids::{PrincipalId, RequestId, SessionId};
use crate::domain::repository::AuditRepository;
use crate::domain::session::{Session, SessionError};
use crate::infrastructure::session_store::SessionStore;

pub struct AuthService {
    sessions: Arc<SessionStore>,
    audit: Arc<dyn AuditRepository>,
}

impl AuthService {
    pub fn new(sessions: Arc<SessionStore>, audit: Arc<dyn AuditRepository>) -> Self {
        Self { sessions, audit }
    }

    pub async fn login(
        &self,
        principal_id: PrincipalId,
        ip: Option<String>,
        user_agent: Option<String>,
        remember_me: bool,
    ) -> anyhow::Result<Session> {
        let session = self.sessions.create(principal_id, ip.clone(), user_agent, remember_me).await?;
        self.audit(
            AuditEvent::builder(AuditEventType::Custom("SessionCreated".into()), Severity::Low, RequestId::new().to_string())
                .principal(principal_id, None)
                .client(ip, None)
                .build(),
        )
        .await;
        Ok(session)
    }

    pub async fn logout(&self, session_id: &SessionId) -> Result<(), SessionError> {
        self.sessions.invalidate(session_id, "logout").await?;
        self.audit(
            AuditEvent::builder(AuditEventType::Custom("SessionRevoked".into()), Severity::Low, RequestId::new().to_string()).build(),
        )
        .await;
        Ok(())
    }

    pub async fn logout_all(&self, principal_id: &PrincipalId) -> anyhow::Result<usize> {
        let revoked = self.sessions.invalidate_all_for_principal(principal_id, "logout_all").await?;
        self.audit(
            AuditEvent::builder(AuditEventType::Custom("AllSessionsRevoked".into()), Severity::Medium, RequestId::new().to_string())
                .principal(*principal_id, None)
                .detail("revoked_count", revoked.into())
                .build(),
        )
        .await;
        Ok(revoked)
    }

    pub async fn status(&self, session_id: &SessionId) -> Result<Session, SessionError> {
        self.sessions.validate(session_id).await
    }

    async fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.append(event).await {
            tracing::error!(error = %e, "audit_persist_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::{InMemoryAuditRepository, InMemorySessionRepository};
    use std::time::Duration;

    fn service() -> AuthService {
        AuthService::new(
            Arc::new(SessionStore::new(Arc::new(InMemorySessionRepository::new()), Duration::from_secs(3600), 30)),
            Arc::new(InMemoryAuditRepository::new()),
        )
    }

    #[tokio::test]
    async fn login_then_status_reports_active_session() {
        let service = service();
        let principal_id = PrincipalId::new();
        let session = service.login(principal_id, None, None, false).await.unwrap();
        let status = service.status(&session.id).await.unwrap();
        assert_eq!(status.principal_id, principal_id);
    }

    #[tokio::test]
    async fn logout_invalidates_the_session() {
        let service = service();
        let session = service.login(PrincipalId::new(), None, None, false).await.unwrap();
        service.logout(&session.id).await.unwrap();
        assert!(service.status(&session.id).await.is_err());
    }
}
