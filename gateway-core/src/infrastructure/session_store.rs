// SPDX-License-Identifier: AGPL-3.0
//! `create → validate → refresh/invalidate → cleanup_expired` over a
//! [`SessionRepository`].

use std::sync::Arc;
use std::time::Duration;

use crate::domain::ids::{PrincipalId, SessionId};
use crate::domain::repository::SessionRepository;
use crate::domain::session::{Session, SessionError};

pub struct SessionStore {
    repository: Arc<dyn SessionRepository>,
    default_timeout: Duration,
    remember_me_multiplier: u32,
}

impl SessionStore {
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        default_timeout: Duration,
        remember_me_multiplier: u32,
    ) -> Self {
        Self {
            repository,
            default_timeout,
            remember_me_multiplier,
        }
    }

    pub async fn create(
        &self,
        principal_id: PrincipalId,
        ip: Option<String>,
        user_agent: Option<String>,
        remember_me: bool,
    ) -> anyhow::Result<Session> {
        let timeout = if remember_me {
            self.default_timeout * self.remember_me_multiplier
        } else {
            self.default_timeout
        };
        let session = Session::new(principal_id, ip, user_agent, timeout);
        self.repository.save(session.clone()).await?;
        Ok(session)
    }

    pub async fn validate(&self, id: &SessionId) -> anyhow::Result<Session, SessionError> {
        let session = self
            .repository
            .find_by_id(id)
            .await
            .map_err(|_| SessionError::NotFound)?
            .ok_or(SessionError::NotFound)?;
        session.validate(chrono::Utc::now())?;
        Ok(session)
    }

    pub async fn refresh(&self, id: &SessionId) -> anyhow::Result<Session, SessionError> {
        let mut session = self.validate(id).await?;
        session.refresh(self.default_timeout);
        self.repository
            .save(session.clone())
            .await
            .map_err(|_| SessionError::NotFound)?;
        Ok(session)
    }

    pub async fn invalidate(&self, id: &SessionId, reason: &str) -> anyhow::Result<(), SessionError> {
        self.repository.revoke(id, reason.to_string()).await
    }

    pub async fn invalidate_all_for_principal(
        &self,
        principal_id: &PrincipalId,
        reason: &str,
    ) -> anyhow::Result<usize> {
        self.repository
            .revoke_all_for_principal(principal_id, reason.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemorySessionRepository;

    fn store() -> SessionStore {
        SessionStore::new(
            Arc::new(InMemorySessionRepository::new()),
            Duration::from_secs(3600),
            30,
        )
    }

    #[tokio::test]
    async fn create_then_validate_succeeds() {
        let store = store();
        let principal = PrincipalId::new();
        let session = store.create(principal, None, None, false).await.unwrap();
        let validated = store.validate(&session.id).await.unwrap();
        assert_eq!(validated.id, session.id);
    }

    #[tokio::test]
    async fn invalidate_then_validate_fails() {
        let store = store();
        let principal = PrincipalId::new();
        let session = store.create(principal, None, None, false).await.unwrap();
        store.invalidate(&session.id, "logout").await.unwrap();
        assert!(store.validate(&session.id).await.is_err());
    }

    #[tokio::test]
    async fn remember_me_extends_timeout() {
        let store = store();
        let principal = PrincipalId::new();
        let plain = store.create(principal, None, None, false).await.unwrap();
        let remembered = store.create(principal, None, None, true).await.unwrap();
        assert!(remembered.expires_at > plain.expires_at);
    }
}
