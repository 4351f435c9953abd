// SPDX-License-Identifier: AGPL-3.0
//! `HashMap`-backed repositories for tests and local development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::api_key::{ApiKey, ApiKeyError};
use crate::domain::audit::AuditEvent;
use crate::domain::federation::FederationNode;
use crate::domain::ids::{ApiKeyId, CapabilityId, NodeId, PrincipalId, ResourceId, SessionId};
use crate::domain::repository::{
    ApiKeyRepository, AuditRepository, FederationNodeRepository, ResourceRepository,
    SessionRepository,
};
use crate::domain::resource::{Capability, Resource};
use crate::domain::session::{Session, SessionError};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn save(&self, session: Session) -> anyhow::Result<()> {
        self.sessions.write().await.insert(session.id, session);
        Ok(())
    }

    async fn find_by_id(&self, id: &SessionId) -> anyhow::Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn find_active_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> anyhow::Result<Vec<Session>> {
        let now = Utc::now();
        let guard = self.sessions.read().await;
        let mut active: Vec<_> = guard
            .values()
            .filter(|s| s.principal_id == *principal_id && s.is_valid(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    async fn revoke(&self, id: &SessionId, reason: String) -> anyhow::Result<(), SessionError> {
        let mut guard = self.sessions.write().await;
        let session = guard.get_mut(id).ok_or(SessionError::NotFound)?;
        session.revoke(reason);
        Ok(())
    }

    async fn revoke_all_for_principal(
        &self,
        principal_id: &PrincipalId,
        reason: String,
    ) -> anyhow::Result<usize> {
        let now = Utc::now();
        let mut guard = self.sessions.write().await;
        let mut revoked = 0;
        for session in guard.values_mut() {
            if session.principal_id == *principal_id && session.is_valid(now) {
                session.revoke(reason.clone());
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[derive(Default)]
pub struct InMemoryApiKeyRepository {
    keys: Arc<RwLock<HashMap<ApiKeyId, ApiKey>>>,
}

impl InMemoryApiKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn save(&self, key: ApiKey) -> anyhow::Result<()> {
        self.keys.write().await.insert(key.id, key);
        Ok(())
    }

    async fn find_by_id(&self, id: &ApiKeyId) -> anyhow::Result<Option<ApiKey>> {
        Ok(self.keys.read().await.get(id).cloned())
    }

    async fn find_by_prefix(&self, prefix: &str) -> anyhow::Result<Option<ApiKey>> {
        Ok(self
            .keys
            .read()
            .await
            .values()
            .find(|k| k.prefix == prefix)
            .cloned())
    }

    async fn revoke(&self, id: &ApiKeyId) -> anyhow::Result<(), ApiKeyError> {
        let mut guard = self.keys.write().await;
        let key = guard.get_mut(id).ok_or(ApiKeyError::NotFound)?;
        key.revoked_at = Some(Utc::now());
        Ok(())
    }

    async fn record_usage(&self, id: &ApiKeyId, ip: Option<String>) -> anyhow::Result<()> {
        let mut guard = self.keys.write().await;
        if let Some(key) = guard.get_mut(id) {
            key.record_usage(ip);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, event: AuditEvent) -> anyhow::Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &crate::domain::ids::CorrelationId,
    ) -> anyhow::Result<Vec<AuditEvent>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.correlation_id.as_ref() == Some(correlation_id))
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<AuditEvent>> {
        let guard = self.events.read().await;
        let start = guard.len().saturating_sub(limit);
        Ok(guard[start..].to_vec())
    }
}

#[derive(Default)]
pub struct InMemoryFederationNodeRepository {
    nodes: Arc<RwLock<HashMap<NodeId, FederationNode>>>,
}

impl InMemoryFederationNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FederationNodeRepository for InMemoryFederationNodeRepository {
    async fn save(&self, node: FederationNode) -> anyhow::Result<()> {
        self.nodes.write().await.insert(node.node_id, node);
        Ok(())
    }

    async fn find_by_id(&self, id: &NodeId) -> anyhow::Result<Option<FederationNode>> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn all(&self) -> anyhow::Result<Vec<FederationNode>> {
        Ok(self.nodes.read().await.values().cloned().collect())
    }

    async fn remove(&self, id: &NodeId) -> anyhow::Result<()> {
        self.nodes.write().await.remove(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryResourceRepository {
    resources: Arc<RwLock<HashMap<ResourceId, Resource>>>,
    capabilities: Arc<RwLock<HashMap<CapabilityId, Capability>>>,
}

impl InMemoryResourceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceRepository for InMemoryResourceRepository {
    async fn save(&self, resource: Resource) -> anyhow::Result<()> {
        self.resources.write().await.insert(resource.id, resource);
        Ok(())
    }

    async fn find_by_id(&self, id: &ResourceId) -> anyhow::Result<Option<Resource>> {
        Ok(self.resources.read().await.get(id).cloned())
    }

    async fn all(&self) -> anyhow::Result<Vec<Resource>> {
        Ok(self.resources.read().await.values().cloned().collect())
    }

    async fn save_capability(&self, capability: Capability) -> anyhow::Result<()> {
        self.capabilities.write().await.insert(capability.id, capability);
        Ok(())
    }

    async fn find_capability(&self, id: &CapabilityId) -> anyhow::Result<Option<Capability>> {
        Ok(self.capabilities.read().await.get(id).cloned())
    }

    async fn capabilities_for_resource(&self, resource_id: &ResourceId) -> anyhow::Result<Vec<Capability>> {
        Ok(self
            .capabilities
            .read()
            .await
            .values()
            .filter(|c| c.resource_id == *resource_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::PrincipalId;

    #[tokio::test]
    async fn session_repository_finds_active_only() {
        let repo = InMemorySessionRepository::new();
        let principal = PrincipalId::new();
        let s = Session::new(principal, None, None, std::time::Duration::from_secs(3600));
        repo.save(s.clone()).await.unwrap();
        repo.revoke(&s.id, "test".into()).await.unwrap();

        let active = repo.find_active_by_principal(&principal).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn api_key_repository_finds_by_prefix() {
        let repo = InMemoryApiKeyRepository::new();
        let principal = PrincipalId::new();
        let generated = ApiKey::generate(
            "sark",
            "prod",
            principal,
            None,
            "ci",
            vec!["invoke".into()],
            60,
            None,
        );
        let prefix = generated.record.prefix.clone();
        repo.save(generated.record).await.unwrap();

        let found = repo.find_by_prefix(&prefix).await.unwrap();
        assert!(found.is_some());
    }
}
