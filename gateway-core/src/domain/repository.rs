// SPDX-License-Identifier: AGPL-3.0
//! Repository abstractions for the gateway's aggregates. Infrastructure
//! provides in-memory and PostgreSQL implementations; application services
//! depend only on these traits.

use async_trait::async_trait;

use crate::domain::api_key::{ApiKey, ApiKeyError};
use crate::domain::audit::AuditEvent;
use crate::domain::federation::FederationNode;
use crate::domain::ids::{ApiKeyId, CapabilityId, CorrelationId, NodeId, PrincipalId, ResourceId, SessionId};
use crate::domain::resource::{Capability, Resource};
use crate::domain::session::{Session, SessionError};

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save(&self, session: Session) -> anyhow::Result<()>;
    async fn find_by_id(&self, id: &SessionId) -> anyhow::Result<Option<Session>>;
    async fn find_active_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> anyhow::Result<Vec<Session>>;
    async fn revoke(&self, id: &SessionId, reason: String) -> anyhow::Result<(), SessionError>;
    async fn revoke_all_for_principal(
        &self,
        principal_id: &PrincipalId,
        reason: String,
    ) -> anyhow::Result<usize>;
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn save(&self, key: ApiKey) -> anyhow::Result<()>;
    async fn find_by_id(&self, id: &ApiKeyId) -> anyhow::Result<Option<ApiKey>>;
    /// `prefix` is the unhashed lookup prefix extracted from the presented key.
    async fn find_by_prefix(&self, prefix: &str) -> anyhow::Result<Option<ApiKey>>;
    async fn revoke(&self, id: &ApiKeyId) -> anyhow::Result<(), ApiKeyError>;
    async fn record_usage(&self, id: &ApiKeyId, ip: Option<String>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, event: AuditEvent) -> anyhow::Result<()>;
    async fn find_by_correlation_id(
        &self,
        correlation_id: &CorrelationId,
    ) -> anyhow::Result<Vec<AuditEvent>>;
    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<AuditEvent>>;
}

#[async_trait]
pub trait FederationNodeRepository: Send + Sync {
    async fn save(&self, node: FederationNode) -> anyhow::Result<()>;
    async fn find_by_id(&self, id: &NodeId) -> anyhow::Result<Option<FederationNode>>;
    async fn all(&self) -> anyhow::Result<Vec<FederationNode>>;
    async fn remove(&self, id: &NodeId) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn save(&self, resource: Resource) -> anyhow::Result<()>;
    async fn find_by_id(&self, id: &ResourceId) -> anyhow::Result<Option<Resource>>;
    async fn all(&self) -> anyhow::Result<Vec<Resource>>;

    async fn save_capability(&self, capability: Capability) -> anyhow::Result<()>;
    async fn find_capability(&self, id: &CapabilityId) -> anyhow::Result<Option<Capability>>;
    async fn capabilities_for_resource(&self, resource_id: &ResourceId) -> anyhow::Result<Vec<Capability>>;
}
