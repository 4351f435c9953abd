// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed repositories. Each aggregate gets one table; JSON
//! columns hold the parts of the aggregate that don't need to be queried
//! directly (metadata, scopes, txt records).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::domain::api_key::{ApiKey, ApiKeyError};
use crate::domain::audit::AuditEvent;
use crate::domain::federation::FederationNode;
use crate::domain::ids::{ApiKeyId, CapabilityId, CorrelationId, NodeId, PrincipalId, ResourceId, SessionId};
use crate::domain::repository::{
    ApiKeyRepository, AuditRepository, FederationNodeRepository, ResourceRepository,
    SessionRepository,
};
use crate::domain::resource::{Capability, Resource};
use crate::domain::session::{Session, SessionError};

#[derive(Clone)]
pub struct PostgresSessionRepository {
    pool: PgPool,
}

impl PostgresSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn save(&self, session: Session) -> anyhow::Result<()> {
        let payload = serde_json::to_value(&session)?;
        sqlx::query(
            "INSERT INTO sessions (id, principal_id, expires_at, data)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET expires_at = $3, data = $4",
        )
        .bind(session.id.as_uuid())
        .bind(session.principal_id.as_uuid())
        .bind(session.expires_at)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &SessionId) -> anyhow::Result<Option<Session>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM sessions WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(match row {
            Some((data,)) => Some(serde_json::from_value(data)?),
            None => None,
        })
    }

    async fn find_active_by_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> anyhow::Result<Vec<Session>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT data FROM sessions WHERE principal_id = $1 AND expires_at > now()
             ORDER BY expires_at DESC",
        )
        .bind(principal_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(data,)| serde_json::from_value(data).map_err(Into::into))
            .collect()
    }

    async fn revoke(&self, id: &SessionId, reason: String) -> anyhow::Result<(), SessionError> {
        let mut session = self
            .find_by_id(id)
            .await
            .map_err(|_| SessionError::NotFound)?
            .ok_or(SessionError::NotFound)?;
        session.revoke(reason);
        self.save(session).await.map_err(|_| SessionError::NotFound)
    }

    async fn revoke_all_for_principal(
        &self,
        principal_id: &PrincipalId,
        reason: String,
    ) -> anyhow::Result<usize> {
        let active = self.find_active_by_principal(principal_id).await?;
        let count = active.len();
        for mut session in active {
            session.revoke(reason.clone());
            self.save(session).await?;
        }
        Ok(count)
    }
}

#[derive(Clone)]
pub struct PostgresApiKeyRepository {
    pool: PgPool,
}

impl PostgresApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyRepository for PostgresApiKeyRepository {
    async fn save(&self, key: ApiKey) -> anyhow::Result<()> {
        let payload = serde_json::to_value(&key)?;
        sqlx::query(
            "INSERT INTO api_keys (id, prefix, principal_id, data)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET data = $4",
        )
        .bind(key.id.as_uuid())
        .bind(&key.prefix)
        .bind(key.principal_id.as_uuid())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ApiKeyId) -> anyhow::Result<Option<ApiKey>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM api_keys WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(match row {
            Some((data,)) => Some(serde_json::from_value(data)?),
            None => None,
        })
    }

    async fn find_by_prefix(&self, prefix: &str) -> anyhow::Result<Option<ApiKey>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM api_keys WHERE prefix = $1")
                .bind(prefix)
                .fetch_optional(&self.pool)
                .await?;
        Ok(match row {
            Some((data,)) => Some(serde_json::from_value(data)?),
            None => None,
        })
    }

    async fn revoke(&self, id: &ApiKeyId) -> anyhow::Result<(), ApiKeyError> {
        let mut key = self
            .find_by_id(id)
            .await
            .map_err(|_| ApiKeyError::NotFound)?
            .ok_or(ApiKeyError::NotFound)?;
        key.revoked_at = Some(Utc::now());
        self.save(key).await.map_err(|_| ApiKeyError::NotFound)
    }

    async fn record_usage(&self, id: &ApiKeyId, ip: Option<String>) -> anyhow::Result<()> {
        if let Some(mut key) = self.find_by_id(id).await? {
            key.record_usage(ip);
            self.save(key).await?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PostgresAuditRepository {
    async fn append(&self, event: AuditEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_value(&event)?;
        sqlx::query(
            "INSERT INTO audit_events (id, correlation_id, occurred_at, data) VALUES ($1, $2, $3, $4)",
        )
        .bind(event.id.as_uuid())
        .bind(event.correlation_id.as_ref().map(|c| c.as_uuid()))
        .bind(event.timestamp)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &CorrelationId,
    ) -> anyhow::Result<Vec<AuditEvent>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT data FROM audit_events WHERE correlation_id = $1 ORDER BY occurred_at",
        )
        .bind(correlation_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(data,)| serde_json::from_value(data).map_err(Into::into))
            .collect()
    }

    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<AuditEvent>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT data FROM audit_events ORDER BY occurred_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(data,)| serde_json::from_value(data).map_err(Into::into))
            .collect()
    }
}

#[derive(Clone)]
pub struct PostgresFederationNodeRepository {
    pool: PgPool,
}

impl PostgresFederationNodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FederationNodeRepository for PostgresFederationNodeRepository {
    async fn save(&self, node: FederationNode) -> anyhow::Result<()> {
        let payload = serde_json::to_value(&node)?;
        sqlx::query(
            "INSERT INTO federation_nodes (id, data) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET data = $2",
        )
        .bind(node.node_id.as_uuid())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &NodeId) -> anyhow::Result<Option<FederationNode>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM federation_nodes WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(match row {
            Some((data,)) => Some(serde_json::from_value(data)?),
            None => None,
        })
    }

    async fn all(&self) -> anyhow::Result<Vec<FederationNode>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as("SELECT data FROM federation_nodes")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(data,)| serde_json::from_value(data).map_err(Into::into))
            .collect()
    }

    async fn remove(&self, id: &NodeId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM federation_nodes WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresResourceRepository {
    pool: PgPool,
}

impl PostgresResourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceRepository for PostgresResourceRepository {
    async fn save(&self, resource: Resource) -> anyhow::Result<()> {
        let payload = serde_json::to_value(&resource)?;
        sqlx::query(
            "INSERT INTO resources (id, data) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET data = $2",
        )
        .bind(resource.id.as_uuid())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ResourceId) -> anyhow::Result<Option<Resource>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM resources WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(match row {
            Some((data,)) => Some(serde_json::from_value(data)?),
            None => None,
        })
    }

    async fn all(&self) -> anyhow::Result<Vec<Resource>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as("SELECT data FROM resources")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(data,)| serde_json::from_value(data).map_err(Into::into))
            .collect()
    }

    async fn save_capability(&self, capability: Capability) -> anyhow::Result<()> {
        let payload = serde_json::to_value(&capability)?;
        sqlx::query(
            "INSERT INTO capabilities (id, resource_id, data) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET data = $3",
        )
        .bind(capability.id.as_uuid())
        .bind(capability.resource_id.as_uuid())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_capability(&self, id: &CapabilityId) -> anyhow::Result<Option<Capability>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM capabilities WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(match row {
            Some((data,)) => Some(serde_json::from_value(data)?),
            None => None,
        })
    }

    async fn capabilities_for_resource(&self, resource_id: &ResourceId) -> anyhow::Result<Vec<Capability>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM capabilities WHERE resource_id = $1")
                .bind(resource_id.as_uuid())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(data,)| serde_json::from_value(data).map_err(Into::into))
            .collect()
    }
}
