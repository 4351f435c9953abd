// SPDX-License-Identifier: AGPL-3.0
//! Federation routing table: which node serves a given resource, and
//! whether that node is currently reachable. Invocations for resources
//! not owned by this gateway are forwarded to the routed node's endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Identity};
use tokio::sync::RwLock;

use crate::domain::federation::{FederatedAuditEvent, HealthStatus, RouteEntry};
use crate::domain::ids::{CorrelationId, NodeId, PrincipalId, ResourceId};
use crate::domain::repository::{AuditRepository, FederationNodeRepository};
use crate::domain::resource::InvocationRequest;

use super::trust::TrustError;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no route registered for resource {0}")]
    NoRoute(ResourceId),
    #[error("node {0} is offline")]
    NodeOffline(NodeId),
    #[error("federated invocation failed: {0}")]
    InvocationFailed(String),
    #[error(transparent)]
    Trust(#[from] TrustError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
    #[error("failed to build mTLS client: {0}")]
    TlsSetup(#[from] reqwest::Error),
}

/// mTLS context for peer-to-peer calls: peer verification stays on
/// (reqwest/rustls never skip it unless explicitly told to), hostname
/// checking stays on, TLS 1.2 is the floor, and rustls's own cipher suite
/// list (no RC4/3DES/export ciphers) is used rather than picking suites
/// by hand.
fn build_peer_client(client_identity_pem: Option<&str>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .use_rustls_tls()
        .https_only(true)
        .min_tls_version(reqwest::tls::Version::TLS_1_2);
    if let Some(pem) = client_identity_pem {
        builder = builder.identity(Identity::from_pem(pem.as_bytes())?);
    }
    builder.build()
}

pub struct FederationRouter {
    nodes: Arc<dyn FederationNodeRepository>,
    audit: Arc<dyn AuditRepository>,
    client: Client,
    routes: RwLock<HashMap<ResourceId, RouteEntry>>,
    health_timeout: Duration,
}

impl FederationRouter {
    pub fn new(
        nodes: Arc<dyn FederationNodeRepository>,
        audit: Arc<dyn AuditRepository>,
        health_timeout: Duration,
    ) -> Result<Self, RouterError> {
        Ok(Self {
            nodes,
            audit,
            client: build_peer_client(None)?,
            routes: RwLock::new(HashMap::new()),
            health_timeout,
        })
    }

    /// Same as [`Self::new`], but presents `client_identity_pem` (a
    /// concatenated client certificate and private key) for mutual TLS
    /// against peers that require it.
    pub fn with_client_identity(
        nodes: Arc<dyn FederationNodeRepository>,
        audit: Arc<dyn AuditRepository>,
        health_timeout: Duration,
        client_identity_pem: &str,
    ) -> Result<Self, RouterError> {
        Ok(Self {
            nodes,
            audit,
            client: build_peer_client(Some(client_identity_pem))?,
            routes: RwLock::new(HashMap::new()),
            health_timeout,
        })
    }

    pub async fn register_route(&self, entry: RouteEntry) {
        self.routes.write().await.insert(entry.resource_id, entry);
    }

    pub async fn find_route(&self, resource_id: &ResourceId) -> Result<RouteEntry, RouterError> {
        self.routes
            .read()
            .await
            .get(resource_id)
            .cloned()
            .ok_or(RouterError::NoRoute(*resource_id))
    }

    /// Probe a node's `/health` endpoint and update every route pointing at
    /// it with the observed status and latency.
    pub async fn check_node_health(&self, node_id: &NodeId) -> Result<HealthStatus, RouterError> {
        let node = self
            .nodes
            .find_by_id(node_id)
            .await?
            .ok_or(RouterError::NodeOffline(*node_id))?;

        let start = std::time::Instant::now();
        let status = self
            .client
            .get(format!("{}/health", node.endpoint))
            .timeout(self.health_timeout)
            .send()
            .await
            .map(|r| if r.status().is_success() { HealthStatus::Online } else { HealthStatus::Degraded })
            .unwrap_or(HealthStatus::Offline);
        let latency_ms = start.elapsed().as_millis() as u64;

        let mut routes = self.routes.write().await;
        for route in routes.values_mut() {
            if route.node_id == *node_id {
                route.health_status = status;
                route.latency_ms = latency_ms;
                route.last_verified = Utc::now();
            }
        }

        Ok(status)
    }

    /// Forward an invocation to the node that owns `resource_id`, then
    /// record a correlated audit event locally so this node's audit trail
    /// carries the federated call even though the target node is the one
    /// that actually authorized and executed it.
    pub async fn invoke_federated(
        &self,
        resource_id: ResourceId,
        principal_id: PrincipalId,
        self_node_id: NodeId,
        request: InvocationRequest,
    ) -> Result<serde_json::Value, RouterError> {
        let route = self.find_route(&resource_id).await?;
        if route.health_status == HealthStatus::Offline {
            return Err(RouterError::NodeOffline(route.node_id));
        }

        let correlation_id = CorrelationId::new();
        let start = std::time::Instant::now();

        let result = self
            .client
            .post(format!("{}/federation/invoke", route.endpoint))
            .header("x-sark-correlation-id", correlation_id.to_string())
            .json(&serde_json::json!({ "request": request }))
            .send()
            .await;

        let (success, body) = match result {
            Ok(response) if response.status().is_success() => {
                let body = response.json().await.unwrap_or(serde_json::Value::Null);
                (true, body)
            }
            Ok(response) => (false, serde_json::json!({ "status": response.status().as_u16() })),
            Err(e) => (false, serde_json::json!({ "error": e.to_string() })),
        };

        let event = FederatedAuditEvent::new(
            correlation_id,
            self_node_id,
            route.node_id,
            principal_id,
            resource_id,
            success,
            start.elapsed().as_millis() as u64,
            uuid::Uuid::new_v4().to_string(),
        );
        let _ = self.audit.append(event.base).await;

        if success {
            Ok(body)
        } else {
            Err(RouterError::InvocationFailed(body.to_string()))
        }
    }

    /// Correlate this node's local audit events with the federated
    /// counterpart events a peer forwards back, by `correlation_id`.
    pub async fn correlate_audit_events(&self, correlation_id: &CorrelationId) -> Result<Vec<crate::domain::audit::AuditEvent>, RouterError> {
        Ok(self.audit.find_by_correlation_id(correlation_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::{InMemoryAuditRepository, InMemoryFederationNodeRepository};

    fn router() -> FederationRouter {
        FederationRouter::new(
            Arc::new(InMemoryFederationNodeRepository::new()),
            Arc::new(InMemoryAuditRepository::new()),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn find_route_errors_when_unregistered() {
        let router = router();
        let result = router.find_route(&ResourceId::new()).await;
        assert!(matches!(result, Err(RouterError::NoRoute(_))));
    }

    #[tokio::test]
    async fn register_then_find_route_succeeds() {
        let router = router();
        let resource_id = ResourceId::new();
        let entry = RouteEntry {
            resource_id,
            node_id: NodeId::new(),
            endpoint: "https://peer.example".into(),
            last_verified: Utc::now(),
            health_status: HealthStatus::Online,
            latency_ms: 10,
        };
        router.register_route(entry).await;
        let found = router.find_route(&resource_id).await.unwrap();
        assert_eq!(found.resource_id, resource_id);
    }
}
