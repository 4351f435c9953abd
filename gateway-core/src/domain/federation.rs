// SPDX-License-Identifier: AGPL-3.0
//! Federation peer identity, routing cache entries, and the audit shape
//! cross-node invocations must carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::audit::{AuditEvent, AuditEventType, Severity};
use crate::domain::ids::{CorrelationId, NodeId, PrincipalId, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Trusted,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationNode {
    pub node_id: NodeId,
    pub name: String,
    pub endpoint: String,
    pub trust_anchor_cert: String,
    pub enabled: bool,
    pub rate_limit_per_hour: u32,
    pub trusted_since: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
}

impl FederationNode {
    /// Endpoint must be https; invariant enforced at construction, not
    /// just at the boundary, so a malformed node can never round-trip
    /// through the store.
    pub fn validate_endpoint(&self) -> Result<(), String> {
        if self.endpoint.starts_with("https://") {
            Ok(())
        } else {
            Err(format!("federation endpoint '{}' is not https", self.endpoint))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Online,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub resource_id: ResourceId,
    pub node_id: NodeId,
    pub endpoint: String,
    pub last_verified: DateTime<Utc>,
    pub health_status: HealthStatus,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedAuditEvent {
    pub base: AuditEvent,
    pub correlation_id: CorrelationId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
}

impl FederatedAuditEvent {
    pub fn new(
        correlation_id: CorrelationId,
        source_node_id: NodeId,
        target_node_id: NodeId,
        principal_id: PrincipalId,
        resource_id: ResourceId,
        success: bool,
        duration_ms: u64,
        request_id: impl Into<String>,
    ) -> Self {
        let severity = if success { Severity::Low } else { Severity::High };
        let base = AuditEvent::builder(AuditEventType::FederatedInvoke, severity, request_id)
            .principal(principal_id, None)
            .resource(resource_id)
            .correlation_id(correlation_id)
            .nodes(Some(source_node_id), Some(target_node_id))
            .duration_ms(duration_ms)
            .detail("action", Value::String("invoke".into()))
            .detail("success", Value::Bool(success))
            .build();
        Self {
            base,
            correlation_id,
            source_node_id,
            target_node_id,
        }
    }
}
