// SPDX-License-Identifier: AGPL-3.0
//! Canonical audit record. Every terminal branch of the invocation pipeline
//! produces exactly one of these before returning to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::ids::{AuditEventId, CapabilityId, CorrelationId, NodeId, PrincipalId, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuditEventType {
    InvocationSucceeded,
    InvocationFailed,
    AuthenticationFailed,
    AuthorizationDenied,
    InjectionBlocked,
    SecretRedacted,
    FederatedInvoke,
    Custom(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub severity: Severity,
    pub principal_id: Option<PrincipalId>,
    pub principal_email: Option<String>,
    pub resource_id: Option<ResourceId>,
    pub capability_id: Option<CapabilityId>,
    pub decision: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub source_node: Option<NodeId>,
    pub target_node: Option<NodeId>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: String,
    pub duration_ms: u64,
    pub details: HashMap<String, Value>,
    pub siem_forwarded_at: Option<DateTime<Utc>>,
}

pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEvent {
    pub fn builder(event_type: AuditEventType, severity: Severity, request_id: impl Into<String>) -> AuditEventBuilder {
        AuditEventBuilder {
            event: AuditEvent {
                id: AuditEventId::new(),
                timestamp: Utc::now(),
                event_type,
                severity,
                principal_id: None,
                principal_email: None,
                resource_id: None,
                capability_id: None,
                decision: None,
                correlation_id: None,
                source_node: None,
                target_node: None,
                ip: None,
                user_agent: None,
                request_id: request_id.into(),
                duration_ms: 0,
                details: HashMap::new(),
                siem_forwarded_at: None,
            },
        }
    }

    /// Routes to SIEM per the ordering guarantee: high/critical events are
    /// attempted against every sink before the pipeline returns success.
    pub fn requires_siem_forward(&self) -> bool {
        self.severity >= Severity::High
    }
}

impl AuditEventBuilder {
    pub fn principal(mut self, id: PrincipalId, email: Option<String>) -> Self {
        self.event.principal_id = Some(id);
        self.event.principal_email = email;
        self
    }

    pub fn resource(mut self, id: ResourceId) -> Self {
        self.event.resource_id = Some(id);
        self
    }

    pub fn capability(mut self, id: CapabilityId) -> Self {
        self.event.capability_id = Some(id);
        self
    }

    pub fn decision(mut self, decision: impl Into<String>) -> Self {
        self.event.decision = Some(decision.into());
        self
    }

    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.event.correlation_id = Some(id);
        self
    }

    pub fn nodes(mut self, source: Option<NodeId>, target: Option<NodeId>) -> Self {
        self.event.source_node = source;
        self.event.target_node = target;
        self
    }

    pub fn client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.event.ip = ip;
        self.event.user_agent = user_agent;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.event.duration_ms = duration_ms;
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.event.details.insert(key.into(), value);
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}
