// SPDX-License-Identifier: AGPL-3.0
//! Authorization input/decision shapes evaluated by the external policy
//! engine ([`crate::infrastructure::policy_client`]), plus the violation
//! taxonomy surfaced in audit details and `InvocationResult.error_type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::domain::ids::{CapabilityId, PrincipalId, ResourceId};

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum PolicyViolation {
    #[error("tool '{tool_name}' is not in the allowed set {allowed_tools:?}")]
    ToolNotAllowed {
        tool_name: String,
        allowed_tools: Vec<String>,
    },
    #[error("tool '{tool_name}' is explicitly denied")]
    ToolExplicitlyDenied { tool_name: String },
    #[error("rate limit exceeded for '{key}'")]
    RateLimitExceeded { key: String },
    #[error("path '{path}' outside allowed boundary {allowed_paths:?}")]
    PathOutsideBoundary {
        path: PathBuf,
        allowed_paths: Vec<PathBuf>,
    },
    #[error("path traversal attempt in '{path}'")]
    PathTraversalAttempt { path: PathBuf },
    #[error("domain '{domain}' not in allowlist {allowed_domains:?}")]
    DomainNotAllowed {
        domain: String,
        allowed_domains: Vec<String>,
    },
    #[error("missing required argument '{name}'")]
    MissingRequiredArgument { name: String },
    #[error("invocation exceeded timeout of {timeout_ms}ms")]
    TimeoutExceeded { timeout_ms: u64 },
    #[error("insufficient_permissions")]
    InsufficientPermissions,
    #[error("policy evaluation error")]
    EvaluationError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationInput {
    pub principal_id: PrincipalId,
    pub action: String,
    pub resource_id: ResourceId,
    pub capability_id: CapabilityId,
    pub tool: String,
    pub context: HashMap<String, Value>,
}

impl AuthorizationInput {
    /// Stable hash used as the decision-cache key.
    pub fn cache_key(&self) -> String {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.principal_id.as_uuid().hash(&mut hasher);
        self.action.hash(&mut hasher);
        self.resource_id.as_uuid().hash(&mut hasher);
        self.capability_id.as_uuid().hash(&mut hasher);
        self.tool.hash(&mut hasher);
        // context is intentionally excluded: arguments vary per call but
        // the authorization decision is keyed on the invokable action.
        format!("{:016x}", hasher.finish())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub allow: bool,
    pub reason: String,
    pub filtered_parameters: Option<Value>,
    pub policies_evaluated: Vec<String>,
    pub violations: Vec<PolicyViolation>,
    pub cache_ttl_seconds: u64,
}

impl AuthorizationDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: reason.into(),
            filtered_parameters: None,
            policies_evaluated: Vec::new(),
            violations: Vec::new(),
            cache_ttl_seconds: 0,
        }
    }

    pub fn fail_closed() -> Self {
        Self::deny("policy evaluation error")
    }

    pub fn allow(reason: impl Into<String>, cache_ttl_seconds: u64) -> Self {
        Self {
            allow: true,
            reason: reason.into(),
            filtered_parameters: None,
            policies_evaluated: Vec::new(),
            violations: Vec::new(),
            cache_ttl_seconds,
        }
    }
}
