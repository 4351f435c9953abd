// SPDX-License-Identifier: AGPL-3.0
//! Backend resources and the capabilities they expose.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::ids::{CapabilityId, PrincipalId, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Grpc,
    Mcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
    Critical,
}

impl Sensitivity {
    /// Decision-cache TTL this sensitivity tier affords a `PolicyClient`
    /// decision: low -> 30 min, medium -> 5 min, high -> 1 min, critical -> 0.
    pub fn cache_ttl(&self) -> Duration {
        match self {
            Sensitivity::Low => Duration::from_secs(30 * 60),
            Sensitivity::Medium => Duration::from_secs(5 * 60),
            Sensitivity::High => Duration::from_secs(60),
            Sensitivity::Critical => Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub protocol: Protocol,
    pub endpoint: String,
    pub sensitivity: Sensitivity,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub id: CapabilityId,
    pub resource_id: ResourceId,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub sensitivity: Sensitivity,
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub capability_id: CapabilityId,
    pub principal_id: PrincipalId,
    pub arguments: Value,
    pub context: HashMap<String, Value>,
}

/// Sum type per the Rust mapping notes: `InvocationResult` is `Success` or
/// `Failure`, never a boolean-plus-optional-fields bag internally, but the
/// wire shape is the flat `{success, result?, error?, metadata, duration_ms}`
/// object callers expect.
#[derive(Debug, Clone)]
pub enum InvocationResult {
    Success {
        result: Value,
        metadata: HashMap<String, Value>,
        duration_ms: u64,
    },
    Failure {
        error: String,
        error_type: String,
        metadata: HashMap<String, Value>,
        duration_ms: u64,
    },
}

impl Serialize for InvocationResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        match self {
            InvocationResult::Success {
                result,
                metadata,
                duration_ms,
            } => {
                map.serialize_entry("success", &true)?;
                map.serialize_entry("result", result)?;
                map.serialize_entry("metadata", metadata)?;
                map.serialize_entry("duration_ms", duration_ms)?;
            }
            InvocationResult::Failure {
                error,
                error_type,
                metadata,
                duration_ms,
            } => {
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
                map.serialize_entry("error_type", error_type)?;
                map.serialize_entry("metadata", metadata)?;
                map.serialize_entry("duration_ms", duration_ms)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for InvocationResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            success: bool,
            #[serde(default)]
            result: Value,
            #[serde(default)]
            error: String,
            #[serde(default)]
            error_type: String,
            #[serde(default)]
            metadata: HashMap<String, Value>,
            duration_ms: u64,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(if raw.success {
            InvocationResult::Success {
                result: raw.result,
                metadata: raw.metadata,
                duration_ms: raw.duration_ms,
            }
        } else {
            InvocationResult::Failure {
                error: raw.error,
                error_type: raw.error_type,
                metadata: raw.metadata,
                duration_ms: raw.duration_ms,
            }
        })
    }
}

impl InvocationResult {
    pub fn success(result: Value, duration_ms: u64) -> Self {
        InvocationResult::Success {
            result,
            metadata: HashMap::new(),
            duration_ms,
        }
    }

    pub fn failure(error: impl Into<String>, error_type: impl Into<String>, duration_ms: u64) -> Self {
        InvocationResult::Failure {
            error: error.into(),
            error_type: error_type.into(),
            metadata: HashMap::new(),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResult::Success { .. })
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            InvocationResult::Success { duration_ms, .. } => *duration_ms,
            InvocationResult::Failure { duration_ms, .. } => *duration_ms,
        }
    }
}
