// SPDX-License-Identifier: AGPL-3.0
//! Protocol adapter framework: one [`ProtocolAdapter`] implementation per
//! backend protocol (HTTP, gRPC, MCP-over-stdio), each composing the same
//! `RateLimiter -> CircuitBreaker -> RetryPolicy` stack around a
//! protocol-specific send so the invocation pipeline never branches on
//! protocol.

pub mod grpc_adapter;
pub mod http_adapter;
pub mod mcp_stdio_adapter;

pub use grpc_adapter::GrpcAdapter;
pub use http_adapter::HttpAdapter;
pub use mcp_stdio_adapter::McpStdioAdapter;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::resource::{Capability, InvocationRequest, InvocationResult, Resource};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("circuit breaker open for resource {0}")]
    CircuitOpen(String),
    #[error("invocation failed: {0}")]
    Invocation(String),
    #[error("request timed out")]
    Timeout,
    #[error("streaming failed after {chunks_received} chunks: {message}")]
    Streaming { chunks_received: u64, message: String },
    #[error("connection error: {0}")]
    Connection(String),
}

/// Contract every protocol adapter implements. `discover`/`capabilities` map
/// a backend onto the gateway's [`Resource`]/[`Capability`] model;
/// `validate`/`invoke`/`stream` carry a single request through; `health`
/// reports liveness for the federation router and operator dashboards.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn protocol_name(&self) -> &'static str;

    async fn discover(&self, config: &serde_json::Value) -> Result<Vec<Resource>, AdapterError>;

    async fn capabilities(&self, resource: &Resource) -> Result<Vec<Capability>, AdapterError>;

    fn validate(&self, request: &InvocationRequest) -> Result<(), AdapterError> {
        if request.capability_id.as_uuid().is_nil() {
            return Err(AdapterError::Validation("capability_id is required".into()));
        }
        if !request.arguments.is_object() && !request.arguments.is_null() {
            return Err(AdapterError::Validation("arguments must be an object".into()));
        }
        Ok(())
    }

    async fn invoke(&self, request: InvocationRequest) -> InvocationResult;

    /// Streaming invocation. Adapters that don't support streaming return a
    /// single-item stream carrying the non-streaming result.
    async fn stream(
        &self,
        request: InvocationRequest,
    ) -> BoxStream<'static, Result<serde_json::Value, AdapterError>>;

    async fn health(&self, resource: &Resource) -> bool;
}

/// Splits flat invocation arguments into HTTP request components using the
/// `query_*` / `header_*` / `body` / bare-path-param prefixing convention.
pub(crate) struct SplitArguments {
    pub path_params: serde_json::Map<String, serde_json::Value>,
    pub query_params: serde_json::Map<String, serde_json::Value>,
    pub headers: serde_json::Map<String, serde_json::Value>,
    pub body: Option<serde_json::Value>,
}

pub(crate) fn split_arguments(arguments: &serde_json::Value) -> SplitArguments {
    let mut path_params = serde_json::Map::new();
    let mut query_params = serde_json::Map::new();
    let mut headers = serde_json::Map::new();
    let mut body = None;

    if let Some(map) = arguments.as_object() {
        for (k, v) in map {
            if let Some(stripped) = k.strip_prefix("query_") {
                query_params.insert(stripped.to_string(), v.clone());
            } else if let Some(stripped) = k.strip_prefix("header_") {
                headers.insert(stripped.to_string(), v.clone());
            } else if k == "body" {
                body = Some(v.clone());
            } else {
                path_params.insert(k.clone(), v.clone());
            }
        }
    }

    SplitArguments {
        path_params,
        query_params,
        headers,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_arguments_buckets_by_prefix() {
        let args = json!({
            "user_id": "123",
            "query_limit": "10",
            "header_x-trace": "abc",
            "body": {"name": "alice"},
        });
        let split = split_arguments(&args);
        assert_eq!(split.path_params.get("user_id"), Some(&json!("123")));
        assert_eq!(split.query_params.get("limit"), Some(&json!("10")));
        assert_eq!(split.headers.get("x-trace"), Some(&json!("abc")));
        assert_eq!(split.body, Some(json!({"name": "alice"})));
    }
}
