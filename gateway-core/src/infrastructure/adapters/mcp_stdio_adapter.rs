// SPDX-License-Identifier: AGPL-3.0
//! MCP-over-stdio [`ProtocolAdapter`]. Maps `invoke` onto the `tools/call`
//! JSON-RPC method and `capabilities` onto `tools/list`, delegating process
//! lifecycle, health, and resource limits to [`StdioTransport`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};

use crate::domain::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::domain::ids::CapabilityId;
use crate::domain::resource::{Capability, InvocationRequest, InvocationResult, Resource, Sensitivity};
use crate::infrastructure::stdio_transport::{StdioTransport, StdioTransportError};

use super::{AdapterError, ProtocolAdapter};

pub struct McpStdioAdapter {
    transport: Arc<StdioTransport>,
    circuit_breaker: Arc<CircuitBreaker>,
    request_timeout: Duration,
}

impl McpStdioAdapter {
    pub fn new(transport: Arc<StdioTransport>, circuit_breaker_threshold: u32, request_timeout: Duration) -> Self {
        Self {
            circuit_breaker: CircuitBreaker::new(
                "mcp-stdio",
                CircuitBreakerConfig {
                    failure_threshold: circuit_breaker_threshold,
                    ..Default::default()
                },
            ),
            transport,
            request_timeout,
        }
    }

    pub async fn ensure_started(&self) -> Result<(), AdapterError> {
        self.transport
            .start()
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))
    }
}

fn stdio_error_type(e: &StdioTransportError) -> &'static str {
    match e {
        StdioTransportError::RequestTimeout => "TimeoutError",
        StdioTransportError::Cancelled => "CancelledError",
        StdioTransportError::ProcessCrashed(_) => "ProcessCrashedError",
        StdioTransportError::ResourceExceeded(_) => "ResourceExceededError",
        StdioTransportError::NotStarted | StdioTransportError::TransportStopped => "ConnectionError",
        StdioTransportError::ProcessStartFailed(_) => "ConnectionError",
        StdioTransportError::JsonRpcError(_) => "InvocationError",
    }
}

#[async_trait]
impl ProtocolAdapter for McpStdioAdapter {
    fn protocol_name(&self) -> &'static str {
        "mcp"
    }

    async fn discover(&self, _config: &Value) -> Result<Vec<Resource>, AdapterError> {
        Err(AdapterError::Discovery(
            "MCP-stdio resources are configured explicitly; there is no discovery protocol".into(),
        ))
    }

    async fn capabilities(&self, resource: &Resource) -> Result<Vec<Capability>, AdapterError> {
        self.ensure_started().await?;
        let response = self
            .transport
            .send_request("tools/list", json!({}), self.request_timeout)
            .await
            .map_err(|e| AdapterError::Invocation(e.to_string()))?;

        let tools = response
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(tools
            .into_iter()
            .map(|tool| Capability {
                id: CapabilityId::new(),
                resource_id: resource.id,
                name: tool
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input_schema: tool.get("inputSchema").cloned().unwrap_or(Value::Null),
                output_schema: Value::Null,
                sensitivity: Sensitivity::Medium,
                metadata: Default::default(),
            })
            .collect())
    }

    async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        let start = Instant::now();
        if let Err(e) = self.validate(&request) {
            return InvocationResult::failure(e.to_string(), "ValidationError", elapsed_ms(start));
        }
        if let Err(e) = self.ensure_started().await {
            return InvocationResult::failure(e.to_string(), "ConnectionError", elapsed_ms(start));
        }

        let tool_name = request
            .context
            .get("capability_metadata")
            .and_then(|m| m.get("mcp_tool_name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(tool_name) = tool_name else {
            return InvocationResult::failure(
                "capability metadata missing mcp_tool_name",
                "ValidationError",
                elapsed_ms(start),
            );
        };

        let params = json!({ "name": tool_name, "arguments": request.arguments });
        let timeout = self.request_timeout;
        let transport = self.transport.clone();

        let breaker_result = self
            .circuit_breaker
            .call(|| async move { transport.send_request("tools/call", params, timeout).await })
            .await;

        match breaker_result {
            Ok(Ok(result)) => InvocationResult::success(result, elapsed_ms(start)),
            Ok(Err(e)) => InvocationResult::failure(e.to_string(), stdio_error_type(&e), elapsed_ms(start)),
            Err(open) => InvocationResult::failure(open.to_string(), "CircuitOpenError", elapsed_ms(start)),
        }
    }

    async fn stream(&self, request: InvocationRequest) -> BoxStream<'static, Result<Value, AdapterError>> {
        let result = self.invoke(request).await;
        match result {
            InvocationResult::Success { result, .. } => stream::once(async move { Ok(result) }).boxed(),
            InvocationResult::Failure { error, .. } => {
                stream::once(async move { Err(AdapterError::Invocation(error)) }).boxed()
            }
        }
    }

    async fn health(&self, _resource: &Resource) -> bool {
        self.transport.is_running().await
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::PrincipalId;
    use crate::infrastructure::stdio_transport::{HealthConfig, ResourceLimits};
    use std::collections::HashMap;

    fn transport() -> Arc<StdioTransport> {
        StdioTransport::new(
            vec!["cat".to_string()],
            None,
            HashMap::new(),
            ResourceLimits::default(),
            HealthConfig::default(),
            3,
        )
    }

    #[tokio::test]
    async fn invoke_without_tool_name_is_rejected() {
        let adapter = McpStdioAdapter::new(transport(), 5, Duration::from_secs(2));
        let request = InvocationRequest {
            capability_id: CapabilityId::new(),
            principal_id: PrincipalId::new(),
            arguments: json!({}),
            context: HashMap::new(),
        };
        let result = adapter.invoke(request).await;
        assert!(!result.is_success());
        adapter.transport.stop(Duration::from_millis(100)).await;
    }
}
