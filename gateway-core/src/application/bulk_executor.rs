// SPDX-License-Identifier: AGPL-3.0
//! Batch invocation over [`InvocationPipeline`]: best-effort runs every
//! item independently, transactional requires every item to succeed or
//! none are kept.

use std::sync::Arc;

use crate::domain::bulk::{BulkInvocationRequest, BulkInvocationResult, BulkMode};
use crate::domain::resource::InvocationResult;

use super::invocation_pipeline::{Credential, InvocationPipeline, RequestContext};

pub struct BulkExecutor {
    pipeline: Arc<InvocationPipeline>,
}

impl BulkExecutor {
    pub fn new(pipeline: Arc<InvocationPipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn execute(
        &self,
        credential: Credential,
        request: BulkInvocationRequest,
        ctx: RequestContext,
    ) -> BulkInvocationResult {
        match request.mode {
            BulkMode::BestEffort => self.run_best_effort(credential, request, ctx).await,
            BulkMode::Transactional => self.run_transactional(credential, request, ctx).await,
        }
    }

    /// Each item is authenticated/authorized/invoked independently; one
    /// item's failure has no effect on its siblings.
    async fn run_best_effort(
        &self,
        credential: Credential,
        request: BulkInvocationRequest,
        ctx: RequestContext,
    ) -> BulkInvocationResult {
        let mut results = Vec::with_capacity(request.items.len());
        for item in request.items {
            let item_ctx = RequestContext {
                request_id: crate::domain::ids::RequestId::new(),
                correlation_id: ctx.correlation_id,
                ip: ctx.ip.clone(),
                user_agent: ctx.user_agent.clone(),
            };
            results.push(self.pipeline.invoke(credential.clone(), item, item_ctx).await);
        }
        BulkInvocationResult {
            mode: BulkMode::BestEffort,
            results,
            committed: false,
        }
    }

    /// Runs every item; if any fails the batch reports every item as
    /// failed regardless of its own outcome, modelling a savepoint
    /// rollback one level above storage (the pipeline itself has no
    /// shared transaction to roll back).
    async fn run_transactional(
        &self,
        credential: Credential,
        request: BulkInvocationRequest,
        ctx: RequestContext,
    ) -> BulkInvocationResult {
        let mut results = Vec::with_capacity(request.items.len());
        let mut all_succeeded = true;
        for item in request.items {
            let item_ctx = RequestContext {
                request_id: crate::domain::ids::RequestId::new(),
                correlation_id: ctx.correlation_id,
                ip: ctx.ip.clone(),
                user_agent: ctx.user_agent.clone(),
            };
            let result = self.pipeline.invoke(credential.clone(), item, item_ctx).await;
            if !result.is_success() {
                all_succeeded = false;
            }
            results.push(result);
        }

        if !all_succeeded {
            results = results
                .into_iter()
                .map(|r| match r {
                    InvocationResult::Success { duration_ms, .. } => {
                        InvocationResult::failure("rolled back: batch had a failing item", "BulkRolledBack", duration_ms)
                    }
                    failure => failure,
                })
                .collect();
        }

        BulkInvocationResult {
            mode: BulkMode::Transactional,
            results,
            committed: all_succeeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{CapabilityId, PrincipalId, ResourceId};
    use crate::domain::resource::{Capability, InvocationRequest, Protocol, Resource, Sensitivity};
    use crate::domain::repository::ResourceRepository;
    use crate::infrastructure::policy_client::PolicyClient;
    use crate::infrastructure::repositories::{InMemoryAuditRepository, InMemoryResourceRepository};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct EchoAdapter;

    #[async_trait]
    impl crate::infrastructure::adapters::ProtocolAdapter for EchoAdapter {
        fn protocol_name(&self) -> &'static str {
            "http"
        }

        async fn discover(
            &self,
            _config: &serde_json::Value,
        ) -> Result<Vec<Resource>, crate::infrastructure::adapters::AdapterError> {
            Ok(Vec::new())
        }

        async fn capabilities(
            &self,
            _resource: &Resource,
        ) -> Result<Vec<Capability>, crate::infrastructure::adapters::AdapterError> {
            Ok(Vec::new())
        }

        async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
            InvocationResult::success(request.arguments, 1)
        }

        async fn stream(
            &self,
            request: InvocationRequest,
        ) -> futures::stream::BoxStream<'static, Result<serde_json::Value, crate::infrastructure::adapters::AdapterError>> {
            Box::pin(futures::stream::once(async move { Ok(request.arguments) }))
        }

        async fn health(&self, _resource: &Resource) -> bool {
            true
        }
    }

    async fn build_pipeline() -> (Arc<InvocationPipeline>, CapabilityId) {
        let resources = Arc::new(InMemoryResourceRepository::new());
        let resource = Resource {
            id: ResourceId::new(),
            name: "widgets".into(),
            protocol: Protocol::Http,
            endpoint: "https://backend.example".into(),
            sensitivity: Sensitivity::Low,
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
        };
        let capability = Capability {
            id: CapabilityId::new(),
            resource_id: resource.id,
            name: "echo".into(),
            description: String::new(),
            input_schema: serde_json::json!({}),
            output_schema: serde_json::json!({}),
            sensitivity: Sensitivity::Low,
            metadata: HashMap::new(),
        };
        resources.save(resource).await.unwrap();
        resources.save_capability(capability.clone()).await.unwrap();

        let mut adapters: HashMap<Protocol, Arc<dyn crate::infrastructure::adapters::ProtocolAdapter>> = HashMap::new();
        adapters.insert(Protocol::Http, Arc::new(EchoAdapter));

        let pipeline = InvocationPipeline::new(
            resources,
            PolicyClient::new("http://127.0.0.1:1", std::time::Duration::from_millis(50)),
            Arc::new(InMemoryAuditRepository::new()),
            adapters,
        )
        .with_injection_screen(super::super::invocation_pipeline::InjectionMode::Off, 1.0);

        (Arc::new(pipeline), capability.id)
    }

    fn item(capability_id: CapabilityId, principal_id: PrincipalId) -> InvocationRequest {
        InvocationRequest {
            capability_id,
            principal_id,
            arguments: serde_json::json!({ "x": 1 }),
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn best_effort_runs_every_item_independently() {
        let (pipeline, capability_id) = build_pipeline().await;
        let executor = BulkExecutor::new(pipeline);
        let principal_id = PrincipalId::new();
        let request = BulkInvocationRequest {
            mode: BulkMode::BestEffort,
            items: vec![
                item(capability_id, principal_id),
                item(CapabilityId::new(), principal_id),
            ],
        };
        let result = executor
            .execute(Credential::Session(crate::domain::ids::SessionId::new()), request, RequestContext::new())
            .await;
        assert_eq!(result.results.len(), 2);
        assert!(!result.committed);
    }

    #[tokio::test]
    async fn transactional_reports_all_failed_when_one_fails() {
        let (pipeline, capability_id) = build_pipeline().await;
        let executor = BulkExecutor::new(pipeline);
        let principal_id = PrincipalId::new();
        let request = BulkInvocationRequest {
            mode: BulkMode::Transactional,
            items: vec![
                item(capability_id, principal_id),
                item(CapabilityId::new(), principal_id),
            ],
        };
        let result = executor
            .execute(Credential::Session(crate::domain::ids::SessionId::new()), request, RequestContext::new())
            .await;
        assert!(!result.committed);
        assert_eq!(result.success_count(), 0);
    }
}
