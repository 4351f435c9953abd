// SPDX-License-Identifier: AGPL-3.0
//! RPC client for the external policy engine (OPA-compatible decision
//! endpoint). Caches decisions by [`AuthorizationInput::cache_key`] for the
//! TTL the matched resource's [`Sensitivity`] affords, and fails closed on
//! any transport error, non-2xx response, or timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;

use crate::domain::policy::{AuthorizationDecision, AuthorizationInput};
use crate::domain::resource::Sensitivity;

struct CachedDecision {
    decision: AuthorizationDecision,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct RawOpaResponse {
    result: AuthorizationDecision,
}

pub struct PolicyClient {
    client: Client,
    decision_url: String,
    batch_url: String,
    timeout: Duration,
    cache: Mutex<HashMap<String, CachedDecision>>,
}

impl PolicyClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Arc<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Arc::new(Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client builder never fails with these options"),
            decision_url: format!("{base_url}/v1/data/sark/authz"),
            batch_url: format!("{base_url}/v1/data/sark/authz/batch"),
            timeout,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Evaluate one authorization input, consulting and populating the
    /// decision cache. Any failure (timeout, connection, non-2xx, malformed
    /// body) returns [`AuthorizationDecision::fail_closed`] rather than
    /// propagating an error — a broken policy engine must never fail open.
    pub async fn evaluate(&self, input: &AuthorizationInput, sensitivity: Sensitivity) -> AuthorizationDecision {
        let key = input.cache_key();
        if let Some(cached) = self.cache.lock().get(&key) {
            if cached.expires_at > Instant::now() {
                return cached.decision.clone();
            }
        }

        let decision = match self.call_engine(input).await {
            Ok(d) => d,
            Err(_) => AuthorizationDecision::fail_closed(),
        };

        let ttl = sensitivity.cache_ttl().min(Duration::from_secs(decision.cache_ttl_seconds));
        if decision.allow && !ttl.is_zero() {
            self.cache.lock().insert(
                key,
                CachedDecision {
                    decision: decision.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }

        decision
    }

    /// Evaluate a batch of inputs. Each item's decision is independent: a
    /// malformed or missing entry in the engine's response denies only that
    /// item rather than the whole batch.
    pub async fn evaluate_batch(
        &self,
        inputs: &[(AuthorizationInput, Sensitivity)],
    ) -> Vec<AuthorizationDecision> {
        if inputs.is_empty() {
            return Vec::new();
        }

        let payload = serde_json::json!({
            "input": inputs.iter().map(|(i, _)| serde_json::json!({
                "principal_id": i.principal_id,
                "action": i.action,
                "resource_id": i.resource_id,
                "capability_id": i.capability_id,
                "tool": i.tool,
                "context": i.context,
            })).collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(&self.batch_url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await;

        let decisions: Option<Vec<AuthorizationDecision>> = match response {
            Ok(r) if r.status().is_success() => r
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("result").cloned())
                .and_then(|v| serde_json::from_value(v).ok()),
            _ => None,
        };

        match decisions {
            Some(mut decisions) if decisions.len() == inputs.len() => {
                for ((input, sensitivity), decision) in inputs.iter().zip(decisions.iter()) {
                    let ttl = sensitivity.cache_ttl().min(Duration::from_secs(decision.cache_ttl_seconds));
                    if decision.allow && !ttl.is_zero() {
                        self.cache.lock().insert(
                            input.cache_key(),
                            CachedDecision {
                                decision: decision.clone(),
                                expires_at: Instant::now() + ttl,
                            },
                        );
                    }
                }
                decisions.truncate(inputs.len());
                decisions
            }
            _ => inputs.iter().map(|_| AuthorizationDecision::fail_closed()).collect(),
        }
    }

    async fn call_engine(&self, input: &AuthorizationInput) -> anyhow::Result<AuthorizationDecision> {
        let response = self
            .client
            .post(&self.decision_url)
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("policy engine returned {}", response.status());
        }

        let parsed: RawOpaResponse = response.json().await?;
        Ok(parsed.result)
    }

    pub fn invalidate(&self, input: &AuthorizationInput) {
        self.cache.lock().remove(&input.cache_key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{CapabilityId, PrincipalId, ResourceId};

    fn input() -> AuthorizationInput {
        AuthorizationInput {
            principal_id: PrincipalId::new(),
            action: "invoke".into(),
            resource_id: ResourceId::new(),
            capability_id: CapabilityId::new(),
            tool: "read_file".into(),
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn unreachable_engine_fails_closed() {
        let client = PolicyClient::new("http://127.0.0.1:1", Duration::from_millis(100));
        let decision = client.evaluate(&input(), Sensitivity::Low).await;
        assert!(!decision.allow);
    }

    #[tokio::test]
    async fn allow_decision_is_cached_for_sensitivity_ttl() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/data/sark/authz")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result": {"allow": true, "reason": "ok", "filtered_parameters": null, "policies_evaluated": [], "violations": [], "cache_ttl_seconds": 3600}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = PolicyClient::new(server.url(), Duration::from_secs(5));
        let input = input();
        let first = client.evaluate(&input, Sensitivity::Low).await;
        let second = client.evaluate(&input, Sensitivity::Low).await;
        assert!(first.allow);
        assert!(second.allow);
    }

    #[tokio::test]
    async fn critical_sensitivity_never_caches() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/data/sark/authz")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result": {"allow": true, "reason": "ok", "filtered_parameters": null, "policies_evaluated": [], "violations": [], "cache_ttl_seconds": 3600}}"#)
            .expect(2)
            .create_async()
            .await;

        let client = PolicyClient::new(server.url(), Duration::from_secs(5));
        let input = input();
        client.evaluate(&input, Sensitivity::Critical).await;
        client.evaluate(&input, Sensitivity::Critical).await;
    }
}
