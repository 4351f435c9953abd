// SPDX-License-Identifier: AGPL-3.0

use reqwest::Client;
use sark_gateway_core::domain::bulk::{BulkInvocationRequest, BulkInvocationResult};
use sark_gateway_core::domain::ids::PrincipalId;
use sark_gateway_core::domain::resource::{InvocationRequest, InvocationResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Client for the Sark gateway's HTTP surface. Holds either a bearer API
/// key or a session cookie jar; never both are required at once.
pub struct GatewayClient {
    base_url: String,
    client: Client,
    api_key: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::builder().cookie_store(true).build().expect("reqwest client builder never fails with these options"),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(GatewayClientError::Rejected { status: status.as_u16(), body })
        }
    }

    /// `POST /auth/login`. The session cookie set by the gateway is kept by
    /// this client's cookie jar for subsequent calls.
    pub async fn login(&self, principal_id: PrincipalId, remember_me: bool) -> Result<serde_json::Value, GatewayClientError> {
        let url = format!("{}/auth/login", self.base_url);
        let response = self
            .authed(self.client.post(&url))
            .json(&serde_json::json!({ "principal_id": principal_id, "remember_me": remember_me }))
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn logout(&self) -> Result<(), GatewayClientError> {
        let url = format!("{}/auth/logout", self.base_url);
        let response = self.authed(self.client.post(&url)).send().await?;
        Self::decode::<serde_json::Value>(response).await.map(|_| ())
    }

    pub async fn status(&self) -> Result<serde_json::Value, GatewayClientError> {
        let url = format!("{}/auth/status", self.base_url);
        let response = self.authed(self.client.get(&url)).send().await?;
        Self::decode(response).await
    }

    /// `POST /invoke`.
    pub async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationResult, GatewayClientError> {
        let url = format!("{}/invoke", self.base_url);
        let response = self.authed(self.client.post(&url)).json(request).send().await?;
        Self::decode(response).await
    }

    /// `POST /bulk`.
    pub async fn bulk(&self, request: &BulkInvocationRequest) -> Result<BulkInvocationResult, GatewayClientError> {
        let url = format!("{}/bulk", self.base_url);
        let response = self.authed(self.client.post(&url)).json(request).send().await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sark_gateway_core::domain::ids::CapabilityId;
    use std::collections::HashMap;

    #[tokio::test]
    async fn invoke_decodes_the_gateway_response() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "success": true,
            "result": {"ok": true},
            "metadata": {},
            "duration_ms": 12
        });
        let mock = server
            .mock("POST", "/invoke")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = GatewayClient::new(server.url()).with_api_key("sark_sk_test_abc_123");
        let request = InvocationRequest {
            capability_id: CapabilityId::new(),
            principal_id: PrincipalId::new(),
            arguments: serde_json::json!({}),
            context: HashMap::new(),
        };
        let result = client.invoke(&request).await.unwrap();
        assert!(result.is_success());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_2xx_response_surfaces_as_rejected() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/invoke").with_status(403).with_body("forbidden").create_async().await;

        let client = GatewayClient::new(server.url());
        let request = InvocationRequest {
            capability_id: CapabilityId::new(),
            principal_id: PrincipalId::new(),
            arguments: serde_json::json!({}),
            context: HashMap::new(),
        };
        let result = client.invoke(&request).await;
        assert!(matches!(result, Err(GatewayClientError::Rejected { status: 403, .. })));
    }
}
