// SPDX-License-Identifier: AGPL-3.0
//! HTTP/REST [`ProtocolAdapter`]. Translates a flat invocation argument map
//! into a path/query/header/body-split `reqwest` request, authenticates it,
//! and runs it through this resource's rate limiter, circuit breaker, and
//! retry policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Method};
use serde_json::Value;

use crate::domain::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::domain::rate_limiter::RateLimiter;
use crate::domain::resource::{Capability, InvocationRequest, InvocationResult, Resource};
use crate::domain::retry::{run_with_retry, Jitter, RetryConfig};

use super::{split_arguments, AdapterError, ProtocolAdapter};

/// Authentication strategy applied to every outbound request for a resource.
#[derive(Debug, Clone)]
pub enum AuthConfig {
    None,
    Bearer { token: String },
    Basic { username: String, password: String },
    ApiKey { header: String, value: String },
    OAuth2ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        scope: Option<String>,
    },
}

impl AuthConfig {
    fn apply(&self, builder: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
        match self {
            AuthConfig::None => builder,
            AuthConfig::Bearer { token } => builder.bearer_auth(token),
            AuthConfig::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            AuthConfig::ApiKey { header, value } => builder.header(header, value),
            AuthConfig::OAuth2ClientCredentials { .. } => {
                if let Some(t) = token {
                    builder.bearer_auth(t)
                } else {
                    builder
                }
            }
        }
    }
}

pub struct HttpAdapter {
    base_url: String,
    client: Client,
    auth: AuthConfig,
    oauth_token: tokio::sync::RwLock<Option<(String, Instant)>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl HttpAdapter {
    pub fn new(
        base_url: impl Into<String>,
        auth: AuthConfig,
        rate_limit_rps: Option<f64>,
        circuit_breaker_threshold: u32,
        request_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            circuit_breaker: CircuitBreaker::new(
                format!("http:{base_url}"),
                CircuitBreakerConfig {
                    failure_threshold: circuit_breaker_threshold,
                    ..Default::default()
                },
            ),
            base_url,
            client: Client::builder()
                .timeout(request_timeout)
                .build()
                .expect("reqwest client builder never fails with these options"),
            auth,
            oauth_token: tokio::sync::RwLock::new(None),
            rate_limiter: rate_limit_rps.map(|rate| RateLimiter::new(rate, None)),
            retry: RetryConfig {
                max_attempts: max_retries.max(1),
                jitter: Jitter::Full,
                ..Default::default()
            },
            request_timeout,
        }
    }

    async fn bearer_token(&self) -> Result<Option<String>, AdapterError> {
        let AuthConfig::OAuth2ClientCredentials {
            token_url,
            client_id,
            client_secret,
            scope,
        } = &self.auth
        else {
            return Ok(None);
        };

        if let Some((token, fetched_at)) = self.oauth_token.read().await.clone() {
            if fetched_at.elapsed() < Duration::from_secs(55 * 60) {
                return Ok(Some(token));
            }
        }

        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if let Some(scope) = scope {
            form.push(("scope", scope.clone()));
        }
        let response = self
            .client
            .post(token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::Invocation(format!("oauth2 token response: {e}")))?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::Invocation("oauth2 response missing access_token".into()))?
            .to_string();
        *self.oauth_token.write().await = Some((token.clone(), Instant::now()));
        Ok(Some(token))
    }

    fn capability_route(capability: &Capability) -> (Method, String) {
        let method = capability
            .metadata
            .get("http_method")
            .and_then(Value::as_str)
            .unwrap_or("GET");
        let path = capability
            .metadata
            .get("http_path")
            .and_then(Value::as_str)
            .unwrap_or("/");
        (
            Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET),
            path.to_string(),
        )
    }

    async fn execute(
        &self,
        method: Method,
        mut path: String,
        arguments: &Value,
    ) -> Result<Value, AdapterError> {
        let split = split_arguments(arguments);
        for (name, value) in &split.path_params {
            path = path.replace(&format!("{{{name}}}"), &value_to_path_segment(value));
        }
        let url = format!("{}{}", self.base_url, path);

        let bearer = self.bearer_token().await?;

        let outcome = run_with_retry(
            &self.retry,
            &tokio_util::sync::CancellationToken::new(),
            |e: &AdapterError| matches!(e, AdapterError::Connection(_) | AdapterError::Timeout)
                || matches!(e, AdapterError::Invocation(m) if m.starts_with("5")),
            || async {
                let mut builder = self.client.request(method.clone(), &url);
                for (k, v) in &split.query_params {
                    builder = builder.query(&[(k.as_str(), value_to_path_segment(v))]);
                }
                for (k, v) in &split.headers {
                    builder = builder.header(k, value_to_path_segment(v));
                }
                if let Some(body) = &split.body {
                    builder = builder.json(body);
                }
                builder = self.auth.apply(builder, bearer.as_deref());

                let response = builder
                    .send()
                    .await
                    .map_err(|e| {
                        if e.is_timeout() {
                            AdapterError::Timeout
                        } else {
                            AdapterError::Connection(e.to_string())
                        }
                    })?;

                let status = response.status();
                if status.is_client_error() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(AdapterError::Invocation(format!("{}: {text}", status.as_u16())));
                }
                if status.is_server_error() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(AdapterError::Invocation(format!("{}: {text}", status.as_u16())));
                }

                match response.json::<Value>().await {
                    Ok(v) => Ok(v),
                    Err(_) => Ok(Value::Null),
                }
            },
        )
        .await;

        outcome.map_err(|e| match e {
            crate::domain::retry::RetryError::Cancelled => AdapterError::Timeout,
            crate::domain::retry::RetryError::Exhausted { last, .. } => last,
        })
    }
}

fn value_to_path_segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ProtocolAdapter for HttpAdapter {
    fn protocol_name(&self) -> &'static str {
        "http"
    }

    async fn discover(&self, _config: &Value) -> Result<Vec<Resource>, AdapterError> {
        Err(AdapterError::Discovery(
            "HTTP discovery requires an OpenAPI spec url; not implemented in this deployment".into(),
        ))
    }

    async fn capabilities(&self, _resource: &Resource) -> Result<Vec<Capability>, AdapterError> {
        Ok(Vec::new())
    }

    async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        let start = Instant::now();
        if let Err(e) = self.validate(&request) {
            return InvocationResult::failure(e.to_string(), "ValidationError", elapsed_ms(start));
        }

        if let Some(limiter) = &self.rate_limiter {
            if limiter
                .acquire(&tokio_util::sync::CancellationToken::new())
                .await
                .is_err()
            {
                return InvocationResult::failure("rate limit wait cancelled", "RateLimitError", elapsed_ms(start));
            }
        }

        let capability_metadata = request
            .context
            .get("capability_metadata")
            .cloned()
            .unwrap_or(Value::Null);
        let method = capability_metadata
            .get("http_method")
            .and_then(Value::as_str)
            .unwrap_or("GET");
        let path = capability_metadata
            .get("http_path")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string();
        let method = Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET);

        let arguments = request.arguments.clone();
        let breaker_result = self
            .circuit_breaker
            .call(|| self.execute(method, path, &arguments))
            .await;

        match breaker_result {
            Ok(Ok(result)) => InvocationResult::success(result, elapsed_ms(start)),
            Ok(Err(e)) => InvocationResult::failure(e.to_string(), error_type_name(&e), elapsed_ms(start)),
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

    async fn health(&self, resource: &Resource) -> bool {
        self.client
            .get(&resource.endpoint)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().as_u16() < 500)
            .unwrap_or(false)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn error_type_name(e: &AdapterError) -> &'static str {
    match e {
        AdapterError::Timeout => "TimeoutError",
        AdapterError::Connection(_) => "ConnectionError",
        AdapterError::Invocation(_) => "InvocationError",
        AdapterError::Validation(_) => "ValidationError",
        AdapterError::Discovery(_) => "DiscoveryError",
        AdapterError::CircuitOpen(_) => "CircuitOpenError",
        AdapterError::Streaming { .. } => "StreamingError",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{CapabilityId, PrincipalId};
    use std::collections::HashMap as StdHashMap;

    fn request(context: StdHashMap<String, Value>) -> InvocationRequest {
        InvocationRequest {
            capability_id: CapabilityId::new(),
            principal_id: PrincipalId::new(),
            arguments: serde_json::json!({ "query_limit": "10", "id": "42" }),
            context,
        }
    }

    #[tokio::test]
    async fn invoke_against_mock_server_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/items/42")
            .match_query(mockito::Matcher::UrlEncoded("limit".into(), "10".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true}"#)
            .create_async()
            .await;

        let adapter = HttpAdapter::new(
            server.url(),
            AuthConfig::None,
            None,
            5,
            Duration::from_secs(5),
            1,
        );

        let mut context = StdHashMap::new();
        context.insert(
            "capability_metadata".to_string(),
            serde_json::json!({ "http_method": "GET", "http_path": "/items/{id}" }),
        );
        let result = adapter.invoke(request(context)).await;
        assert!(result.is_success());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/items/42")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let adapter = HttpAdapter::new(server.url(), AuthConfig::None, None, 5, Duration::from_secs(5), 3);
        let mut context = StdHashMap::new();
        context.insert(
            "capability_metadata".to_string(),
            serde_json::json!({ "http_method": "GET", "http_path": "/items/{id}" }),
        );
        let result = adapter.invoke(request(context)).await;
        assert!(!result.is_success());
        mock.assert_async().await;
    }
}
