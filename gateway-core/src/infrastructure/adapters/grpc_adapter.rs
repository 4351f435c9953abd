// SPDX-License-Identifier: AGPL-3.0
//! gRPC [`ProtocolAdapter`] sketch.
//!
//! Full protobuf support needs generated client stubs per backend service,
//! which this gateway cannot know ahead of time. Instead this adapter opens
//! a [`tonic`] channel and issues unary calls with a JSON-passthrough codec:
//! capability metadata carries `grpc_service`/`grpc_method`, and invocation
//! arguments are forwarded as the request body for any backend built with a
//! JSON-transcoding unary handler (the common shape for internal admin and
//! policy-plane services). Binary protobuf backends need a generated adapter
//! registered outside this framework.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Buf, BufMut};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use crate::domain::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::domain::rate_limiter::RateLimiter;
use crate::domain::resource::{Capability, InvocationRequest, InvocationResult, Resource};
use crate::domain::retry::{run_with_retry, Jitter, RetryConfig};

use super::{AdapterError, ProtocolAdapter};

#[derive(Clone, Default)]
struct JsonCodec;

impl Codec for JsonCodec {
    type Encode = Value;
    type Decode = Value;
    type Encoder = JsonCodec;
    type Decoder = JsonCodec;

    fn encoder(&mut self) -> Self::Encoder {
        JsonCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonCodec
    }
}

impl Encoder for JsonCodec {
    type Item = Value;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        let bytes = serde_json::to_vec(&item).map_err(|e| Status::internal(e.to_string()))?;
        dst.put_slice(&bytes);
        Ok(())
    }
}

impl Decoder for JsonCodec {
    type Item = Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        if src.remaining() == 0 {
            return Ok(None);
        }
        let mut buf = vec![0u8; src.remaining()];
        src.copy_to_slice(&mut buf);
        let value = serde_json::from_slice(&buf).map_err(|e| Status::internal(e.to_string()))?;
        Ok(Some(value))
    }
}

pub struct GrpcAdapter {
    channel: Channel,
    circuit_breaker: Arc<CircuitBreaker>,
    rate_limiter: Option<Arc<RateLimiter>>,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl GrpcAdapter {
    pub async fn connect(
        endpoint: &str,
        rate_limit_rps: Option<f64>,
        circuit_breaker_threshold: u32,
        call_timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, AdapterError> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| AdapterError::Connection(e.to_string()))?
            .connect()
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        Ok(Self {
            channel,
            circuit_breaker: CircuitBreaker::new(
                format!("grpc:{endpoint}"),
                CircuitBreakerConfig {
                    failure_threshold: circuit_breaker_threshold,
                    ..Default::default()
                },
            ),
            rate_limiter: rate_limit_rps.map(|rate| RateLimiter::new(rate, None)),
            retry: RetryConfig {
                max_attempts: max_retries.max(1),
                jitter: Jitter::Full,
                ..Default::default()
            },
            call_timeout,
        })
    }

    async fn call_unary(&self, path: &str, body: Value) -> Result<Value, AdapterError> {
        let path: http::uri::PathAndQuery = path
            .parse()
            .map_err(|_| AdapterError::Invocation(format!("invalid grpc path {path}")))?;

        let outcome = run_with_retry(
            &self.retry,
            &tokio_util::sync::CancellationToken::new(),
            is_retryable_status,
            || async {
                let mut client = tonic::client::Grpc::new(self.channel.clone());
                client.ready().await.map_err(|e| Status::unavailable(e.to_string()))?;
                let request = Request::new(body.clone());
                let response = tokio::time::timeout(
                    self.call_timeout,
                    client.unary(request, path.clone(), JsonCodec),
                )
                .await
                .map_err(|_| Status::deadline_exceeded("grpc call timed out"))??;
                Ok::<Value, Status>(response.into_inner())
            },
        )
        .await;

        outcome.map_err(|e| match e {
            crate::domain::retry::RetryError::Cancelled => AdapterError::Timeout,
            crate::domain::retry::RetryError::Exhausted { last, .. } => status_to_adapter_error(last),
        })
    }
}

fn is_retryable_status(status: &Status) -> bool {
    matches!(status.code(), tonic::Code::Unavailable | tonic::Code::DeadlineExceeded)
}

fn status_to_adapter_error(status: Status) -> AdapterError {
    match status.code() {
        tonic::Code::DeadlineExceeded => AdapterError::Timeout,
        tonic::Code::Unavailable => AdapterError::Connection(status.message().to_string()),
        _ => AdapterError::Invocation(format!("{}: {}", status.code(), status.message())),
    }
}

#[async_trait]
impl ProtocolAdapter for GrpcAdapter {
    fn protocol_name(&self) -> &'static str {
        "grpc"
    }

    async fn discover(&self, _config: &Value) -> Result<Vec<Resource>, AdapterError> {
        Err(AdapterError::Discovery(
            "gRPC discovery requires server reflection, which this sketch does not implement".into(),
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
        let service = capability_metadata.get("grpc_service").and_then(Value::as_str);
        let method = capability_metadata.get("grpc_method").and_then(Value::as_str);
        let (Some(service), Some(method)) = (service, method) else {
            return InvocationResult::failure(
                "capability metadata missing grpc_service/grpc_method",
                "ValidationError",
                elapsed_ms(start),
            );
        };
        let path = format!("/{service}/{method}");
        let arguments = request.arguments.clone();

        let breaker_result = self.circuit_breaker.call(|| self.call_unary(&path, arguments)).await;

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

    async fn health(&self, _resource: &Resource) -> bool {
        let mut client = tonic::client::Grpc::new(self.channel.clone());
        client.ready().await.is_ok()
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

    #[test]
    fn only_unavailable_and_deadline_exceeded_are_retryable() {
        assert!(is_retryable_status(&Status::unavailable("down")));
        assert!(is_retryable_status(&Status::deadline_exceeded("slow")));
        assert!(!is_retryable_status(&Status::invalid_argument("bad")));
        assert!(!is_retryable_status(&Status::permission_denied("no")));
    }
}
