// SPDX-License-Identifier: AGPL-3.0
//! Axum HTTP surface: auth, invocation, bulk, federation wire, and health.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::application::auth_service::AuthService;
use crate::application::bulk_executor::BulkExecutor;
use crate::application::invocation_pipeline::{Credential, InvocationPipeline, RequestContext};
use crate::domain::bulk::BulkInvocationRequest;
use crate::domain::ids::{NodeId, PrincipalId, ResourceId, SessionId};
use crate::domain::resource::InvocationRequest;
use crate::infrastructure::federation::router::FederationRouter;
use crate::infrastructure::federation::trust::FederationTrust;

pub struct AppState {
    pub pipeline: Arc<InvocationPipeline>,
    pub auth: Arc<AuthService>,
    pub bulk: Arc<BulkExecutor>,
    pub federation_trust: Option<Arc<FederationTrust>>,
    pub federation_router: Option<Arc<FederationRouter>>,
    pub self_node_id: NodeId,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/logout/all", post(logout_all))
        .route("/auth/status", get(status))
        .route("/invoke", post(invoke))
        .route("/invoke/stream", post(invoke_stream))
        .route("/bulk", post(bulk))
        .route("/federation/trust/establish", post(federation_trust_establish))
        .route("/federation/invoke", post(federation_invoke))
        .route("/federation/resources/{id}", get(federation_resource_probe))
        .route("/health", get(health))
        .with_state(state)
}

fn extract_credential(headers: &axum::http::HeaderMap, session_cookie: Option<&str>) -> Option<Credential> {
    if let Some(bearer) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(Credential::ApiKey(bearer.to_string()));
    }
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(Credential::ApiKey(key.to_string()));
    }
    if let Some(cookie) = session_cookie {
        if let Ok(id) = uuid::Uuid::parse_str(cookie) {
            return Some(Credential::Session(SessionId(id)));
        }
    }
    None
}

fn session_cookie(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|kv| {
                let mut parts = kv.trim().splitn(2, '=');
                match (parts.next(), parts.next()) {
                    (Some("session_id"), Some(value)) => Some(value.to_string()),
                    _ => None,
                }
            })
        })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub principal_id: PrincipalId,
    pub remember_me: bool,
}

async fn login(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> impl IntoResponse {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match state.auth.login(payload.principal_id, ip, user_agent, payload.remember_me).await {
        Ok(session) => Json(json!({
            "session_id": session.id.0.to_string(),
            "principal_id": session.principal_id.0.to_string(),
            "expires_at": session.expires_at,
        }))
        .into_response(),
        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn logout(State(state): State<Arc<AppState>>, headers: axum::http::HeaderMap) -> impl IntoResponse {
    let Some(cookie) = session_cookie(&headers) else {
        return (axum::http::StatusCode::BAD_REQUEST, Json(json!({ "error": "missing session_id cookie" }))).into_response();
    };
    let Ok(uuid) = uuid::Uuid::parse_str(&cookie) else {
        return (axum::http::StatusCode::BAD_REQUEST, Json(json!({ "error": "malformed session_id" }))).into_response();
    };
    match state.auth.logout(&SessionId(uuid)).await {
        Ok(()) => Json(json!({ "status": "logged_out" })).into_response(),
        Err(e) => (axum::http::StatusCode::UNAUTHORIZED, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogoutAllRequest {
    pub principal_id: PrincipalId,
}

async fn logout_all(State(state): State<Arc<AppState>>, Json(payload): Json<LogoutAllRequest>) -> impl IntoResponse {
    match state.auth.logout_all(&payload.principal_id).await {
        Ok(revoked) => Json(json!({ "revoked_count": revoked })).into_response(),
        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn status(State(state): State<Arc<AppState>>, headers: axum::http::HeaderMap) -> impl IntoResponse {
    let Some(cookie) = session_cookie(&headers) else {
        return Json(json!({ "authenticated": false }));
    };
    let Ok(uuid) = uuid::Uuid::parse_str(&cookie) else {
        return Json(json!({ "authenticated": false }));
    };
    match state.auth.status(&SessionId(uuid)).await {
        Ok(session) => Json(json!({
            "authenticated": true,
            "principal_id": session.principal_id.0.to_string(),
            "expires_at": session.expires_at,
        })),
        Err(_) => Json(json!({ "authenticated": false })),
    }
}

async fn invoke(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(request): Json<InvocationRequest>,
) -> impl IntoResponse {
    let cookie = session_cookie(&headers);
    let Some(credential) = extract_credential(&headers, cookie.as_deref()) else {
        return (axum::http::StatusCode::UNAUTHORIZED, Json(json!({ "error": "no credential presented" }))).into_response();
    };
    let ctx = RequestContext::new();
    let result = state.pipeline.invoke(credential, request, ctx).await;
    Json(result).into_response()
}

/// A single SSE event carrying the final invocation result. The pipeline
/// evaluates policy once per request, not per chunk, so this does not
/// stream partial adapter output — true chunked streaming would need
/// per-chunk policy/audit semantics the pipeline does not define.
async fn invoke_stream(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(request): Json<InvocationRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let cookie = session_cookie(&headers);
    let credential = extract_credential(&headers, cookie.as_deref());
    let event = match credential {
        Some(credential) => {
            let result = state.pipeline.invoke(credential, request, RequestContext::new()).await;
            Event::default().json_data(&result).unwrap_or_else(|_| Event::default().data("serialization_error"))
        }
        None => Event::default().event("error").data("no credential presented"),
    };
    Sse::new(stream::once(async move { Ok(event) })).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

async fn bulk(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(request): Json<BulkInvocationRequest>,
) -> impl IntoResponse {
    let cookie = session_cookie(&headers);
    let Some(credential) = extract_credential(&headers, cookie.as_deref()) else {
        return (axum::http::StatusCode::UNAUTHORIZED, Json(json!({ "error": "no credential presented" }))).into_response();
    };
    let result = state.bulk.execute(credential, request, RequestContext::new()).await;
    Json(result).into_response()
}

#[derive(Debug, Deserialize)]
pub struct TrustEstablishRequest {
    pub node_id: NodeId,
    pub name: String,
    pub endpoint: String,
    pub client_cert: String,
    pub challenge: Option<String>,
    pub rate_limit_per_hour: u32,
}

#[derive(Debug, Serialize)]
pub struct TrustEstablishmentResponse {
    pub node_id: String,
    pub trusted_since: chrono::DateTime<chrono::Utc>,
}

async fn federation_trust_establish(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TrustEstablishRequest>,
) -> impl IntoResponse {
    let Some(trust) = &state.federation_trust else {
        return (axum::http::StatusCode::NOT_IMPLEMENTED, Json(json!({ "error": "federation not configured" }))).into_response();
    };
    match trust
        .establish_trust(
            payload.node_id,
            payload.name,
            payload.endpoint,
            payload.client_cert,
            payload.challenge,
            payload.rate_limit_per_hour,
        )
        .await
    {
        Ok(node) => Json(TrustEstablishmentResponse {
            node_id: node.node_id.0.to_string(),
            trusted_since: node.trusted_since,
        })
        .into_response(),
        Err(e) => (axum::http::StatusCode::FORBIDDEN, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct FederatedInvokeRequest {
    pub resource_id: ResourceId,
    pub capability_id: crate::domain::ids::CapabilityId,
    pub principal_id: PrincipalId,
    pub arguments: serde_json::Value,
    pub context: std::collections::HashMap<String, serde_json::Value>,
}

async fn federation_invoke(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FederatedInvokeRequest>,
) -> impl IntoResponse {
    let Some(router) = &state.federation_router else {
        return (axum::http::StatusCode::NOT_IMPLEMENTED, Json(json!({ "error": "federation not configured" }))).into_response();
    };
    let request = InvocationRequest {
        capability_id: payload.capability_id,
        principal_id: payload.principal_id,
        arguments: payload.arguments,
        context: payload.context,
    };
    match router
        .invoke_federated(payload.resource_id, payload.principal_id, state.self_node_id, request)
        .await
    {
        Ok(body) => Json(body).into_response(),
        Err(e) => (axum::http::StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn federation_resource_probe(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(router) = &state.federation_router else {
        return (axum::http::StatusCode::NOT_IMPLEMENTED, Json(json!({ "error": "federation not configured" }))).into_response();
    };
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return (axum::http::StatusCode::BAD_REQUEST, Json(json!({ "error": "malformed resource id" }))).into_response();
    };
    match router.find_route(&ResourceId(uuid)).await {
        Ok(route) => Json(route).into_response(),
        Err(e) => (axum::http::StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}
