// SPDX-License-Identifier: AGPL-3.0
//! `gateway serve` — builds every component the spec wires into the
//! invocation pipeline, then runs the HTTP API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use sark_gateway_core::application::{AuthService, BulkExecutor, InvocationPipeline};
use sark_gateway_core::config::GatewayConfig;
use sark_gateway_core::domain::ids::NodeId;
use sark_gateway_core::domain::repository::{
    ApiKeyRepository, AuditRepository, FederationNodeRepository, ResourceRepository, SessionRepository,
};
use sark_gateway_core::infrastructure::api_key_store::ApiKeyStore;
use sark_gateway_core::infrastructure::federation::router::FederationRouter;
use sark_gateway_core::infrastructure::federation::trust::FederationTrust;
use sark_gateway_core::infrastructure::policy_client::PolicyClient;
use sark_gateway_core::infrastructure::repositories::{
    InMemoryApiKeyRepository, InMemoryAuditRepository, InMemoryFederationNodeRepository, InMemoryResourceRepository,
    InMemorySessionRepository, PostgresApiKeyRepository, PostgresAuditRepository, PostgresFederationNodeRepository,
    PostgresResourceRepository, PostgresSessionRepository,
};
use sark_gateway_core::infrastructure::session_store::SessionStore;
use sark_gateway_core::presentation::api::{app, AppState};

/// Repositories backing one invocation of `gateway serve`, either
/// in-memory (`--no-db`) or Postgres-backed.
struct Repositories {
    sessions: Arc<dyn SessionRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
    audit: Arc<dyn AuditRepository>,
    federation_nodes: Arc<dyn FederationNodeRepository>,
    resources: Arc<dyn ResourceRepository>,
}

async fn build_repositories(config: &GatewayConfig, no_db: bool) -> Result<Repositories> {
    if no_db {
        info!("running with in-memory repositories (--no-db)");
        return Ok(Repositories {
            sessions: Arc::new(InMemorySessionRepository::new()),
            api_keys: Arc::new(InMemoryApiKeyRepository::new()),
            audit: Arc::new(InMemoryAuditRepository::new()),
            federation_nodes: Arc::new(InMemoryFederationNodeRepository::new()),
            resources: Arc::new(InMemoryResourceRepository::new()),
        });
    }

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(Repositories {
        sessions: Arc::new(PostgresSessionRepository::new(pool.clone())),
        api_keys: Arc::new(PostgresApiKeyRepository::new(pool.clone())),
        audit: Arc::new(PostgresAuditRepository::new(pool.clone())),
        federation_nodes: Arc::new(PostgresFederationNodeRepository::new(pool.clone())),
        resources: Arc::new(PostgresResourceRepository::new(pool)),
    })
}

pub async fn run(no_db: bool) -> Result<()> {
    let config = GatewayConfig::from_env();
    let repos = build_repositories(&config, no_db).await?;

    let policy = PolicyClient::new(config.policy_engine_url.clone(), Duration::from_secs(5));
    let sessions = Arc::new(SessionStore::new(
        repos.sessions,
        config.session_timeout(),
        config.remember_me_multiplier,
    ));
    let api_keys = Arc::new(ApiKeyStore::new(repos.api_keys, "sark-gateway", "production"));

    let pipeline = Arc::new(
        InvocationPipeline::new(repos.resources, policy, repos.audit.clone(), HashMap::new())
            .with_sessions(sessions.clone())
            .with_api_keys(api_keys.clone()),
    );
    let auth = Arc::new(AuthService::new(sessions, repos.audit.clone()));
    let bulk = Arc::new(BulkExecutor::new(pipeline.clone()));

    let self_node_id = NodeId::new();
    let federation_trust = Arc::new(FederationTrust::new(repos.federation_nodes.clone()));
    let federation_router = Arc::new(FederationRouter::new(
        repos.federation_nodes,
        repos.audit,
        Duration::from_secs(config.federation.health_timeout_s),
    )?);

    let state = Arc::new(AppState {
        pipeline,
        auth,
        bulk,
        federation_trust: Some(federation_trust),
        federation_router: Some(federation_router),
        self_node_id,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    println!("{} listening on {}", "gateway".green().bold(), config.bind_addr);
    info!(bind_addr = %config.bind_addr, node_id = %self_node_id, "gateway serve starting");

    axum::serve(listener, app(state)).await.context("server error")?;
    Ok(())
}
