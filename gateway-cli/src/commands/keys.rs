// SPDX-License-Identifier: AGPL-3.0
//! `gateway keys create|revoke` — API key lifecycle against the
//! configured Postgres database.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use sark_gateway_core::config::GatewayConfig;
use sark_gateway_core::domain::ids::{ApiKeyId, PrincipalId};
use sark_gateway_core::infrastructure::api_key_store::ApiKeyStore;
use sark_gateway_core::infrastructure::repositories::PostgresApiKeyRepository;

#[derive(Subcommand)]
pub enum KeysCommand {
    /// Provision a new API key for a principal
    Create {
        /// Principal UUID the key belongs to
        #[arg(long)]
        principal: Uuid,

        /// Human-readable name for the key
        #[arg(long)]
        name: String,

        /// Comma-separated scopes (e.g. "invoke,bulk")
        #[arg(long, default_value = "invoke")]
        scopes: String,

        /// Requests allowed per minute
        #[arg(long, default_value_t = 60)]
        rate_limit_per_min: u32,
    },

    /// Revoke an existing API key
    Revoke {
        /// API key UUID
        #[arg(long)]
        id: Uuid,
    },
}

async fn store() -> Result<ApiKeyStore> {
    let config = GatewayConfig::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(ApiKeyStore::new(Arc::new(PostgresApiKeyRepository::new(pool)), "sark-gateway", "production"))
}

pub async fn handle_command(command: KeysCommand) -> Result<()> {
    match command {
        KeysCommand::Create { principal, name, scopes, rate_limit_per_min } => {
            let store = store().await?;
            let scopes: Vec<String> = scopes.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            let generated = store
                .provision(PrincipalId(principal), None, name, scopes, rate_limit_per_min, None)
                .await
                .context("failed to provision API key")?;
            println!("{}", "API key created. This is shown once — store it now.".yellow().bold());
            println!("  id:  {}", generated.record.id.0);
            println!("  key: {}", generated.full_key.green());
            Ok(())
        }
        KeysCommand::Revoke { id } => {
            let store = store().await?;
            store.revoke(&ApiKeyId(id)).await.context("failed to revoke API key")?;
            println!("{}", format!("revoked key {id}").green());
            Ok(())
        }
    }
}
