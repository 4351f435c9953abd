// SPDX-License-Identifier: AGPL-3.0
//! `gateway audit tail` — print recent audit events from Postgres.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use sqlx::postgres::PgPoolOptions;

use sark_gateway_core::application::AuditEmitter;
use sark_gateway_core::config::GatewayConfig;
use sark_gateway_core::infrastructure::repositories::PostgresAuditRepository;

#[derive(Subcommand)]
pub enum AuditCommand {
    /// Print the most recent audit events
    Tail {
        /// Number of events to print
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

pub async fn handle_command(command: AuditCommand) -> Result<()> {
    match command {
        AuditCommand::Tail { limit } => {
            let config = GatewayConfig::from_env();
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&config.database_url)
                .await
                .context("failed to connect to Postgres")?;
            let emitter = AuditEmitter::new(std::sync::Arc::new(PostgresAuditRepository::new(pool)));
            let events = emitter.recent(limit).await.context("failed to load audit events")?;
            for event in events {
                let correlation = event.correlation_id.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string());
                println!(
                    "{} [{:?}] {:?} correlation={correlation}",
                    event.timestamp.to_rfc3339().dimmed(),
                    event.severity,
                    event.event_type,
                );
            }
            Ok(())
        }
    }
}
