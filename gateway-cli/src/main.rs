// SPDX-License-Identifier: AGPL-3.0

//! # Sark Gateway CLI
//!
//! The `gateway` binary serves the governance gateway's HTTP surface and
//! administers it: provisioning API keys, tailing the audit log, and
//! inspecting the effective configuration.
//!
//! ## Commands
//!
//! - `gateway serve` - run the HTTP API (`/auth`, `/invoke`, `/bulk`, `/federation`, `/health`)
//! - `gateway keys create|revoke` - manage API keys
//! - `gateway audit tail` - print recent audit events
//! - `gateway config show` - print the effective configuration

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

use sark_gateway_cli::commands::{self, AuditCommand, ConfigCommand, KeysCommand};

/// Sark governance gateway - administer and serve the policy-enforcing gateway
#[derive(Parser)]
#[command(name = "gateway")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Use in-memory repositories instead of Postgres
        #[arg(long)]
        no_db: bool,
    },

    /// API key lifecycle
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },

    /// Audit trail queries
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    sark_gateway_cli::logging::init(&cli.log_level)?;

    match cli.command {
        Some(Commands::Serve { no_db }) => commands::serve::run(no_db).await,
        Some(Commands::Keys { command }) => commands::keys::handle_command(command).await,
        Some(Commands::Audit { command }) => commands::audit::handle_command(command).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}
