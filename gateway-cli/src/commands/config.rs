// SPDX-License-Identifier: AGPL-3.0
//! `gateway config show` — print the effective configuration, the way
//! it was resolved from the environment.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use sark_gateway_core::config::GatewayConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,
}

pub async fn handle_command(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => show(),
    }
}

fn show() -> Result<()> {
    let config = GatewayConfig::from_env();
    println!("{}", "Effective configuration:".bold());
    println!("  database_url:              {}", config.database_url);
    println!("  bind_addr:                 {}", config.bind_addr);
    println!("  policy_engine_url:         {}", config.policy_engine_url);
    println!("  session_timeout_seconds:   {}", config.session_timeout_seconds);
    println!("  remember_me_multiplier:    {}", config.remember_me_multiplier);
    println!("  rate_limit_rps:            {}", config.rate_limit_rps);
    println!("  circuit_failure_threshold: {}", config.circuit_failure_threshold);
    println!("  circuit_recovery_seconds:  {}", config.circuit_recovery_seconds);
    println!("  retry_max_attempts:        {}", config.retry_max_attempts);
    println!("  siem.queue_max:            {}", config.siem.queue_max);
    println!("  siem.fallback_dir:         {}", config.siem.fallback_dir);
    println!("  federation.peer_timeout_s: {}", config.federation.peer_timeout_s);
    Ok(())
}
