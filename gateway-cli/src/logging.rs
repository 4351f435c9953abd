// SPDX-License-Identifier: AGPL-3.0
use anyhow::{Context, Result};

/// Initialize the tracing subscriber for the `gateway` binary.
pub fn init(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("failed to build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}
