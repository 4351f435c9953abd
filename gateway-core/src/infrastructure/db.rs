// SPDX-License-Identifier: AGPL-3.0
//! Thin wrapper around `sqlx::postgres::PgPool`, injected into the
//! PostgreSQL repository implementations when the gateway runs with
//! persistent storage enabled.

use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
