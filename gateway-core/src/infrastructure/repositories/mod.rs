// SPDX-License-Identifier: AGPL-3.0
//! Repository implementations backing the domain's persistence traits.
//!
//! - **In-memory** — `HashMap` behind a `tokio::sync::RwLock`, used in tests
//!   and for the `--no-db` development mode.
//! - **PostgreSQL** — `sqlx`-backed implementations for production.

pub mod in_memory;
pub mod postgres;

pub use in_memory::{
    InMemoryApiKeyRepository, InMemoryAuditRepository, InMemoryFederationNodeRepository,
    InMemoryResourceRepository, InMemorySessionRepository,
};
pub use postgres::{
    PostgresApiKeyRepository, PostgresAuditRepository, PostgresFederationNodeRepository,
    PostgresResourceRepository, PostgresSessionRepository,
};
