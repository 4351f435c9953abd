// SPDX-License-Identifier: AGPL-3.0
//! # sark-gateway-core
//!
//! The invocation data-plane of the Sark governance gateway: every
//! tool/capability call a principal makes to a backend resource passes
//! through this crate's pipeline — authenticate, authorize, invoke,
//! scan, audit, forward.
//!
//! ## Components
//!
//! | Component | Module |
//! |---|---|
//! | CircuitBreaker | [`domain::circuit_breaker`] |
//! | RateLimiter | [`domain::rate_limiter`] |
//! | RetryPolicy | [`domain::retry`] |
//! | StdioTransport | [`infrastructure::stdio_transport`] |
//! | ProtocolAdapter | [`infrastructure::adapters`] |
//! | PolicyClient | [`infrastructure::policy_client`] |
//! | SecretScanner | [`infrastructure::secret_scanner`] |
//! | InvocationPipeline | [`application::invocation_pipeline`] |
//! | AuditEmitter | [`application::audit_service`] |
//! | SIEMForwarder | [`infrastructure::siem`] |
//! | FederationTrust | [`infrastructure::federation::trust`] |
//! | FederationRouter | [`infrastructure::federation::router`] |
//! | SessionStore / APIKeyStore | [`infrastructure::session_store`], [`infrastructure::api_key_store`] |
//! | BulkExecutor | [`application::bulk_executor`] |
//! | Discovery | [`infrastructure::discovery`] |
//!
//! ## Layer structure
//!
//! ```text
//! presentation/   ← HTTP API (axum)
//!     ↓
//! application/    ← pipeline, bulk executor, auth/audit services
//!     ↓
//! domain/         ← aggregates, value objects, primitives, repository traits
//!     ↓
//! infrastructure/ ← adapters, stdio transport, SIEM, federation, stores
//! ```

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
