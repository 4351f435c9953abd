// SPDX-License-Identifier: AGPL-3.0
//! Command implementations for the Sark gateway CLI.

pub mod audit;
pub mod config;
pub mod keys;
pub mod serve;

pub use audit::AuditCommand;
pub use config::ConfigCommand;
pub use keys::KeysCommand;
