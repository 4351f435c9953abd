// SPDX-License-Identifier: AGPL-3.0
//! Typed HTTP client for the Sark gateway's `/auth`, `/invoke`, and
//! `/bulk` surface.

pub mod client;

pub use client::{GatewayClient, GatewayClientError};
