// SPDX-License-Identifier: AGPL-3.0
//! Cross-gateway federation: trust establishment between peer nodes and
//! routing of invocations for resources owned by another node.

pub mod router;
pub mod trust;

pub use router::{FederationRouter, RouterError};
pub use trust::{FederationTrust, TrustError};
