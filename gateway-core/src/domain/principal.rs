// SPDX-License-Identifier: AGPL-3.0
//! The authenticated identity making a request.

use serde::{Deserialize, Serialize};

use crate::domain::ids::PrincipalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Agent,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Untrusted,
    Pending,
    Trusted,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub kind: PrincipalKind,
    pub email: Option<String>,
    pub role: String,
    pub teams: Vec<String>,
    pub trust_level: TrustLevel,
}

impl Principal {
    pub fn is_usable(&self) -> bool {
        self.trust_level != TrustLevel::Revoked
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }

    pub fn has_team(&self, team: &str) -> bool {
        self.teams.iter().any(|t| t == team)
    }
}
