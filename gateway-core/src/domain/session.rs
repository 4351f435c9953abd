// SPDX-License-Identifier: AGPL-3.0
//! Opaque browser/API session tied to a [`Principal`](crate::domain::principal::Principal).
//!
//! A session is valid iff `active ∧ now < expires_at`. The session id
//! itself is a random 128-bit value minted by the store, never derived
//! from principal data, so leaking one session never discloses another.

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ids::{PrincipalId, SessionId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked { reason: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not active")]
    Inactive,
    #[error("session has expired")]
    Expired,
    #[error("session not found")]
    NotFound,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Expired => write!(f, "expired"),
            SessionStatus::Revoked { reason } => write!(f, "revoked ({reason})"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub principal_id: PrincipalId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(
        principal_id: PrincipalId,
        ip: Option<String>,
        user_agent: Option<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            principal_id,
            created_at: now,
            expires_at: now + ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::days(1)),
            last_accessed_at: now,
            ip,
            user_agent,
            metadata: serde_json::json!({}),
            status: SessionStatus::Active,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, SessionStatus::Active) && now < self.expires_at
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), SessionError> {
        match &self.status {
            SessionStatus::Revoked { .. } => Err(SessionError::Inactive),
            SessionStatus::Expired => Err(SessionError::Expired),
            SessionStatus::Active if now >= self.expires_at => Err(SessionError::Expired),
            SessionStatus::Active => Ok(()),
        }
    }

    /// Extend `expires_at` by `timeout` from now. Per the round-trip
    /// invariant, the new expiry must never be earlier than the old one.
    pub fn refresh(&mut self, timeout: std::time::Duration) {
        let now = Utc::now();
        let candidate = now + ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::days(1));
        self.expires_at = candidate.max(self.expires_at);
        self.last_accessed_at = now;
    }

    pub fn revoke(&mut self, reason: impl Into<String>) {
        self.status = SessionStatus::Revoked {
            reason: reason.into(),
        };
    }

    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> PrincipalId {
        PrincipalId::new()
    }

    #[test]
    fn fresh_session_is_valid() {
        let session = Session::new(principal(), None, None, std::time::Duration::from_secs(60));
        assert!(session.is_valid(Utc::now()));
    }

    #[test]
    fn expired_session_fails_validation() {
        let session = Session::new(principal(), None, None, std::time::Duration::from_secs(60));
        let future = Utc::now() + ChronoDuration::seconds(120);
        assert!(matches!(session.validate(future), Err(SessionError::Expired)));
    }

    #[test]
    fn revoked_session_fails_validation() {
        let mut session = Session::new(principal(), None, None, std::time::Duration::from_secs(60));
        session.revoke("logout");
        assert!(matches!(session.validate(Utc::now()), Err(SessionError::Inactive)));
    }

    #[test]
    fn refresh_never_moves_expiry_earlier() {
        let mut session = Session::new(principal(), None, None, std::time::Duration::from_secs(3600));
        let before = session.expires_at;
        session.refresh(std::time::Duration::from_secs(1));
        assert!(session.expires_at >= before);
    }
}
