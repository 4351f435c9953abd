// SPDX-License-Identifier: AGPL-3.0
//! Long-lived API keys: `{app}_sk_{env}_{prefix8}_{urlsafe-base64(secret)}`.
//!
//! The full key is shown to the caller exactly once at creation time; only
//! a salted hash and the 8-character prefix are persisted. The prefix lets
//! the store narrow a lookup to one row before paying for the hash
//! comparison, the way a bcrypt-backed credential store would.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::ids::{ApiKeyId, PrincipalId};

const SECRET_BYTES: usize = 32;
const SALT_BYTES: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiKeyError {
    #[error("malformed key")]
    Malformed,
    #[error("unknown prefix")]
    UnknownPrefix,
    #[error("hash mismatch")]
    HashMismatch,
    #[error("key revoked")]
    Revoked,
    #[error("key expired")]
    Expired,
    #[error("scope '{0}' not granted")]
    MissingScope(String),
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("key not found")]
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub principal_id: PrincipalId,
    pub team_id: Option<String>,
    pub name: String,
    pub prefix: String,
    pub salt: String,
    pub hash: String,
    pub scopes: Vec<String>,
    pub rate_limit_per_min: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub last_used_ip: Option<String>,
}

pub struct GeneratedApiKey {
    pub record: ApiKey,
    pub full_key: String,
}

impl ApiKey {
    /// Mint a fresh key. `record` is what the store persists; `full_key`
    /// is returned to the caller once and never stored.
    pub fn generate(
        app: &str,
        env: &str,
        principal_id: PrincipalId,
        team_id: Option<String>,
        name: impl Into<String>,
        scopes: Vec<String>,
        rate_limit_per_min: u32,
        expires_at: Option<DateTime<Utc>>,
    ) -> GeneratedApiKey {
        let mut rng = rand_core::OsRng;
        let mut secret = [0u8; SECRET_BYTES];
        rng.fill_bytes(&mut secret);
        let mut salt = [0u8; SALT_BYTES];
        rng.fill_bytes(&mut salt);

        let secret_b64 = URL_SAFE_NO_PAD.encode(secret);
        let prefix: String = secret_b64.chars().take(8).collect();
        let full_key = format!("{app}_sk_{env}_{prefix}_{secret_b64}");
        let salt_b64 = URL_SAFE_NO_PAD.encode(salt);
        let hash = Self::hash_with_salt(&full_key, &salt_b64);

        GeneratedApiKey {
            record: ApiKey {
                id: ApiKeyId::new(),
                principal_id,
                team_id,
                name: name.into(),
                prefix,
                salt: salt_b64,
                hash,
                scopes,
                rate_limit_per_min,
                expires_at,
                revoked_at: None,
                usage_count: 0,
                last_used_ip: None,
            },
            full_key,
        }
    }

    fn hash_with_salt(full_key: &str, salt_b64: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt_b64.as_bytes());
        hasher.update(full_key.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Extract the 8-char prefix from a presented key without verifying it,
    /// for use as a store lookup key.
    pub fn extract_prefix(full_key: &str) -> Result<String, ApiKeyError> {
        let parts: Vec<&str> = full_key.split('_').collect();
        // {app}_sk_{env}_{prefix}_{secret} -> at least 5 parts.
        if parts.len() < 5 {
            return Err(ApiKeyError::Malformed);
        }
        Ok(parts[parts.len() - 2].to_string())
    }

    pub fn verify(&self, full_key: &str, required_scope: Option<&str>, now: DateTime<Utc>) -> Result<(), ApiKeyError> {
        if self.revoked_at.is_some() {
            return Err(ApiKeyError::Revoked);
        }
        if let Some(exp) = self.expires_at {
            if now >= exp {
                return Err(ApiKeyError::Expired);
            }
        }
        let candidate_hash = Self::hash_with_salt(full_key, &self.salt);
        if candidate_hash != self.hash {
            return Err(ApiKeyError::HashMismatch);
        }
        if let Some(scope) = required_scope {
            if !self.has_scope(scope) {
                return Err(ApiKeyError::MissingScope(scope.to_string()));
            }
        }
        Ok(())
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == "admin" || s == scope)
    }

    pub fn record_usage(&mut self, ip: Option<String>) {
        self.usage_count += 1;
        self.last_used_ip = ip;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_validates() {
        let generated = ApiKey::generate(
            "sark",
            "prod",
            PrincipalId::new(),
            None,
            "ci-key",
            vec!["server:read".into()],
            60,
            None,
        );
        assert!(generated
            .record
            .verify(&generated.full_key, Some("server:read"), Utc::now())
            .is_ok());
    }

    #[test]
    fn mutated_key_fails() {
        let generated = ApiKey::generate(
            "sark", "prod", PrincipalId::new(), None, "ci-key", vec![], 60, None,
        );
        let mut mutated = generated.full_key.clone();
        mutated.push('x');
        assert_eq!(
            generated.record.verify(&mutated, None, Utc::now()),
            Err(ApiKeyError::HashMismatch)
        );
    }

    #[test]
    fn revoked_key_fails_with_revoked() {
        let mut generated = ApiKey::generate(
            "sark", "prod", PrincipalId::new(), None, "ci-key", vec![], 60, None,
        );
        generated.record.revoked_at = Some(Utc::now());
        assert_eq!(
            generated.record.verify(&generated.full_key, None, Utc::now()),
            Err(ApiKeyError::Revoked)
        );
    }

    #[test]
    fn expired_key_fails_with_expired() {
        let mut generated = ApiKey::generate(
            "sark", "prod", PrincipalId::new(), None, "ci-key", vec![], 60, None,
        );
        generated.record.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert_eq!(
            generated.record.verify(&generated.full_key, None, Utc::now()),
            Err(ApiKeyError::Expired)
        );
    }

    #[test]
    fn admin_scope_grants_all() {
        let generated = ApiKey::generate(
            "sark", "prod", PrincipalId::new(), None, "ci-key", vec!["admin".into()], 60, None,
        );
        assert!(generated.record.has_scope("anything:at-all"));
    }
}
