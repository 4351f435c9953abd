// SPDX-License-Identifier: AGPL-3.0
//! API key lifecycle: generate, look up by prefix, verify, and enforce each
//! key's own per-minute budget.
//!
//! The per-minute budget is a fixed 1-minute sliding window, modeled as a
//! [`RateLimiter`] with `burst = rate_limit_per_min` refilling at
//! `rate_limit_per_min / 60` tokens/sec — the window's reset cadence is an
//! implementation decision recorded in `DESIGN.md`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::domain::api_key::{ApiKey, ApiKeyError, GeneratedApiKey};
use crate::domain::ids::{ApiKeyId, PrincipalId};
use crate::domain::rate_limiter::RateLimiter;
use crate::domain::repository::ApiKeyRepository;

pub struct ApiKeyStore {
    repository: Arc<dyn ApiKeyRepository>,
    app_name: String,
    env: String,
    budgets: RwLock<HashMap<ApiKeyId, Arc<RateLimiter>>>,
}

impl ApiKeyStore {
    pub fn new(repository: Arc<dyn ApiKeyRepository>, app_name: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            repository,
            app_name: app_name.into(),
            env: env.into(),
            budgets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn provision(
        &self,
        principal_id: PrincipalId,
        team_id: Option<String>,
        name: impl Into<String>,
        scopes: Vec<String>,
        rate_limit_per_min: u32,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> anyhow::Result<GeneratedApiKey> {
        let generated = ApiKey::generate(
            &self.app_name,
            &self.env,
            principal_id,
            team_id,
            name,
            scopes,
            rate_limit_per_min,
            expires_at,
        );
        self.repository.save(generated.record.clone()).await?;
        Ok(generated)
    }

    /// Parse prefix, look up, verify hash/expiry/revocation/scope, check the
    /// per-minute budget, then record usage.
    pub async fn validate(
        &self,
        presented_key: &str,
        required_scope: Option<&str>,
        client_ip: Option<String>,
    ) -> anyhow::Result<ApiKey, ApiKeyError> {
        let prefix = ApiKey::extract_prefix(presented_key)?;
        let key = self
            .repository
            .find_by_prefix(&prefix)
            .await
            .map_err(|_| ApiKeyError::UnknownPrefix)?
            .ok_or(ApiKeyError::UnknownPrefix)?;
        key.verify(presented_key, required_scope, Utc::now())?;

        // A request waiting up to a minute for its own budget to refill
        // would be a poor fit for a synchronous HTTP validation path, so
        // this rejects immediately rather than blocking like the adapter
        // rate limiter does.
        let limiter = self.budget_for(&key).await;
        if limiter.available_tokens() < 1.0 {
            return Err(ApiKeyError::RateLimitExceeded);
        }
        limiter
            .acquire(&CancellationToken::new())
            .await
            .map_err(|_| ApiKeyError::RateLimitExceeded)?;

        let _ = self.repository.record_usage(&key.id, client_ip).await;
        Ok(key)
    }

    pub async fn revoke(&self, id: &ApiKeyId) -> anyhow::Result<(), ApiKeyError> {
        self.repository.revoke(id).await
    }

    async fn budget_for(&self, key: &ApiKey) -> Arc<RateLimiter> {
        if let Some(limiter) = self.budgets.read().await.get(&key.id) {
            return limiter.clone();
        }
        let mut guard = self.budgets.write().await;
        guard
            .entry(key.id)
            .or_insert_with(|| {
                let rate = key.rate_limit_per_min as f64 / 60.0;
                RateLimiter::new(rate, Some(key.rate_limit_per_min as f64))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryApiKeyRepository;

    fn store() -> ApiKeyStore {
        ApiKeyStore::new(Arc::new(InMemoryApiKeyRepository::new()), "sark", "test")
    }

    #[tokio::test]
    async fn provision_then_validate_succeeds() {
        let store = store();
        let generated = store
            .provision(PrincipalId::new(), None, "ci", vec!["invoke".into()], 60, None)
            .await
            .unwrap();
        let validated = store
            .validate(&generated.full_key, Some("invoke"), None)
            .await
            .unwrap();
        assert_eq!(validated.id, generated.record.id);
    }

    #[tokio::test]
    async fn missing_scope_rejected() {
        let store = store();
        let generated = store
            .provision(PrincipalId::new(), None, "ci", vec!["read".into()], 60, None)
            .await
            .unwrap();
        let result = store.validate(&generated.full_key, Some("write"), None).await;
        assert!(matches!(result, Err(ApiKeyError::MissingScope(_))));
    }

    #[tokio::test]
    async fn exhausted_budget_rejected() {
        let store = store();
        let generated = store
            .provision(PrincipalId::new(), None, "ci", vec![], 1, None)
            .await
            .unwrap();
        store.validate(&generated.full_key, None, None).await.unwrap();
        let result = store.validate(&generated.full_key, None, None).await;
        assert!(matches!(result, Err(ApiKeyError::RateLimitExceeded)));
    }
}
