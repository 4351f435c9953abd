// SPDX-License-Identifier: AGPL-3.0
//! Federation trust establishment and verification: a peer node presents
//! an X.509 trust anchor certificate; the certificate's validity window,
//! (optionally) its signature against a configured local CA anchor, and
//! its extended-key-usage are checked before the node is trusted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand_core::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::*;

use crate::domain::federation::FederationNode;
use crate::domain::ids::NodeId;
use crate::domain::repository::FederationNodeRepository;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("malformed trust anchor certificate: {0}")]
    MalformedCertificate(String),
    #[error("certificate is not within its validity window")]
    NotYetValidOrExpired,
    #[error("certificate does not verify against the configured CA anchor")]
    CaVerificationFailed,
    #[error("certificate extended-key-usage does not include TLS client or server auth")]
    MissingExtendedKeyUsage,
    #[error("node {0} is not trusted")]
    NotTrusted(NodeId),
    #[error("challenge not found, expired, or already consumed")]
    UnknownChallenge,
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("endpoint must be https: {0}")]
    InsecureEndpoint(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Result of [`FederationTrust::verify_trust`]: the spec distinguishes a
/// mismatched fingerprint, an expired/invalid cert, and a disabled node
/// from a single positive "trusted" outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustStatus {
    Trusted,
    Revoked,
    FingerprintMismatch,
    Expired,
}

struct PendingChallenge {
    nonce: [u8; 32],
    node_id: NodeId,
    issued_at: DateTime<Utc>,
}

struct ParsedCert {
    der: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    has_tls_eku: bool,
}

/// Parses trust-anchor certificates and runs the establish/verify/revoke
/// lifecycle. Certificate validation does not assume any particular
/// public-key algorithm; only the separate challenge/response
/// proof-of-possession step requires an Ed25519 key.
pub struct FederationTrust {
    repository: Arc<dyn FederationNodeRepository>,
    challenges: RwLock<HashMap<String, PendingChallenge>>,
    challenge_ttl: chrono::Duration,
    ca_anchor_der: Option<Vec<u8>>,
}

impl FederationTrust {
    pub fn new(repository: Arc<dyn FederationNodeRepository>) -> Self {
        Self {
            repository,
            challenges: RwLock::new(HashMap::new()),
            challenge_ttl: chrono::Duration::minutes(5),
            ca_anchor_der: None,
        }
    }

    /// Configure a local CA anchor. When set, `establish_trust` and
    /// `verify_trust` additionally require the peer certificate's
    /// signature to verify against this CA's public key.
    pub fn with_ca_anchor(mut self, ca_cert_pem_or_der: &str) -> Result<Self, TrustError> {
        let parsed = Self::parse_certificate(ca_cert_pem_or_der)?;
        self.ca_anchor_der = Some(parsed.der);
        Ok(self)
    }

    fn parse_certificate(cert_pem_or_der: &str) -> Result<ParsedCert, TrustError> {
        let der = if cert_pem_or_der.contains("BEGIN CERTIFICATE") {
            let (_, pem) = parse_x509_pem(cert_pem_or_der.as_bytes())
                .map_err(|e| TrustError::MalformedCertificate(e.to_string()))?;
            pem.contents
        } else {
            cert_pem_or_der.as_bytes().to_vec()
        };

        let (_, cert) =
            X509Certificate::from_der(&der).map_err(|e| TrustError::MalformedCertificate(e.to_string()))?;

        let validity = cert.validity();
        let not_before = Utc
            .timestamp_opt(validity.not_before.timestamp(), 0)
            .single()
            .ok_or_else(|| TrustError::MalformedCertificate("not_before out of range".into()))?;
        let not_after = Utc
            .timestamp_opt(validity.not_after.timestamp(), 0)
            .single()
            .ok_or_else(|| TrustError::MalformedCertificate("not_after out of range".into()))?;

        let has_tls_eku = cert.extensions().iter().any(|ext| {
            matches!(
                ext.parsed_extension(),
                ParsedExtension::ExtendedKeyUsage(eku) if eku.client_auth || eku.server_auth
            )
        });

        Ok(ParsedCert { der, not_before, not_after, has_tls_eku })
    }

    /// Step 2 of `establish_trust`: validity window, optional CA
    /// signature, and extended-key-usage.
    fn validate_certificate(&self, parsed: &ParsedCert) -> Result<(), TrustError> {
        let now = Utc::now();
        if now < parsed.not_before || now > parsed.not_after {
            return Err(TrustError::NotYetValidOrExpired);
        }
        if !parsed.has_tls_eku {
            return Err(TrustError::MissingExtendedKeyUsage);
        }
        if let Some(ca_der) = &self.ca_anchor_der {
            let (_, ca_cert) = X509Certificate::from_der(ca_der)
                .map_err(|e| TrustError::MalformedCertificate(e.to_string()))?;
            let (_, leaf_cert) = X509Certificate::from_der(&parsed.der)
                .map_err(|e| TrustError::MalformedCertificate(e.to_string()))?;
            leaf_cert
                .verify_signature(Some(ca_cert.public_key()))
                .map_err(|_| TrustError::CaVerificationFailed)?;
        }
        Ok(())
    }

    /// Register or refresh a peer node's trust anchor. `challenge_id`, if
    /// present, must name a token this instance previously issued via
    /// [`Self::generate_challenge`] that is still within its 5-minute
    /// window; it is consumed (one-shot) on use.
    pub async fn establish_trust(
        &self,
        node_id: NodeId,
        name: impl Into<String>,
        endpoint: impl Into<String>,
        trust_anchor_cert: String,
        challenge_id: Option<String>,
        rate_limit_per_hour: u32,
    ) -> Result<FederationNode, TrustError> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("https://") {
            return Err(TrustError::InsecureEndpoint(endpoint));
        }

        let parsed = Self::parse_certificate(&trust_anchor_cert)?;
        self.validate_certificate(&parsed)?;

        if let Some(challenge_id) = challenge_id {
            self.consume_challenge(&challenge_id, node_id).await?;
        }

        let trusted_since = match self.repository.find_by_id(&node_id).await? {
            Some(existing) => existing.trusted_since,
            None => Utc::now(),
        };

        let node = FederationNode {
            node_id,
            name: name.into(),
            endpoint,
            trust_anchor_cert,
            enabled: true,
            rate_limit_per_hour,
            trusted_since,
            metadata: HashMap::new(),
        };
        self.repository.save(node.clone()).await?;
        Ok(node)
    }

    pub async fn revoke_trust(&self, node_id: &NodeId) -> Result<(), TrustError> {
        self.repository.remove(node_id).await?;
        Ok(())
    }

    /// Issue a random 32-byte nonce the caller must present (as a
    /// one-shot, 5-minute-lived token) when it next calls `establish_trust`
    /// for the same node.
    pub async fn generate_challenge(&self, node_id: NodeId) -> Result<(String, [u8; 32]), TrustError> {
        self.repository
            .find_by_id(&node_id)
            .await?
            .filter(|n| n.enabled)
            .ok_or(TrustError::NotTrusted(node_id))?;

        let mut nonce = [0u8; 32];
        rand_core::OsRng.fill_bytes(&mut nonce);
        let challenge_id = uuid::Uuid::new_v4().to_string();

        self.challenges.write().await.insert(
            challenge_id.clone(),
            PendingChallenge { nonce, node_id, issued_at: Utc::now() },
        );

        Ok((challenge_id, nonce))
    }

    async fn consume_challenge(&self, challenge_id: &str, node_id: NodeId) -> Result<(), TrustError> {
        let pending = {
            let mut challenges = self.challenges.write().await;
            challenges.remove(challenge_id).ok_or(TrustError::UnknownChallenge)?
        };
        if pending.node_id != node_id || Utc::now() - pending.issued_at > self.challenge_ttl {
            return Err(TrustError::UnknownChallenge);
        }
        Ok(())
    }

    /// Cryptographic proof of private-key possession over a challenge
    /// nonce, for peers whose trust anchor carries an Ed25519 key. Not
    /// part of the `establish_trust`/`verify_trust` contract; a separate
    /// operation callers can use before presenting a challenge token.
    pub async fn verify_challenge_signature(&self, challenge_id: &str, signature_bytes: &[u8]) -> Result<NodeId, TrustError> {
        let pending = {
            let mut challenges = self.challenges.write().await;
            challenges.remove(challenge_id).ok_or(TrustError::UnknownChallenge)?
        };
        if Utc::now() - pending.issued_at > self.challenge_ttl {
            return Err(TrustError::UnknownChallenge);
        }

        let node = self
            .repository
            .find_by_id(&pending.node_id)
            .await?
            .filter(|n| n.enabled)
            .ok_or(TrustError::NotTrusted(pending.node_id))?;

        let parsed = Self::parse_certificate(&node.trust_anchor_cert)?;
        let (_, cert) = X509Certificate::from_der(&parsed.der).map_err(|e| TrustError::MalformedCertificate(e.to_string()))?;
        let key_bytes: [u8; 32] = cert
            .public_key()
            .subject_public_key
            .as_ref()
            .try_into()
            .map_err(|_| TrustError::SignatureInvalid)?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| TrustError::SignatureInvalid)?;
        let signature_bytes: [u8; 64] = signature_bytes.try_into().map_err(|_| TrustError::SignatureInvalid)?;
        let signature = Signature::from_bytes(&signature_bytes);

        verifying_key
            .verify(&pending.nonce, &signature)
            .map_err(|_| TrustError::SignatureInvalid)?;

        Ok(pending.node_id)
    }

    /// Compares `fingerprint` against the SHA-256 of the stored trust
    /// anchor, re-runs the validity check, and reports `Revoked` if the
    /// node has been disabled.
    pub async fn verify_trust(&self, node_id: &NodeId, fingerprint: &[u8; 32]) -> Result<TrustStatus, TrustError> {
        let node = self.repository.find_by_id(node_id).await?.ok_or(TrustError::NotTrusted(*node_id))?;
        if !node.enabled {
            return Ok(TrustStatus::Revoked);
        }

        let parsed = Self::parse_certificate(&node.trust_anchor_cert)?;
        let actual: [u8; 32] = Sha256::digest(&parsed.der).into();
        if &actual != fingerprint {
            return Ok(TrustStatus::FingerprintMismatch);
        }

        if self.validate_certificate(&parsed).is_err() {
            return Ok(TrustStatus::Expired);
        }
        Ok(TrustStatus::Trusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryFederationNodeRepository;

    #[tokio::test]
    async fn establish_trust_rejects_non_https_endpoint() {
        let trust = FederationTrust::new(Arc::new(InMemoryFederationNodeRepository::new()));
        let result = trust
            .establish_trust(NodeId::new(), "peer", "http://peer.example", "garbage".into(), None, 1000)
            .await;
        assert!(matches!(result, Err(TrustError::InsecureEndpoint(_))));
    }

    #[tokio::test]
    async fn establish_trust_rejects_malformed_certificate() {
        let trust = FederationTrust::new(Arc::new(InMemoryFederationNodeRepository::new()));
        let result = trust
            .establish_trust(NodeId::new(), "peer", "https://peer.example", "not a certificate".into(), None, 1000)
            .await;
        assert!(matches!(result, Err(TrustError::MalformedCertificate(_))));
    }

    #[tokio::test]
    async fn generate_challenge_rejects_unknown_node() {
        let trust = FederationTrust::new(Arc::new(InMemoryFederationNodeRepository::new()));
        let result = trust.generate_challenge(NodeId::new()).await;
        assert!(matches!(result, Err(TrustError::NotTrusted(_))));
    }

    #[tokio::test]
    async fn verify_challenge_signature_rejects_unknown_challenge() {
        let trust = FederationTrust::new(Arc::new(InMemoryFederationNodeRepository::new()));
        let result = trust.verify_challenge_signature("nonexistent", &[0u8; 64]).await;
        assert!(matches!(result, Err(TrustError::UnknownChallenge)));
    }

    #[tokio::test]
    async fn verify_trust_reports_not_trusted_for_unknown_node() {
        let trust = FederationTrust::new(Arc::new(InMemoryFederationNodeRepository::new()));
        let result = trust.verify_trust(&NodeId::new(), &[0u8; 32]).await;
        assert!(matches!(result, Err(TrustError::NotTrusted(_))));
    }
}
