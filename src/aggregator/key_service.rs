//! Hashed API-key issuance/validation paired atomically with an OAuth
//! session, so a single opaque key transparently drives DPoP-signed writes
//! to a federated repository on the caller's behalf.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Deserialize;

use crate::crypto::sha256_hex;
use crate::error::ApiError;

use super::models::{AggregatorCredentials, KeyInfo, KeyStatus, OAuthCredentialFields, OAuthSession};
use super::repository::{CredentialsRepository, TokenUpdate};
use super::session_store::SessionStore;

pub const API_KEY_PREFIX: &str = "ckapi_";
pub const API_KEY_LENGTH: usize = 70;
pub const APIKEY_SESSION_ID: &str = "apikey";

const REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
const LAST_USED_UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Classification-only outcome of [`ApiKeyService::validate_key`], kept
/// distinct from [`ApiError`] so call sites choose how to surface it (the
/// key-endpoint handlers map it to `AuthenticationRequired`).
#[derive(Debug, PartialEq, Eq)]
pub enum KeyValidationError {
    Invalid,
    Revoked,
}

/// Operational visibility counters: fire-and-forget background writes that
/// fail increment these rather than failing the request that triggered them.
#[derive(Default)]
pub struct KeyServiceMetrics {
    failed_last_used_updates: AtomicU64,
    failed_nonce_updates: AtomicU64,
}

impl KeyServiceMetrics {
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.failed_last_used_updates.load(Ordering::Relaxed),
            self.failed_nonce_updates.load(Ordering::Relaxed),
        )
    }
}

pub struct ApiKeyService {
    repo: Arc<dyn CredentialsRepository>,
    sessions: Arc<dyn SessionStore>,
    http: reqwest::Client,
    metrics: Arc<KeyServiceMetrics>,
}

impl ApiKeyService {
    pub fn new(repo: Arc<dyn CredentialsRepository>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            repo,
            sessions,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            metrics: Arc::new(KeyServiceMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &KeyServiceMetrics {
        &self.metrics
    }

    /// Generate a fresh API key for `aggregator_did`, pairing it with
    /// `oauth_session`. Session-then-key ordering (with a compensating
    /// session delete on key-write failure) guarantees an active key is
    /// always refreshable.
    pub async fn generate_key(
        &self,
        aggregator_did: &str,
        oauth_session: OAuthSession,
    ) -> Result<(String, String), ApiError> {
        let mut random_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        let plaintext = format!("{API_KEY_PREFIX}{}", hex::encode(random_bytes));
        let key_hash = sha256_hex(plaintext.as_bytes());
        let key_prefix = plaintext[..12].to_string();

        self.sessions
            .save_session(aggregator_did, APIKEY_SESSION_ID, &oauth_session)
            .await
            .map_err(|e| ApiError::KeyGenerationFailed(e.to_string()))?;

        let oauth_fields = OAuthCredentialFields {
            access_token: Some(oauth_session.access_token.clone()),
            refresh_token: Some(oauth_session.refresh_token.clone()),
            token_expires_at: oauth_session.expires_at,
            pds_url: Some(oauth_session.pds_url.clone()),
            auth_server_issuer: Some(oauth_session.auth_server_issuer.clone()),
            token_endpoint: Some(oauth_session.token_endpoint.clone()),
            dpop_private_key_multibase: Some(oauth_session.dpop_private_key_multibase.clone()),
            auth_server_nonce: oauth_session.auth_server_nonce.clone(),
            pds_nonce: oauth_session.pds_nonce.clone(),
        };

        if let Err(e) = self.repo.save_new_key(aggregator_did, &key_hash, &key_prefix, &oauth_fields).await {
            let _ = self.sessions.delete_session(aggregator_did, APIKEY_SESSION_ID).await;
            return Err(ApiError::KeyGenerationFailed(e.to_string()));
        }

        Ok((plaintext, key_prefix))
    }

    /// Validate a presented plaintext API key, rejecting malformed input
    /// before ever touching the repository.
    pub async fn validate_key(&self, plaintext: &str) -> Result<AggregatorCredentials, KeyValidationError> {
        if plaintext.len() != API_KEY_LENGTH || !plaintext.starts_with(API_KEY_PREFIX) {
            tracing::debug!(
                length = plaintext.len(),
                prefix_matches = plaintext.starts_with(API_KEY_PREFIX),
                "rejected malformed api key"
            );
            crate::metrics::record_key_validation_failure();
            return Err(KeyValidationError::Invalid);
        }

        let key_hash = sha256_hex(plaintext.as_bytes());
        let creds = self
            .repo
            .get_by_key_hash(&key_hash)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "credentials lookup failed during key validation");
                crate::metrics::record_key_validation_failure();
                KeyValidationError::Invalid
            })?
            .ok_or_else(|| {
                crate::metrics::record_key_validation_failure();
                KeyValidationError::Invalid
            })?;

        match creds.status() {
            KeyStatus::Revoked => {
                crate::metrics::record_key_validation_failure();
                return Err(KeyValidationError::Revoked);
            }
            KeyStatus::NoKey => {
                crate::metrics::record_key_validation_failure();
                return Err(KeyValidationError::Invalid);
            }
            KeyStatus::Active => {}
        }
        crate::metrics::record_key_validation_success();

        let repo = self.repo.clone();
        let metrics = self.metrics.clone();
        let did = creds.did.clone();
        tokio::spawn(async move {
            let result = tokio::time::timeout(LAST_USED_UPDATE_TIMEOUT, repo.update_last_used_at(&did)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, did = %did, "last-used-at update failed");
                    metrics.failed_last_used_updates.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    tracing::warn!(did = %did, "last-used-at update timed out");
                    metrics.failed_last_used_updates.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        Ok(creds)
    }

    /// Refresh the embedded OAuth tokens if within the refresh buffer of
    /// expiry, returning the (possibly updated) credentials.
    pub async fn refresh_tokens_if_needed(
        &self,
        creds: &AggregatorCredentials,
    ) -> Result<AggregatorCredentials, ApiError> {
        if let Some(expires_at) = creds.oauth.token_expires_at {
            if Utc::now() + chrono::Duration::from_std(REFRESH_BUFFER).unwrap() < expires_at {
                return Ok(creds.clone());
            }
        }

        let session = self
            .sessions
            .load_session(&creds.did, APIKEY_SESSION_ID)
            .await
            .map_err(|e| ApiError::OAuthSessionRequired(e.to_string()))?
            .ok_or_else(|| ApiError::OAuthSessionRequired("no paired oauth session".to_string()))?;

        let refreshed = self.exchange_refresh_token(&session).await?;

        self.sessions
            .save_session(&creds.did, APIKEY_SESSION_ID, &refreshed.session)
            .await
            .map_err(|e| ApiError::InternalServerError(anyhow::anyhow!(e)))?;

        if let Err(e) = self
            .repo
            .update_oauth_tokens(
                &creds.did,
                TokenUpdate {
                    access_token: &refreshed.session.access_token,
                    refresh_token: &refreshed.session.refresh_token,
                    token_expires_at: refreshed.session.expires_at.unwrap_or_else(|| {
                        Utc::now() + chrono::Duration::from_std(DEFAULT_TOKEN_TTL).unwrap()
                    }),
                    auth_server_nonce: refreshed.session.auth_server_nonce.as_deref(),
                    pds_nonce: refreshed.session.pds_nonce.as_deref(),
                },
            )
            .await
        {
            tracing::warn!(error = %e, did = %creds.did, "secondary oauth-token copy update failed");
            self.metrics.failed_nonce_updates.fetch_add(1, Ordering::Relaxed);
        }

        let mut updated = creds.clone();
        updated.oauth.access_token = Some(refreshed.session.access_token.clone());
        updated.oauth.refresh_token = Some(refreshed.session.refresh_token.clone());
        updated.oauth.token_expires_at = refreshed.session.expires_at;
        updated.oauth.auth_server_nonce = refreshed.session.auth_server_nonce;
        updated.oauth.pds_nonce = refreshed.session.pds_nonce;
        Ok(updated)
    }

    /// Convenience: refresh if needed, then return the access token.
    pub async fn get_access_token(&self, creds: &AggregatorCredentials) -> Result<String, ApiError> {
        let refreshed = self.refresh_tokens_if_needed(creds).await?;
        refreshed
            .oauth
            .access_token
            .ok_or_else(|| ApiError::InternalServerError(anyhow::anyhow!("refresh succeeded without an access token")))
    }

    pub async fn revoke_key(&self, aggregator_did: &str) -> Result<DateTime<Utc>, ApiError> {
        let creds = self
            .repo
            .get_by_did(aggregator_did)
            .await
            .map_err(|e| ApiError::InternalServerError(anyhow::anyhow!(e)))?
            .ok_or(ApiError::ApiKeyNotFound)?;

        match creds.status() {
            KeyStatus::NoKey => Err(ApiError::ApiKeyNotFound),
            KeyStatus::Revoked => Err(ApiError::ApiKeyAlreadyRevoked),
            KeyStatus::Active => self
                .repo
                .revoke(aggregator_did)
                .await
                .map_err(|e| ApiError::RevocationFailed(e.to_string())),
        }
    }

    pub async fn get_key_info(&self, aggregator_did: &str) -> Result<KeyInfo, ApiError> {
        let creds = self
            .repo
            .get_by_did(aggregator_did)
            .await
            .map_err(|e| ApiError::InternalServerError(anyhow::anyhow!(e)))?;

        Ok(match creds {
            None => KeyInfo {
                has_key: false,
                prefix: None,
                created_at: None,
                last_used_at: None,
                is_revoked: false,
                revoked_at: None,
            },
            Some(c) => KeyInfo {
                has_key: !matches!(c.status(), KeyStatus::NoKey),
                prefix: Some(c.key_prefix),
                created_at: c.created_at,
                last_used_at: c.last_used_at,
                is_revoked: matches!(c.status(), KeyStatus::Revoked),
                revoked_at: c.revoked_at,
            },
        })
    }

    async fn exchange_refresh_token(&self, session: &OAuthSession) -> Result<RefreshedSession, ApiError> {
        let mut nonce = session.auth_server_nonce.clone();
        for attempt in 0..2 {
            let proof = super::dpop_client::generate_proof(
                &session.dpop_private_key_multibase,
                "POST",
                &session.token_endpoint,
                nonce.as_deref(),
            )
            .map_err(|e| ApiError::InternalServerError(anyhow::anyhow!(e)))?;

            let response = self
                .http
                .post(&session.token_endpoint)
                .header("DPoP", proof)
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", session.refresh_token.as_str()),
                ])
                .send()
                .await
                .map_err(|e| ApiError::InternalServerError(anyhow::anyhow!(e)))?;

            let next_nonce = response
                .headers()
                .get("dpop-nonce")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            if response.status() == reqwest::StatusCode::BAD_REQUEST && next_nonce.is_some() && attempt == 0 {
                // Auth server rejected for a stale/missing nonce; retry once with the fresh one.
                nonce = next_nonce;
                continue;
            }

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::InternalServerError(anyhow::anyhow!(
                    "token refresh failed with status {status}: {body}"
                )));
            }

            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| ApiError::InternalServerError(anyhow::anyhow!(e)))?;

            let expires_at = body
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
                .unwrap_or_else(|| Utc::now() + chrono::Duration::from_std(DEFAULT_TOKEN_TTL).unwrap());

            return Ok(RefreshedSession {
                session: OAuthSession {
                    access_token: body.access_token,
                    refresh_token: body.refresh_token.unwrap_or_else(|| session.refresh_token.clone()),
                    expires_at: Some(expires_at),
                    pds_url: session.pds_url.clone(),
                    auth_server_issuer: session.auth_server_issuer.clone(),
                    token_endpoint: session.token_endpoint.clone(),
                    dpop_private_key_multibase: session.dpop_private_key_multibase.clone(),
                    auth_server_nonce: next_nonce.or_else(|| nonce.clone()),
                    pds_nonce: session.pds_nonce.clone(),
                },
            });
        }
        Err(ApiError::InternalServerError(anyhow::anyhow!(
            "token refresh exhausted its nonce retry"
        )))
    }
}

struct RefreshedSession {
    session: OAuthSession,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::repository::test_double::InMemoryCredentialsRepository;
    use crate::aggregator::session_store::test_double::InMemorySessionStore;

    fn sample_session() -> OAuthSession {
        OAuthSession {
            access_token: "at-1".to_string(),
            refresh_token: "rt-1".to_string(),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            pds_url: "https://pds.example.com".to_string(),
            auth_server_issuer: "https://issuer.example.com".to_string(),
            token_endpoint: "https://issuer.example.com/token".to_string(),
            dpop_private_key_multibase: "z-fake-key".to_string(),
            auth_server_nonce: None,
            pds_nonce: None,
        }
    }

    fn service() -> (ApiKeyService, Arc<InMemoryCredentialsRepository>) {
        let repo = Arc::new(InMemoryCredentialsRepository::default());
        let sessions = Arc::new(InMemorySessionStore::default());
        (ApiKeyService::new(repo.clone(), sessions), repo)
    }

    #[tokio::test]
    async fn full_lifecycle_generate_validate_revoke_regenerate() {
        let (service, _repo) = service();
        let did = "did:plc:agg1";

        let (plaintext1, prefix1) = service.generate_key(did, sample_session()).await.unwrap();
        assert_eq!(prefix1, plaintext1[..12]);
        assert_eq!(sha256_hex(plaintext1.as_bytes()), service.validate_key(&plaintext1).await.unwrap().key_hash);

        service.revoke_key(did).await.unwrap();
        assert_eq!(service.validate_key(&plaintext1).await.unwrap_err(), KeyValidationError::Revoked);

        let (plaintext2, _prefix2) = service.generate_key(did, sample_session()).await.unwrap();
        assert_eq!(service.validate_key(&plaintext1).await.unwrap_err(), KeyValidationError::Invalid);
        assert!(service.validate_key(&plaintext2).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_length_or_prefix_rejected_before_repository_call() {
        let (service, _repo) = service();
        assert_eq!(service.validate_key("too-short").await.unwrap_err(), KeyValidationError::Invalid);
        assert_eq!(
            service.validate_key(&format!("wrongpfx_{}", "a".repeat(61))).await.unwrap_err(),
            KeyValidationError::Invalid
        );
    }

    #[tokio::test]
    async fn revoke_without_a_key_is_not_found() {
        let (service, _repo) = service();
        assert!(matches!(service.revoke_key("did:plc:none").await.unwrap_err(), ApiError::ApiKeyNotFound));
    }

    #[tokio::test]
    async fn double_revoke_is_already_revoked() {
        let (service, _repo) = service();
        let did = "did:plc:agg2";
        service.generate_key(did, sample_session()).await.unwrap();
        service.revoke_key(did).await.unwrap();
        assert!(matches!(service.revoke_key(did).await.unwrap_err(), ApiError::ApiKeyAlreadyRevoked));
    }

    #[tokio::test]
    async fn refresh_skipped_when_far_from_expiry() {
        let (service, _repo) = service();
        let did = "did:plc:agg3";
        service.generate_key(did, sample_session()).await.unwrap();
        let creds = service.get_key_info(did).await.unwrap();
        assert!(creds.has_key);
    }

    #[test]
    fn key_info_for_unknown_aggregator_has_no_key() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (service, _repo) = service();
        let info = rt.block_on(service.get_key_info("did:plc:unknown")).unwrap();
        assert!(!info.has_key);
        assert!(info.prefix.is_none());
    }
}
