use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Deserialize;

use crate::jwk::Jwk;

use super::errors::KeyResolverError;

/// A minimal DID document projection: just enough to extract an atproto
/// signing key. Resolution of the document itself is an injected capability
/// ([`DidResolver`]) — this core never talks to a DID registry directly.
#[derive(Debug, Clone, Deserialize)]
pub struct DidDocument {
    pub id: String,
    #[serde(rename = "verificationMethod", default)]
    pub verification_method: Vec<VerificationMethod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "publicKeyJwk")]
    pub public_key_jwk: Option<Jwk>,
}

/// Injected capability resolving a DID to its document. Concrete
/// implementations (PLC directory client, did:web fetcher, combined
/// resolver) live outside this core; this trait is the seam.
#[async_trait]
pub trait DidResolver: Send + Sync {
    async fn resolve(&self, did: &str) -> Result<DidDocument, KeyResolverError>;
}

/// A resolved public key plus the algorithm family it was published under,
/// so the verifier can check it against the token's claimed `alg`.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub jwk: Jwk,
}

/// `fetchPublicKey(issuer, token) -> publicKey`, dispatched by issuer syntax.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn fetch_public_key(&self, issuer: &str, kid: Option<&str>) -> Result<ResolvedKey, KeyResolverError>;

    /// Approximate number of cached entries, for `/health` liveness
    /// reporting. Resolvers with no cache (e.g. a DID directory lookup)
    /// report zero.
    fn cache_size(&self) -> u64 {
        0
    }
}

/// Resolves keys for `did:`-prefixed issuers via an injected identity
/// directory capability.
pub struct DidKeyResolver {
    directory: Arc<dyn DidResolver>,
}

impl DidKeyResolver {
    pub fn new(directory: Arc<dyn DidResolver>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl KeyResolver for DidKeyResolver {
    async fn fetch_public_key(&self, issuer: &str, _kid: Option<&str>) -> Result<ResolvedKey, KeyResolverError> {
        let doc = self.directory.resolve(issuer).await?;
        let jwk = doc
            .verification_method
            .into_iter()
            .find_map(|vm| vm.public_key_jwk)
            .ok_or(KeyResolverError::MissingVerificationKey)?;
        Ok(ResolvedKey { jwk })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OAuthServerMetadata {
    jwks_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Clone)]
struct JwksCacheEntry {
    keys: Vec<Jwk>,
    expires_at: DateTime<Utc>,
}

/// Resolves keys for URL issuers by dereferencing
/// `<issuer>/.well-known/oauth-authorization-server`, fetching the
/// referenced JWKS, and caching it per issuer for `ttl`.
pub struct JwksKeyResolver {
    http: reqwest::Client,
    cache: Cache<String, JwksCacheEntry>,
    ttl: Duration,
}

impl JwksKeyResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            cache: Cache::builder().max_capacity(1024).build(),
            ttl,
        }
    }

    async fn fetch_jwks(&self, issuer: &str) -> Result<Vec<Jwk>, KeyResolverError> {
        let metadata_url = format!("{}/.well-known/oauth-authorization-server", issuer.trim_end_matches('/'));
        let metadata: OAuthServerMetadata = self
            .http
            .get(&metadata_url)
            .send()
            .await
            .map_err(|e| KeyResolverError::MetadataFetchFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| KeyResolverError::MetadataFetchFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| KeyResolverError::MetadataFetchFailed(e.to_string()))?;

        let jwks: JwkSet = self
            .http
            .get(&metadata.jwks_uri)
            .send()
            .await
            .map_err(|e| KeyResolverError::JwksFetchFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| KeyResolverError::JwksFetchFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| KeyResolverError::JwksFetchFailed(e.to_string()))?;

        Ok(jwks.keys)
    }

    async fn keys_for(&self, issuer: &str, force_refresh: bool) -> Result<Vec<Jwk>, KeyResolverError> {
        if !force_refresh {
            if let Some(entry) = self.cache.get(issuer).await {
                if entry.expires_at > Utc::now() {
                    return Ok(entry.keys);
                }
            }
        }
        let keys = self.fetch_jwks(issuer).await?;
        self.cache
            .insert(
                issuer.to_string(),
                JwksCacheEntry {
                    keys: keys.clone(),
                    expires_at: Utc::now() + self.ttl,
                },
            )
            .await;
        Ok(keys)
    }
}

#[async_trait]
impl KeyResolver for JwksKeyResolver {
    async fn fetch_public_key(&self, issuer: &str, kid: Option<&str>) -> Result<ResolvedKey, KeyResolverError> {
        let keys = self.keys_for(issuer, false).await?;
        if let Some(kid) = kid {
            if let Some(jwk) = keys.iter().find(|k| k.kid.as_deref() == Some(kid)) {
                return Ok(ResolvedKey { jwk: jwk.clone() });
            }
            // One refresh attempt on kid miss, per the JWKSCacheEntry invariant.
            let refreshed = self.keys_for(issuer, true).await?;
            let jwk = refreshed
                .into_iter()
                .find(|k| k.kid.as_deref() == Some(kid))
                .ok_or(KeyResolverError::KeyIdNotFound)?;
            Ok(ResolvedKey { jwk })
        } else {
            let jwk = keys.into_iter().next().ok_or(KeyResolverError::MissingVerificationKey)?;
            Ok(ResolvedKey { jwk })
        }
    }

    fn cache_size(&self) -> u64 {
        self.cache.entry_count()
    }
}

/// Dispatches to [`DidKeyResolver`] or [`JwksKeyResolver`] by issuer syntax.
pub struct CombinedResolver {
    did_resolver: DidKeyResolver,
    jwks_resolver: JwksKeyResolver,
}

impl CombinedResolver {
    pub fn new(did_resolver: DidKeyResolver, jwks_resolver: JwksKeyResolver) -> Self {
        Self {
            did_resolver,
            jwks_resolver,
        }
    }
}

#[async_trait]
impl KeyResolver for CombinedResolver {
    async fn fetch_public_key(&self, issuer: &str, kid: Option<&str>) -> Result<ResolvedKey, KeyResolverError> {
        if crate::identity::is_did(issuer) {
            self.did_resolver.fetch_public_key(issuer, kid).await
        } else if issuer.starts_with("http://") || issuer.starts_with("https://") {
            self.jwks_resolver.fetch_public_key(issuer, kid).await
        } else {
            Err(KeyResolverError::UnsupportedIssuer(issuer.to_string()))
        }
    }

    fn cache_size(&self) -> u64 {
        self.jwks_resolver.cache_size()
    }
}
