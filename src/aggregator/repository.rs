//! Aggregator credentials storage, the injected capability behind the
//! Aggregator API-Key Service.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::models::{AggregatorCredentials, OAuthCredentialFields};

/// Persisted oauth-token update, applied as a secondary copy alongside the
/// session store's authoritative record.
pub struct TokenUpdate<'a> {
    pub access_token: &'a str,
    pub refresh_token: &'a str,
    pub token_expires_at: DateTime<Utc>,
    pub auth_server_nonce: Option<&'a str>,
    pub pds_nonce: Option<&'a str>,
}

#[async_trait]
pub trait CredentialsRepository: Send + Sync {
    async fn is_aggregator(&self, did: &str) -> Result<bool>;
    async fn get_by_did(&self, did: &str) -> Result<Option<AggregatorCredentials>>;
    async fn get_by_key_hash(&self, key_hash: &str) -> Result<Option<AggregatorCredentials>>;
    async fn save_new_key(
        &self,
        did: &str,
        key_hash: &str,
        key_prefix: &str,
        oauth: &OAuthCredentialFields,
    ) -> Result<()>;
    async fn update_last_used_at(&self, did: &str) -> Result<()>;
    async fn update_oauth_tokens(&self, did: &str, update: TokenUpdate<'_>) -> Result<()>;
    async fn revoke(&self, did: &str) -> Result<DateTime<Utc>>;
}

pub struct PgCredentialsRepository {
    pool: PgPool,
}

impl PgCredentialsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CredentialsRow {
    did: String,
    key_hash: String,
    key_prefix: String,
    created_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
    pds_url: Option<String>,
    auth_server_issuer: Option<String>,
    token_endpoint: Option<String>,
    dpop_private_key_multibase: Option<String>,
    auth_server_nonce: Option<String>,
    pds_nonce: Option<String>,
}

impl From<CredentialsRow> for AggregatorCredentials {
    fn from(row: CredentialsRow) -> Self {
        AggregatorCredentials {
            did: row.did,
            key_hash: row.key_hash,
            key_prefix: row.key_prefix,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            revoked_at: row.revoked_at,
            oauth: OAuthCredentialFields {
                access_token: row.access_token,
                refresh_token: row.refresh_token,
                token_expires_at: row.token_expires_at,
                pds_url: row.pds_url,
                auth_server_issuer: row.auth_server_issuer,
                token_endpoint: row.token_endpoint,
                dpop_private_key_multibase: row.dpop_private_key_multibase,
                auth_server_nonce: row.auth_server_nonce,
                pds_nonce: row.pds_nonce,
            },
        }
    }
}

const CREDENTIALS_COLUMNS: &str = r#"
    did, key_hash, key_prefix, created_at, last_used_at, revoked_at,
    access_token, refresh_token, token_expires_at, pds_url,
    auth_server_issuer, token_endpoint, dpop_private_key_multibase,
    auth_server_nonce, pds_nonce
"#;

#[async_trait]
impl CredentialsRepository for PgCredentialsRepository {
    async fn is_aggregator(&self, did: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM aggregators WHERE did = $1)")
                .bind(did)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn get_by_did(&self, did: &str) -> Result<Option<AggregatorCredentials>> {
        let row = sqlx::query_as::<_, CredentialsRow>(&format!(
            "SELECT {CREDENTIALS_COLUMNS} FROM aggregator_credentials WHERE did = $1"
        ))
        .bind(did)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_key_hash(&self, key_hash: &str) -> Result<Option<AggregatorCredentials>> {
        let row = sqlx::query_as::<_, CredentialsRow>(&format!(
            "SELECT {CREDENTIALS_COLUMNS} FROM aggregator_credentials WHERE key_hash = $1"
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn save_new_key(
        &self,
        did: &str,
        key_hash: &str,
        key_prefix: &str,
        oauth: &OAuthCredentialFields,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO aggregator_credentials
                (did, key_hash, key_prefix, created_at, revoked_at,
                 access_token, refresh_token, token_expires_at, pds_url,
                 auth_server_issuer, token_endpoint, dpop_private_key_multibase,
                 auth_server_nonce, pds_nonce)
            VALUES ($1, $2, $3, NOW(), NULL, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (did) DO UPDATE SET
                key_hash = EXCLUDED.key_hash,
                key_prefix = EXCLUDED.key_prefix,
                created_at = NOW(),
                revoked_at = NULL,
                last_used_at = NULL,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                token_expires_at = EXCLUDED.token_expires_at,
                pds_url = EXCLUDED.pds_url,
                auth_server_issuer = EXCLUDED.auth_server_issuer,
                token_endpoint = EXCLUDED.token_endpoint,
                dpop_private_key_multibase = EXCLUDED.dpop_private_key_multibase,
                auth_server_nonce = EXCLUDED.auth_server_nonce,
                pds_nonce = EXCLUDED.pds_nonce
            "#,
        )
        .bind(did)
        .bind(key_hash)
        .bind(key_prefix)
        .bind(&oauth.access_token)
        .bind(&oauth.refresh_token)
        .bind(oauth.token_expires_at)
        .bind(&oauth.pds_url)
        .bind(&oauth.auth_server_issuer)
        .bind(&oauth.token_endpoint)
        .bind(&oauth.dpop_private_key_multibase)
        .bind(&oauth.auth_server_nonce)
        .bind(&oauth.pds_nonce)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_last_used_at(&self, did: &str) -> Result<()> {
        sqlx::query("UPDATE aggregator_credentials SET last_used_at = NOW() WHERE did = $1")
            .bind(did)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_oauth_tokens(&self, did: &str, update: TokenUpdate<'_>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE aggregator_credentials
            SET access_token = $2, refresh_token = $3, token_expires_at = $4,
                auth_server_nonce = COALESCE($5, auth_server_nonce),
                pds_nonce = COALESCE($6, pds_nonce)
            WHERE did = $1
            "#,
        )
        .bind(did)
        .bind(update.access_token)
        .bind(update.refresh_token)
        .bind(update.token_expires_at)
        .bind(update.auth_server_nonce)
        .bind(update.pds_nonce)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke(&self, did: &str) -> Result<DateTime<Utc>> {
        let revoked_at: DateTime<Utc> = sqlx::query_scalar(
            "UPDATE aggregator_credentials SET revoked_at = NOW() WHERE did = $1 RETURNING revoked_at",
        )
        .bind(did)
        .fetch_one(&self.pool)
        .await?;
        Ok(revoked_at)
    }
}
