//! OAuth session storage, keyed by `{aggregator DID, session-id}`.
//!
//! The session store is the authoritative copy of an Aggregator's embedded
//! OAuth credentials; [`super::models::AggregatorCredentials::oauth`] is a
//! secondary copy written best-effort alongside it.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use super::models::OAuthSession;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, aggregator_did: &str, session_id: &str, session: &OAuthSession) -> Result<()>;
    async fn load_session(&self, aggregator_did: &str, session_id: &str) -> Result<Option<OAuthSession>>;
    async fn delete_session(&self, aggregator_did: &str, session_id: &str) -> Result<()>;
}

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn save_session(&self, aggregator_did: &str, session_id: &str, session: &OAuthSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO oauth_sessions
                (aggregator_did, session_id, access_token, refresh_token, expires_at,
                 pds_url, auth_server_issuer, token_endpoint, dpop_private_key_multibase,
                 auth_server_nonce, pds_nonce, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (aggregator_did, session_id) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                pds_url = EXCLUDED.pds_url,
                auth_server_issuer = EXCLUDED.auth_server_issuer,
                token_endpoint = EXCLUDED.token_endpoint,
                dpop_private_key_multibase = EXCLUDED.dpop_private_key_multibase,
                auth_server_nonce = EXCLUDED.auth_server_nonce,
                pds_nonce = EXCLUDED.pds_nonce,
                updated_at = NOW()
            "#,
        )
        .bind(aggregator_did)
        .bind(session_id)
        .bind(&session.access_token)
        .bind(&session.refresh_token)
        .bind(session.expires_at)
        .bind(&session.pds_url)
        .bind(&session.auth_server_issuer)
        .bind(&session.token_endpoint)
        .bind(&session.dpop_private_key_multibase)
        .bind(&session.auth_server_nonce)
        .bind(&session.pds_nonce)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_session(&self, aggregator_did: &str, session_id: &str) -> Result<Option<OAuthSession>> {
        let row = sqlx::query_as::<_, OAuthSessionRow>(
            r#"
            SELECT access_token, refresh_token, expires_at, pds_url, auth_server_issuer,
                   token_endpoint, dpop_private_key_multibase, auth_server_nonce, pds_nonce
            FROM oauth_sessions
            WHERE aggregator_did = $1 AND session_id = $2
            "#,
        )
        .bind(aggregator_did)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(OAuthSessionRow::into_session))
    }

    async fn delete_session(&self, aggregator_did: &str, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM oauth_sessions WHERE aggregator_did = $1 AND session_id = $2")
            .bind(aggregator_did)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct OAuthSessionRow {
    access_token: String,
    refresh_token: String,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pds_url: String,
    auth_server_issuer: String,
    token_endpoint: String,
    dpop_private_key_multibase: String,
    auth_server_nonce: Option<String>,
    pds_nonce: Option<String>,
}

impl OAuthSessionRow {
    fn into_session(self) -> OAuthSession {
        OAuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
            pds_url: self.pds_url,
            auth_server_issuer: self.auth_server_issuer,
            token_endpoint: self.token_endpoint,
            dpop_private_key_multibase: self.dpop_private_key_multibase,
            auth_server_nonce: self.auth_server_nonce,
            pds_nonce: self.pds_nonce,
        }
    }
}
