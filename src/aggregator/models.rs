//! Aggregator and AggregatorCredentials entity shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A registered machine principal authorized to post into communities.
/// Created out-of-band via a domain-verification registration flow; this
/// core only reads and updates statistics, never creates or deletes one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregator {
    pub did: String,
    pub display_name: String,
    pub config: Value,
    pub communities_using: i64,
    pub posts_created: i64,
    pub last_indexed: Option<DateTime<Utc>>,
}

/// The three-state lifecycle of an Aggregator's API key, derived from
/// `key_hash`/`revoked_at` rather than stored directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    NoKey,
    Active,
    Revoked,
}

/// The confidential partner record of an Aggregator: its hashed API key plus
/// the embedded OAuth credentials that the key transparently drives.
///
/// Invariant: `{key_hash == "" && revoked_at.is_none()}` ⇒ [`KeyStatus::NoKey`];
/// `{key_hash != "" && revoked_at.is_none()}` ⇒ [`KeyStatus::Active`];
/// `revoked_at.is_some()` ⇒ [`KeyStatus::Revoked`] until a new key is issued.
#[derive(Debug, Clone)]
pub struct AggregatorCredentials {
    pub did: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub created_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub oauth: OAuthCredentialFields,
}

/// The embedded OAuth session fields, duplicated onto the credentials row as
/// a secondary copy — the session store is the authoritative copy.
#[derive(Debug, Clone, Default)]
pub struct OAuthCredentialFields {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub pds_url: Option<String>,
    pub auth_server_issuer: Option<String>,
    pub token_endpoint: Option<String>,
    pub dpop_private_key_multibase: Option<String>,
    pub auth_server_nonce: Option<String>,
    pub pds_nonce: Option<String>,
}

impl AggregatorCredentials {
    pub fn status(&self) -> KeyStatus {
        if self.revoked_at.is_some() {
            KeyStatus::Revoked
        } else if self.key_hash.is_empty() {
            KeyStatus::NoKey
        } else {
            KeyStatus::Active
        }
    }
}

/// The OAuth session paired 1:1 with an issued API key, keyed by
/// `{aggregator DID, session-id}` in the [`super::session_store::SessionStore`].
/// The well-known session-id used by the Aggregator API-Key Service is
/// `"apikey"` ([`super::key_service::APIKEY_SESSION_ID`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub pds_url: String,
    pub auth_server_issuer: String,
    pub token_endpoint: String,
    pub dpop_private_key_multibase: String,
    pub auth_server_nonce: Option<String>,
    pub pds_nonce: Option<String>,
}

/// Response shape for `getApiKey` / `getKeyInfo`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub has_key: bool,
    pub prefix: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}
