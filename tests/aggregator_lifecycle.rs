//! The Aggregator API-Key Service lifecycle — create, read, revoke, and
//! re-create — exercised through real axum routing with `RequireAuth` in
//! front of every handler, backed by in-memory capability doubles.

mod support;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::FromRef,
    http::{Request, StatusCode},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use p256::ecdsa::SigningKey;
use tower::ServiceExt;

use coves_auth::aggregator::{
    handlers::{create_api_key, get_api_key, get_metrics, revoke_api_key},
    models::{AggregatorCredentials, OAuthCredentialFields, OAuthSession},
    repository::{CredentialsRepository, TokenUpdate},
    session_store::SessionStore,
    AggregatorState, ApiKeyService,
};
use coves_auth::jwt::KeyResolver;
use coves_auth::middleware::AuthState;

use support::{auth_state, dpop_jwk_thumbprint, dpop_proof_with_key, ec_jwk, make_access_token, StaticKeyResolver};

#[derive(Default)]
struct TestCredentialsRepository {
    aggregators: Mutex<HashSet<String>>,
    credentials: Mutex<HashMap<String, AggregatorCredentials>>,
}

impl TestCredentialsRepository {
    fn register_aggregator(&self, did: &str) {
        self.aggregators.lock().insert(did.to_string());
    }
}

#[async_trait::async_trait]
impl CredentialsRepository for TestCredentialsRepository {
    async fn is_aggregator(&self, did: &str) -> anyhow::Result<bool> {
        Ok(self.aggregators.lock().contains(did))
    }

    async fn get_by_did(&self, did: &str) -> anyhow::Result<Option<AggregatorCredentials>> {
        Ok(self.credentials.lock().get(did).cloned())
    }

    async fn get_by_key_hash(&self, key_hash: &str) -> anyhow::Result<Option<AggregatorCredentials>> {
        Ok(self.credentials.lock().values().find(|c| c.key_hash == key_hash).cloned())
    }

    async fn save_new_key(
        &self,
        did: &str,
        key_hash: &str,
        key_prefix: &str,
        oauth: &OAuthCredentialFields,
    ) -> anyhow::Result<()> {
        let mut creds = self.credentials.lock();
        let entry = creds.entry(did.to_string()).or_insert_with(|| AggregatorCredentials {
            did: did.to_string(),
            key_hash: String::new(),
            key_prefix: String::new(),
            created_at: None,
            last_used_at: None,
            revoked_at: None,
            oauth: OAuthCredentialFields::default(),
        });
        entry.key_hash = key_hash.to_string();
        entry.key_prefix = key_prefix.to_string();
        entry.created_at = Some(Utc::now());
        entry.revoked_at = None;
        entry.last_used_at = None;
        entry.oauth = oauth.clone();
        Ok(())
    }

    async fn update_last_used_at(&self, did: &str) -> anyhow::Result<()> {
        if let Some(c) = self.credentials.lock().get_mut(did) {
            c.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_oauth_tokens(&self, did: &str, update: TokenUpdate<'_>) -> anyhow::Result<()> {
        if let Some(c) = self.credentials.lock().get_mut(did) {
            c.oauth.access_token = Some(update.access_token.to_string());
            c.oauth.refresh_token = Some(update.refresh_token.to_string());
            c.oauth.token_expires_at = Some(update.token_expires_at);
        }
        Ok(())
    }

    async fn revoke(&self, did: &str) -> anyhow::Result<DateTime<Utc>> {
        let now = Utc::now();
        if let Some(c) = self.credentials.lock().get_mut(did) {
            c.revoked_at = Some(now);
        }
        Ok(now)
    }
}

#[derive(Default)]
struct TestSessionStore {
    sessions: Mutex<HashMap<(String, String), OAuthSession>>,
}

#[async_trait::async_trait]
impl SessionStore for TestSessionStore {
    async fn save_session(&self, aggregator_did: &str, session_id: &str, session: &OAuthSession) -> anyhow::Result<()> {
        self.sessions
            .lock()
            .insert((aggregator_did.to_string(), session_id.to_string()), session.clone());
        Ok(())
    }

    async fn load_session(&self, aggregator_did: &str, session_id: &str) -> anyhow::Result<Option<OAuthSession>> {
        Ok(self
            .sessions
            .lock()
            .get(&(aggregator_did.to_string(), session_id.to_string()))
            .cloned())
    }

    async fn delete_session(&self, aggregator_did: &str, session_id: &str) -> anyhow::Result<()> {
        self.sessions.lock().remove(&(aggregator_did.to_string(), session_id.to_string()));
        Ok(())
    }
}

#[derive(Clone, FromRef)]
struct AppState {
    auth: AuthState,
    aggregator: AggregatorState,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/xrpc/social.coves.aggregator.createApiKey", post(create_api_key))
        .route("/xrpc/social.coves.aggregator.getApiKey", get(get_api_key))
        .route("/xrpc/social.coves.aggregator.revokeApiKey", post(revoke_api_key))
        .route("/xrpc/social.coves.aggregator.getMetrics", get(get_metrics))
        .with_state(state)
}

fn sample_oauth_session() -> OAuthSession {
    OAuthSession {
        access_token: "at-initial".to_string(),
        refresh_token: "rt-initial".to_string(),
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        pds_url: "https://pds.example.com".to_string(),
        auth_server_issuer: "https://issuer.example.com".to_string(),
        token_endpoint: "https://issuer.example.com/token".to_string(),
        dpop_private_key_multibase: "z-fake-key".to_string(),
        auth_server_nonce: None,
        pds_nonce: None,
    }
}

async fn to_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn full_api_key_lifecycle_through_real_routing() {
    let did = "did:plc:aggregator-lifecycle";
    let repo = Arc::new(TestCredentialsRepository::default());
    repo.register_aggregator(did);
    let sessions = Arc::new(TestSessionStore::default());
    let key_service = Arc::new(ApiKeyService::new(repo.clone(), sessions));

    let jwt_key = SigningKey::random(&mut rand::thread_rng());
    let dpop_key = SigningKey::random(&mut rand::thread_rng());
    let dpop_thumbprint = dpop_jwk_thumbprint(&dpop_key);
    let resolver: Arc<dyn KeyResolver> = Arc::new(StaticKeyResolver::new(ec_jwk(&jwt_key)));

    let state = AppState {
        auth: auth_state(resolver),
        aggregator: AggregatorState {
            key_service,
            repo: repo.clone() as Arc<dyn CredentialsRepository>,
        },
    };

    let signed_request = |method: &'static str, path: &'static str, jti: &str, body: Option<Vec<u8>>| {
        let token = make_access_token(&jwt_key, "key-1", did, "https://issuer.example.com", Some(&dpop_thumbprint));
        let uri = format!("http://test.example.com{path}");
        let proof = dpop_proof_with_key(&dpop_key, method, &uri, jti, 0);
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "test.example.com")
            .header("authorization", format!("DPoP {token}"))
            .header("dpop", proof);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        builder.body(body.map(Body::from).unwrap_or_else(Body::empty)).unwrap()
    };

    // createApiKey
    let create_body = serde_json::to_vec(&sample_oauth_session()).unwrap();
    let request = signed_request(
        "POST",
        "/xrpc/social.coves.aggregator.createApiKey",
        "create-1",
        Some(create_body),
    );
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = to_json(response).await;
    assert_eq!(created["did"], did);
    assert!(created["key"].as_str().unwrap().starts_with("ckapi_"));

    // getApiKey: active
    let request = signed_request("GET", "/xrpc/social.coves.aggregator.getApiKey", "get-1", None);
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info = to_json(response).await;
    assert_eq!(info["hasKey"], true);
    assert_eq!(info["keyInfo"]["isRevoked"], false);

    // revokeApiKey
    let request = signed_request("POST", "/xrpc/social.coves.aggregator.revokeApiKey", "revoke-1", None);
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // getApiKey: now revoked
    let request = signed_request("GET", "/xrpc/social.coves.aggregator.getApiKey", "get-2", None);
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info = to_json(response).await;
    assert_eq!(info["hasKey"], true);
    assert_eq!(info["keyInfo"]["isRevoked"], true);

    // revoking an already-revoked key fails
    let request = signed_request("POST", "/xrpc/social.coves.aggregator.revokeApiKey", "revoke-2", None);
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // createApiKey again: regenerates an active key
    let create_body = serde_json::to_vec(&sample_oauth_session()).unwrap();
    let request = signed_request(
        "POST",
        "/xrpc/social.coves.aggregator.createApiKey",
        "create-2",
        Some(create_body),
    );
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = signed_request("GET", "/xrpc/social.coves.aggregator.getApiKey", "get-3", None);
    let response = router(state.clone()).oneshot(request).await.unwrap();
    let info = to_json(response).await;
    assert_eq!(info["hasKey"], true);
    assert_eq!(info["keyInfo"]["isRevoked"], false);

    // getMetrics
    let request = signed_request("GET", "/xrpc/social.coves.aggregator.getMetrics", "metrics-1", None);
    let response = router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let metrics = to_json(response).await;
    assert_eq!(metrics["failedLastUsedUpdates"], 0);
}

#[tokio::test]
async fn non_aggregator_principal_is_forbidden() {
    let did = "did:plc:not-an-aggregator";
    let repo = Arc::new(TestCredentialsRepository::default());
    let sessions = Arc::new(TestSessionStore::default());
    let key_service = Arc::new(ApiKeyService::new(repo.clone(), sessions));

    let jwt_key = SigningKey::random(&mut rand::thread_rng());
    let dpop_key = SigningKey::random(&mut rand::thread_rng());
    let dpop_thumbprint = dpop_jwk_thumbprint(&dpop_key);
    let resolver: Arc<dyn KeyResolver> = Arc::new(StaticKeyResolver::new(ec_jwk(&jwt_key)));

    let state = AppState {
        auth: auth_state(resolver),
        aggregator: AggregatorState {
            key_service,
            repo: repo as Arc<dyn CredentialsRepository>,
        },
    };

    let token = make_access_token(&jwt_key, "key-1", did, "https://issuer.example.com", Some(&dpop_thumbprint));
    let uri = "http://test.example.com/xrpc/social.coves.aggregator.getApiKey";
    let proof = dpop_proof_with_key(&dpop_key, "GET", uri, "forbidden-1", 0);
    let request = Request::builder()
        .method("GET")
        .uri("/xrpc/social.coves.aggregator.getApiKey")
        .header("host", "test.example.com")
        .header("authorization", format!("DPoP {token}"))
        .header("dpop", proof)
        .body(Body::empty())
        .unwrap();

    let response = router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
