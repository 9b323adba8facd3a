//! Aggregator API-Key Service XRPC handlers: `createApiKey`, `getApiKey`,
//! `revokeApiKey`, `getMetrics`.

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ApiError;
use crate::middleware::RequireAuth;

use super::key_service::ApiKeyService;
use super::models::{KeyInfo, OAuthSession};
use super::repository::CredentialsRepository;

#[derive(Clone)]
pub struct AggregatorState {
    pub key_service: Arc<ApiKeyService>,
    pub repo: Arc<dyn CredentialsRepository>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyResponse {
    key: String,
    key_prefix: String,
    did: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetApiKeyResponse {
    has_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_info: Option<KeyInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeApiKeyResponse {
    revoked_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMetricsResponse {
    failed_last_used_updates: u64,
    failed_nonce_updates: u64,
}

async fn require_aggregator(state: &AggregatorState, did: &str) -> Result<(), ApiError> {
    let is_aggregator = state
        .repo
        .is_aggregator(did)
        .await
        .map_err(|e| ApiError::InternalServerError(anyhow::anyhow!(e)))?;
    if is_aggregator {
        Ok(())
    } else {
        Err(ApiError::AggregatorRequired(format!("{did} is not a registered aggregator")))
    }
}

pub async fn create_api_key(
    State(state): State<AggregatorState>,
    RequireAuth(principal): RequireAuth,
    Json(oauth_session): Json<OAuthSession>,
) -> Result<Json<CreateApiKeyResponse>, ApiError> {
    let did = principal.did();
    require_aggregator(&state, did).await?;

    let (key, key_prefix) = state.key_service.generate_key(did, oauth_session).await?;

    Ok(Json(CreateApiKeyResponse {
        key,
        key_prefix,
        did: did.to_string(),
        created_at: Utc::now(),
    }))
}

pub async fn get_api_key(
    State(state): State<AggregatorState>,
    RequireAuth(principal): RequireAuth,
) -> Result<Json<GetApiKeyResponse>, ApiError> {
    let did = principal.did();
    require_aggregator(&state, did).await?;

    let info = state.key_service.get_key_info(did).await?;
    let has_key = info.has_key;
    Ok(Json(GetApiKeyResponse {
        has_key,
        key_info: if has_key { Some(info) } else { None },
    }))
}

pub async fn revoke_api_key(
    State(state): State<AggregatorState>,
    RequireAuth(principal): RequireAuth,
) -> Result<Json<RevokeApiKeyResponse>, ApiError> {
    let did = principal.did();
    require_aggregator(&state, did).await?;

    let revoked_at = state.key_service.revoke_key(did).await?;
    Ok(Json(RevokeApiKeyResponse { revoked_at }))
}

pub async fn get_metrics(
    State(state): State<AggregatorState>,
    RequireAuth(principal): RequireAuth,
) -> Result<Json<GetMetricsResponse>, ApiError> {
    require_aggregator(&state, principal.did()).await?;

    let (failed_last_used_updates, failed_nonce_updates) = state.key_service.metrics().snapshot();
    Ok(Json(GetMetricsResponse {
        failed_last_used_updates,
        failed_nonce_updates,
    }))
}
