//! The Request Authenticator: `RequireAuth` and `OptionalAuth` axum
//! extractors implementing the DPoP-bound bearer token protocol.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::dpop::ProofEngine;
use crate::error::ApiError;
use crate::jwt::JwtVerifier;
use crate::principal::{Principal, VerifiedClaims};

/// Shared dependencies the authenticator needs, pulled out of `AppState` via
/// `FromRef` so the extractors stay decoupled from the rest of the app state.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_verifier: JwtVerifier,
    pub proof_engine: Arc<ProofEngine>,
}

/// Reject unauthenticated requests with `{error: "AuthenticationRequired"}`.
pub struct RequireAuth(pub Principal);

/// Attach a Principal if present and valid; otherwise pass through.
pub struct OptionalAuth(pub Option<Principal>);

fn extract_scheme_and_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::AuthenticationRequired("missing authorization header".into()))?;

    let mut split = header.splitn(2, ' ');
    let scheme = split.next().unwrap_or("");
    let token = split.next().unwrap_or("").trim();

    if !scheme.eq_ignore_ascii_case("dpop") {
        return Err(ApiError::AuthenticationRequired(
            "expected the DPoP authorization scheme".into(),
        ));
    }
    if token.is_empty() {
        return Err(ApiError::AuthenticationRequired("empty bearer token".into()));
    }
    Ok(token)
}

/// Reconstruct the external HTTP URI (scheme://host/path, no query or
/// fragment) honoring, in priority order: `Forwarded` (RFC 7239), then
/// `X-Forwarded-Proto`/`X-Forwarded-Host`. This service never terminates
/// TLS itself (no TLS-serving dependency anywhere in this crate — it is
/// always fronted by a reverse proxy), so a direct connection with neither
/// header present falls back to plain `http`.
fn reconstruct_external_uri(parts: &Parts) -> String {
    let path = parts.uri.path();

    if let Some((scheme, host)) = parse_forwarded_header(parts) {
        return format!("{scheme}://{host}{path}");
    }

    let proto = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let host = parts
        .headers
        .get("x-forwarded-host")
        .or_else(|| parts.headers.get(axum::http::header::HOST))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let (Some(proto), Some(host)) = (proto, host) {
        return format!("{proto}://{host}{path}");
    }

    let host = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}{path}")
}

/// Parse the `Forwarded` header (RFC 7239), tolerating mixed-case keys and
/// quoted values; if multiple forwarded elements are present, use the first.
fn parse_forwarded_header(parts: &Parts) -> Option<(String, String)> {
    let value = parts.headers.get("forwarded")?.to_str().ok()?;
    let first_element = value.split(',').next()?;

    let mut proto = None;
    let mut host = None;
    for pair in first_element.split(';') {
        let mut kv = pair.splitn(2, '=');
        let key = kv.next()?.trim().to_ascii_lowercase();
        let raw_value = kv.next()?.trim().trim_matches('"');
        match key.as_str() {
            "proto" => proto = Some(raw_value.to_string()),
            "host" => host = Some(raw_value.to_string()),
            _ => {}
        }
    }
    Some((proto?, host?))
}

struct VerificationOutcome {
    claims: VerifiedClaims,
    dpop_proof: Option<crate::dpop::VerifiedDpopProof>,
}

async fn verify_request(
    parts: &Parts,
    token: &str,
    auth: &AuthState,
) -> Result<VerificationOutcome, ApiError> {
    let config = AuthConfig::get();

    let claims = if config.skip_verify {
        parse_claims_without_verification(token)?
    } else {
        auth.jwt_verifier
            .verify(token)
            .await
            .map_err(|e| ApiError::AuthenticationRequired(e.to_string()))?
    };

    if config.skip_verify {
        return Ok(VerificationOutcome { claims, dpop_proof: None });
    }

    let dpop_header = parts
        .headers
        .get("dpop")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match (&claims.confirmation, dpop_header) {
        (Some(confirmation), Some(raw_proof)) => {
            let method = parts.method.as_str();
            let uri = reconstruct_external_uri(parts);
            let proof = auth
                .proof_engine
                .verify_proof(&raw_proof, method, &uri, Some(token))
                .map_err(|_| {
                    crate::metrics::record_dpop_failure();
                    ApiError::AuthenticationRequired("invalid DPoP proof".into())
                })?;
            auth.proof_engine
                .verify_token_binding(&proof, &confirmation.jkt)
                .map_err(|_| {
                    crate::metrics::record_dpop_failure();
                    ApiError::AuthenticationRequired("invalid DPoP proof".into())
                })?;
            crate::metrics::record_dpop_success();
            Ok(VerificationOutcome {
                claims,
                dpop_proof: Some(proof),
            })
        }
        (Some(_), None) => {
            crate::metrics::record_dpop_failure();
            Err(ApiError::AuthenticationRequired("DPoP proof required for this token".into()))
        }
        (None, Some(_)) => {
            tracing::warn!("DPoP header present without confirmation.jkt claim; ignoring (misconfigured client)");
            Ok(VerificationOutcome { claims, dpop_proof: None })
        }
        (None, None) => Ok(VerificationOutcome { claims, dpop_proof: None }),
    }
}

/// Dev-only: parse structural claims without verifying the signature. Still
/// enforces expiration; never consults DPoP.
fn parse_claims_without_verification(token: &str) -> Result<VerifiedClaims, ApiError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(ApiError::AuthenticationRequired("malformed token".into()));
    }
    let payload_json = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| ApiError::AuthenticationRequired("malformed token".into()))?;
    let raw: crate::jwt::claims::RawClaims =
        serde_json::from_slice(&payload_json).map_err(|_| ApiError::AuthenticationRequired("malformed token".into()))?;
    crate::jwt::claims::validate_claims(raw, true).map_err(|e| ApiError::AuthenticationRequired(e.to_string()))
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthState::from_ref(state);
        let token = extract_scheme_and_token(parts).map_err(|e| {
            crate::metrics::record_auth_failure();
            e
        })?.to_string();
        let outcome = verify_request(parts, &token, &auth).await.map_err(|e| {
            crate::metrics::record_auth_failure();
            e
        })?;
        crate::metrics::record_auth_success();
        Ok(RequireAuth(Principal::new(outcome.claims, token, outcome.dpop_proof)))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthState::from_ref(state);
        let Ok(token) = extract_scheme_and_token(parts) else {
            return Ok(OptionalAuth(None));
        };
        let token = token.to_string();
        match verify_request(parts, &token, &auth).await {
            Ok(outcome) => Ok(OptionalAuth(Some(Principal::new(outcome.claims, token, outcome.dpop_proof)))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}
