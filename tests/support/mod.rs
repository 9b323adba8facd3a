//! Shared fixtures for the integration suite: manual JWS construction for
//! DPoP proofs and access tokens, mirroring the style already used by
//! `dpop::engine`'s own unit tests, plus a one-JWK `KeyResolver` double.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use serde_json::json;

use coves_auth::dpop::{nonce_cache::NonceCache, ProofEngine, ProofEngineConfig};
use coves_auth::jwk::Jwk;
use coves_auth::jwt::errors::KeyResolverError;
use coves_auth::jwt::key_resolver::ResolvedKey;
use coves_auth::jwt::{JwtVerifier, KeyResolver};
use coves_auth::middleware::AuthState;

pub fn ec_jwk(signing_key: &SigningKey) -> Jwk {
    let verifying_key = signing_key.verifying_key();
    let point = verifying_key.to_encoded_point(false);
    let x = URL_SAFE_NO_PAD.encode(point.x().unwrap());
    let y = URL_SAFE_NO_PAD.encode(point.y().unwrap());
    Jwk::ec("P-256", x, y)
}

pub fn dpop_jwk_thumbprint(signing_key: &SigningKey) -> String {
    ec_jwk(signing_key).thumbprint().unwrap()
}

fn sign_compact(signing_key: &SigningKey, header: &serde_json::Value, claims: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).unwrap());
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    let signing_input = format!("{header_b64}.{payload_b64}");
    let sig: Signature = signing_key.sign(signing_input.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(sig.to_bytes());
    format!("{signing_input}.{sig_b64}")
}

/// A DPoP proof JWT bound to `signing_key`, so a caller can separately embed
/// that same key's thumbprint as a token's `cnf.jkt`.
pub fn dpop_proof_with_key(signing_key: &SigningKey, htm: &str, htu: &str, jti: &str, iat_offset: i64) -> String {
    let jwk = ec_jwk(signing_key);
    let header = json!({
        "typ": "dpop+jwt",
        "alg": "ES256",
        "jwk": { "kty": "EC", "crv": jwk.crv, "x": jwk.x, "y": jwk.y },
    });
    let claims = json!({
        "jti": jti,
        "htm": htm,
        "htu": htu,
        "iat": Utc::now().timestamp() + iat_offset,
    });
    sign_compact(signing_key, &header, &claims)
}

/// A genuine ES256 access token, `kid`-bearing so the verifier takes the
/// asymmetric path, optionally carrying a `cnf.jkt` confirmation claim.
pub fn make_access_token(signing_key: &SigningKey, kid: &str, sub: &str, iss: &str, cnf_jkt: Option<&str>) -> String {
    let header = json!({ "alg": "ES256", "kid": kid });
    let mut claims = json!({
        "iss": iss,
        "sub": sub,
        "aud": iss,
        "exp": Utc::now().timestamp() + 3600,
        "iat": Utc::now().timestamp(),
        "scope": "atproto",
    });
    if let Some(jkt) = cnf_jkt {
        claims["cnf"] = json!({ "jkt": jkt });
    }
    sign_compact(signing_key, &header, &claims)
}

/// The algorithm-confusion attack token: `alg: "none"`, no `kid`, no
/// signature, with an attacker-chosen `cnf.jkt` pointing at a DPoP key the
/// attacker actually holds.
pub fn none_alg_token(sub: &str, iss: &str, cnf_jkt: &str) -> String {
    let header = json!({ "alg": "none" });
    let claims = json!({
        "iss": iss,
        "sub": sub,
        "aud": iss,
        "exp": Utc::now().timestamp() + 3600,
        "iat": Utc::now().timestamp(),
        "scope": "atproto",
        "cnf": { "jkt": cnf_jkt },
    });
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    format!("{header_b64}.{payload_b64}.")
}

/// Hands back one fixed JWK regardless of issuer/kid — integration tests
/// control both the token and what the resolver answers with.
pub struct StaticKeyResolver {
    jwk: Jwk,
}

impl StaticKeyResolver {
    pub fn new(jwk: Jwk) -> Self {
        Self { jwk }
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn fetch_public_key(&self, _issuer: &str, _kid: Option<&str>) -> Result<ResolvedKey, KeyResolverError> {
        Ok(ResolvedKey { jwk: self.jwk.clone() })
    }
}

pub fn auth_state(resolver: Arc<dyn KeyResolver>) -> AuthState {
    AuthState {
        jwt_verifier: JwtVerifier::new(resolver),
        proof_engine: Arc::new(ProofEngine::new(ProofEngineConfig::default(), NonceCache::new(300))),
    }
}
