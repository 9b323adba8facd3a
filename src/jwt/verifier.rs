use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

use crate::config::AuthConfig;
use crate::jwk::verify_raw_ecdsa;
use crate::principal::VerifiedClaims;

use super::claims::{validate_claims, RawClaims};
use super::errors::JwtError;
use super::key_resolver::KeyResolver;

#[derive(Debug, Deserialize)]
struct JwtHeader {
    alg: String,
    kid: Option<String>,
}

fn is_asymmetric(alg: &str) -> bool {
    matches!(alg, "ES256" | "ES256K" | "ES384" | "ES512" | "RS256" | "RS384" | "RS512")
}

/// Verifies access tokens per the algorithm-selection rule: a token with a
/// `kid` must use asymmetric verification; a token without one may use HS256
/// only when its issuer is in the symmetric allowlist.
#[derive(Clone)]
pub struct JwtVerifier {
    resolver: Arc<dyn KeyResolver>,
}

impl JwtVerifier {
    pub fn new(resolver: Arc<dyn KeyResolver>) -> Self {
        Self { resolver }
    }

    /// Approximate number of cached JWKS entries, for `/health` reporting.
    pub fn jwks_cache_size(&self) -> u64 {
        self.resolver.cache_size()
    }

    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, JwtError> {
        let config = AuthConfig::get();

        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(JwtError::Malformed);
        }
        let header_json = URL_SAFE_NO_PAD.decode(parts[0]).map_err(|_| JwtError::Malformed)?;
        let header: JwtHeader = serde_json::from_slice(&header_json).map_err(|_| JwtError::Malformed)?;
        let payload_json = URL_SAFE_NO_PAD.decode(parts[1]).map_err(|_| JwtError::Malformed)?;
        let raw_claims: RawClaims = serde_json::from_slice(&payload_json).map_err(|_| JwtError::Malformed)?;
        let signing_input = format!("{}.{}", parts[0], parts[1]);
        let sig_bytes = URL_SAFE_NO_PAD.decode(parts[2]).map_err(|_| JwtError::Malformed)?;

        let issuer = raw_claims
            .iss
            .clone()
            .or_else(|| raw_claims.aud.as_ref().and_then(|a| a.as_str().map(str::to_string)))
            .ok_or(JwtError::InvalidIssuer)?;

        match header.kid {
            Some(_) => {
                if header.alg == "HS256" {
                    return Err(JwtError::SymmetricForbiddenWithKid);
                }
            }
            None => {
                if header.alg != "HS256" {
                    return Err(JwtError::UnsupportedAlgorithm(header.alg));
                }
                if !config.allows_hs256_issuer(&issuer) {
                    return Err(JwtError::IssuerNotAllowlisted(issuer));
                }
            }
        }

        if header.alg == "HS256" {
            let secret = config.pds_jwt_secret.as_deref().ok_or(JwtError::SecretNotConfigured)?;
            verify_hmac(secret, token)?;
        } else if is_asymmetric(&header.alg) {
            let resolved = self
                .resolver
                .fetch_public_key(&issuer, header.kid.as_deref())
                .await?;
            match header.alg.as_str() {
                "ES256" | "ES256K" | "ES384" | "ES512" => {
                    verify_raw_ecdsa(&header.alg, &resolved.jwk, signing_input.as_bytes(), &sig_bytes)
                        .map_err(|_| JwtError::SignatureInvalid)?;
                }
                "RS256" | "RS384" | "RS512" => {
                    verify_rsa(&header.alg, &resolved.jwk, token)?;
                }
                other => return Err(JwtError::UnsupportedAlgorithm(other.to_string())),
            }
        } else {
            return Err(JwtError::UnsupportedAlgorithm(header.alg));
        }

        validate_claims(raw_claims, config.is_dev_env)
    }
}

/// Verify an HS256-signed token with the process-wide shared secret. Claim
/// shape is re-checked afterward by [`validate_claims`]; here we only need
/// `decode` to perform the signature check itself.
fn verify_hmac(secret: &str, full_token: &str) -> Result<(), JwtError> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    decode::<serde_json::Value>(full_token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|_| JwtError::SignatureInvalid)?;
    Ok(())
}

/// Verify an RSA-signed token (RS256/RS384/RS512) against the resolved JWK.
fn verify_rsa(alg: &str, jwk: &crate::jwk::Jwk, full_token: &str) -> Result<(), JwtError> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let algorithm = match alg {
        "RS256" => Algorithm::RS256,
        "RS384" => Algorithm::RS384,
        "RS512" => Algorithm::RS512,
        other => return Err(JwtError::UnsupportedAlgorithm(other.to_string())),
    };
    let n = jwk.n.as_deref().ok_or(JwtError::SignatureInvalid)?;
    let e = jwk.e.as_deref().ok_or(JwtError::SignatureInvalid)?;
    let key = DecodingKey::from_rsa_components(n, e).map_err(|_| JwtError::SignatureInvalid)?;

    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    decode::<serde_json::Value>(full_token, &key, &validation).map_err(|_| JwtError::SignatureInvalid)?;
    Ok(())
}
