use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde::Deserialize;

use crate::crypto::sha256_base64url;
use crate::jwk::{verify_raw_ecdsa, Jwk};

use super::errors::DpopError;
use super::nonce_cache::{CheckAndStoreResult, NonceCache};
use super::types::{DpopProofClaims, ProofEngineConfig, VerifiedDpopProof};

#[derive(Debug, Deserialize)]
struct DpopHeader {
    typ: Option<String>,
    alg: String,
    jwk: Option<Jwk>,
}

/// Canonical algorithm <-> curve table (RFC 9449 + this core's supported set).
/// RSA is explicitly excluded for DPoP.
fn expected_curve(alg: &str) -> Option<&'static str> {
    match alg {
        "ES256K" => Some("secp256k1"),
        "ES256" => Some("P-256"),
        "ES384" => Some("P-384"),
        "ES512" => Some("P-521"),
        _ => None,
    }
}

fn verify_signature(alg: &str, jwk: &Jwk, signing_input: &[u8], sig_bytes: &[u8]) -> Result<(), DpopError> {
    verify_raw_ecdsa(alg, jwk, signing_input, sig_bytes).map_err(|_| DpopError::SignatureInvalid)
}

/// Strip query and fragment, lowercase scheme/host, drop default ports. Used
/// only to compare `htu` values for equality, never to reconstruct one.
fn normalize_htu(raw: &str) -> Result<String, DpopError> {
    let url = url::Url::parse(raw).map_err(|_| DpopError::ClaimMismatch("htu"))?;
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    let port = url
        .port()
        .filter(|p| !((scheme == "http" && *p == 80) || (scheme == "https" && *p == 443)));
    let mut out = format!("{scheme}://{host}");
    if let Some(port) = port {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path());
    Ok(out)
}

/// Parses, verifies and replay-checks DPoP proof JWTs (RFC 9449).
pub struct ProofEngine {
    config: ProofEngineConfig,
    nonce_cache: Arc<NonceCache>,
}

impl ProofEngine {
    pub fn new(config: ProofEngineConfig, nonce_cache: Arc<NonceCache>) -> Self {
        Self { config, nonce_cache }
    }

    /// Number of live (unexpired) entries in the replay cache — a cheap
    /// liveness probe for `/health`, not a health/unhealthy signal.
    pub fn nonce_cache_len(&self) -> usize {
        self.nonce_cache.len()
    }

    /// Verify a detached DPoP proof JWT against the request it is presented
    /// with. `access_token` is used only to check `ath` when present.
    pub fn verify_proof(
        &self,
        raw_proof_jwt: &str,
        expected_http_method: &str,
        expected_http_uri: &str,
        access_token: Option<&str>,
    ) -> Result<VerifiedDpopProof, DpopError> {
        let parts: Vec<&str> = raw_proof_jwt.split('.').collect();
        if parts.len() != 3 {
            return Err(DpopError::MalformedProof);
        }

        let header_json = URL_SAFE_NO_PAD.decode(parts[0]).map_err(|_| DpopError::MalformedProof)?;
        let header: DpopHeader = serde_json::from_slice(&header_json).map_err(|_| DpopError::MalformedProof)?;

        if !header.typ.as_deref().map(|t| t.eq_ignore_ascii_case("dpop+jwt")).unwrap_or(false) {
            return Err(DpopError::MalformedProof);
        }

        let curve = expected_curve(&header.alg).ok_or_else(|| DpopError::UnsupportedAlgorithm(header.alg.clone()))?;
        let jwk = header.jwk.ok_or(DpopError::MalformedProof)?;
        if jwk.kty != "EC" || !jwk.crv.as_deref().map(|c| c.eq_ignore_ascii_case(curve)).unwrap_or(false) {
            return Err(DpopError::AlgorithmCurveMismatch);
        }

        let payload_json = URL_SAFE_NO_PAD.decode(parts[1]).map_err(|_| DpopError::MalformedProof)?;
        let claims: DpopProofClaims = serde_json::from_slice(&payload_json).map_err(|_| DpopError::MalformedProof)?;

        let signing_input = format!("{}.{}", parts[0], parts[1]);
        let sig_bytes = URL_SAFE_NO_PAD.decode(parts[2]).map_err(|_| DpopError::MalformedProof)?;
        verify_signature(&header.alg, &jwk, signing_input.as_bytes(), &sig_bytes)?;

        let jti = claims.jti.filter(|j| !j.is_empty()).ok_or(DpopError::ClaimMismatch("jti"))?;
        let htm = claims.htm.ok_or(DpopError::ClaimMismatch("htm"))?;
        let htu = claims.htu.ok_or(DpopError::ClaimMismatch("htu"))?;
        let iat = claims.iat.ok_or(DpopError::ClaimMismatch("iat"))?;

        if !htm.eq_ignore_ascii_case(expected_http_method) {
            return Err(DpopError::ClaimMismatch("htm"));
        }
        if normalize_htu(&htu)? != normalize_htu(expected_http_uri)? {
            return Err(DpopError::ClaimMismatch("htu"));
        }

        let now = Utc::now().timestamp();
        if iat > now + self.config.max_clock_skew_seconds {
            return Err(DpopError::FromTheFuture);
        }
        if now - iat > self.config.max_proof_age_seconds {
            return Err(DpopError::Stale);
        }
        if let Some(exp) = claims.exp {
            if now > exp + self.config.max_clock_skew_seconds {
                return Err(DpopError::Stale);
            }
        }
        if let Some(nbf) = claims.nbf {
            if now < nbf - self.config.max_clock_skew_seconds {
                return Err(DpopError::FromTheFuture);
            }
        }

        if let Some(ath) = claims.ath.as_deref() {
            let token = access_token.ok_or(DpopError::AccessTokenHashMismatch)?;
            if ath != sha256_base64url(token.as_bytes()) {
                return Err(DpopError::AccessTokenHashMismatch);
            }
        }

        if self.nonce_cache.check_and_store(&jti) == CheckAndStoreResult::Replay {
            return Err(DpopError::Replayed);
        }

        let thumbprint = jwk.thumbprint().map_err(|_| DpopError::AlgorithmCurveMismatch)?;

        Ok(VerifiedDpopProof {
            jwk,
            thumbprint,
            jti,
            htm,
            htu,
            iat,
        })
    }

    /// Compare the proof's computed thumbprint against the thumbprint claim
    /// from the verified access token's confirmation field.
    pub fn verify_token_binding(&self, proof: &VerifiedDpopProof, expected_thumbprint: &str) -> Result<(), DpopError> {
        if proof.thumbprint == expected_thumbprint {
            Ok(())
        } else {
            Err(DpopError::ThumbprintMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::{signature::Signer, Signature, SigningKey};

    fn make_proof(htm: &str, htu: &str, jti: &str, iat_offset: i64, ath: Option<&str>) -> String {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let verifying_key = signing_key.verifying_key();
        let point = verifying_key.to_encoded_point(false);
        let x = URL_SAFE_NO_PAD.encode(point.x().unwrap());
        let y = URL_SAFE_NO_PAD.encode(point.y().unwrap());

        let header = serde_json::json!({
            "typ": "dpop+jwt",
            "alg": "ES256",
            "jwk": { "kty": "EC", "crv": "P-256", "x": x, "y": y },
        });
        let mut claims = serde_json::json!({
            "jti": jti,
            "htm": htm,
            "htu": htu,
            "iat": Utc::now().timestamp() + iat_offset,
        });
        if let Some(ath) = ath {
            claims["ath"] = serde_json::Value::String(ath.to_string());
        }

        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let signing_input = format!("{header_b64}.{payload_b64}");
        let sig: Signature = signing_key.sign(signing_input.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(sig.to_bytes());
        format!("{signing_input}.{sig_b64}")
    }

    fn engine() -> ProofEngine {
        ProofEngine::new(ProofEngineConfig::default(), NonceCache::new(300))
    }

    #[test]
    fn valid_proof_verifies() {
        let proof = make_proof("POST", "https://api.example.com/x", "jti-1", 0, None);
        let result = engine().verify_proof(&proof, "POST", "https://api.example.com/x", None);
        assert!(result.is_ok());
    }

    #[test]
    fn method_mismatch_is_rejected() {
        let proof = make_proof("POST", "https://api.example.com/x", "jti-2", 0, None);
        let result = engine().verify_proof(&proof, "GET", "https://api.example.com/x", None);
        assert_eq!(result.unwrap_err(), DpopError::ClaimMismatch("htm"));
    }

    #[test]
    fn replay_is_detected_on_second_use() {
        let engine = engine();
        let proof = make_proof("POST", "https://api.example.com/x", "jti-3", 0, None);
        assert!(engine.verify_proof(&proof, "POST", "https://api.example.com/x", None).is_ok());
        let result = engine.verify_proof(&proof, "POST", "https://api.example.com/x", None);
        assert_eq!(result.unwrap_err(), DpopError::Replayed);
    }

    #[test]
    fn future_iat_is_rejected() {
        let proof = make_proof("POST", "https://api.example.com/x", "jti-4", 120, None);
        let result = engine().verify_proof(&proof, "POST", "https://api.example.com/x", None);
        assert_eq!(result.unwrap_err(), DpopError::FromTheFuture);
    }

    #[test]
    fn stale_iat_is_rejected() {
        let proof = make_proof("POST", "https://api.example.com/x", "jti-5", -600, None);
        let result = engine().verify_proof(&proof, "POST", "https://api.example.com/x", None);
        assert_eq!(result.unwrap_err(), DpopError::Stale);
    }

    #[test]
    fn ath_mismatch_is_rejected() {
        let proof = make_proof("POST", "https://api.example.com/x", "jti-6", 0, Some("wrong"));
        let result = engine().verify_proof(&proof, "POST", "https://api.example.com/x", Some("the-access-token"));
        assert_eq!(result.unwrap_err(), DpopError::AccessTokenHashMismatch);
    }

    #[test]
    fn ath_match_succeeds() {
        let token = "the-access-token";
        let ath = sha256_base64url(token.as_bytes());
        let proof = make_proof("POST", "https://api.example.com/x", "jti-7", 0, Some(&ath));
        let result = engine().verify_proof(&proof, "POST", "https://api.example.com/x", Some(token));
        assert!(result.is_ok());
    }

    #[test]
    fn proxy_rewritten_htu_matches_after_normalization() {
        let proof = make_proof("POST", "https://api.example.com/x?ignored=1", "jti-8", 0, None);
        let result = engine().verify_proof(&proof, "POST", "https://api.example.com/x", None);
        assert!(result.is_ok());
    }

    #[test]
    fn algorithm_curve_mismatch_is_rejected_before_signature_check() {
        // ES256K alg with a P-256 curve jwk: must fail on curve binding, not signature.
        let signing_key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let verifying_key = signing_key.verifying_key();
        let point = verifying_key.to_encoded_point(false);
        let x = URL_SAFE_NO_PAD.encode(point.x().unwrap());
        let y = URL_SAFE_NO_PAD.encode(point.y().unwrap());

        let header = serde_json::json!({
            "typ": "dpop+jwt",
            "alg": "ES256K",
            "jwk": { "kty": "EC", "crv": "P-256", "x": x, "y": y },
        });
        let claims = serde_json::json!({
            "jti": "jti-9",
            "htm": "POST",
            "htu": "https://api.example.com/x",
            "iat": Utc::now().timestamp(),
        });
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let signing_input = format!("{header_b64}.{payload_b64}");
        let sig: Signature = signing_key.sign(signing_input.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(sig.to_bytes());
        let proof = format!("{signing_input}.{sig_b64}");

        let result = engine().verify_proof(&proof, "POST", "https://api.example.com/x", None);
        assert_eq!(result.unwrap_err(), DpopError::AlgorithmCurveMismatch);
    }
}
