//! Outbound DPoP proof generation, used when the Aggregator API-Key Service
//! drives a token refresh against a federated authorization server on the
//! caller's behalf. Mirrors the claim shape [`crate::dpop::engine::ProofEngine`]
//! verifies, but signs rather than checks.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;

use crate::jwk::Jwk;

/// multicodec prefix for a p256 (P-256) private key, per the multikey spec.
const P256_PRIV_MULTICODE: [u8; 2] = [0x86, 0x26];

#[derive(Debug, thiserror::Error)]
pub enum DpopClientError {
    #[error("malformed multibase-encoded private key: {0}")]
    MalformedKey(String),
    #[error("unrecognized private-key multicodec prefix")]
    UnrecognizedCodec,
}

/// Build and sign a fresh DPoP proof JWT for an outbound `htm`/`htu` request,
/// embedding `nonce` as the `nonce` claim when the authorization server has
/// issued one.
pub fn generate_proof(
    private_key_multibase: &str,
    htm: &str,
    htu: &str,
    nonce: Option<&str>,
) -> Result<String, DpopClientError> {
    let signing_key = decode_signing_key(private_key_multibase)?;
    let verifying_key = signing_key.verifying_key();
    let point = verifying_key.to_encoded_point(false);
    let x = URL_SAFE_NO_PAD.encode(point.x().ok_or(DpopClientError::UnrecognizedCodec)?);
    let y = URL_SAFE_NO_PAD.encode(point.y().ok_or(DpopClientError::UnrecognizedCodec)?);
    let jwk = Jwk::ec("P-256", x, y);

    let header = serde_json::json!({
        "typ": "dpop+jwt",
        "alg": "ES256",
        "jwk": jwk,
    });

    let mut jti_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut jti_bytes);
    let jti = hex::encode(jti_bytes);

    let mut claims = serde_json::json!({
        "jti": jti,
        "htm": htm,
        "htu": htu,
        "iat": chrono::Utc::now().timestamp(),
    });
    if let Some(nonce) = nonce {
        claims["nonce"] = serde_json::Value::String(nonce.to_string());
    }

    let header_b64 = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&header).map_err(|e| DpopClientError::MalformedKey(e.to_string()))?,
    );
    let payload_b64 = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&claims).map_err(|e| DpopClientError::MalformedKey(e.to_string()))?,
    );
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());
    Ok(format!("{signing_input}.{sig_b64}"))
}

fn decode_signing_key(private_key_multibase: &str) -> Result<SigningKey, DpopClientError> {
    let (_, bytes) =
        multibase::decode(private_key_multibase).map_err(|e| DpopClientError::MalformedKey(e.to_string()))?;
    if bytes.len() < 2 || bytes[..2] != P256_PRIV_MULTICODE {
        return Err(DpopClientError::UnrecognizedCodec);
    }
    SigningKey::from_slice(&bytes[2..]).map_err(|e| DpopClientError::MalformedKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::elliptic_curve::generic_array::GenericArray;

    fn sample_key_multibase() -> String {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let scalar_bytes = signing_key.to_bytes();
        let mut prefixed = P256_PRIV_MULTICODE.to_vec();
        prefixed.extend_from_slice(&scalar_bytes);
        multibase::encode(multibase::Base::Base58Btc, prefixed)
    }

    #[test]
    fn generated_proof_has_three_segments_and_embedded_jwk() {
        let key = sample_key_multibase();
        let proof = generate_proof(&key, "POST", "https://as.example.com/token", None).unwrap();
        let parts: Vec<&str> = proof.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header_json = URL_SAFE_NO_PAD.decode(parts[0]).unwrap();
        let header: serde_json::Value = serde_json::from_slice(&header_json).unwrap();
        assert_eq!(header["typ"], "dpop+jwt");
        assert_eq!(header["jwk"]["kty"], "EC");
    }

    #[test]
    fn nonce_is_embedded_when_provided() {
        let key = sample_key_multibase();
        let proof = generate_proof(&key, "POST", "https://as.example.com/token", Some("server-nonce")).unwrap();
        let parts: Vec<&str> = proof.split('.').collect();
        let payload_json = URL_SAFE_NO_PAD.decode(parts[1]).unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&payload_json).unwrap();
        assert_eq!(payload["nonce"], "server-nonce");
    }

    #[test]
    fn unrecognized_codec_is_rejected() {
        let bad = multibase::encode(multibase::Base::Base58Btc, vec![0xff, 0xff, 1, 2, 3]);
        assert!(generate_proof(&bad, "POST", "https://as.example.com/token", None).is_err());
    }

    #[test]
    fn round_trip_verifies_against_its_own_embedded_jwk() {
        let key = sample_key_multibase();
        let proof = generate_proof(&key, "POST", "https://as.example.com/token", None).unwrap();
        let parts: Vec<&str> = proof.split('.').collect();
        let header_json = URL_SAFE_NO_PAD.decode(parts[0]).unwrap();
        let header: serde_json::Value = serde_json::from_slice(&header_json).unwrap();
        let x = header["jwk"]["x"].as_str().unwrap();
        let y = header["jwk"]["y"].as_str().unwrap();

        let x_bytes = URL_SAFE_NO_PAD.decode(x).unwrap();
        let y_bytes = URL_SAFE_NO_PAD.decode(y).unwrap();
        let mut sec1 = vec![0x04u8];
        sec1.extend_from_slice(&x_bytes);
        sec1.extend_from_slice(&y_bytes);
        let verifying_key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1).unwrap();

        let signing_input = format!("{}.{}", parts[0], parts[1]);
        let sig_bytes = URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        let signature = Signature::from_bytes(GenericArray::from_slice(&sig_bytes)).unwrap();
        use p256::ecdsa::signature::Verifier;
        assert!(verifying_key.verify(signing_input.as_bytes(), &signature).is_ok());
    }
}
