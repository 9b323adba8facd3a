//! Shared JWK representation and RFC 7638 canonical thumbprint.
//!
//! Used by both the DPoP Proof Engine (thumbprinting a presenter's key) and
//! the confirmation-claim check (thumbprinting the same key again to compare
//! against `cnf.jkt`) — both call sites must compute byte-identical output.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::crypto::sha256_base64url;

/// A public key in JSON Web Key form, restricted to the members this crate
/// ever needs: EC (including secp256k1), RSA, and OKP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JwkError {
    #[error("unsupported or incomplete jwk for thumbprinting")]
    Unsupported,
}

impl Jwk {
    /// RFC 7638 canonical thumbprint: serialize only the key-type-specific
    /// required members, keys in lexicographic order, no whitespace, SHA-256,
    /// base64url without padding.
    pub fn thumbprint(&self) -> Result<String, JwkError> {
        let canonical = match self.kty.as_str() {
            "EC" => {
                let crv = self.crv.as_deref().ok_or(JwkError::Unsupported)?;
                let x = self.x.as_deref().ok_or(JwkError::Unsupported)?;
                let y = self.y.as_deref().ok_or(JwkError::Unsupported)?;
                format!(
                    r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
                    crv, x, y
                )
            }
            "RSA" => {
                let e = self.e.as_deref().ok_or(JwkError::Unsupported)?;
                let n = self.n.as_deref().ok_or(JwkError::Unsupported)?;
                format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, e, n)
            }
            "OKP" => {
                let crv = self.crv.as_deref().ok_or(JwkError::Unsupported)?;
                let x = self.x.as_deref().ok_or(JwkError::Unsupported)?;
                format!(r#"{{"crv":"{}","kty":"OKP","x":"{}"}}"#, crv, x)
            }
            _ => return Err(JwkError::Unsupported),
        };
        Ok(sha256_base64url(canonical.as_bytes()))
    }

    pub fn ec(crv: impl Into<String>, x: impl Into<String>, y: impl Into<String>) -> Self {
        Self {
            kty: "EC".to_string(),
            crv: Some(crv.into()),
            x: Some(x.into()),
            y: Some(y.into()),
            n: None,
            e: None,
            kid: None,
            alg: None,
        }
    }

    /// The curve this key claims, normalized for the `alg<->crv` binding
    /// tables used by both the DPoP engine and the JWT verifier.
    pub fn curve(&self) -> Option<&str> {
        self.crv.as_deref()
    }
}

/// Verify a raw ECDSA JOSE signature (`R || S`, no ASN.1 wrapping) over
/// `signing_input` using the curve implied by `alg`. Shared by the DPoP Proof
/// Engine and the JWT Verifier's DID-resolved-key path, since neither ES256K
/// nor lenient low/high-S acceptance is available through `jsonwebtoken`.
///
/// Standard ECDSA verification accepts both low-S and high-S signatures
/// mathematically; no extra normalization step is needed for leniency.
pub fn verify_raw_ecdsa(alg: &str, jwk: &Jwk, signing_input: &[u8], sig_bytes: &[u8]) -> Result<(), JwkError> {
    let x = URL_SAFE_NO_PAD
        .decode(jwk.x.as_deref().ok_or(JwkError::Unsupported)?)
        .map_err(|_| JwkError::Unsupported)?;
    let y = URL_SAFE_NO_PAD
        .decode(jwk.y.as_deref().ok_or(JwkError::Unsupported)?)
        .map_err(|_| JwkError::Unsupported)?;

    match alg {
        "ES256" => {
            use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
            use p256::EncodedPoint;
            let ep = EncodedPoint::from_affine_coordinates(
                p256::FieldBytes::from_slice(&x),
                p256::FieldBytes::from_slice(&y),
                false,
            );
            let vk = VerifyingKey::from_encoded_point(&ep).map_err(|_| JwkError::Unsupported)?;
            let sig = Signature::from_slice(sig_bytes).map_err(|_| JwkError::Unsupported)?;
            vk.verify(signing_input, &sig).map_err(|_| JwkError::Unsupported)
        }
        "ES256K" => {
            use k256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
            use k256::EncodedPoint;
            let ep = EncodedPoint::from_affine_coordinates(
                k256::FieldBytes::from_slice(&x),
                k256::FieldBytes::from_slice(&y),
                false,
            );
            let vk = VerifyingKey::from_encoded_point(&ep).map_err(|_| JwkError::Unsupported)?;
            let sig = Signature::from_slice(sig_bytes).map_err(|_| JwkError::Unsupported)?;
            vk.verify(signing_input, &sig).map_err(|_| JwkError::Unsupported)
        }
        "ES384" => {
            use p384::ecdsa::{signature::Verifier, Signature, VerifyingKey};
            use p384::EncodedPoint;
            let ep = EncodedPoint::from_affine_coordinates(
                p384::FieldBytes::from_slice(&x),
                p384::FieldBytes::from_slice(&y),
                false,
            );
            let vk = VerifyingKey::from_encoded_point(&ep).map_err(|_| JwkError::Unsupported)?;
            let sig = Signature::from_slice(sig_bytes).map_err(|_| JwkError::Unsupported)?;
            vk.verify(signing_input, &sig).map_err(|_| JwkError::Unsupported)
        }
        "ES512" => {
            use p521::ecdsa::{signature::Verifier, Signature, VerifyingKey};
            use p521::EncodedPoint;
            let ep = EncodedPoint::from_affine_coordinates(
                p521::FieldBytes::from_slice(&x),
                p521::FieldBytes::from_slice(&y),
                false,
            );
            let vk = VerifyingKey::from_encoded_point(&ep).map_err(|_| JwkError::Unsupported)?;
            let sig = Signature::from_slice(sig_bytes).map_err(|_| JwkError::Unsupported)?;
            vk.verify(signing_input, &sig).map_err(|_| JwkError::Unsupported)
        }
        _ => Err(JwkError::Unsupported),
    }
}
