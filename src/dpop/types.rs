use serde::Deserialize;

use crate::jwk::Jwk;

/// Timing and policy knobs for the Proof Engine. Kept as a plain struct
/// (rather than reading the environment directly) so the verifier stays
/// testable with arbitrary clocks and policies.
#[derive(Debug, Clone, Copy)]
pub struct ProofEngineConfig {
    pub max_clock_skew_seconds: i64,
    pub max_proof_age_seconds: i64,
}

impl Default for ProofEngineConfig {
    fn default() -> Self {
        Self {
            max_clock_skew_seconds: 30,
            max_proof_age_seconds: 5 * 60,
        }
    }
}

/// Whether DPoP is required, optional, or not consulted at all for a given
/// verification path. `RequireAuth`/`OptionalAuth` both route through the
/// same engine; this only changes how absence of a proof is treated upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpopPolicy {
    pub require_ath: bool,
}

impl Default for DpopPolicy {
    fn default() -> Self {
        Self { require_ath: true }
    }
}

/// The raw claims of a DPoP proof JWT, as deserialized prior to validation.
#[derive(Debug, Deserialize)]
pub struct DpopProofClaims {
    pub jti: Option<String>,
    pub htm: Option<String>,
    pub htu: Option<String>,
    pub iat: Option<i64>,
    pub exp: Option<i64>,
    pub nbf: Option<i64>,
    pub ath: Option<String>,
}

/// A fully-validated DPoP proof, attached to a [`crate::principal::Principal`]
/// when verification succeeds.
#[derive(Debug, Clone)]
pub struct VerifiedDpopProof {
    pub jwk: Jwk,
    pub thumbprint: String,
    pub jti: String,
    pub htm: String,
    pub htu: String,
    pub iat: i64,
}
