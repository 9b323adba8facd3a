//! The verified caller of a request.
//!
//! A [`Principal`] exists only after full cryptographic verification; there
//! is no constructor that takes unverified claims. This is enforced by
//! keeping `claims` private and only building a `Principal` from a
//! [`VerifiedClaims`] that the JWT verifier produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dpop::types::VerifiedDpopProof;

/// RFC 7800 confirmation claim: exactly one member, a JWK thumbprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Confirmation {
    pub jkt: String,
}

/// The standard claim set validated by the JWT Verifier.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    pub subject: String,
    pub issuer: String,
    pub audience: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub confirmation: Option<Confirmation>,
}

/// A fully-authenticated caller, attached to the request context.
///
/// Downstream handlers read `did`, `claims`, `raw_token` and the optional
/// `dpop_proof` via typed accessors on the request; absence of a `Principal`
/// is the unauthenticated state.
#[derive(Debug, Clone)]
pub struct Principal {
    did: String,
    claims: VerifiedClaims,
    raw_token: String,
    dpop_proof: Option<VerifiedDpopProof>,
}

impl Principal {
    /// Construct a Principal from already-verified claims. This is the only
    /// constructor; there is no path from unverified input to a `Principal`.
    pub fn new(claims: VerifiedClaims, raw_token: String, dpop_proof: Option<VerifiedDpopProof>) -> Self {
        let did = claims.subject.clone();
        Self {
            did,
            claims,
            raw_token,
            dpop_proof,
        }
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    pub fn claims(&self) -> &VerifiedClaims {
        &self.claims
    }

    pub fn raw_token(&self) -> &str {
        &self.raw_token
    }

    pub fn dpop_proof(&self) -> Option<&VerifiedDpopProof> {
        self.dpop_proof.as_ref()
    }
}
