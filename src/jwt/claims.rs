use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::identity::is_valid_issuer;
use crate::principal::{Confirmation, VerifiedClaims};

use super::errors::JwtError;

/// The atproto OAuth scope token every valid access token's `scope` must
/// include (when `scope` is present at all).
pub const PROTOCOL_SCOPE_TOKEN: &str = "atproto";

/// Claims as deserialized prior to signature verification. Used only to
/// discover `alg`/`kid`/`iss` for the algorithm-selection rule; trusting any
/// field here for an authorization decision before the signature is checked
/// would defeat the point of verification.
#[derive(Debug, Deserialize)]
pub struct RawClaims {
    pub iss: Option<String>,
    pub aud: Option<Value>,
    pub sub: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub nbf: Option<i64>,
    pub scope: Option<String>,
    pub cnf: Option<RawConfirmation>,
}

#[derive(Debug, Deserialize)]
pub struct RawConfirmation {
    pub jkt: Option<String>,
}

fn first_audience(aud: &Value) -> Option<String> {
    match aud {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
        _ => None,
    }
}

/// Apply the §3 invariants to already signature-verified raw claims.
pub fn validate_claims(raw: RawClaims, allow_http_issuer: bool) -> Result<VerifiedClaims, JwtError> {
    let subject = raw.sub.ok_or(JwtError::InvalidSubject)?;
    if !crate::identity::is_did(&subject) {
        return Err(JwtError::InvalidSubject);
    }

    let issuer = raw
        .iss
        .or_else(|| raw.aud.as_ref().and_then(first_audience))
        .ok_or(JwtError::InvalidIssuer)?;
    if !is_valid_issuer(&issuer, allow_http_issuer) {
        return Err(JwtError::InvalidIssuer);
    }

    let expires_at = raw
        .exp
        .and_then(|e| Utc.timestamp_opt(e, 0).single())
        .ok_or(JwtError::Malformed)?;
    if expires_at <= Utc::now() {
        return Err(JwtError::Expired);
    }

    let not_before = raw.nbf.and_then(|n| Utc.timestamp_opt(n, 0).single());
    if let Some(nbf) = not_before {
        if nbf > Utc::now() {
            return Err(JwtError::NotYetValid);
        }
    }

    if let Some(scope) = raw.scope.as_deref() {
        if !scope.is_empty() && !scope.split_whitespace().any(|s| s == PROTOCOL_SCOPE_TOKEN) {
            return Err(JwtError::InvalidScope);
        }
    }

    let issued_at = raw.iat.and_then(|i| Utc.timestamp_opt(i, 0).single());
    let audience = raw.aud.as_ref().and_then(first_audience);
    let confirmation = raw
        .cnf
        .and_then(|c| c.jkt)
        .map(|jkt| Confirmation { jkt });

    Ok(VerifiedClaims {
        subject,
        issuer,
        audience,
        issued_at,
        not_before,
        expires_at,
        scope: raw.scope,
        confirmation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_claims() -> RawClaims {
        RawClaims {
            iss: Some("did:web:issuer.example.com".to_string()),
            aud: Some(Value::String("did:web:coves.example.com".to_string())),
            sub: Some("did:plc:abc123".to_string()),
            exp: Some((Utc::now().timestamp()) + 3600),
            iat: Some(Utc::now().timestamp()),
            nbf: None,
            scope: Some("atproto transition:generic".to_string()),
            cnf: None,
        }
    }

    #[test]
    fn valid_claims_pass() {
        assert!(validate_claims(base_claims(), false).is_ok());
    }

    #[test]
    fn non_did_subject_is_rejected() {
        let mut claims = base_claims();
        claims.sub = Some("not-a-did".to_string());
        assert!(matches!(validate_claims(claims, false), Err(JwtError::InvalidSubject)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut claims = base_claims();
        claims.exp = Some(Utc::now().timestamp() - 10);
        assert!(matches!(validate_claims(claims, false), Err(JwtError::Expired)));
    }

    #[test]
    fn scope_without_protocol_token_is_rejected() {
        let mut claims = base_claims();
        claims.scope = Some("transition:generic".to_string());
        assert!(matches!(validate_claims(claims, false), Err(JwtError::InvalidScope)));
    }

    #[test]
    fn http_issuer_rejected_unless_dev_env() {
        let mut claims = base_claims();
        claims.iss = Some("http://issuer.example.com".to_string());
        assert!(matches!(validate_claims(claims, false), Err(JwtError::InvalidIssuer)));
    }

    #[test]
    fn confirmation_jkt_carries_through() {
        let mut claims = base_claims();
        claims.cnf = Some(RawConfirmation { jkt: Some("thumb".to_string()) });
        let verified = validate_claims(claims, false).unwrap();
        assert_eq!(verified.confirmation.unwrap().jkt, "thumb");
    }
}
