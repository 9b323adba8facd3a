use thiserror::Error;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("malformed JWT")]
    Malformed,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("token with a kid must use asymmetric verification")]
    SymmetricForbiddenWithKid,

    #[error("issuer {0} is not allowed to use symmetric verification")]
    IssuerNotAllowlisted(String),

    #[error("symmetric verification secret is not configured")]
    SecretNotConfigured,

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("subject is not a DID")]
    InvalidSubject,

    #[error("issuer must be a DID or an absolute URL")]
    InvalidIssuer,

    #[error("scope missing required protocol token")]
    InvalidScope,

    #[error("key resolution failed: {0}")]
    KeyResolution(#[from] KeyResolverError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyResolverError {
    #[error("unsupported issuer form: {0}")]
    UnsupportedIssuer(String),

    #[error("identity directory lookup failed: {0}")]
    DirectoryLookupFailed(String),

    #[error("issuer document is missing a usable verification key")]
    MissingVerificationKey,

    #[error("well-known metadata fetch failed: {0}")]
    MetadataFetchFailed(String),

    #[error("jwks fetch failed: {0}")]
    JwksFetchFailed(String),

    #[error("no key with the requested kid, even after one refresh")]
    KeyIdNotFound,
}
