use thiserror::Error;

/// Classification-only errors from the Proof Engine. Never leaked verbatim to
/// the client — the middleware maps every variant to a single public
/// "Invalid DPoP proof" response and logs the variant with request metadata.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DpopError {
    #[error("malformed DPoP proof")]
    MalformedProof,

    #[error("unsupported DPoP algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("DPoP algorithm/curve mismatch")]
    AlgorithmCurveMismatch,

    #[error("DPoP proof signature invalid")]
    SignatureInvalid,

    #[error("DPoP proof claim mismatch: {0}")]
    ClaimMismatch(&'static str),

    #[error("DPoP proof is stale")]
    Stale,

    #[error("DPoP proof issued-at is in the future")]
    FromTheFuture,

    #[error("DPoP proof jti replayed")]
    Replayed,

    #[error("DPoP proof access-token-hash mismatch")]
    AccessTokenHashMismatch,

    #[error("DPoP proof thumbprint does not match token confirmation claim")]
    ThumbprintMismatch,
}
