use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;

/// Crate-wide error classifier.
///
/// Every fallible component returns a typed, component-local error; this enum
/// wraps those for the handler/middleware boundary, where `status_code()` and
/// `error_name()` decide the HTTP response. Internal detail is logged here and
/// never crosses into the response body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("oauth session required: {0}")]
    OAuthSessionRequired(String),

    #[error("aggregator required: {0}")]
    AggregatorRequired(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("api key not found")]
    ApiKeyNotFound,

    #[error("api key already revoked")]
    ApiKeyAlreadyRevoked,

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("revocation failed: {0}")]
    RevocationFailed(String),

    #[error("session mismatch: {0}")]
    SessionMismatch(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("internal error: {0}")]
    InternalServerError(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AuthenticationRequired(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::OAuthSessionRequired(_) => StatusCode::UNAUTHORIZED,
            ApiError::AggregatorRequired(_) | ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::ApiKeyNotFound => StatusCode::NOT_FOUND,
            ApiError::ApiKeyAlreadyRevoked => StatusCode::BAD_REQUEST,
            ApiError::KeyGenerationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::RevocationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::SessionMismatch(_) => StatusCode::CONFLICT,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_name(&self) -> &'static str {
        match self {
            ApiError::AuthenticationRequired(_) => "AuthenticationRequired",
            ApiError::InvalidRequest(_) => "InvalidRequest",
            ApiError::OAuthSessionRequired(_) => "OAuthSessionRequired",
            ApiError::AggregatorRequired(_) => "AggregatorRequired",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::ApiKeyNotFound => "ApiKeyNotFound",
            ApiError::ApiKeyAlreadyRevoked => "ApiKeyAlreadyRevoked",
            ApiError::KeyGenerationFailed(_) => "KeyGenerationFailed",
            ApiError::RevocationFailed(_) => "RevocationFailed",
            ApiError::SessionMismatch(_) => "SessionMismatch",
            ApiError::RateLimitExceeded => "RateLimitExceeded",
            ApiError::InternalServerError(_) => "InternalServerError",
        }
    }

    /// The message surfaced to the client. Internal errors get a generic
    /// message regardless of their source detail, which is logged separately.
    fn public_message(&self) -> String {
        match self {
            ApiError::InternalServerError(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %self, "internal error");
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                tracing::warn!(error = %self, "request rejected");
            }
            _ => {
                tracing::debug!(error = %self, "request rejected");
            }
        }

        let body = Json(json!({
            "error": self.error_name(),
            "message": self.public_message(),
        }));
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_never_leak_detail() {
        let err = ApiError::InternalServerError(anyhow::anyhow!("postgres connection string leaked here"));
        assert_eq!(err.public_message(), "an internal error occurred");
    }

    #[test]
    fn status_codes_match_spec_classification() {
        assert_eq!(
            ApiError::AuthenticationRequired("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::ApiKeyNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::AggregatorRequired("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::RateLimitExceeded.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }
}
