use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use sqlx::PgPool;
use std::time::SystemTime;

use crate::middleware::AuthState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: u64,
    version: String,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    database: CheckStatus,
    /// Number of live (unexpired) DPoP proof nonces currently tracked —
    /// a cheap liveness probe for the in-process replay cache, not a
    /// health/unhealthy signal on its own.
    nonce_cache_entries: usize,
    /// Approximate number of cached JWKS entries, across all issuers seen
    /// so far — likewise a liveness probe, not a health/unhealthy signal.
    jwks_cache_entries: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    ready: bool,
    checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    database: bool,
}

/// Liveness probe - checks if the application is running.
/// Should return 200 OK if the application is alive.
pub async fn liveness() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Readiness probe - checks if the application is ready to serve traffic.
///
/// Checks database connectivity. Returns 200 OK if reachable, 503
/// SERVICE_UNAVAILABLE otherwise.
pub async fn readiness(State(pool): State<PgPool>) -> (StatusCode, Json<ReadinessResponse>) {
    let db_ready = check_database(&pool).await;
    let status = if db_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: db_ready,
            checks: ReadinessChecks { database: db_ready },
        }),
    )
}

/// Health endpoint - detailed health information.
///
/// Returns 200 OK if the database is reachable, 503 SERVICE_UNAVAILABLE
/// otherwise.
pub async fn health(
    State(pool): State<PgPool>,
    State(auth): State<AuthState>,
) -> (StatusCode, Json<HealthResponse>) {
    let db_status = if check_database(&pool).await {
        CheckStatus::Healthy
    } else {
        CheckStatus::Unhealthy
    };
    let nonce_cache_entries = auth.proof_engine.nonce_cache_len();
    let jwks_cache_entries = auth.jwt_verifier.jwks_cache_size();

    let overall_healthy = matches!(db_status, CheckStatus::Healthy);
    let status = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let timestamp = match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => 0,
    };

    (
        status,
        Json(HealthResponse {
            status: if overall_healthy {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            timestamp,
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                database: db_status,
                nonce_cache_entries,
                jwks_cache_entries,
            },
        }),
    )
}

async fn check_database(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness() {
        let (status, body) = liveness().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
