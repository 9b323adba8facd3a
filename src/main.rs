use std::{net::SocketAddr, sync::Arc, time::Duration as StdDuration};

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tokio::time::{interval, Duration};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coves_auth::{
    aggregator::{
        self, handlers as aggregator_handlers, AggregatorState, ApiKeyService, PgCredentialsRepository,
        PgSessionStore,
    },
    config::AuthConfig,
    db,
    dpop::{nonce_cache::NonceCache, ProofEngine},
    health, jwt, metrics, middleware,
    middleware::AuthState,
};

#[derive(Clone, FromRef)]
struct AppState {
    db_pool: PgPool,
    auth: AuthState,
    aggregator: AggregatorState,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }
        #[cfg(not(debug_assertions))]
        {
            "warn".to_string()
        }
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("starting coves-auth");

    // Loads and logs the process-wide auth config exactly once.
    AuthConfig::init();

    let metrics_recorder = metrics::MetricsRecorder::new();
    let metrics_handle = metrics_recorder.handle().clone();
    tracing::info!("metrics initialized");

    let db_pool = db::init_db_default().await?;
    tracing::info!("database initialized");

    let plc_directory = std::env::var("PLC_DIRECTORY").unwrap_or_else(|_| "https://plc.directory".to_string());
    let did_resolver: Arc<dyn jwt::DidResolver> = Arc::new(jwt::HttpDidResolver::new(plc_directory));
    let did_key_resolver = jwt::DidKeyResolver::new(did_resolver);
    let jwks_ttl_seconds: u64 = std::env::var("JWKS_CACHE_TTL_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3600);
    let jwks_resolver = jwt::JwksKeyResolver::new(StdDuration::from_secs(jwks_ttl_seconds));
    let combined_resolver = Arc::new(jwt::CombinedResolver::new(did_key_resolver, jwks_resolver));
    let jwt_verifier = jwt::JwtVerifier::new(combined_resolver);

    let nonce_max_age_seconds: i64 = std::env::var("DPOP_NONCE_MAX_AGE_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(300);
    let nonce_cache = NonceCache::new(nonce_max_age_seconds);
    let sweeper_handle = nonce_cache.spawn_sweeper();
    std::mem::forget(sweeper_handle);
    let proof_engine = Arc::new(ProofEngine::new(Default::default(), nonce_cache));

    let auth_state = AuthState {
        jwt_verifier,
        proof_engine,
    };
    tracing::info!("authenticator initialized");

    let credentials_repo: Arc<dyn aggregator::CredentialsRepository> =
        Arc::new(PgCredentialsRepository::new(db_pool.clone()));
    let session_store: Arc<dyn aggregator::SessionStore> = Arc::new(PgSessionStore::new(db_pool.clone()));
    let key_service = Arc::new(ApiKeyService::new(credentials_repo.clone(), session_store));
    let aggregator_state = AggregatorState {
        key_service,
        repo: credentials_repo,
    };
    tracing::info!("aggregator api-key service initialized");

    let app_state = AppState {
        db_pool: db_pool.clone(),
        auth: auth_state,
        aggregator: aggregator_state,
    };

    // Rate-limiter bucket cleanup, mirroring the teacher's idempotency/rate-limit housekeeping worker.
    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(300));
        loop {
            interval_timer.tick().await;
            let max_age = Duration::from_secs(600);
            middleware::rate_limit::DID_RATE_LIMITER.cleanup_old_buckets(max_age).await;
            tracing::debug!("rate limiter cleanup completed");
        }
    });
    tracing::info!("rate limiter cleanup worker started");

    let metrics_router = if matches!(
        std::env::var("ENABLE_METRICS").as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES")
    ) {
        Router::new()
            .route("/metrics", get(metrics::metrics_handler))
            .with_state(metrics_handle)
    } else {
        Router::new()
    };

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route(
            "/xrpc/social.coves.aggregator.createApiKey",
            post(aggregator_handlers::create_api_key),
        )
        .route(
            "/xrpc/social.coves.aggregator.getApiKey",
            get(aggregator_handlers::get_api_key),
        )
        .route(
            "/xrpc/social.coves.aggregator.revokeApiKey",
            post(aggregator_handlers::revoke_api_key),
        )
        .route(
            "/xrpc/social.coves.aggregator.getMetrics",
            get(aggregator_handlers::get_metrics),
        )
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::logging::log_headers_middleware))
        .layer(axum::middleware::from_fn(middleware::rate_limit::rate_limit_middleware))
        .with_state(app_state);

    let port = std::env::var("SERVER_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
