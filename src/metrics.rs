use axum::{http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
        metrics::describe_histogram!(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        );
        metrics::describe_gauge!(
            "database_connections_active",
            "Number of active database connections"
        );
        metrics::describe_counter!(
            "auth_requests_total",
            "Total number of successfully authenticated requests"
        );
        metrics::describe_counter!(
            "auth_requests_failed_total",
            "Total number of rejected authentication attempts"
        );
        metrics::describe_counter!(
            "dpop_proofs_total",
            "Total number of successful DPoP proof verifications"
        );
        metrics::describe_counter!(
            "dpop_proofs_failed_total",
            "Total number of rejected DPoP proofs"
        );
        metrics::describe_counter!(
            "aggregator_key_validations_total",
            "Total number of successful aggregator API-key validations"
        );
        metrics::describe_counter!(
            "aggregator_key_validations_failed_total",
            "Total number of rejected aggregator API-key validations"
        );

        Self { handle }
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn metrics_handler(handle: axum::extract::State<PrometheusHandle>) -> impl IntoResponse {
    (StatusCode::OK, handle.render())
}

pub async fn track_request_metrics(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed();

    metrics::counter!("http_requests_total", 1);
    metrics::histogram!("http_request_duration_seconds", duration.as_secs_f64());

    response
}

pub fn record_auth_success() {
    metrics::counter!("auth_requests_total", 1);
}

pub fn record_auth_failure() {
    metrics::counter!("auth_requests_failed_total", 1);
}

pub fn record_dpop_success() {
    metrics::counter!("dpop_proofs_total", 1);
}

pub fn record_dpop_failure() {
    metrics::counter!("dpop_proofs_failed_total", 1);
}

pub fn record_key_validation_success() {
    metrics::counter!("aggregator_key_validations_total", 1);
}

pub fn record_key_validation_failure() {
    metrics::counter!("aggregator_key_validations_failed_total", 1);
}
