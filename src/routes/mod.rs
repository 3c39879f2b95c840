pub mod admin;
pub mod analysis;
pub mod error;
pub mod health;
pub mod metrics;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Request bodies only carry a URL and a short note.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the HTTP router with all API routes and middleware.
pub fn router(state: AppState, prometheus_handle: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/v1/skin-analysis", post(analysis::submit_analysis))
        .route(
            "/v1/skin-analysis/status/{job_id}",
            get(analysis::get_job_status),
        )
        .route(
            "/v1/skin-analysis/result/{job_id}",
            get(analysis::get_job_result),
        )
        .route("/v1/admin/cleanup", post(admin::cleanup_jobs))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}
