use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus scrape endpoint in text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service emits.
pub fn describe_metrics() {
    metrics::describe_counter!("analysis_jobs_total", "Total analysis jobs accepted");
    metrics::describe_counter!("analysis_jobs_completed", "Total analysis jobs completed");
    metrics::describe_counter!(
        "analysis_jobs_failed",
        "Total analysis jobs that failed, by error kind"
    );
    metrics::describe_histogram!(
        "analysis_processing_seconds",
        "Wall-clock time of an analysis pipeline run"
    );
    metrics::describe_histogram!("analysis_stage_seconds", "Time spent in each pipeline stage");
    metrics::describe_counter!(
        "enrichment_price_misses_total",
        "Products left without a price after page extraction"
    );
    metrics::describe_gauge!("analysis_jobs_running", "Analysis jobs currently executing");
}
