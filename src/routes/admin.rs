use axum::extract::{Query, State};
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::{CleanupParams, CleanupResponse};

/// POST /v1/admin/cleanup?days=N: Purge finished jobs older than N days.
pub async fn cleanup_jobs(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> Json<CleanupResponse> {
    let retention_days = params.days.unwrap_or(state.retention_days);
    let deleted_jobs = state.orchestrator.cleanup(retention_days).await;
    Json(CleanupResponse {
        deleted_jobs,
        retention_days,
    })
}
