use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{AnalysisRequest, JobResultResponse, JobStatusResponse, SubmitResponse};
use crate::models::job::JobState;
use crate::routes::error::ApiError;

/// POST /v1/skin-analysis: Fetch the image and start an analysis job.
pub async fn submit_analysis(
    State(state): State<AppState>,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(request) = payload?;
    let submitted = state.orchestrator.submit(request).await?;

    Ok(Json(SubmitResponse {
        job_id: submitted.job_id,
        status: JobState::Running,
        mode: submitted.mode,
    }))
}

/// GET /v1/skin-analysis/status/{job_id}: Full job snapshot.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.jobs.get(job_id).await.ok_or(ApiError::NotFound(job_id))?;
    Ok(Json(JobStatusResponse::from(job.as_ref())))
}

/// GET /v1/skin-analysis/result/{job_id}: 202 while running, 200 once terminal.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobResultResponse>), ApiError> {
    let job = state.jobs.get(job_id).await.ok_or(ApiError::NotFound(job_id))?;

    let response = match (job.state, &job.result, &job.error) {
        (JobState::Completed, Some(result), _) => {
            (StatusCode::OK, JobResultResponse::Completed(result.clone()))
        }
        (JobState::Failed, _, Some(error)) => (
            StatusCode::OK,
            JobResultResponse::Failed {
                error: error.clone(),
            },
        ),
        _ => (
            StatusCode::ACCEPTED,
            JobResultResponse::Running {
                progress: job.progress.clone(),
            },
        ),
    };
    Ok((response.0, Json(response.1)))
}
