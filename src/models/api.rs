use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;
use crate::models::job::{JobError, JobRecord, JobState, Mode, Progress};

/// Request to start a skin analysis.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AnalysisRequest {
    #[garde(url, length(max = 2048))]
    pub image_url: String,

    #[garde(length(max = 4000))]
    pub text: Option<String>,

    /// `basic` or `extended`; anything else is treated as `basic`.
    #[garde(skip)]
    pub mode: Option<String>,
}

/// Response after submitting an analysis.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobState,
    pub mode: Mode,
}

/// Full job status as seen by a poller.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobState,
    pub mode: Mode,
    pub progress: Progress,
    pub result: Option<AnalysisResult>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobStatusResponse {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.id,
            status: job.state,
            mode: job.mode,
            progress: job.progress.clone(),
            result: job.result.clone(),
            error: job.error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Body of the result endpoint, tagged by job state.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResultResponse {
    Running { progress: Progress },
    Failed { error: JobError },
    Completed(AnalysisResult),
}

#[derive(Debug, Deserialize)]
pub struct CleanupParams {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted_jobs: usize,
    pub retention_days: u32,
}
