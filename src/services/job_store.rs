use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;
use crate::models::job::{JobError, JobRecord, JobState, Mode, Stage};

/// In-memory store of analysis jobs.
///
/// Every mutation clones the current record, applies the change and swaps the new
/// `Arc` in under the write lock, so readers only ever hold complete snapshots.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Arc<JobRecord>>>,
}

/// Per-state record counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobCounts {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `running` job and return its id.
    pub async fn create(&self, mode: Mode) -> Uuid {
        let record = JobRecord::new(mode);
        let id = record.id;
        self.jobs.write().await.insert(id, Arc::new(record));
        info!(job_id = %id, mode = %mode, "Job created");
        id
    }

    /// Snapshot of a job, if it exists.
    pub async fn get(&self, job_id: Uuid) -> Option<Arc<JobRecord>> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// Record a finished stage: timing entry, latest stage and optional partial summary.
    ///
    /// Unknown or already-terminal jobs are logged and left untouched.
    pub async fn update_progress(
        &self,
        job_id: Uuid,
        stage: Stage,
        summary: Option<String>,
        elapsed: Duration,
    ) {
        let mut jobs = self.jobs.write().await;
        let Some(current) = jobs.get(&job_id) else {
            warn!(job_id = %job_id, stage = %stage, "Progress update for unknown job");
            return;
        };
        if current.state.is_terminal() {
            warn!(
                job_id = %job_id,
                stage = %stage,
                state = %current.state,
                "Progress update for finished job ignored"
            );
            return;
        }

        let mut next = JobRecord::clone(current);
        if !next.progress.timings.record(stage, elapsed) {
            warn!(job_id = %job_id, stage = %stage, "Stage timing already recorded");
        }
        next.progress.latest_stage = Some(stage);
        if let Some(summary) = summary {
            next.progress.summaries.insert(stage, summary);
        }
        next.updated_at = Utc::now();
        jobs.insert(job_id, Arc::new(next));
        info!(
            job_id = %job_id,
            stage = %stage,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job progress updated"
        );
    }

    /// Transition `running -> completed`.
    pub async fn complete(&self, job_id: Uuid, result: AnalysisResult) -> Result<(), JobStoreError> {
        self.finish(job_id, JobState::Completed, |record| {
            record.result = Some(result);
        })
        .await?;
        info!(job_id = %job_id, "Job completed");
        Ok(())
    }

    /// Transition `running -> failed`.
    pub async fn fail(&self, job_id: Uuid, job_error: JobError) -> Result<(), JobStoreError> {
        let message = job_error.message.clone();
        let kind = job_error.kind;
        self.finish(job_id, JobState::Failed, |record| {
            record.error = Some(job_error);
        })
        .await?;
        warn!(job_id = %job_id, kind = %kind, error = %message, "Job failed");
        Ok(())
    }

    async fn finish(
        &self,
        job_id: Uuid,
        to: JobState,
        apply: impl FnOnce(&mut JobRecord),
    ) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let current = jobs.get(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if current.state != JobState::Running {
            error!(
                job_id = %job_id,
                from = %current.state,
                to = %to,
                "Invariant violation: job already finished, second outcome rejected"
            );
            return Err(JobStoreError::InvalidTransition {
                job_id,
                from: current.state,
                to,
            });
        }

        let mut next = JobRecord::clone(current);
        apply(&mut next);
        let now = Utc::now();
        next.state = to;
        next.updated_at = now;
        next.finished_at = Some(now);
        jobs.insert(job_id, Arc::new(next));
        Ok(())
    }

    /// Delete terminal jobs that finished more than `days` days ago. Returns how many were removed.
    pub async fn delete_older_than(&self, days: u32) -> usize {
        // Nothing can be older than the earliest representable timestamp
        let Some(cutoff) = Utc::now().checked_sub_signed(chrono::Duration::days(i64::from(days)))
        else {
            return 0;
        };
        self.delete_finished_before(cutoff).await
    }

    /// Delete terminal jobs whose `finished_at` is strictly before `cutoff`.
    pub async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| match (job.state.is_terminal(), job.finished_at) {
            (true, Some(finished_at)) => finished_at >= cutoff,
            _ => true,
        });
        let deleted = before - jobs.len();
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Expired jobs deleted");
        }
        deleted
    }

    pub async fn counts(&self) -> JobCounts {
        let jobs = self.jobs.read().await;
        jobs.values().fold(JobCounts::default(), |mut counts, job| {
            match job.state {
                JobState::Running => counts.running += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
            counts
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobState,
        to: JobState,
    },
}
