use std::sync::Arc;
use std::time::Duration;

use garde::Validate;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::api::AnalysisRequest;
use crate::models::job::Mode;
use crate::services::image_fetch::{ImageFetcher, InputError};
use crate::services::job_store::JobStore;
use crate::services::pipeline::{JobInput, PipelineExecutor};

/// Accepts analysis requests, creates jobs and launches their pipelines.
pub struct Orchestrator {
    store: Arc<JobStore>,
    executor: Arc<PipelineExecutor>,
    images: ImageFetcher,
}

/// Handle returned to the client right after submission.
#[derive(Debug, Clone, Copy)]
pub struct SubmittedJob {
    pub job_id: Uuid,
    pub mode: Mode,
}

impl Orchestrator {
    pub fn new(store: Arc<JobStore>, executor: Arc<PipelineExecutor>, images: ImageFetcher) -> Self {
        Self {
            store,
            executor,
            images,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Validate the request and fetch its image, then start the job in the background.
    ///
    /// Nothing is stored when validation or the image fetch fails.
    pub async fn submit(&self, request: AnalysisRequest) -> Result<SubmittedJob, SubmitError> {
        request.validate()?;
        let mode = Mode::normalize(request.mode.as_deref());
        let user_text = request
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let image = self.images.fetch(request.image_url.trim()).await?;

        let job_id = self.store.create(mode).await;
        metrics::counter!("analysis_jobs_total").increment(1);
        info!(job_id = %job_id, mode = %mode, "Analysis job accepted");

        let executor = Arc::clone(&self.executor);
        let input = JobInput {
            job_id,
            mode,
            image,
            user_text,
        };
        tokio::spawn(async move {
            metrics::gauge!("analysis_jobs_running").increment(1.0);
            executor.run(input).await;
            metrics::gauge!("analysis_jobs_running").decrement(1.0);
        });

        Ok(SubmittedJob { job_id, mode })
    }

    /// Delete finished jobs older than `days` days.
    pub async fn cleanup(&self, days: u32) -> usize {
        let deleted = self.store.delete_older_than(days).await;
        info!(deleted_jobs = deleted, retention_days = days, "Job cleanup finished");
        deleted
    }
}

/// Periodically purge expired jobs. Runs until the task is dropped.
pub async fn run_cleanup_loop(orchestrator: Arc<Orchestrator>, retention_days: u32, every: Duration) {
    info!(
        retention_days,
        interval_secs = every.as_secs(),
        "Starting job cleanup loop"
    );
    loop {
        sleep(every).await;
        let deleted = orchestrator.cleanup(retention_days).await;
        let counts = orchestrator.store().counts().await;
        debug!(
            deleted,
            running = counts.running,
            completed = counts.completed,
            failed = counts.failed,
            "Cleanup pass complete"
        );
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid request: {0}")]
    Invalid(#[from] garde::Report),

    #[error(transparent)]
    Input(#[from] InputError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analysis::FinalizeOutput;
    use crate::models::job::{JobState, Stage};
    use crate::models::product::{QueryIntent, SearchResult};
    use crate::services::enrichment::{PageSource, ProductEnricher};
    use crate::services::pipeline::JobBudgets;
    use crate::services::planner::{FinalizeRequest, PlanDraft, Planner};
    use crate::services::price::ChainExtractor;
    use crate::services::retry::RetryPolicy;
    use crate::services::search::ProductSearch;
    use crate::services::upstream::UpstreamError;
    use crate::services::vision::VisionModel;
    use async_trait::async_trait;
    use httpmock::prelude::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    struct StaticVision;

    #[async_trait]
    impl VisionModel for StaticVision {
        async fn analyze(
            &self,
            _image: &[u8],
            _user_text: Option<&str>,
            _mode: Mode,
        ) -> Result<String, UpstreamError> {
            Ok("Dry skin with fine lines.".to_string())
        }
    }

    struct StaticPlanner;

    #[async_trait]
    impl Planner for StaticPlanner {
        async fn plan(
            &self,
            _vision_summary: &str,
            _user_text: Option<&str>,
            _max_intents: usize,
        ) -> Result<PlanDraft, UpstreamError> {
            Ok(PlanDraft::default())
        }

        async fn finalize(
            &self,
            _request: FinalizeRequest<'_>,
        ) -> Result<FinalizeOutput, UpstreamError> {
            Ok(FinalizeOutput::default())
        }
    }

    struct EmptySearch;

    #[async_trait]
    impl ProductSearch for EmptySearch {
        async fn search(&self, _intent: &QueryIntent) -> Result<Vec<SearchResult>, UpstreamError> {
            Ok(Vec::new())
        }
    }

    struct NoPages;

    #[async_trait]
    impl PageSource for NoPages {
        async fn fetch(&self, _url: &str) -> Result<String, UpstreamError> {
            Err(UpstreamError::malformed("product_page", "unused"))
        }
    }

    fn orchestrator() -> Orchestrator {
        let store = Arc::new(JobStore::new());
        let enricher = ProductEnricher::new(
            Arc::new(EmptySearch),
            Arc::new(NoPages),
            Arc::new(ChainExtractor::default()),
            RetryPolicy::none(),
            4,
        );
        let executor = PipelineExecutor::new(
            store.clone(),
            Arc::new(StaticVision),
            Arc::new(StaticPlanner),
            enricher,
            JobBudgets::default(),
        );
        let images = ImageFetcher::new(Duration::from_secs(5), 1024 * 1024).unwrap();
        Orchestrator::new(store, Arc::new(executor), images)
    }

    fn request(image_url: String, mode: Option<&str>) -> AnalysisRequest {
        AnalysisRequest {
            image_url,
            text: Some("  ".to_string()),
            mode: mode.map(str::to_string),
        }
    }

    async fn wait_for_terminal(store: &JobStore, job_id: Uuid) -> JobState {
        for _ in 0..100 {
            let state = store.get(job_id).await.unwrap().state;
            if state.is_terminal() {
                return state;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn test_submit_runs_job_in_background() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/face.png");
                then.status(200).body(PNG_HEADER);
            })
            .await;

        let orchestrator = orchestrator();
        let submitted = orchestrator
            .submit(request(server.url("/face.png"), Some("EXTENDED")))
            .await
            .unwrap();

        assert_eq!(submitted.mode, Mode::Extended);
        let state = wait_for_terminal(orchestrator.store(), submitted.job_id).await;
        assert_eq!(state, JobState::Completed);

        let record = orchestrator.store().get(submitted.job_id).await.unwrap();
        let result = record.result.as_ref().unwrap();
        assert_eq!(result.skin_type, "dry");
        assert!(result.products.is_empty());
        assert!(result.timings.get(Stage::FetchImage).is_some());
    }

    #[tokio::test]
    async fn test_unreachable_image_creates_no_job() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone.png");
                then.status(404);
            })
            .await;

        let orchestrator = orchestrator();
        let err = orchestrator
            .submit(request(server.url("/gone.png"), None))
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::Input(InputError::HttpStatus(404))));
        assert_eq!(orchestrator.store().counts().await.running, 0);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_fetch() {
        let orchestrator = orchestrator();
        let err = orchestrator
            .submit(request("not a url".to_string(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_jobs() {
        let orchestrator = orchestrator();
        let job_id = orchestrator.store().create(Mode::Basic).await;
        orchestrator
            .store()
            .fail(
                job_id,
                crate::models::job::JobError {
                    kind: crate::models::job::ErrorKind::UpstreamError,
                    stage: None,
                    message: "boom".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(orchestrator.cleanup(30).await, 0);
        assert_eq!(orchestrator.cleanup(0).await, 1);
        assert!(orchestrator.store().get(job_id).await.is_none());
    }
}
