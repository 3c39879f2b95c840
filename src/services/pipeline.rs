//! Stage sequencing for one analysis job.
//!
//! `fetch_image` runs at submission time; the executor records its timing and then drives
//! `vision -> planning -> search -> finalize` under the mode's wall-clock budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::analysis::{AnalysisResult, Plan, MAX_FINAL_PRODUCTS};
use crate::models::job::{ErrorKind, JobError, Mode, Stage, StageTimings};
use crate::models::product::{EnrichedProduct, QueryIntent};
use crate::services::canonical_url;
use crate::services::enrichment::ProductEnricher;
use crate::services::heuristics;
use crate::services::image_fetch::SourceImage;
use crate::services::job_store::JobStore;
use crate::services::planner::{FinalizeRequest, PlanDraft, Planner};
use crate::services::upstream::UpstreamError;
use crate::services::vision::VisionModel;

/// Searches the planning model may request in extended mode.
pub const MAX_EXTENDED_INTENTS: usize = 3;

const MAX_SUMMARY_CHARS: usize = 280;

/// Wall-clock limit per job, by mode.
#[derive(Debug, Clone, Copy)]
pub struct JobBudgets {
    pub basic: Duration,
    pub extended: Duration,
}

impl JobBudgets {
    pub fn for_mode(&self, mode: Mode) -> Duration {
        match mode {
            Mode::Basic => self.basic,
            Mode::Extended => self.extended,
        }
    }
}

impl Default for JobBudgets {
    fn default() -> Self {
        Self {
            basic: Duration::from_secs(5),
            extended: Duration::from_secs(80),
        }
    }
}

/// Everything a job needs once it has been accepted.
#[derive(Debug, Clone)]
pub struct JobInput {
    pub job_id: Uuid,
    pub mode: Mode,
    pub image: SourceImage,
    pub user_text: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
struct StageError {
    stage: Stage,
    #[source]
    source: UpstreamError,
}

impl StageError {
    fn into_job_error(self) -> JobError {
        let kind = if self.source.is_timeout() {
            ErrorKind::UpstreamTimeout
        } else {
            ErrorKind::UpstreamError
        };
        JobError {
            kind,
            stage: Some(self.stage),
            message: self.source.to_string(),
        }
    }
}

/// Runs the analysis stages for a job and reports every outcome to the job store.
pub struct PipelineExecutor {
    store: Arc<JobStore>,
    vision: Arc<dyn VisionModel>,
    planner: Arc<dyn Planner>,
    enricher: ProductEnricher,
    budgets: JobBudgets,
}

impl PipelineExecutor {
    pub fn new(
        store: Arc<JobStore>,
        vision: Arc<dyn VisionModel>,
        planner: Arc<dyn Planner>,
        enricher: ProductEnricher,
        budgets: JobBudgets,
    ) -> Self {
        Self {
            store,
            vision,
            planner,
            enricher,
            budgets,
        }
    }

    /// Drive the job to a terminal state. Never panics on upstream failures.
    pub async fn run(&self, input: JobInput) {
        let job_id = input.job_id;
        let mode = input.mode;
        let budget = self.budgets.for_mode(mode);
        let started = Instant::now();
        let (active_tx, active_rx) = watch::channel(Stage::FetchImage);

        info!(job_id = %job_id, mode = %mode, budget_secs = budget.as_secs_f64(), "Pipeline started");

        let outcome = tokio::time::timeout(budget, self.run_stages(input, &active_tx)).await;
        let elapsed = started.elapsed();
        metrics::histogram!("analysis_processing_seconds").record(elapsed.as_secs_f64());

        let reported = match outcome {
            Ok(Ok(result)) => {
                info!(
                    job_id = %job_id,
                    products = result.products.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Pipeline finished"
                );
                metrics::counter!("analysis_jobs_completed").increment(1);
                self.store.complete(job_id, result).await
            }
            Ok(Err(stage_error)) => {
                warn!(job_id = %job_id, error = %stage_error, "Pipeline stage failed");
                let job_error = stage_error.into_job_error();
                metrics::counter!("analysis_jobs_failed", "kind" => job_error.kind.as_str())
                    .increment(1);
                self.store.fail(job_id, job_error).await
            }
            Err(_) => {
                let stage = *active_rx.borrow();
                warn!(job_id = %job_id, stage = %stage, "Pipeline exceeded its time budget");
                metrics::counter!("analysis_jobs_failed", "kind" => ErrorKind::UpstreamTimeout.as_str())
                    .increment(1);
                self.store
                    .fail(
                        job_id,
                        JobError {
                            kind: ErrorKind::UpstreamTimeout,
                            stage: Some(stage),
                            message: format!(
                                "{mode} analysis exceeded its {:.0}s budget during {stage}",
                                budget.as_secs_f64()
                            ),
                        },
                    )
                    .await
            }
        };

        if let Err(e) = reported {
            error!(job_id = %job_id, error = %e, "Failed to record job outcome");
        }
    }

    async fn run_stages(
        &self,
        input: JobInput,
        active: &watch::Sender<Stage>,
    ) -> Result<AnalysisResult, StageError> {
        let JobInput {
            job_id,
            mode,
            image,
            user_text,
        } = input;
        let user_text = user_text.as_deref();
        let mut timings = StageTimings::default();

        let fetch_summary = format!("{:?} image, {} bytes", image.format, image.bytes.len());
        self.record(job_id, &mut timings, Stage::FetchImage, Some(fetch_summary), image.elapsed)
            .await;

        // Vision
        active.send_replace(Stage::Vision);
        let start = Instant::now();
        let vision_summary = self
            .vision
            .analyze(&image.bytes, user_text, mode)
            .await
            .map_err(|source| StageError {
                stage: Stage::Vision,
                source,
            })?;
        self.record(
            job_id,
            &mut timings,
            Stage::Vision,
            Some(truncate(&vision_summary)),
            start.elapsed(),
        )
        .await;

        // Planning
        active.send_replace(Stage::Planning);
        let start = Instant::now();
        let plan = match mode {
            Mode::Basic => heuristics::plan_from_summary(&vision_summary),
            Mode::Extended => {
                let draft = self
                    .planner
                    .plan(&vision_summary, user_text, MAX_EXTENDED_INTENTS)
                    .await
                    .map_err(|source| StageError {
                        stage: Stage::Planning,
                        source,
                    })?;
                merge_plan(heuristics::plan_from_summary(&vision_summary), draft)
            }
        };
        let queries: Vec<&str> = plan.intents.iter().map(|i| i.query.as_str()).collect();
        let plan_summary = format!("skin type {}; searching: {}", plan.skin_type, queries.join(", "));
        self.record(job_id, &mut timings, Stage::Planning, Some(plan_summary), start.elapsed())
            .await;

        // Search and enrichment
        active.send_replace(Stage::Search);
        let start = Instant::now();
        let candidates = self
            .enricher
            .enrich(&plan.intents)
            .await
            .map_err(|source| StageError {
                stage: Stage::Search,
                source,
            })?;
        let priced = candidates.iter().filter(|p| p.price.is_some()).count();
        let search_summary = format!("{} candidate products, {} priced", candidates.len(), priced);
        self.record(job_id, &mut timings, Stage::Search, Some(search_summary), start.elapsed())
            .await;

        // Finalize
        active.send_replace(Stage::Finalize);
        let start = Instant::now();
        let output = self
            .planner
            .finalize(FinalizeRequest {
                vision_summary: &vision_summary,
                plan: &plan,
                products: &candidates,
                mode,
            })
            .await
            .map_err(|source| StageError {
                stage: Stage::Finalize,
                source,
            })?;
        let products = rank_products(candidates, &output.product_urls);
        self.record(job_id, &mut timings, Stage::Finalize, None, start.elapsed())
            .await;

        Ok(AnalysisResult {
            diagnosis: non_empty_or(output.diagnosis, plan.diagnosis),
            skin_type: non_empty_or(output.skin_type, plan.skin_type),
            explanation: output.explanation,
            routine_steps: output.routine_steps,
            additional_recommendations: output.additional_recommendations,
            products,
            vision_summary,
            timings,
        })
    }

    async fn record(
        &self,
        job_id: Uuid,
        timings: &mut StageTimings,
        stage: Stage,
        summary: Option<String>,
        elapsed: Duration,
    ) {
        timings.record(stage, elapsed);
        metrics::histogram!("analysis_stage_seconds", "stage" => stage.as_str())
            .record(elapsed.as_secs_f64());
        self.store
            .update_progress(job_id, stage, summary, elapsed)
            .await;
    }
}

/// Model-provided fields win when present; the heuristic plan fills the gaps.
fn merge_plan(heuristic: Plan, draft: PlanDraft) -> Plan {
    let intents: Vec<QueryIntent> = draft
        .intents
        .into_iter()
        .take(MAX_EXTENDED_INTENTS)
        .collect();
    Plan {
        skin_type: draft
            .skin_type
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(heuristic.skin_type),
        diagnosis: draft
            .diagnosis
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(heuristic.diagnosis),
        concerns: heuristic.concerns,
        intents: if intents.is_empty() {
            heuristic.intents
        } else {
            intents
        },
    }
}

/// Order candidates by the finalizer's URL ranking and cap the list.
///
/// URLs are compared in canonical form. When the ranking matches nothing the first
/// candidates in merge order are kept.
pub fn rank_products(candidates: Vec<EnrichedProduct>, ranking: &[String]) -> Vec<EnrichedProduct> {
    let keys: Vec<String> = candidates
        .iter()
        .map(|p| canonical_url::canonicalize(&p.url))
        .collect();
    let mut pool: Vec<Option<EnrichedProduct>> = candidates.into_iter().map(Some).collect();

    let mut ranked = Vec::with_capacity(MAX_FINAL_PRODUCTS);
    for url in ranking {
        if ranked.len() == MAX_FINAL_PRODUCTS {
            break;
        }
        let key = canonical_url::canonicalize(url);
        if let Some(product) = keys
            .iter()
            .position(|k| *k == key)
            .and_then(|idx| pool[idx].take())
        {
            ranked.push(product);
        }
    }

    if ranked.is_empty() {
        ranked = pool.into_iter().flatten().take(MAX_FINAL_PRODUCTS).collect();
    }
    ranked
}

fn non_empty_or(value: String, fallback: String) -> String {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

fn truncate(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(MAX_SUMMARY_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analysis::FinalizeOutput;
    use crate::models::job::JobState;
    use crate::models::product::SearchResult;
    use crate::services::enrichment::PageSource;
    use crate::services::price::ChainExtractor;
    use crate::services::retry::RetryPolicy;
    use crate::services::search::ProductSearch;
    use async_trait::async_trait;
    use image::ImageFormat;
    use std::sync::Mutex;

    const SUMMARY: &str = "**Summary:** Oily skin with blackheads on the nose.\nMild redness.";

    struct FakeVision {
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl VisionModel for FakeVision {
        async fn analyze(
            &self,
            _image: &[u8],
            _user_text: Option<&str>,
            _mode: Mode,
        ) -> Result<String, UpstreamError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(UpstreamError::Timeout { service: "vision" });
            }
            Ok(SUMMARY.to_string())
        }
    }

    #[derive(Default)]
    struct FakePlanner {
        draft: PlanDraft,
        ranking: Vec<String>,
        plan_calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Planner for FakePlanner {
        async fn plan(
            &self,
            _vision_summary: &str,
            _user_text: Option<&str>,
            max_intents: usize,
        ) -> Result<PlanDraft, UpstreamError> {
            self.plan_calls.lock().unwrap().push(max_intents);
            Ok(self.draft.clone())
        }

        async fn finalize(
            &self,
            request: FinalizeRequest<'_>,
        ) -> Result<FinalizeOutput, UpstreamError> {
            Ok(FinalizeOutput {
                diagnosis: String::new(),
                skin_type: "oily".to_string(),
                explanation: format!("{} candidates reviewed", request.products.len()),
                routine_steps: vec!["Cleanse".to_string(), "Moisturize".to_string()],
                additional_recommendations: "Use sunscreen".to_string(),
                product_urls: self.ranking.clone(),
            })
        }
    }

    /// Returns `per_query` distinct products for every query and records the queries.
    struct FakeSearch {
        per_query: usize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProductSearch for FakeSearch {
        async fn search(&self, intent: &QueryIntent) -> Result<Vec<SearchResult>, UpstreamError> {
            self.seen.lock().unwrap().push(intent.query.clone());
            let slug = intent.query.replace(' ', "-");
            Ok((0..self.per_query)
                .map(|i| SearchResult {
                    name: format!("{} #{i}", intent.query),
                    url: format!("https://shop.example.com/{slug}/{i}"),
                    snippet: String::new(),
                    image_url: None,
                    price: Some("$10.00".to_string()),
                    rating: None,
                })
                .collect())
        }
    }

    struct NoPages;

    #[async_trait]
    impl PageSource for NoPages {
        async fn fetch(&self, _url: &str) -> Result<String, UpstreamError> {
            Err(UpstreamError::Timeout {
                service: "product_page",
            })
        }
    }

    fn image() -> SourceImage {
        SourceImage {
            bytes: b"\x89PNG\r\n\x1a\n".to_vec(),
            format: ImageFormat::Png,
            elapsed: Duration::from_millis(120),
        }
    }

    fn executor(
        store: Arc<JobStore>,
        vision: FakeVision,
        planner: Arc<FakePlanner>,
        search: Arc<FakeSearch>,
        budgets: JobBudgets,
    ) -> PipelineExecutor {
        let enricher = ProductEnricher::new(
            search,
            Arc::new(NoPages),
            Arc::new(ChainExtractor::default()),
            RetryPolicy::none(),
            4,
        );
        PipelineExecutor::new(store, Arc::new(vision), planner, enricher, budgets)
    }

    fn quick_vision() -> FakeVision {
        FakeVision {
            delay: Duration::ZERO,
            fail: false,
        }
    }

    fn search(per_query: usize) -> Arc<FakeSearch> {
        Arc::new(FakeSearch {
            per_query,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn product(url: &str) -> EnrichedProduct {
        EnrichedProduct {
            name: url.to_string(),
            url: url.to_string(),
            snippet: String::new(),
            image_url: None,
            price: None,
            price_source: None,
            rating: None,
        }
    }

    async fn run_job(executor: &PipelineExecutor, store: &JobStore, mode: Mode) -> Uuid {
        let job_id = store.create(mode).await;
        executor
            .run(JobInput {
                job_id,
                mode,
                image: image(),
                user_text: Some("itchy after shaving".to_string()),
            })
            .await;
        job_id
    }

    #[tokio::test]
    async fn test_basic_mode_completes_without_planner_call() {
        let store = Arc::new(JobStore::new());
        let planner = Arc::new(FakePlanner::default());
        let search = search(8);
        let exec = executor(
            store.clone(),
            quick_vision(),
            planner.clone(),
            search.clone(),
            JobBudgets::default(),
        );

        let job_id = run_job(&exec, &store, Mode::Basic).await;
        let record = store.get(job_id).await.unwrap();

        assert_eq!(record.state, JobState::Completed);
        assert!(planner.plan_calls.lock().unwrap().is_empty());
        assert_eq!(
            *search.seen.lock().unwrap(),
            vec!["blackheads comedones treatment anti-inflammatory skincare".to_string()]
        );

        let result = record.result.as_ref().unwrap();
        assert_eq!(result.products.len(), MAX_FINAL_PRODUCTS);
        assert_eq!(result.diagnosis, "Oily skin with blackheads on the nose.");
        assert_eq!(result.timings.len(), 5);
        assert_eq!(result.timings.get(Stage::FetchImage), Some(0.12));
        assert!(result.timings.iter().all(|(_, secs)| secs >= 0.0));
        assert_eq!(record.progress.timings, result.timings);
    }

    #[tokio::test]
    async fn test_extended_mode_uses_planner_intents() {
        let store = Arc::new(JobStore::new());
        let planner = Arc::new(FakePlanner {
            draft: PlanDraft {
                intents: vec![
                    QueryIntent::new("bha cleanser", 2),
                    QueryIntent::new("niacinamide serum", 2),
                ],
                skin_type: Some("combination".to_string()),
                diagnosis: None,
            },
            ranking: vec![
                "https://shop.example.com/niacinamide-serum/1?utm_source=x".to_string(),
                "https://unknown.example.com/product".to_string(),
                "https://shop.example.com/bha-cleanser/0".to_string(),
            ],
            ..Default::default()
        });
        let search = search(2);
        let exec = executor(
            store.clone(),
            quick_vision(),
            planner.clone(),
            search.clone(),
            JobBudgets::default(),
        );

        let job_id = run_job(&exec, &store, Mode::Extended).await;
        let record = store.get(job_id).await.unwrap();
        let result = record.result.as_ref().unwrap();

        assert_eq!(*planner.plan_calls.lock().unwrap(), vec![MAX_EXTENDED_INTENTS]);
        assert_eq!(search.seen.lock().unwrap().len(), 2);
        let urls: Vec<&str> = result.products.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://shop.example.com/niacinamide-serum/1",
                "https://shop.example.com/bha-cleanser/0"
            ]
        );
        assert_eq!(result.skin_type, "oily");
        assert!(record
            .progress
            .summaries
            .get(&Stage::Planning)
            .unwrap()
            .contains("bha cleanser"));
    }

    #[tokio::test]
    async fn test_extended_mode_without_intents_falls_back_to_heuristic_query() {
        let store = Arc::new(JobStore::new());
        let planner = Arc::new(FakePlanner::default());
        let search = search(1);
        let exec = executor(
            store.clone(),
            quick_vision(),
            planner,
            search.clone(),
            JobBudgets::default(),
        );

        let job_id = run_job(&exec, &store, Mode::Extended).await;

        assert_eq!(store.get(job_id).await.unwrap().state, JobState::Completed);
        assert_eq!(
            *search.seen.lock().unwrap(),
            vec!["blackheads comedones treatment anti-inflammatory skincare".to_string()]
        );
    }

    #[tokio::test]
    async fn test_vision_failure_marks_job_failed_with_stage() {
        let store = Arc::new(JobStore::new());
        let exec = executor(
            store.clone(),
            FakeVision {
                delay: Duration::ZERO,
                fail: true,
            },
            Arc::new(FakePlanner::default()),
            search(1),
            JobBudgets::default(),
        );

        let job_id = run_job(&exec, &store, Mode::Basic).await;
        let record = store.get(job_id).await.unwrap();

        assert_eq!(record.state, JobState::Failed);
        let err = record.error.as_ref().unwrap();
        assert_eq!(err.kind, ErrorKind::UpstreamTimeout);
        assert_eq!(err.stage, Some(Stage::Vision));
        assert!(record.result.is_none());
        assert_eq!(record.progress.latest_stage, Some(Stage::FetchImage));
    }

    #[tokio::test]
    async fn test_budget_overrun_fails_job_at_active_stage() {
        let store = Arc::new(JobStore::new());
        let exec = executor(
            store.clone(),
            FakeVision {
                delay: Duration::from_millis(500),
                fail: false,
            },
            Arc::new(FakePlanner::default()),
            search(1),
            JobBudgets {
                basic: Duration::from_millis(50),
                extended: Duration::from_secs(1),
            },
        );

        let job_id = run_job(&exec, &store, Mode::Basic).await;
        let record = store.get(job_id).await.unwrap();

        assert_eq!(record.state, JobState::Failed);
        let err = record.error.as_ref().unwrap();
        assert_eq!(err.kind, ErrorKind::UpstreamTimeout);
        assert_eq!(err.stage, Some(Stage::Vision));
        assert!(record.progress.timings.get(Stage::Vision).is_none());
    }

    #[test]
    fn test_rank_products_falls_back_to_merge_order() {
        let candidates: Vec<EnrichedProduct> = (0..7)
            .map(|i| product(&format!("https://a.example.com/{i}")))
            .collect();

        let ranked = rank_products(candidates.clone(), &["https://nowhere.example.com".to_string()]);
        assert_eq!(ranked.len(), MAX_FINAL_PRODUCTS);
        assert_eq!(ranked[0].url, "https://a.example.com/0");

        let ranking: Vec<String> = (0..7)
            .rev()
            .map(|i| format!("https://a.example.com/{i}/"))
            .collect();
        let ranked = rank_products(candidates, &ranking);
        assert_eq!(ranked.len(), MAX_FINAL_PRODUCTS);
        assert_eq!(ranked[0].url, "https://a.example.com/6");
    }

    #[test]
    fn test_rank_products_ignores_duplicate_ranking_entries() {
        let candidates = vec![product("https://a.example.com/x"), product("https://a.example.com/y")];
        let ranking = vec![
            "https://a.example.com/x".to_string(),
            "https://a.example.com/x#reviews".to_string(),
        ];
        let ranked = rank_products(candidates, &ranking);
        assert_eq!(ranked.len(), 1);
    }
}
