use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use skin_analyze::app_state::AppState;
use skin_analyze::config::AppConfig;
use skin_analyze::routes;
use skin_analyze::services::{
    enrichment::{HttpPageSource, ProductEnricher},
    image_fetch::ImageFetcher,
    job_store::JobStore,
    orchestrator::{self, Orchestrator},
    pipeline::{JobBudgets, PipelineExecutor},
    planner::ChatPlanner,
    price::ChainExtractor,
    retry::RetryPolicy,
    search::GoogleCseClient,
    vision::VisionClient,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing skin-analyze server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    // External service adapters
    tracing::info!(url = %config.vision_url, "Initializing vision client");
    let vision = VisionClient::new(
        &config.vision_url,
        config.vision_api_token.clone(),
        Duration::from_secs(config.vision_timeout_secs),
    )
    .expect("Failed to initialize vision client");

    tracing::info!(
        base_url = %config.planner_base_url,
        model = %config.planner_model,
        "Initializing planner client"
    );
    let planner = ChatPlanner::new(
        &config.planner_base_url,
        &config.planner_api_key,
        &config.planner_model,
        Duration::from_secs(config.planner_timeout_secs),
    )
    .expect("Failed to initialize planner client");

    let search = GoogleCseClient::new(
        &config.search_base_url,
        config.google_cse_api_key.clone(),
        config.google_cse_cx.clone(),
        Duration::from_secs(config.search_timeout_secs),
        RetryPolicy::default(),
    )
    .expect("Failed to initialize search client");
    if !search.is_configured() {
        tracing::warn!("GOOGLE_CSE_API_KEY or GOOGLE_CSE_CX not set, product search disabled");
    }

    let pages = HttpPageSource::new(Duration::from_secs(config.page_fetch_timeout_secs))
        .expect("Failed to initialize page fetcher");
    let enricher = ProductEnricher::new(
        Arc::new(search),
        Arc::new(pages),
        Arc::new(ChainExtractor::default()),
        RetryPolicy::default(),
        config.enrichment_concurrency,
    );
    tracing::info!(concurrency = enricher.concurrency(), "Product enrichment ready");

    let images = ImageFetcher::new(
        Duration::from_secs(config.image_fetch_timeout_secs),
        config.max_image_bytes,
    )
    .expect("Failed to initialize image fetcher");

    // Job store and pipeline
    let store = Arc::new(JobStore::new());
    let budgets = JobBudgets {
        basic: Duration::from_secs(config.basic_budget_secs),
        extended: Duration::from_secs(config.extended_budget_secs),
    };
    let executor = PipelineExecutor::new(
        Arc::clone(&store),
        Arc::new(vision),
        Arc::new(planner),
        enricher,
        budgets,
    );
    let orchestrator = Arc::new(Orchestrator::new(store, Arc::new(executor), images));

    // Background retention cleanup
    tokio::spawn(orchestrator::run_cleanup_loop(
        Arc::clone(&orchestrator),
        config.retention_days,
        config.cleanup_interval(),
    ));

    let state = AppState::new(orchestrator, config.retention_days);
    let app = routes::router(state, prometheus_handle);

    tracing::info!("Starting skin-analyze on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
