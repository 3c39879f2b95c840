//! Test helper utilities for router tests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use httpmock::prelude::*;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tower::ServiceExt;
use uuid::Uuid;

use skin_analyze::app_state::AppState;
use skin_analyze::services::{
    enrichment::{HttpPageSource, ProductEnricher},
    image_fetch::ImageFetcher,
    job_store::JobStore,
    orchestrator::Orchestrator,
    pipeline::{JobBudgets, PipelineExecutor},
    planner::ChatPlanner,
    price::ChainExtractor,
    retry::RetryPolicy,
    search::GoogleCseClient,
    vision::VisionClient,
};

use crate::fixtures;

pub const RETENTION_DAYS: u32 = 30;

/// Mount every upstream the pipeline talks to on `server`.
pub async fn mock_upstreams(server: &MockServer) {
    let base_url = server.base_url();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/images/face.png");
            then.status(200)
                .header("content-type", "image/png")
                .body(fixtures::PNG_HEADER);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/vision");
            then.status(200).json_body(fixtures::vision_response());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/customsearch/v1");
            then.status(200).json_body(fixtures::search_response(&base_url));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/products/cleanser");
            then.status(200).body(fixtures::PRICED_PAGE);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(fixtures::finalize_response(&base_url));
        })
        .await;
}

/// Wire the real adapters against `server` and build the router.
pub fn build_app(server: &MockServer) -> (Router, AppState) {
    let timeout = Duration::from_secs(5);
    let vision = VisionClient::new(&server.url("/vision"), None, timeout).unwrap();
    let planner = ChatPlanner::new(&server.url("/v1"), "test", "test-model", timeout).unwrap();
    let search = GoogleCseClient::new(
        &server.url("/customsearch/v1"),
        Some("key".to_string()),
        Some("cx".to_string()),
        timeout,
        RetryPolicy::new(3, Duration::ZERO),
    )
    .unwrap();
    let enricher = ProductEnricher::new(
        Arc::new(search),
        Arc::new(HttpPageSource::new(timeout).unwrap()),
        Arc::new(ChainExtractor::default()),
        RetryPolicy::new(3, Duration::ZERO),
        4,
    );

    let store = Arc::new(JobStore::new());
    let executor = PipelineExecutor::new(
        Arc::clone(&store),
        Arc::new(vision),
        Arc::new(planner),
        enricher,
        JobBudgets {
            basic: Duration::from_secs(20),
            extended: Duration::from_secs(20),
        },
    );
    let images = ImageFetcher::new(timeout, 1024 * 1024).unwrap();
    let orchestrator = Arc::new(Orchestrator::new(store, Arc::new(executor), images));

    let state = AppState::new(orchestrator, RETENTION_DAYS);
    let handle = PrometheusBuilder::new().build_recorder().handle();
    let app = skin_analyze::routes::router(state.clone(), Arc::new(handle));
    (app, state)
}

/// Send a request through the router and decode the JSON body.
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Poll the result endpoint until the job leaves `running`.
pub async fn wait_for_result(app: &Router, job_id: Uuid) -> (StatusCode, Value) {
    for _ in 0..200 {
        let (status, body) = send(app, get(&format!("/v1/skin-analysis/result/{job_id}"))).await;
        if status != StatusCode::ACCEPTED {
            return (status, body);
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} did not finish in time");
}
