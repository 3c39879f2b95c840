pub mod canonical_url;
pub mod enrichment;
pub mod heuristics;
pub mod image_fetch;
pub mod job_store;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod price;
pub mod retry;
pub mod search;
pub mod upstream;
pub mod vision;
