use std::time::Duration;

use serde::Deserialize;

use crate::services::search::GOOGLE_CSE_URL;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Image-to-text inference endpoint
    pub vision_url: String,

    /// Bearer token for the vision endpoint
    #[serde(default)]
    pub vision_api_token: Option<String>,

    #[serde(default = "default_vision_timeout")]
    pub vision_timeout_secs: u64,

    /// OpenAI-compatible base URL of the planning model
    #[serde(default = "default_planner_base_url")]
    pub planner_base_url: String,

    #[serde(default = "default_planner_api_key")]
    pub planner_api_key: String,

    #[serde(default = "default_planner_model")]
    pub planner_model: String,

    #[serde(default = "default_planner_timeout")]
    pub planner_timeout_secs: u64,

    /// Google Custom Search credentials. Product search is disabled without them.
    #[serde(default)]
    pub google_cse_api_key: Option<String>,

    #[serde(default)]
    pub google_cse_cx: Option<String>,

    #[serde(default = "default_search_base_url")]
    pub search_base_url: String,

    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    #[serde(default = "default_page_fetch_timeout")]
    pub page_fetch_timeout_secs: u64,

    #[serde(default = "default_image_fetch_timeout")]
    pub image_fetch_timeout_secs: u64,

    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Simultaneous product page fetches, clamped to 4..=8
    #[serde(default = "default_enrichment_concurrency")]
    pub enrichment_concurrency: usize,

    /// Wall-clock budget for a basic-mode job
    #[serde(default = "default_basic_budget")]
    pub basic_budget_secs: u64,

    /// Wall-clock budget for an extended-mode job
    #[serde(default = "default_extended_budget")]
    pub extended_budget_secs: u64,

    /// Finished jobs older than this are purged
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_vision_timeout() -> u64 {
    60
}

fn default_planner_base_url() -> String {
    "http://localhost:8001/v1".to_string()
}

fn default_planner_api_key() -> String {
    "dev".to_string()
}

fn default_planner_model() -> String {
    "Qwen/Qwen3-4B-Instruct-2507".to_string()
}

fn default_planner_timeout() -> u64 {
    45
}

fn default_search_base_url() -> String {
    GOOGLE_CSE_URL.to_string()
}

fn default_search_timeout() -> u64 {
    15
}

fn default_page_fetch_timeout() -> u64 {
    15
}

fn default_image_fetch_timeout() -> u64 {
    20
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_enrichment_concurrency() -> usize {
    6
}

fn default_basic_budget() -> u64 {
    5
}

fn default_extended_budget() -> u64 {
    80
}

fn default_retention_days() -> u32 {
    30
}

fn default_cleanup_interval() -> u64 {
    3600
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}
