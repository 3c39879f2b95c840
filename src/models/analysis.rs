use serde::{Deserialize, Serialize};

use crate::models::job::StageTimings;
use crate::models::product::{EnrichedProduct, QueryIntent};

/// Maximum number of products returned to the client.
pub const MAX_FINAL_PRODUCTS: usize = 5;

/// Output of the planning stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub skin_type: String,
    pub diagnosis: String,
    pub concerns: Vec<String>,
    pub intents: Vec<QueryIntent>,
}

/// Structured answer of the finalize call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FinalizeOutput {
    pub diagnosis: String,
    pub skin_type: String,
    pub explanation: String,
    #[serde(default)]
    pub routine_steps: Vec<String>,
    #[serde(default)]
    pub additional_recommendations: String,
    /// URLs of the chosen products, best first.
    #[serde(default)]
    pub product_urls: Vec<String>,
}

/// Final payload of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub diagnosis: String,
    pub skin_type: String,
    pub explanation: String,
    #[serde(default)]
    pub routine_steps: Vec<String>,
    #[serde(default)]
    pub additional_recommendations: String,
    pub products: Vec<EnrichedProduct>,
    pub vision_summary: String,
    pub timings: StageTimings,
}
