//! Reasoning model adapter: tool-calling planning and the finalize pass.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint (vLLM, llama.cpp server,
//! hosted APIs). The planning call declares a single `search_products(query, num)` tool and
//! every tool call the model emits becomes a typed [`QueryIntent`]; the model never returns
//! products itself.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::analysis::{FinalizeOutput, Plan, MAX_FINAL_PRODUCTS};
use crate::models::job::Mode;
use crate::models::product::{EnrichedProduct, QueryIntent};
use crate::services::upstream::{check_status, UpstreamError};

const SERVICE: &str = "planner";

/// Results requested per query when the model omits `num`.
const DEFAULT_RESULTS_PER_QUERY: i64 = 5;

/// What the planning model decided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDraft {
    pub intents: Vec<QueryIntent>,
    pub skin_type: Option<String>,
    pub diagnosis: Option<String>,
}

/// Input of the finalize pass.
pub struct FinalizeRequest<'a> {
    pub vision_summary: &'a str,
    pub plan: &'a Plan,
    pub products: &'a [EnrichedProduct],
    pub mode: Mode,
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Ask the model which product searches to run.
    async fn plan(
        &self,
        vision_summary: &str,
        user_text: Option<&str>,
        max_intents: usize,
    ) -> Result<PlanDraft, UpstreamError>;

    /// Turn the analysis and candidate products into the final answer.
    async fn finalize(&self, request: FinalizeRequest<'_>) -> Result<FinalizeOutput, UpstreamError>;
}

const SYSTEM_PROMPT_PLAN: &str = concat!(
    "You are a dermatology assistant. Given a visual analysis of a skin image and an optional ",
    "user note, infer the probable skin type and issues, then call the search_products tool ",
    "once per distinct product need with a focused query. Finish with a compact JSON object ",
    "with keys skin_type and diagnosis."
);

const SYSTEM_PROMPT_FINAL: &str = concat!(
    "You are an expert dermatologist selecting personalized skin-care products from search ",
    "results. Respond with a single JSON object only, no markdown, with keys: diagnosis, ",
    "skin_type, explanation, routine_steps (array of strings), additional_recommendations ",
    "(string), product_urls (array of up to 5 product URLs copied exactly from the candidate ",
    "list, best first)."
);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    num: Option<i64>,
}

#[derive(Deserialize, Default)]
struct PlanContent {
    skin_type: Option<String>,
    diagnosis: Option<String>,
}

fn search_tool_schema() -> Value {
    json!([{
        "type": "function",
        "function": {
            "name": "search_products",
            "description": "Search skincare products on the web.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "num": {"type": "integer", "minimum": 1, "maximum": 10}
                },
                "required": ["query"]
            }
        }
    }])
}

/// Chat-completions client used for both planning and finalize.
pub struct ChatPlanner {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatPlanner {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<AssistantMessage, UpstreamError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        let response = check_status(SERVICE, response).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| UpstreamError::malformed(SERVICE, "no choices in completion"))
    }
}

/// Strip a markdown code fence the model may wrap around JSON.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn intents_from_tool_calls(calls: &[ToolCall], max_intents: usize) -> Vec<QueryIntent> {
    let mut intents: Vec<QueryIntent> = Vec::new();
    for call in calls {
        if call.function.name != "search_products" {
            warn!(tool = %call.function.name, "Planner requested an unknown tool");
            continue;
        }
        let args: SearchArgs = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(error = %e, arguments = %call.function.arguments, "Unparsable tool arguments");
                continue;
            }
        };
        let intent = QueryIntent::new(args.query, args.num.unwrap_or(DEFAULT_RESULTS_PER_QUERY));
        if intent.query.is_empty() || intents.iter().any(|i| i.query == intent.query) {
            continue;
        }
        intents.push(intent);
        if intents.len() == max_intents {
            break;
        }
    }
    intents
}

#[derive(Serialize)]
struct CandidateProduct<'a> {
    name: &'a str,
    url: &'a str,
    snippet: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<String>,
}

#[async_trait]
impl Planner for ChatPlanner {
    async fn plan(
        &self,
        vision_summary: &str,
        user_text: Option<&str>,
        max_intents: usize,
    ) -> Result<PlanDraft, UpstreamError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT_PLAN.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "Visual analysis: {vision_summary}\nUser note: {}",
                        user_text.unwrap_or("")
                    ),
                },
            ],
            temperature: 0.1,
            max_tokens: 768,
            tools: Some(search_tool_schema()),
            response_format: None,
        };

        let message = self.chat(&request).await?;
        let tool_calls = message.tool_calls.as_deref().unwrap_or_default();
        let intents = intents_from_tool_calls(tool_calls, max_intents);
        let content: PlanContent = message
            .content
            .as_deref()
            .and_then(|c| serde_json::from_str(strip_code_fence(c)).ok())
            .unwrap_or_default();

        debug!(
            intents = intents.len(),
            tool_calls = tool_calls.len(),
            "Planner response parsed"
        );
        Ok(PlanDraft {
            intents,
            skin_type: content.skin_type,
            diagnosis: content.diagnosis,
        })
    }

    async fn finalize(&self, request: FinalizeRequest<'_>) -> Result<FinalizeOutput, UpstreamError> {
        let candidates: Vec<CandidateProduct<'_>> = request
            .products
            .iter()
            .map(|p| CandidateProduct {
                name: &p.name,
                url: &p.url,
                snippet: &p.snippet,
                price: p.price.as_ref().map(|price| match &price.currency {
                    Some(currency) => format!("{} {}", price.amount, currency),
                    None => price.amount.to_string(),
                }),
            })
            .collect();
        let plan = serde_json::to_string(request.plan)
            .map_err(|e| UpstreamError::malformed(SERVICE, e.to_string()))?;
        let products = serde_json::to_string(&candidates)
            .map_err(|e| UpstreamError::malformed(SERVICE, e.to_string()))?;

        let (max_tokens, depth) = match request.mode {
            Mode::Basic => (
                512,
                "Keep the explanation short; routine_steps and additional_recommendations may be empty.",
            ),
            Mode::Extended => (
                1024,
                "Explain why each product fits, give a full morning/evening routine and lifestyle tips.",
            ),
        };

        let chat = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: format!("{SYSTEM_PROMPT_FINAL} {depth}"),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "Vision summary: {}\nPlan: {plan}\nProducts: {products}\nSelect at most {MAX_FINAL_PRODUCTS} products.",
                        request.vision_summary
                    ),
                },
            ],
            temperature: 0.2,
            max_tokens,
            tools: None,
            response_format: Some(json!({"type": "json_object"})),
        };

        let message = self.chat(&chat).await?;
        let content = message
            .content
            .ok_or_else(|| UpstreamError::malformed(SERVICE, "finalize returned no content"))?;
        serde_json::from_str(strip_code_fence(&content)).map_err(|e| {
            warn!(error = %e, raw = %content.chars().take(300).collect::<String>(), "Finalize JSON parse failed");
            UpstreamError::malformed(SERVICE, format!("finalize output is not valid JSON: {e}"))
        })
    }
}
