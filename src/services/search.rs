use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::models::product::{QueryIntent, SearchResult};
use crate::services::retry::RetryPolicy;
use crate::services::upstream::{check_status, UpstreamError};

const SERVICE: &str = "search";

pub const GOOGLE_CSE_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// Product search provider.
#[async_trait]
pub trait ProductSearch: Send + Sync {
    /// Results for one query, in provider order, at most `intent.count` entries.
    async fn search(&self, intent: &QueryIntent) -> Result<Vec<SearchResult>, UpstreamError>;
}

/// Google Custom Search JSON API client.
pub struct GoogleCseClient {
    http: Client,
    base_url: String,
    credentials: Option<(String, String)>,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct CseResponse {
    #[serde(default)]
    items: Vec<CseItem>,
}

#[derive(Deserialize)]
struct CseItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    pagemap: Option<Value>,
}

impl GoogleCseClient {
    /// `api_key` and `cx` are optional: without them every search returns no results.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        cx: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        let credentials = match (api_key, cx) {
            (Some(key), Some(cx)) if !key.is_empty() && !cx.is_empty() => Some((key, cx)),
            _ => None,
        };
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            credentials,
            retry,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    async fn search_once(
        &self,
        key: &str,
        cx: &str,
        intent: &QueryIntent,
    ) -> Result<Vec<SearchResult>, UpstreamError> {
        let num = intent.count.to_string();
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("key", key),
                ("cx", cx),
                ("q", intent.query.as_str()),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        let response = check_status(SERVICE, response).await?;
        let parsed: CseResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;

        Ok(parsed
            .items
            .into_iter()
            .filter(|item| !item.title.trim().is_empty() && !item.link.trim().is_empty())
            .take(usize::from(intent.count))
            .map(into_search_result)
            .collect())
    }
}

/// First object of a pagemap array, e.g. `pagemap.offer[0]`.
fn pagemap_entry<'a>(pagemap: &'a Value, key: &str) -> Option<&'a Value> {
    pagemap.get(key)?.as_array()?.first()
}

fn pagemap_str(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn into_search_result(item: CseItem) -> SearchResult {
    let pagemap = item.pagemap.unwrap_or(Value::Null);

    let image_url = pagemap_entry(&pagemap, "cse_image").and_then(|img| pagemap_str(img, "src"));

    let price = pagemap_entry(&pagemap, "offer")
        .or_else(|| pagemap_entry(&pagemap, "product"))
        .and_then(|offer| {
            let amount = pagemap_str(offer, "price")?;
            Some(match pagemap_str(offer, "pricecurrency") {
                Some(currency) => format!("{currency} {amount}"),
                None => amount,
            })
        });

    let rating = pagemap_entry(&pagemap, "aggregaterating")
        .and_then(|r| pagemap_str(r, "ratingvalue"))
        .and_then(|r| r.parse::<f64>().ok());

    SearchResult {
        name: item.title.trim().to_string(),
        url: item.link.trim().to_string(),
        snippet: item.snippet.trim().to_string(),
        image_url,
        price,
        rating,
    }
}

#[async_trait]
impl ProductSearch for GoogleCseClient {
    async fn search(&self, intent: &QueryIntent) -> Result<Vec<SearchResult>, UpstreamError> {
        let Some((key, cx)) = &self.credentials else {
            warn!(query = %intent.query, "Search credentials missing, returning no products");
            return Ok(Vec::new());
        };

        let results = self
            .retry
            .run("product_search", |_| self.search_once(key, cx, intent))
            .await?;
        info!(query = %intent.query, requested = intent.count, returned = results.len(), "Product search complete");
        Ok(results)
    }
}
