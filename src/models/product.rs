use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Upper bound the search provider accepts for results per query.
pub const MAX_RESULTS_PER_QUERY: u8 = 10;

/// A product search the planning stage asked for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryIntent {
    pub query: String,
    /// Desired number of results, always within 1..=10.
    pub count: u8,
}

impl QueryIntent {
    pub fn new(query: impl Into<String>, count: i64) -> Self {
        Self {
            query: query.into().trim().to_string(),
            count: count.clamp(1, MAX_RESULTS_PER_QUERY as i64) as u8,
        }
    }
}

/// Raw entry returned by the product search provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub name: String,
    pub url: String,
    pub snippet: String,
    pub image_url: Option<String>,
    /// Price text from the provider's page metadata, if it exposed one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rating: Option<f64>,
}

/// A decimal amount with an optional ISO 4217 currency code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Price {
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    SearchProvider,
    PageExtraction,
}

/// Search result after deduplication and price enrichment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedProduct {
    pub name: String,
    pub url: String,
    pub snippet: String,
    pub image_url: Option<String>,
    pub price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub price_source: Option<PriceSource>,
    pub rating: Option<f64>,
}

impl EnrichedProduct {
    pub fn needs_price(&self) -> bool {
        self.price.is_none()
    }
}
