//! Product enrichment: merge search results across queries, deduplicate by canonical URL
//! and fill in missing prices from the product pages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::models::product::{EnrichedProduct, PriceSource, QueryIntent, SearchResult};
use crate::services::canonical_url;
use crate::services::price::{self, PriceExtractor};
use crate::services::retry::RetryPolicy;
use crate::services::search::ProductSearch;
use crate::services::upstream::{check_status, UpstreamError};

const SERVICE: &str = "product_page";

/// Allowed range for simultaneous page fetches.
pub const MIN_CONCURRENCY: usize = 4;
pub const MAX_CONCURRENCY: usize = 8;

/// Largest page body handed to price extraction.
const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

/// Source of product page content.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, UpstreamError>;
}

/// Fetches product pages over HTTP with a browser-like user agent.
pub struct HttpPageSource {
    http: Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; SkinAnalyzeBot/1.0)")
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &str) -> Result<String, UpstreamError> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        let mut response = check_status(SERVICE, response).await?;
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
        {
            if append_capped(&mut body, &chunk, MAX_PAGE_BYTES) {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Append as much of `chunk` as fits under `limit`. Returns `true` once the limit is reached.
fn append_capped(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
    let room = limit.saturating_sub(body.len());
    body.extend_from_slice(&chunk[..chunk.len().min(room)]);
    body.len() >= limit
}

/// The search + enrichment stage of the pipeline.
pub struct ProductEnricher {
    search: Arc<dyn ProductSearch>,
    pages: Arc<dyn PageSource>,
    extractor: Arc<dyn PriceExtractor>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl ProductEnricher {
    /// `concurrency` is clamped into 4..=8.
    pub fn new(
        search: Arc<dyn ProductSearch>,
        pages: Arc<dyn PageSource>,
        extractor: Arc<dyn PriceExtractor>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            search,
            pages,
            extractor,
            retry,
            concurrency: concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every intent through the search provider, merge, deduplicate and price-enrich.
    ///
    /// A search failure that survives the provider's own retries is returned as an error.
    /// Page fetch failures are absorbed: the product is kept without a price.
    pub async fn enrich(&self, intents: &[QueryIntent]) -> Result<Vec<EnrichedProduct>, UpstreamError> {
        let mut merged: Vec<SearchResult> = Vec::new();
        for intent in intents {
            let results = self.search.search(intent).await?;
            debug!(query = %intent.query, results = results.len(), "Search results merged");
            merged.extend(results);
        }

        let unique = canonical_url::dedupe(merged);
        let products: Vec<EnrichedProduct> = unique.into_iter().map(from_search_result).collect();
        let missing = products.iter().filter(|p| p.needs_price()).count();

        let enriched: Vec<EnrichedProduct> = stream::iter(products)
            .map(|product| self.fill_price(product))
            .buffered(self.concurrency)
            .collect()
            .await;

        let priced = enriched.iter().filter(|p| p.price.is_some()).count();
        info!(
            queries = intents.len(),
            products = enriched.len(),
            fetched = missing,
            priced,
            "Enrichment complete"
        );
        Ok(enriched)
    }

    async fn fill_price(&self, mut product: EnrichedProduct) -> EnrichedProduct {
        if !product.needs_price() {
            return product;
        }

        let fetched = self
            .retry
            .run("price_page_fetch", |_| self.pages.fetch(&product.url))
            .await;

        match fetched {
            Ok(page) => match self.extractor.extract(&page) {
                Some(price) => {
                    product.price = Some(price);
                    product.price_source = Some(PriceSource::PageExtraction);
                }
                None => {
                    metrics::counter!("enrichment_price_misses_total").increment(1);
                    debug!(url = %product.url, "No price found on product page");
                }
            },
            Err(e) => {
                metrics::counter!("enrichment_price_misses_total").increment(1);
                warn!(url = %product.url, error = %e, "Product page fetch failed, keeping product without price");
            }
        }
        product
    }
}

fn from_search_result(result: SearchResult) -> EnrichedProduct {
    let price = result.price.as_deref().and_then(price::parse_price_text);
    EnrichedProduct {
        price_source: price.as_ref().map(|_| PriceSource::SearchProvider),
        price,
        name: result.name,
        url: result.url,
        snippet: result.snippet,
        image_url: result.image_url,
        rating: result.rating,
    }
}
