//! Best-effort price extraction from product pages.
//!
//! Extraction is a strategy behind [`PriceExtractor`]: the enrichment stage hands over page
//! content and gets an optional [`Price`] back. The default chain reads structured data
//! first (schema.org microdata, Open Graph product tags, JSON-LD offers) and falls back to
//! scanning the visible text for a currency-marked amount.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::models::product::Price;

/// Strategy that locates a price in the content of a product page.
pub trait PriceExtractor: Send + Sync {
    fn extract(&self, page: &str) -> Option<Price>;
}

/// Tries each extractor in order and returns the first price found.
pub struct ChainExtractor {
    extractors: Vec<Box<dyn PriceExtractor>>,
}

impl ChainExtractor {
    pub fn new(extractors: Vec<Box<dyn PriceExtractor>>) -> Self {
        Self { extractors }
    }
}

impl Default for ChainExtractor {
    fn default() -> Self {
        Self::new(vec![
            Box::new(StructuredDataExtractor),
            Box::new(TextPatternExtractor),
        ])
    }
}

impl PriceExtractor for ChainExtractor {
    fn extract(&self, page: &str) -> Option<Price> {
        self.extractors.iter().find_map(|e| e.extract(page))
    }
}

// ── Structured data ──────────────────────────────────────────────────

/// Reads machine-readable price markup.
pub struct StructuredDataExtractor;

impl PriceExtractor for StructuredDataExtractor {
    fn extract(&self, page: &str) -> Option<Price> {
        let document = Html::parse_document(page);
        microdata_price(&document)
            .or_else(|| open_graph_price(&document))
            .or_else(|| json_ld_price(&document))
    }
}

fn first_attr_or_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).find_map(|el| {
        el.value()
            .attr("content")
            .map(str::to_string)
            .or_else(|| Some(el.text().collect::<String>()))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn microdata_price(document: &Html) -> Option<Price> {
    let amount = first_attr_or_text(document, r#"[itemprop="price"]"#)?;
    let currency = first_attr_or_text(document, r#"[itemprop="priceCurrency"]"#);
    priced(&amount, currency)
}

fn open_graph_price(document: &Html) -> Option<Price> {
    let amount = first_attr_or_text(document, r#"meta[property="product:price:amount"]"#)
        .or_else(|| first_attr_or_text(document, r#"meta[property="og:price:amount"]"#))?;
    let currency = first_attr_or_text(document, r#"meta[property="product:price:currency"]"#)
        .or_else(|| first_attr_or_text(document, r#"meta[property="og:price:currency"]"#));
    priced(&amount, currency)
}

fn json_ld_price(document: &Html) -> Option<Price> {
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;
    document.select(&selector).find_map(|script| {
        let raw = script.text().collect::<String>();
        let value: Value = serde_json::from_str(raw.trim()).ok()?;
        find_offer_price(&value)
    })
}

/// Depth-first search for `offers.price` (or `lowPrice`) anywhere in a JSON-LD document.
fn find_offer_price(value: &Value) -> Option<Price> {
    match value {
        Value::Array(items) => items.iter().find_map(find_offer_price),
        Value::Object(map) => {
            if let Some(offers) = map.get("offers") {
                if let Some(price) = offer_price(offers) {
                    return Some(price);
                }
            }
            map.values().find_map(find_offer_price)
        }
        _ => None,
    }
}

fn offer_price(offers: &Value) -> Option<Price> {
    match offers {
        Value::Array(items) => items.iter().find_map(offer_price),
        Value::Object(map) => {
            let amount = map
                .get("price")
                .or_else(|| map.get("lowPrice"))
                .and_then(json_scalar)?;
            let currency = map.get("priceCurrency").and_then(json_scalar);
            priced(&amount, currency)
        }
        _ => None,
    }
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn priced(amount: &str, currency: Option<String>) -> Option<Price> {
    let amount = parse_amount(amount)?;
    Some(Price {
        amount,
        currency: currency
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic())),
    })
}

// ── Visible text ─────────────────────────────────────────────────────

/// Scans the visible page text for an amount next to a currency symbol or code.
pub struct TextPatternExtractor;

impl PriceExtractor for TextPatternExtractor {
    fn extract(&self, page: &str) -> Option<Price> {
        let document = Html::parse_document(page);
        let mut text = String::new();
        for node in document.root_element().descendants() {
            let Some(fragment) = node.value().as_text() else {
                continue;
            };
            let hidden = node
                .parent()
                .and_then(|parent| parent.value().as_element().map(|el| el.name()))
                .is_some_and(|name| matches!(name, "script" | "style" | "noscript"));
            if !hidden {
                text.push_str(fragment);
                text.push(' ');
            }
        }
        find_price_in_text(&text)
    }
}

const AMOUNT: &str = r"\d{1,3}(?:[ ,.\u{a0}]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?";

fn prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(
            r"(?P<cur>[$€£¥₽]|\b(?:USD|EUR|GBP|JPY|RUB|CAD|AUD)\b)\s?(?P<amount>{AMOUNT})"
        ))
        .expect("valid price prefix pattern")
    })
}

fn suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(
            r"(?P<amount>{AMOUNT})\s?(?P<cur>[$€£¥₽]|\b(?:USD|EUR|GBP|JPY|RUB|CAD|AUD)\b|руб\.?)"
        ))
        .expect("valid price suffix pattern")
    })
}

fn currency_code(marker: &str) -> Option<String> {
    let code = match marker {
        "$" => "USD",
        "€" => "EUR",
        "£" => "GBP",
        "¥" => "JPY",
        "₽" | "руб" | "руб." => "RUB",
        code if code.len() == 3 => code,
        _ => return None,
    };
    Some(code.to_string())
}

/// Find the first currency-marked amount in free text.
pub fn find_price_in_text(text: &str) -> Option<Price> {
    [prefix_pattern(), suffix_pattern()]
        .into_iter()
        .filter_map(|pattern| pattern.captures(text))
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let amount = parse_amount(caps.name("amount")?.as_str())?;
            let currency = currency_code(caps.name("cur")?.as_str());
            Some((start, Price { amount, currency }))
        })
        .min_by_key(|(start, _)| *start)
        .map(|(_, price)| price)
}

/// Parse a price as written by the search provider: a marked amount or a bare number.
pub fn parse_price_text(text: &str) -> Option<Price> {
    find_price_in_text(text).or_else(|| {
        parse_amount(text).map(|amount| Price {
            amount,
            currency: None,
        })
    })
}

/// Parse a positive amount written with either `.` or `,` as the decimal separator.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            let (decimal_sep, thousands_sep) = if dot > comma { ('.', ',') } else { (',', '.') };
            cleaned
                .replace(thousands_sep, "")
                .replace(decimal_sep, ".")
        }
        (None, Some(_)) => {
            let (head, tail) = cleaned.rsplit_once(',')?;
            if cleaned.matches(',').count() == 1 && (1..=2).contains(&tail.len()) {
                format!("{head}.{tail}")
            } else {
                cleaned.replace(',', "")
            }
        }
        (Some(_), None) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };

    Decimal::from_str(&normalized)
        .ok()
        .filter(|amount| amount.is_sign_positive() && !amount.is_zero())
}
