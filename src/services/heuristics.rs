//! Keyword heuristics over the vision summary.
//!
//! Used to build the plan in basic mode and whenever the planning model emits no searches.

use crate::models::analysis::Plan;
use crate::models::product::QueryIntent;

const DEFAULT_QUERY: &str = "skincare products routine";
const FALLBACK_RESULTS: i64 = 5;
const MAX_DIAGNOSIS_CHARS: usize = 500;

/// Keyword groups mapped to a search query and a human-readable concern.
const CONCERNS: &[(&[&str], &str, &str)] = &[
    (&["blackhead", "comedone"], "blackheads comedones treatment", "blackheads and comedones"),
    (&["dehydrat", "dry"], "dehydrated skin moisturizer", "dehydration"),
    (&["acne", "pimple", "pustule"], "acne treatment products", "acne"),
    (&["aging", "fine line", "wrinkle"], "anti-aging skincare", "signs of aging"),
    (&["hyperpigmentation", "dark spot"], "hyperpigmentation treatment", "hyperpigmentation"),
    (&["inflam", "redness"], "anti-inflammatory skincare", "inflammation and redness"),
    (&["oily"], "oil control products", "excess sebum"),
];

fn matching_concerns(summary: &str) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
    let lower = summary.to_lowercase();
    CONCERNS.iter().filter_map(move |(keywords, query, concern)| {
        keywords
            .iter()
            .any(|k| lower.contains(k))
            .then_some((*query, *concern))
    })
}

pub fn infer_skin_type(summary: &str) -> &'static str {
    let lower = summary.to_lowercase();
    let oily = lower.contains("oily");
    let dry = lower.contains("dry");
    if oily && !dry {
        "oily"
    } else if dry && !oily {
        "dry"
    } else if lower.contains("normal") {
        "normal"
    } else if lower.contains("sensitive") {
        "sensitive"
    } else {
        "combination"
    }
}

pub fn concerns(summary: &str) -> Vec<String> {
    matching_concerns(summary)
        .map(|(_, concern)| concern.to_string())
        .collect()
}

/// Search query built from at most two detected concerns.
pub fn fallback_query(summary: &str) -> String {
    let queries: Vec<&str> = matching_concerns(summary).map(|(q, _)| q).take(2).collect();
    if queries.is_empty() {
        DEFAULT_QUERY.to_string()
    } else {
        queries.join(" ")
    }
}

/// First non-empty line of the summary without its "Summary:" label and markdown emphasis.
pub fn diagnosis_line(summary: &str) -> String {
    let line = summary
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Skin analysis completed");
    let cleaned = line.replace("**", "");
    let cleaned = cleaned.trim();
    let cleaned = cleaned
        .strip_prefix("Summary:")
        .map(str::trim)
        .unwrap_or(cleaned);
    cleaned.chars().take(MAX_DIAGNOSIS_CHARS).collect()
}

/// Plan derived purely from the vision summary, with a single fallback search.
pub fn plan_from_summary(summary: &str) -> Plan {
    Plan {
        skin_type: infer_skin_type(summary).to_string(),
        diagnosis: diagnosis_line(summary),
        concerns: concerns(summary),
        intents: vec![QueryIntent::new(fallback_query(summary), FALLBACK_RESULTS)],
    }
}
