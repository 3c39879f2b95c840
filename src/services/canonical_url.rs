//! URL normalization used as the product deduplication key.

use std::collections::HashSet;

use url::Url;

use crate::models::product::SearchResult;

/// Query parameters that only carry campaign or referral tracking.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "msclkid", "yclid", "dclid", "mc_cid", "mc_eid", "_ga", "ref", "ref_src",
    "igshid", "spm",
];

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

/// Canonical form of a product URL.
///
/// Scheme and host are lowercased by the parser, the fragment and tracking parameters are
/// dropped, the remaining parameters are sorted and trailing slashes are stripped from the
/// path. Text that does not parse as a URL is trimmed and loses its trailing slashes.
pub fn canonicalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_string();
    };

    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    params.sort();
    if params.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(params);
    }

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    let mut canonical = url.to_string();
    // The serializer keeps a lone "/" after the authority; drop it so "a.com/" == "a.com"
    if url.query().is_none() && canonical.ends_with('/') {
        canonical.pop();
    }
    canonical
}

/// Keep the first occurrence of every canonical URL, preserving input order.
pub fn dedupe(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|result| seen.insert(canonicalize(&result.url)))
        .collect()
}
