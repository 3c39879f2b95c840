//! Canned upstream payloads for router tests

use serde_json::{json, Value};

/// Smallest byte sequence `image::guess_format` recognizes as PNG.
pub const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

pub const VISION_SUMMARY: &str = "**Summary:** Oily skin with visible blackheads and mild redness.\n\
    Description (basic): Enlarged pores across the nose and cheeks.";

/// Product page whose only price is in microdata.
pub const PRICED_PAGE: &str = r#"<html><body>
<h1>Salicylic Acid Cleanser</h1>
<span itemprop="price" content="14.50"></span><meta itemprop="priceCurrency" content="USD">
</body></html>"#;

pub fn vision_response() -> Value {
    json!({ "result": { "description": VISION_SUMMARY } })
}

/// Search response with three products; the first carries a provider price and
/// the third duplicates the second behind tracking parameters.
pub fn search_response(base_url: &str) -> Value {
    json!({
        "items": [
            {
                "title": "BHA Exfoliant",
                "link": format!("{base_url}/products/bha"),
                "snippet": "Unclogs pores",
                "pagemap": { "offer": [{ "price": "29.00", "pricecurrency": "USD" }] }
            },
            {
                "title": "Salicylic Acid Cleanser",
                "link": format!("{base_url}/products/cleanser"),
                "snippet": "Daily cleanser"
            },
            {
                "title": "Salicylic Acid Cleanser (promo)",
                "link": format!("{base_url}/products/cleanser/?utm_source=ads&gclid=abc"),
                "snippet": "Daily cleanser"
            }
        ]
    })
}

/// Finalizer answer ranking the cleanser ahead of the exfoliant.
pub fn finalize_response(base_url: &str) -> Value {
    let content = json!({
        "diagnosis": "Comedonal congestion on oily skin",
        "skin_type": "oily",
        "explanation": "Salicylic acid clears pores; keep the routine gentle.",
        "routine_steps": ["Cleanse morning and evening", "Exfoliate three times a week"],
        "additional_recommendations": "Use non-comedogenic sunscreen.",
        "product_urls": [
            format!("{base_url}/products/cleanser"),
            format!("{base_url}/products/bha")
        ]
    });
    json!({ "choices": [{ "message": { "content": content.to_string() } }] })
}
