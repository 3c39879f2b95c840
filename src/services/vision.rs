use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::job::Mode;
use crate::services::upstream::{check_status, UpstreamError};

const SERVICE: &str = "vision";

/// Black-box vision model that describes a skin image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn analyze(
        &self,
        image: &[u8],
        user_text: Option<&str>,
        mode: Mode,
    ) -> Result<String, UpstreamError>;
}

/// HTTP client for an image-to-text inference endpoint.
///
/// The endpoint accepts `{image, prompt, max_tokens}` with a base64 image and answers
/// `{result: {description}}`.
pub struct VisionClient {
    http: Client,
    url: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct VisionRequest<'a> {
    image: String,
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct VisionResponse {
    result: VisionResult,
}

#[derive(Deserialize)]
struct VisionResult {
    description: String,
}

const BASIC_PROMPT: &str = concat!(
    "You are a professional dermatologist. Analyze this skin image and keep it concise and ",
    "approachable. Respond with exactly two labeled sections in English:\n",
    "Summary: a brief 1-2 sentence overview of the skin condition.\n",
    "Description (basic): a short paragraph (3-6 sentences) with the key observations and ",
    "main concerns."
);

const EXTENDED_PROMPT: &str = concat!(
    "You are an expert dermatologist. Analyze this skin image in detail using professional ",
    "terminology while staying understandable. Cover skin type and texture, hydration and ",
    "barrier function, sebum production and pore condition, lesions, inflammation or acne, ",
    "pigmentation and color uniformity, signs of aging or photodamage, visible vessels or ",
    "redness, and any abnormal or concerning features. Be specific about location and ",
    "severity. Respond with two labeled sections: 'Summary:' and 'Description (extended):'."
);

impl VisionClient {
    pub fn new(url: &str, api_token: Option<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            http,
            url: url.to_string(),
            api_token,
        })
    }

    fn prompt(mode: Mode, user_text: Option<&str>) -> String {
        let base = match mode {
            Mode::Basic => BASIC_PROMPT,
            Mode::Extended => EXTENDED_PROMPT,
        };
        match user_text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(note) => format!("{base}\nPatient note: {note}"),
            None => base.to_string(),
        }
    }
}

#[async_trait]
impl VisionModel for VisionClient {
    async fn analyze(
        &self,
        image: &[u8],
        user_text: Option<&str>,
        mode: Mode,
    ) -> Result<String, UpstreamError> {
        let prompt = Self::prompt(mode, user_text);
        let body = VisionRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image),
            prompt: &prompt,
            max_tokens: match mode {
                Mode::Basic => 384,
                Mode::Extended => 1024,
            },
        };

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        let response = check_status(SERVICE, response).await?;
        let parsed: VisionResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;

        let summary = parsed.result.description.trim().to_string();
        if summary.is_empty() {
            return Err(UpstreamError::malformed(SERVICE, "empty description"));
        }
        Ok(summary)
    }
}
