use std::time::{Duration, Instant};

use image::ImageFormat;
use reqwest::Client;
use tracing::info;
use url::Url;

/// A fetched and validated source image.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    /// Time spent fetching and validating.
    pub elapsed: Duration,
}

/// Downloads the image a job will analyze.
pub struct ImageFetcher {
    http: Client,
    max_bytes: usize,
}

impl ImageFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, InputError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InputError::Unreachable(e.to_string()))?;
        Ok(Self { http, max_bytes })
    }

    /// Fetch `image_url` and check that the payload is a supported image.
    pub async fn fetch(&self, image_url: &str) -> Result<SourceImage, InputError> {
        let start = Instant::now();

        let url = Url::parse(image_url).map_err(|e| InputError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(InputError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let mut response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                InputError::Timeout
            } else {
                InputError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(InputError::HttpStatus(status.as_u16()));
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(InputError::TooLarge(self.max_bytes));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                InputError::Timeout
            } else {
                InputError::Unreachable(e.to_string())
            }
        })? {
            if exceeds_limit(bytes.len(), chunk.len(), self.max_bytes) {
                return Err(InputError::TooLarge(self.max_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(InputError::NotAnImage);
        }

        // Validate image format using the `image` crate
        let format = image::guess_format(&bytes).map_err(|_| InputError::NotAnImage)?;

        let elapsed = start.elapsed();
        info!(
            image_url,
            format = ?format,
            size_bytes = bytes.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Source image fetched"
        );

        Ok(SourceImage {
            bytes,
            format,
            elapsed,
        })
    }
}

fn exceeds_limit(received: usize, chunk: usize, max_bytes: usize) -> bool {
    received.saturating_add(chunk) > max_bytes
}

/// Problems with the submitted image; the job is never created.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Invalid image_url: {0}")]
    InvalidUrl(String),

    #[error("Failed to fetch image_url: {0}")]
    Unreachable(String),

    #[error("Timed out fetching image_url")]
    Timeout,

    #[error("image_url returned HTTP {0}")]
    HttpStatus(u16),

    #[error("image_url did not return a supported image")]
    NotAnImage,

    #[error("Image exceeds the {0} byte limit")]
    TooLarge(usize),
}
