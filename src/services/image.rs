//! Image generation: request sizing, payload validation and download.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;
use crate::errors::ServiceError;

pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(120);

const IMAGE_MODEL: &str = "dall-e-3";

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    n: u32,
    model: &'a str,
    size: &'a str,
    quality: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: Option<String>,
    b64_json: Option<String>,
}

/// How the provider delivered (or didn't deliver) the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    /// No credentials configured; the pipeline writes an empty file and
    /// keeps going.
    Placeholder,
    Url(String),
    Inline(Vec<u8>),
}

/// Wraps the image-generation endpoint and the follow-up download.
pub struct ImageClient {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl ImageClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// Request one image for `prompt`.
    ///
    /// Without an API key this is a graceful no-op returning
    /// [`ImagePayload::Placeholder`], so credential-less environments still
    /// run the full pipeline deterministically.
    pub async fn generate(&self, prompt: &str) -> Result<ImagePayload, ServiceError> {
        let Some(key) = self.api_key.as_deref() else {
            tracing::info!("no API key, producing placeholder image");
            return Ok(ImagePayload::Placeholder);
        };

        let (size, quality) = request_geometry(prompt);
        let request = ImageRequest {
            prompt,
            n: 1,
            model: IMAGE_MODEL,
            size,
            quality,
            style: None,
        };
        let resp = self
            .http
            .post(format!("{}/images/generations", self.api_base))
            .bearer_auth(key)
            .timeout(IMAGE_TIMEOUT)
            .json(&request)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(super::error_from_response(resp).await);
        }

        let parsed: ImageResponse = resp.json().await?;
        let datum = parsed
            .data
            .into_iter()
            .next()
            .ok_or(ServiceError::MissingImagePayload)?;
        payload_from_datum(datum)
    }

    /// Fetch the generated image bytes from the provider's URL.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        let resp = self.http.get(url).timeout(IMAGE_TIMEOUT).send().await?;
        if !resp.status().is_success() {
            return Err(super::error_from_response(resp).await);
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Size and quality keyed off orientation words in the enhanced prompt.
fn request_geometry(prompt: &str) -> (&'static str, &'static str) {
    let lower = prompt.to_lowercase();
    if lower.contains("landscape") || lower.contains("horizontal") {
        ("1792x1024", "hd")
    } else if lower.contains("vertical") {
        ("1024x1792", "hd")
    } else {
        ("1024x1024", "standard")
    }
}

/// Exactly one of `url` / `b64_json` must be present.
fn payload_from_datum(datum: ImageDatum) -> Result<ImagePayload, ServiceError> {
    match (datum.url, datum.b64_json) {
        (Some(_), Some(_)) => Err(ServiceError::AmbiguousImagePayload),
        (None, None) => Err(ServiceError::MissingImagePayload),
        (Some(url), None) => Ok(ImagePayload::Url(url)),
        (None, Some(b64)) => {
            let bytes = base64::engine::general_purpose::STANDARD.decode(b64)?;
            Ok(ImagePayload::Inline(bytes))
        }
    }
}
