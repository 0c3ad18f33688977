//! Speech synthesis with a bounded retry loop.
//!
//! The provider occasionally drops long renders, so any non-2xx or transport
//! failure is retried. The loop is capped and watches the caller's
//! cancellation token between attempts; it can never spin forever.

use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::ServiceError;

pub const SPEECH_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_ATTEMPTS: u32 = 5;

const RETRY_DELAY: Duration = Duration::from_secs(2);
const SPEECH_MODEL: &str = "tts-1";
const SPEECH_VOICE: &str = "alloy";

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
}

/// Wraps the text-to-speech endpoint.
pub struct SpeechClient {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl SpeechClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// Synthesize narration audio for `input`, returning raw MP3 bytes.
    ///
    /// Without an API key an empty placeholder is returned. Failed attempts
    /// retry up to [`MAX_ATTEMPTS`] regardless of classification; the last
    /// error is surfaced once the cap is reached.
    pub async fn synthesize(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ServiceError> {
        let Some(key) = self.api_key.as_deref() else {
            tracing::info!("no API key, producing placeholder audio");
            return Ok(Vec::new());
        };

        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(ServiceError::Cancelled);
            }
            match self.attempt(key, input).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "speech synthesis attempt failed");
                    last_error = Some(e);
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
        Err(last_error.unwrap_or(ServiceError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
        }))
    }

    async fn attempt(&self, key: &str, input: &str) -> Result<Vec<u8>, ServiceError> {
        let request = SpeechRequest {
            model: SPEECH_MODEL,
            input,
            voice: SPEECH_VOICE,
        };
        let resp = self
            .http
            .post(format!("{}/audio/speech", self.api_base))
            .bearer_auth(key)
            .timeout(SPEECH_TIMEOUT)
            .json(&request)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(super::error_from_response(resp).await);
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
