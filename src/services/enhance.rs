//! Prompt enhancement over a chat-completion endpoint.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;
use crate::errors::ServiceError;

pub const ENHANCE_TIMEOUT: Duration = Duration::from_secs(60);

const ENHANCE_MODEL: &str = "gpt-4o-mini";
const ENHANCE_TEMPERATURE: f64 = 0.2;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    /// Deterministic sampling hint derived from the dress seed.
    seed: u64,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Rewrites base prompts in an author persona's voice.
pub struct EnhanceClient {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    bypass: bool,
}

impl EnhanceClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            bypass: config.skip_enhance,
        }
    }

    /// Enhance `prompt` under the given persona.
    ///
    /// Bypass flag, missing credentials and an empty choice list all return
    /// the original prompt unchanged; none of them are errors.
    pub async fn enhance(
        &self,
        persona: &str,
        prompt: &str,
        seed: u64,
    ) -> Result<String, ServiceError> {
        if self.bypass {
            tracing::debug!("enhancement bypassed by configuration");
            return Ok(prompt.to_string());
        }
        let Some(key) = self.api_key.as_deref() else {
            tracing::debug!("no API key, returning prompt unenhanced");
            return Ok(prompt.to_string());
        };

        let request = ChatRequest {
            model: ENHANCE_MODEL,
            seed,
            temperature: ENHANCE_TEMPERATURE,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: persona,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(key)
            .timeout(ENHANCE_TIMEOUT)
            .json(&request)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(super::error_from_response(resp).await);
        }

        let parsed: ChatResponse = resp.json().await?;
        let enhanced = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty());
        match enhanced {
            Some(text) => Ok(text),
            // No enhancement available is not a failure.
            None => Ok(prompt.to_string()),
        }
    }
}
