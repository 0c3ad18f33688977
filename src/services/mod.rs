//! Adapters for the three external providers: prompt enhancement, image
//! generation and speech synthesis.
//!
//! All three share one API key, one base URL and one error envelope
//! (`{"error": {"code", "message", "type"}}` on non-2xx). Each adapter owns
//! its timeout; retry policy stays with the caller except for speech, which
//! retries internally under a hard attempt cap.

use serde::Deserialize;

use crate::errors::ServiceError;

pub mod enhance;
pub mod image;
pub mod speech;

pub use enhance::EnhanceClient;
pub use image::{ImageClient, ImagePayload};
pub use speech::SpeechClient;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Turn a non-2xx response into a structured [`ServiceError::Api`].
///
/// Falls back to the raw body (or a bare status line) when the envelope
/// doesn't parse.
pub(crate) async fn error_from_response(resp: reqwest::Response) -> ServiceError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(ErrorEnvelope { error: Some(e) }) => ServiceError::Api {
            code: e.code,
            kind: e.kind,
            message: e.message.unwrap_or_else(|| format!("HTTP {status}")),
            status,
        },
        _ => ServiceError::Api {
            code: None,
            kind: None,
            message: if body.trim().is_empty() {
                format!("HTTP {status}")
            } else {
                body
            },
            status,
        },
    }
}
