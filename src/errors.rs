//! Typed error hierarchy for the atelier pipeline.
//!
//! Four top-level enums cover the four subsystems:
//! - `WordbankError` — embedded word-pack parsing and cache persistence
//! - `ServiceError` — enhancement / image / speech provider failures
//! - `SeriesError` — series lifecycle and path-safety failures
//! - `GenerationError` — orchestrator-level failures wrapping the rest

use thiserror::Error;

/// Errors from the word-pack cache subsystem.
#[derive(Debug, Error)]
pub enum WordbankError {
    #[error("Word pack {name} is not part of the embedded archive")]
    UnknownDatabase { name: String },

    #[error("Word pack {name} decompressed past the {limit}-byte cap")]
    EntryTooLarge { name: String, limit: u64 },

    #[error("Word pack {name} is malformed: {message}")]
    Malformed { name: String, message: String },

    #[error("Failed to read persisted cache at {path}: {source}")]
    CacheReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the external service adapters.
///
/// Provider errors carry the upstream error envelope fields so callers can
/// distinguish quota problems from bad requests without string matching.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Provider returned {status}: {message} (code {code:?})")]
    Api {
        /// Provider-assigned error code, when present in the envelope.
        code: Option<String>,
        /// Provider-assigned error type, when present in the envelope.
        kind: Option<String>,
        message: String,
        status: u16,
    },

    #[error("Transport failure talking to provider: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Image response carried neither a URL nor inline data")]
    MissingImagePayload,

    #[error("Image response carried both a URL and inline data")]
    AmbiguousImagePayload,

    #[error("Inline image data was not valid base64: {0}")]
    BadImageData(#[from] base64::DecodeError),

    #[error("Speech synthesis gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Operation cancelled by caller")]
    Cancelled,
}

impl ServiceError {
    /// Whether a retry has any chance of succeeding.
    ///
    /// Transport-class failures and 408/429/5xx are retryable; client errors
    /// such as 400/401/403/404 are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Transport(_) => true,
            ServiceError::Api { status, .. } => {
                matches!(*status, 408 | 429) || (500..600).contains(status)
            }
            _ => false,
        }
    }
}

/// Errors from the series lifecycle subsystem.
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("Series {suffix} already exists")]
    AlreadyExists { suffix: String },

    #[error("Series {suffix} not found")]
    NotFound { suffix: String },

    #[error("Series {suffix} is not soft-deleted")]
    NotDeleted { suffix: String },

    #[error("Path component {component:?} would escape the data directory")]
    PathEscape { component: String },

    #[error("Failed to persist series {suffix}: {source}")]
    PersistFailed {
        suffix: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced by the generation orchestrator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Address must not be empty")]
    EmptyAddress,

    #[error("Seed has {len} hex characters, minimum is {min}")]
    SeedTooShort { len: usize, min: usize },

    #[error(transparent)]
    Wordbank(#[from] WordbankError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_429_is_retryable() {
        let err = ServiceError::Api {
            code: Some("rate_limit_exceeded".into()),
            kind: Some("requests".into()),
            message: "slow down".into(),
            status: 429,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn api_5xx_is_retryable() {
        for status in [500, 502, 503, 599] {
            let err = ServiceError::Api {
                code: None,
                kind: None,
                message: "upstream".into(),
                status,
            };
            assert!(err.is_retryable(), "status {status} must be retryable");
        }
    }

    #[test]
    fn api_client_errors_are_terminal() {
        for status in [400, 401, 403, 404] {
            let err = ServiceError::Api {
                code: None,
                kind: None,
                message: "nope".into(),
                status,
            };
            assert!(!err.is_retryable(), "status {status} must be terminal");
        }
    }

    #[test]
    fn request_timeout_is_retryable() {
        let err = ServiceError::Api {
            code: None,
            kind: None,
            message: "timeout".into(),
            status: 408,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn payload_shape_errors_are_terminal() {
        assert!(!ServiceError::MissingImagePayload.is_retryable());
        assert!(!ServiceError::AmbiguousImagePayload.is_retryable());
        assert!(!ServiceError::Cancelled.is_retryable());
    }

    #[test]
    fn seed_too_short_carries_lengths() {
        let err = GenerationError::SeedTooShort { len: 10, min: 66 };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("66"));
    }

    #[test]
    fn generation_error_converts_from_service_error() {
        let inner = ServiceError::MissingImagePayload;
        let outer: GenerationError = inner.into();
        assert!(matches!(
            outer,
            GenerationError::Service(ServiceError::MissingImagePayload)
        ));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&WordbankError::UnknownDatabase { name: "x".into() });
        assert_std_error(&SeriesError::NotFound { suffix: "x".into() });
        assert_std_error(&GenerationError::EmptyAddress);
    }
}
