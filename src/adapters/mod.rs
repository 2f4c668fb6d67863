//! Media generation adapters.
//!
//! Each capability (speech, images, translation) is a trait so the enricher
//! can be driven by real services in production and by fakes in tests.
//! Adapters never touch the artifact store; they only turn a request into
//! bytes or a classified error.

pub mod image;
pub mod speech;
pub mod translate;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::content_key::GenerationParams;
use crate::domain::{FailureKind, MediaKind};

pub use image::PixabayImageAdapter;
pub use speech::{EspeakAdapter, GoogleTtsAdapter};
pub use translate::LibreTranslateAdapter;

/// Classified adapter failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Worth retrying (timeouts, 5xx, dropped connections)
    #[error("transient service error: {0}")]
    Transient(String),

    /// The service will never accept this input
    #[error("permanent request error: {0}")]
    PermanentRequest(String),

    /// Quota or rate limit exhausted
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }

    /// Map to the slot-level failure recorded in the run report
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            GenerationError::Transient(_) => FailureKind::TransientService,
            GenerationError::PermanentRequest(_) => FailureKind::PermanentRequest,
            GenerationError::QuotaExceeded(_) => FailureKind::QuotaExceeded,
        }
    }
}

/// Classify a non-success HTTP status
pub fn classify_status(status: reqwest::StatusCode, body: &str) -> GenerationError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        GenerationError::QuotaExceeded(detail)
    } else if status == reqwest::StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        GenerationError::Transient(detail)
    } else {
        GenerationError::PermanentRequest(detail)
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return classify_status(status, &err.to_string());
        }

        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            GenerationError::Transient(err.to_string())
        } else {
            GenerationError::PermanentRequest(err.to_string())
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        format!("{}...", trimmed.chars().take(max_chars).collect::<String>())
    }
}

/// What an adapter is asked to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub kind: MediaKind,

    /// Normalized payload: text to speak or concept to illustrate
    pub text: String,

    /// Effective parameters (adapter defaults overridden by the entry's own)
    pub params: GenerationParams,
}

/// Bytes produced by an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMedia {
    pub bytes: Vec<u8>,

    /// File extension without the dot (e.g. "mp3")
    pub extension: String,
}

impl GeneratedMedia {
    pub fn new(bytes: Vec<u8>, extension: impl Into<String>) -> Self {
        Self {
            bytes,
            extension: extension.into(),
        }
    }
}

/// Text-to-speech capability
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Adapter settings that change the produced audio
    fn key_params(&self) -> GenerationParams;

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GenerationError>;
}

/// Image search/generation capability
#[async_trait]
pub trait ImageFinder: Send + Sync {
    fn name(&self) -> &str;

    /// Adapter settings that change the produced image
    fn key_params(&self) -> GenerationParams;

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GenerationError>;
}

/// Text translation, used internally by image adapters that search in
/// a single language
#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, GenerationError>;
}

/// Language subtag of a locale ("de-DE" -> "de")
pub(crate) fn primary_language(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            GenerationError::QuotaExceeded(_)
        ));
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "").is_transient());
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad voice"),
            GenerationError::PermanentRequest(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            GenerationError::PermanentRequest(_)
        ));
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            GenerationError::QuotaExceeded("x".into()).failure_kind(),
            FailureKind::QuotaExceeded
        );
        assert_eq!(
            GenerationError::Transient("x".into()).failure_kind(),
            FailureKind::TransientService
        );
    }

    #[test]
    fn test_primary_language() {
        assert_eq!(primary_language("de-DE"), "de");
        assert_eq!(primary_language("pt_BR"), "pt");
        assert_eq!(primary_language("EN"), "en");
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(500);
        assert_eq!(truncate(&body, 10), format!("{}...", "x".repeat(10)));
    }
}
