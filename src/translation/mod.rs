//! Language detection and translation
//!
//! Wraps the external translation service behind [`TranslationService`] and
//! provides the HTTP implementation used in production.

/// Statistical language detection with a destination-language bias.
pub mod detector;
/// Cached translation of static UI strings.
pub mod localizer;

pub use detector::{Candidate, CandidateSource, LanguageDetector, LinguaSource, UNKNOWN_LANGUAGE};
pub use localizer::Localizer;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Language codes the translation service does not accept as-is.
const LANGUAGE_REMAP: &[(&str, &str)] = &[("ua", "uk"), ("zh", "zh-CN"), ("he", "iw"), ("jv", "jw")];

/// Errors that can occur while calling the translation service
#[derive(Debug, Error)]
pub enum TranslationError {
    /// Error during network communication
    #[error("Network error: {0}")]
    Network(String),
    /// The service answered with a non-success status
    #[error("API error {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },
    /// The response could not be understood
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// The service returned no translated text
    #[error("Empty translation")]
    Empty,
}

/// Interface for translation backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Translate `text` into `destination`, auto-detecting the source.
    async fn translate(&self, text: &str, destination: &str) -> Result<String, TranslationError>;
}

/// Map a language code to the form the translation service expects.
///
/// # Examples
///
/// ```
/// use lingo_relay::translation::remap_language;
/// assert_eq!(remap_language("ua"), "uk");
/// assert_eq!(remap_language("fr"), "fr");
/// ```
#[must_use]
pub fn remap_language(code: &str) -> &str {
    LANGUAGE_REMAP
        .iter()
        .find(|(from, _)| *from == code)
        .map_or(code, |(_, to)| *to)
}

/// Translator backed by Google's public `translate_a/single` endpoint.
pub struct GoogleTranslator {
    client: reqwest::Client,
    endpoint: String,
}

impl GoogleTranslator {
    /// Create a translator that sends requests through `client` to `endpoint`.
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TranslationService for GoogleTranslator {
    async fn translate(&self, text: &str, destination: &str) -> Result<String, TranslationError> {
        let target = remap_language(destination);
        debug!(language = target, chars = text.chars().count(), "Requesting translation");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await
            .map_err(|e| TranslationError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslationError::Api {
                status: status.as_u16(),
                body: crate::utils::truncate_str(body, 200),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| TranslationError::Malformed(e.to_string()))?;
        parse_translation(&payload)
    }
}

/// Join the translated segments of a `translate_a/single` response.
///
/// The payload is a nested array whose first element lists
/// `[translated, original, ...]` segments.
fn parse_translation(payload: &Value) -> Result<String, TranslationError> {
    let segments = payload
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| TranslationError::Malformed("missing segment list".to_string()))?;

    let text: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err(TranslationError::Empty);
    }
    Ok(text)
}
