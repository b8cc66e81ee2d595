//! Cached translation of the bot's own UI strings.
//!
//! Only the small, fixed set of built-in strings goes through here; user
//! content is never cached. Entries live for the whole process.
//!
//! Concurrent misses on the same `(language, text)` key are coalesced by
//! `moka`: one caller runs the translation, the others wait for its result.

use super::{remap_language, TranslationError, TranslationService};
use moka::future::Cache;
use std::sync::Arc;
use tracing::warn;

/// Translation facade with a per-language cache for static strings.
pub struct Localizer {
    service: Arc<dyn TranslationService>,
    source_language: String,
    default_language: String,
    cache: Cache<(String, String), String>,
}

impl Localizer {
    /// Create a localizer for strings written in `source_language`.
    ///
    /// `default_language` is used when a caller does not name a target.
    #[must_use]
    pub fn new(
        service: Arc<dyn TranslationService>,
        source_language: impl Into<String>,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            service,
            source_language: source_language.into(),
            default_language: default_language.into(),
            cache: Cache::builder().build(),
        }
    }

    /// Translate a UI string, falling back to the original on failure.
    pub async fn localize(&self, text: &str, language: Option<&str>) -> String {
        match self.try_localize(text, language).await {
            Ok(localized) => localized,
            Err(e) => {
                warn!("Failed to localize UI string: {e}");
                text.to_string()
            }
        }
    }

    /// Translate a UI string into `language` (or the default language).
    ///
    /// Returns `text` unchanged when the target is the source language.
    ///
    /// # Errors
    ///
    /// Returns the service error when a cache miss cannot be filled.
    pub async fn try_localize(
        &self,
        text: &str,
        language: Option<&str>,
    ) -> Result<String, Arc<TranslationError>> {
        let target = remap_language(language.unwrap_or(&self.default_language)).to_string();
        if target == self.source_language {
            return Ok(text.to_string());
        }

        let key = (target.clone(), text.to_string());
        self.cache
            .try_get_with(key, async { self.service.translate(text, &target).await })
            .await
    }

    /// Number of cached entries.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
