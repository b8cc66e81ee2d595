//! Auto-translation of group messages.
//!
//! Every non-command group message is evaluated top to bottom; the first
//! matching short-circuit wins:
//!
//! 1. commands are left to the dispatcher
//! 2. senders who opted out are ignored
//! 3. with `trust_client_language`, senders whose client already uses the
//!    destination language are ignored without running detection
//! 4. messages without text are ignored
//! 5. detected languages from the exclusion set are ignored
//!
//! Everything else is translated and answered with a reply.

use crate::bot::transport::{ChatTransport, IncomingMessage};
use crate::config::Settings;
use crate::sessions::{Category, SessionStore};
use crate::translation::{LanguageDetector, TranslationService};
use crate::utils::{escape_html, truncate_str};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Why a message was not translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The message is a bot command
    Command,
    /// The sender opted out in this group
    ExcludedSender,
    /// The sender's client language is the destination language
    TrustedLanguage,
    /// There is no text to translate
    NoText,
    /// The detected language is excluded
    ExcludedLanguage(String),
}

/// Outcome of evaluating a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Leave the message alone
    Skip(SkipReason),
    /// Translate `text`, detected as `source`
    Translate {
        /// Extracted text
        text: String,
        /// Detected source language
        source: String,
    },
}

/// Decides whether a message needs translating and posts the translation.
pub struct TranslationPipeline {
    settings: Arc<Settings>,
    sessions: Arc<SessionStore>,
    detector: Arc<LanguageDetector>,
    translator: Arc<dyn TranslationService>,
    excluded_languages: HashSet<String>,
}

impl TranslationPipeline {
    /// Create a pipeline over shared components.
    #[must_use]
    pub fn new(
        settings: Arc<Settings>,
        sessions: Arc<SessionStore>,
        detector: Arc<LanguageDetector>,
        translator: Arc<dyn TranslationService>,
    ) -> Self {
        let excluded_languages = settings.excluded_languages();
        Self {
            settings,
            sessions,
            detector,
            translator,
            excluded_languages,
        }
    }

    /// Run the synchronous part of the pipeline: filters and detection.
    #[must_use]
    pub fn evaluate(&self, msg: &IncomingMessage) -> Verdict {
        if msg
            .text
            .as_deref()
            .is_some_and(|text| text.trim_start().starts_with('/'))
        {
            return Verdict::Skip(SkipReason::Command);
        }

        if self
            .sessions
            .exists(Category::ExcludedSenders, msg.chat_id, msg.sender_id)
        {
            return Verdict::Skip(SkipReason::ExcludedSender);
        }

        if self.settings.trust_client_language
            && msg
                .sender_language_subtag()
                .is_some_and(|lang| lang.eq_ignore_ascii_case(&self.settings.destination_language))
        {
            return Verdict::Skip(SkipReason::TrustedLanguage);
        }

        let Some(text) = msg.extract_text() else {
            return Verdict::Skip(SkipReason::NoText);
        };

        let source = self.detector.detect(&text);
        if self.excluded_languages.contains(&source) {
            return Verdict::Skip(SkipReason::ExcludedLanguage(source));
        }

        Verdict::Translate { text, source }
    }

    /// Evaluate `msg` and, when needed, reply with its translation.
    ///
    /// # Errors
    ///
    /// Returns an error if translation or the reply fails.
    pub async fn handle(&self, transport: &dyn ChatTransport, msg: &IncomingMessage) -> Result<Verdict> {
        let verdict = self.evaluate(msg);
        let Verdict::Translate { text, source } = &verdict else {
            debug!(chat_id = msg.chat_id, sender = msg.sender_id, ?verdict, "Message skipped");
            return Ok(verdict);
        };

        let destination = &self.settings.destination_language;
        info!(
            chat_id = msg.chat_id,
            sender = msg.sender_id,
            "Translating {source} -> {destination}: '{}'",
            truncate_str(text, 50)
        );

        let translated = self.translator.translate(text, destination).await?;
        let reply = format_translation(source, destination, &translated);
        transport.reply(msg.chat_id, msg.message_id, &reply).await?;
        Ok(verdict)
    }
}

/// Render a translation reply: `🔄 <b>src → dst</b>` followed by the text.
#[must_use]
pub fn format_translation(source: &str, destination: &str, translated: &str) -> String {
    format!(
        "🔄 <b>{} → {}</b>\n{}",
        escape_html(source),
        escape_html(destination),
        escape_html(translated)
    )
}
