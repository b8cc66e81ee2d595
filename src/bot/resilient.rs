//! Resilient messaging with automatic retry for Telegram API operations.
//!
//! Sends are retried on transient network failures using exponential backoff
//! with jitter.

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, ParseMode};

/// Telegram's hard limit is 4096; keep a margin for markup.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

/// Send a message with automatic retry on network failures.
///
/// Text longer than [`TELEGRAM_MESSAGE_LIMIT`] characters is truncated.
///
/// # Arguments
///
/// * `bot` - The Telegram bot instance
/// * `chat_id` - Target chat ID
/// * `text` - Message text to send
/// * `parse_mode` - Optional parse mode (HTML, Markdown, etc.)
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
) -> Result<Message> {
    let text = fit_message(text.into());
    crate::utils::retry_transport_operation(|| async {
        let mut req = bot.send_message(chat_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Truncate HTML `text` to [`TELEGRAM_MESSAGE_LIMIT`] characters.
///
/// The cut never splits an entity (`&amp;`) or a tag, which Telegram would
/// reject as unparseable.
#[must_use]
pub fn fit_message(text: String) -> String {
    if text.chars().count() <= TELEGRAM_MESSAGE_LIMIT {
        return text;
    }
    let cut = crate::utils::truncate_str(&text, TELEGRAM_MESSAGE_LIMIT);
    format!("{}…", drop_partial_markup(&cut))
}

/// Strip a trailing unterminated `&...` entity or `<...` tag.
fn drop_partial_markup(text: &str) -> &str {
    let text = match text.rfind('&') {
        Some(amp) if !text[amp..].contains(';') => &text[..amp],
        _ => text,
    };
    match text.rfind('<') {
        Some(lt) if !text[lt..].contains('>') => &text[..lt],
        _ => text,
    }
}
