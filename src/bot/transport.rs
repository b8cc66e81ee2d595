//! Chat-client boundary.
//!
//! The pipeline and the command dispatcher talk to the platform only through
//! [`ChatTransport`] and see inbound updates only as [`IncomingMessage`], so
//! both can be driven without a live Telegram connection.

use crate::bot::resilient::{fit_message, send_message_resilient};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, ParseMode, ReplyParameters, UserId};
use tracing::debug;

/// A poll attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollContent {
    /// Poll question
    pub question: String,
    /// Answer option texts, in order
    pub options: Vec<String>,
}

/// Platform-independent view of an inbound message.
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    /// Chat the message was posted in
    pub chat_id: i64,
    /// Message ID within the chat
    pub message_id: i32,
    /// Chat title, for groups
    pub chat_title: Option<String>,
    /// Whether the chat is a group or supergroup
    pub is_group: bool,
    /// Sender user ID, `0` when unknown
    pub sender_id: i64,
    /// Language reported by the sender's client (IETF tag)
    pub sender_language: Option<String>,
    /// Message text or media caption
    pub text: Option<String>,
    /// Attached poll
    pub poll: Option<PollContent>,
    /// Text or caption of the message this one replies to
    pub reply_text: Option<String>,
}

impl IncomingMessage {
    /// Build from a Telegram message.
    #[must_use]
    pub fn from_telegram(msg: &Message) -> Self {
        let sender = msg.from.as_ref();
        Self {
            chat_id: msg.chat.id.0,
            message_id: msg.id.0,
            chat_title: msg.chat.title().map(ToOwned::to_owned),
            is_group: msg.chat.is_group() || msg.chat.is_supergroup(),
            sender_id: get_user_id_safe(msg),
            sender_language: sender.and_then(|u| u.language_code.clone()),
            text: message_text(msg),
            poll: msg.poll().map(|poll| PollContent {
                question: poll.question.clone(),
                options: poll.options.iter().map(|o| o.text.clone()).collect(),
            }),
            reply_text: msg.reply_to_message().and_then(message_text),
        }
    }

    /// Text to run detection on: the poll rendered as
    /// `"<question>: <answer>, <answer>"`, otherwise the message text.
    #[must_use]
    pub fn extract_text(&self) -> Option<String> {
        if let Some(poll) = &self.poll {
            return Some(format!("{}: {}", poll.question, poll.options.join(", ")));
        }
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(ToOwned::to_owned)
    }

    /// Primary subtag of the sender's client language: `"pt-BR"` -> `"pt"`.
    #[must_use]
    pub fn sender_language_subtag(&self) -> Option<&str> {
        self.sender_language
            .as_deref()
            .and_then(|tag| tag.split(['-', '_']).next())
            .filter(|lang| !lang.is_empty())
    }
}

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

fn message_text(msg: &Message) -> Option<String> {
    msg.text().or_else(|| msg.caption()).map(ToOwned::to_owned)
}

/// Operations the relay needs from the chat platform.
///
/// All methods may fail on network or authorization errors.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Reply to `message_id` in `chat_id`. `text` is HTML.
    async fn reply(&self, chat_id: i64, message_id: i32, text: &str) -> Result<()>;

    /// Send a standalone message to `chat_id`. `text` is HTML.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Whether `user_id` is currently a member of `group_id`.
    async fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool>;
}

/// [`ChatTransport`] over the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Wrap a bot handle.
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn reply(&self, chat_id: i64, message_id: i32, text: &str) -> Result<()> {
        let text = fit_message(text.to_string());
        crate::utils::retry_transport_operation(|| async {
            self.bot
                .send_message(ChatId(chat_id), text.clone())
                .parse_mode(ParseMode::Html)
                .reply_parameters(ReplyParameters::new(MessageId(message_id)))
                .await
                .map(|_| ())
                .map_err(|e| anyhow!("Telegram reply error: {e}"))
        })
        .await
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        send_message_resilient(&self.bot, ChatId(chat_id), text, Some(ParseMode::Html))
            .await
            .map(|_| ())
    }

    async fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool> {
        let user = UserId(u64::try_from(user_id).map_err(|_| anyhow!("invalid user id {user_id}"))?);
        let member = self.bot.get_chat_member(ChatId(group_id), user).await?;
        let present = member.kind.is_present();
        debug!(group_id, user_id, present, "Membership checked");
        Ok(present)
    }
}
