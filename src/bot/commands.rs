//! Slash commands.
//!
//! Personal answers (`/chat_id`, `/check`, `/exclude`, `/include`) given in
//! a group go to the sender privately; the first time that happens for a
//! (group, sender) pair the bot also leaves a short notice in the group.

use crate::bot::transport::{ChatTransport, IncomingMessage};
use crate::config::Settings;
use crate::sessions::{Category, SessionStore};
use crate::translation::{Localizer, TranslationService};
use crate::utils::{escape_html, truncate_str};
use anyhow::Result;
use lazy_regex::regex_is_match;
use std::sync::Arc;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

const HELP_INTRO: &str = "I translate messages in this group automatically.";
const TARGET_LABEL: &str = "Target language";
const GROUP_ID_LABEL: &str = "Group ID";
const TITLE_LABEL: &str = "Title";
const GROUPS_ONLY: &str = "This command only works in a group.";
const GROUP_REQUIRED: &str = "Send this command in the group or pass the group ID after it.";
const INVALID_GROUP: &str = "That is not a valid group ID.";
const MEMBERSHIP_REQUIRED: &str = "You must be a member of that group.";
const STATUS_EXCLUDED: &str = "Your messages are not translated in this group.";
const STATUS_INCLUDED: &str = "Your messages are translated in this group.";
const EXCLUDE_DONE: &str = "Done. Your messages will no longer be translated in this group.";
const INCLUDE_DONE: &str = "Done. Your messages will be translated in this group again.";
const ANSWERED_PRIVATELY: &str = "I answered you in a private message.";
const TRANSLATE_USAGE: &str =
    "Usage: /translate [language code] text, or reply to a message with /translate.";
const TRANSLATION_FAILED: &str = "Translation failed";
const INTRO: &str = "Hi! I will translate the messages in this chat. Send /help to learn more.";

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Supported commands:")]
pub enum Command {
    /// Greeting sent by Telegram clients when a private chat is opened
    #[command(hide)]
    Start,
    /// Show the command summary
    #[command(description = "show this help message.")]
    Help,
    /// Show the group ID and title
    #[command(description = "send you the ID and title of this group.")]
    ChatId,
    /// Report whether the sender is excluded
    #[command(description = "check whether your messages are translated [group id].")]
    Check(String),
    /// Opt out of auto-translation
    #[command(description = "stop translating your messages [group id].")]
    Exclude(String),
    /// Opt back in to auto-translation
    #[command(description = "translate your messages again [group id].")]
    Include(String),
    /// Translate on demand
    #[command(description = "translate text: /translate [language] text.")]
    Translate(String),
}

/// Group a command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupTarget {
    /// The group the command was sent in
    Current(i64),
    /// A group named by ID; membership must be verified
    Explicit(i64),
    /// No group given outside a group chat
    Missing,
    /// The argument is not a chat ID
    Invalid,
}

/// Resolve the optional `[group id]` argument.
#[must_use]
pub fn resolve_group(arg: &str, msg: &IncomingMessage) -> GroupTarget {
    let arg = arg.trim();
    if arg.is_empty() {
        return if msg.is_group {
            GroupTarget::Current(msg.chat_id)
        } else {
            GroupTarget::Missing
        };
    }
    match arg.parse::<i64>() {
        Ok(id) if msg.is_group && id == msg.chat_id => GroupTarget::Current(id),
        Ok(id) => GroupTarget::Explicit(id),
        Err(_) => GroupTarget::Invalid,
    }
}

/// Split `/translate` arguments into target language and text.
///
/// The first token is taken as the language only when it is a two-letter
/// lowercase code; otherwise everything is text for `default_language`.
#[must_use]
pub fn parse_translate_args(args: &str, default_language: &str) -> (String, String) {
    let args = args.trim();
    let (first, rest) = args
        .split_once(char::is_whitespace)
        .unwrap_or((args, ""));
    if regex_is_match!(r"^[a-z]{2}$", first) {
        (first.to_string(), rest.trim().to_string())
    } else {
        (default_language.to_string(), args.to_string())
    }
}

/// Executes commands against the session store and the translator.
pub struct CommandDispatcher {
    settings: Arc<Settings>,
    sessions: Arc<SessionStore>,
    localizer: Arc<Localizer>,
    translator: Arc<dyn TranslationService>,
}

impl CommandDispatcher {
    /// Create a dispatcher over shared components.
    #[must_use]
    pub fn new(
        settings: Arc<Settings>,
        sessions: Arc<SessionStore>,
        localizer: Arc<Localizer>,
        translator: Arc<dyn TranslationService>,
    ) -> Self {
        Self {
            settings,
            sessions,
            localizer,
            translator,
        }
    }

    /// Run `command` sent in `msg`.
    ///
    /// # Errors
    ///
    /// Returns an error if a reply cannot be delivered.
    pub async fn execute(
        &self,
        transport: &dyn ChatTransport,
        msg: &IncomingMessage,
        command: Command,
    ) -> Result<()> {
        info!(
            chat_id = msg.chat_id,
            sender = msg.sender_id,
            "Command received: {command:?}"
        );
        match command {
            Command::Start | Command::Help => self.help(transport, msg).await,
            Command::ChatId => self.chat_id(transport, msg).await,
            Command::Check(arg) => self.check(transport, msg, &arg).await,
            Command::Exclude(arg) => self.set_excluded(transport, msg, &arg, true).await,
            Command::Include(arg) => self.set_excluded(transport, msg, &arg, false).await,
            Command::Translate(args) => self.translate(transport, msg, &args).await,
        }
    }

    /// Localized intro announced in allowed chats at startup.
    pub async fn intro(&self) -> String {
        format!(
            "{}\n{}: <code>{}</code>",
            escape_html(&self.localizer.localize(INTRO, None).await),
            escape_html(&self.localizer.localize(TARGET_LABEL, None).await),
            escape_html(&self.settings.destination_language)
        )
    }

    async fn help(&self, transport: &dyn ChatTransport, msg: &IncomingMessage) -> Result<()> {
        let language = msg.sender_language_subtag();
        let mut lines = vec![
            escape_html(&self.localizer.localize(HELP_INTRO, language).await),
            format!(
                "{}: <code>{}</code>",
                escape_html(&self.localizer.localize(TARGET_LABEL, language).await),
                escape_html(&self.settings.destination_language)
            ),
            String::new(),
        ];
        for entry in Command::bot_commands() {
            let description = self.localizer.localize(&entry.description, language).await;
            lines.push(format!(
                "/{} — {}",
                entry.command.trim_start_matches('/'),
                escape_html(&description)
            ));
        }
        lines.push(String::new());
        lines.push(format!("<i>v{}</i>", crate::VERSION));

        transport
            .reply(msg.chat_id, msg.message_id, &lines.join("\n"))
            .await
    }

    async fn chat_id(&self, transport: &dyn ChatTransport, msg: &IncomingMessage) -> Result<()> {
        let language = msg.sender_language_subtag();
        if !msg.is_group {
            return self.reply_localized(transport, msg, GROUPS_ONLY).await;
        }

        let text = format!(
            "{}: <code>{}</code>\n{}: {}",
            escape_html(&self.localizer.localize(GROUP_ID_LABEL, language).await),
            msg.chat_id,
            escape_html(&self.localizer.localize(TITLE_LABEL, language).await),
            escape_html(msg.chat_title.as_deref().unwrap_or("-"))
        );
        self.respond_personally(transport, msg, &text).await
    }

    async fn check(&self, transport: &dyn ChatTransport, msg: &IncomingMessage, arg: &str) -> Result<()> {
        let Some(group) = self.authorize_group(transport, msg, arg).await? else {
            return Ok(());
        };

        let status = if self
            .sessions
            .exists(Category::ExcludedSenders, group, msg.sender_id)
        {
            STATUS_EXCLUDED
        } else {
            STATUS_INCLUDED
        };
        let text = self.with_group(status, group, msg).await;
        self.respond_personally(transport, msg, &text).await
    }

    async fn set_excluded(
        &self,
        transport: &dyn ChatTransport,
        msg: &IncomingMessage,
        arg: &str,
        excluded: bool,
    ) -> Result<()> {
        let Some(group) = self.authorize_group(transport, msg, arg).await? else {
            return Ok(());
        };

        let confirmation = if excluded {
            self.sessions
                .add(Category::ExcludedSenders, group, msg.sender_id)
                .await;
            EXCLUDE_DONE
        } else {
            self.sessions
                .remove(Category::ExcludedSenders, group, msg.sender_id)
                .await;
            INCLUDE_DONE
        };
        info!(
            group,
            sender = msg.sender_id,
            excluded,
            "Auto-translation preference updated"
        );

        let text = self.with_group(confirmation, group, msg).await;
        self.respond_personally(transport, msg, &text).await
    }

    async fn translate(&self, transport: &dyn ChatTransport, msg: &IncomingMessage, args: &str) -> Result<()> {
        let (language, mut text) = parse_translate_args(args, &self.settings.destination_language);
        if text.is_empty() {
            text = msg.reply_text.as_deref().unwrap_or_default().trim().to_string();
        }
        if text.is_empty() {
            return self.reply_localized(transport, msg, TRANSLATE_USAGE).await;
        }

        info!(
            chat_id = msg.chat_id,
            sender = msg.sender_id,
            "On-demand translation to {language}: '{}'",
            truncate_str(&text, 50)
        );

        let reply = match self.translator.translate(&text, &language).await {
            Ok(translated) => format!(
                "🔄 <b>{}</b>\n{}",
                escape_html(&language),
                escape_html(&translated)
            ),
            Err(e) => {
                warn!("On-demand translation failed: {e}");
                let label = self
                    .localizer
                    .localize(TRANSLATION_FAILED, msg.sender_language_subtag())
                    .await;
                format!("⚠️ {}: {}", escape_html(&label), escape_html(&e.to_string()))
            }
        };
        transport.reply(msg.chat_id, msg.message_id, &reply).await
    }

    /// Resolve the target group and verify membership when it was named by ID.
    ///
    /// Returns `None` after telling the user why the command was refused.
    async fn authorize_group(
        &self,
        transport: &dyn ChatTransport,
        msg: &IncomingMessage,
        arg: &str,
    ) -> Result<Option<i64>> {
        match resolve_group(arg, msg) {
            GroupTarget::Current(group) => Ok(Some(group)),
            GroupTarget::Explicit(group) => {
                if self.is_member(transport, group, msg.sender_id).await {
                    Ok(Some(group))
                } else {
                    self.reply_localized(transport, msg, MEMBERSHIP_REQUIRED)
                        .await?;
                    Ok(None)
                }
            }
            GroupTarget::Missing => {
                self.reply_localized(transport, msg, GROUP_REQUIRED).await?;
                Ok(None)
            }
            GroupTarget::Invalid => {
                self.reply_localized(transport, msg, INVALID_GROUP).await?;
                Ok(None)
            }
        }
    }

    async fn is_member(&self, transport: &dyn ChatTransport, group: i64, user: i64) -> bool {
        match transport.is_member(group, user).await {
            Ok(member) => member,
            Err(e) => {
                warn!(group, user, "Membership check failed, treating as non-member: {e}");
                false
            }
        }
    }

    /// Deliver a personal answer: privately when asked in a group, with a
    /// one-time notice in the group; in place otherwise.
    async fn respond_personally(
        &self,
        transport: &dyn ChatTransport,
        msg: &IncomingMessage,
        text: &str,
    ) -> Result<()> {
        if !msg.is_group {
            return transport.reply(msg.chat_id, msg.message_id, text).await;
        }

        match transport.send_message(msg.sender_id, text).await {
            Ok(()) => self.inform_once(transport, msg).await,
            Err(e) => {
                warn!(
                    sender = msg.sender_id,
                    "Private delivery failed, answering in the group: {e}"
                );
                transport.reply(msg.chat_id, msg.message_id, text).await
            }
        }
    }

    async fn inform_once(&self, transport: &dyn ChatTransport, msg: &IncomingMessage) -> Result<()> {
        if self
            .sessions
            .exists(Category::Informed, msg.chat_id, msg.sender_id)
        {
            return Ok(());
        }
        if !self
            .sessions
            .add(Category::Informed, msg.chat_id, msg.sender_id)
            .await
        {
            return Ok(());
        }
        let notice = self.localizer.localize(ANSWERED_PRIVATELY, None).await;
        transport
            .reply(msg.chat_id, msg.message_id, &escape_html(&notice))
            .await
    }

    async fn reply_localized(
        &self,
        transport: &dyn ChatTransport,
        msg: &IncomingMessage,
        text: &str,
    ) -> Result<()> {
        let localized = self
            .localizer
            .localize(text, msg.sender_language_subtag())
            .await;
        transport
            .reply(msg.chat_id, msg.message_id, &escape_html(&localized))
            .await
    }

    async fn with_group(&self, text: &str, group: i64, msg: &IncomingMessage) -> String {
        let localized = self
            .localizer
            .localize(text, msg.sender_language_subtag())
            .await;
        format!("{}\n<code>{group}</code>", escape_html(&localized))
    }
}
