//! Configuration and settings management
//!
//! Loads the relay settings from config files and environment variables.
//! The resulting [`Settings`] is an immutable snapshot shared via `Arc`.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// File name of the persisted session store inside `storage_path`.
pub const SESSIONS_FILE_NAME: &str = ".sessions.json";

/// Public Google endpoint used when no translation endpoint is configured.
pub const DEFAULT_TRANSLATE_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

/// Initial delay before the first retry of a Telegram API call.
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound for the delay between Telegram API retries.
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 5_000;
/// Number of retries for a Telegram API call.
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

/// Timeout for a single request to the translation service.
pub const TRANSLATE_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Language every auto-translation converges to
    #[serde(default = "default_language")]
    pub destination_language: String,

    /// Comma-separated list of languages that are never auto-translated
    #[serde(rename = "excluded_languages")]
    pub excluded_languages_str: Option<String>,

    /// Comma-separated list of chat IDs the relay listens to
    #[serde(rename = "allowed_chats")]
    pub allowed_chats_str: Option<String>,

    /// Comma-separated list of sender IDs the relay reacts to
    #[serde(rename = "allowed_senders")]
    pub allowed_senders_str: Option<String>,

    /// Directory holding the persisted session store
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Skip detection when the sender's client language equals the destination
    #[serde(default)]
    pub trust_client_language: bool,

    /// Bind outgoing connections to IPv6
    #[serde(default)]
    pub use_ipv6: bool,

    /// Announce the relay in every allowed chat at startup
    #[serde(default)]
    pub send_intro: bool,

    /// Minimum probability for the destination language to win detection
    #[serde(default = "default_probability_threshold")]
    pub probability_threshold: f64,

    /// Language the built-in UI strings are written in
    #[serde(default = "default_language")]
    pub ui_language: String,

    /// Translation service endpoint
    #[serde(default = "default_translate_endpoint")]
    pub translate_endpoint: String,

    /// `allowed_chats` parsed by [`Settings::normalized`]
    #[serde(skip)]
    pub allowed_chat_ids: HashSet<i64>,

    /// `allowed_senders` parsed by [`Settings::normalized`]
    #[serde(skip)]
    pub allowed_sender_ids: HashSet<i64>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("storage")
}

const fn default_probability_threshold() -> f64 {
    0.1
}

fn default_translate_endpoint() -> String {
    DEFAULT_TRANSLATE_ENDPOINT.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            destination_language: default_language(),
            excluded_languages_str: None,
            allowed_chats_str: None,
            allowed_senders_str: None,
            storage_path: default_storage_path(),
            trust_client_language: false,
            use_ipv6: false,
            send_intro: false,
            probability_threshold: default_probability_threshold(),
            ui_language: default_language(),
            translate_endpoint: default_translate_endpoint(),
            allowed_chat_ids: HashSet::new(),
            allowed_sender_ids: HashSet::new(),
        }
    }
}

/// Build the layered configuration source.
///
/// # Errors
///
/// Returns a `ConfigError` if one of the sources cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Local overrides, not checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg.. `APP__DESTINATION_LANGUAGE=de ./target/lingo-relay`
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Plain UPPER_SNAKE_CASE variables, empty values treated as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use lingo_relay::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Self = build_config()?.try_deserialize()?;
        Ok(settings.normalized())
    }

    /// Lowercase the language fields and parse the ID lists once.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.destination_language = self.destination_language.trim().to_lowercase();
        self.ui_language = self.ui_language.trim().to_lowercase();
        self.allowed_chat_ids = parse_ids(self.allowed_chats_str.as_deref());
        self.allowed_sender_ids = parse_ids(self.allowed_senders_str.as_deref());
        self
    }

    /// Languages that never trigger auto-translation.
    ///
    /// Always contains the destination language.
    #[must_use]
    pub fn excluded_languages(&self) -> HashSet<String> {
        let mut languages: HashSet<String> = split_list(self.excluded_languages_str.as_deref())
            .map(str::to_lowercase)
            .collect();
        languages.insert(self.destination_language.to_lowercase());
        languages
    }

    /// Chat IDs the relay is allowed to work in
    #[must_use]
    pub const fn allowed_chats(&self) -> &HashSet<i64> {
        &self.allowed_chat_ids
    }

    /// Sender IDs the relay is allowed to react to
    #[must_use]
    pub const fn allowed_senders(&self) -> &HashSet<i64> {
        &self.allowed_sender_ids
    }

    /// Whether an update from `sender_id` in `chat_id` should be handled.
    ///
    /// Empty lists allow everything. Private chats are never filtered by
    /// the chat list, so members can always talk to the bot directly.
    #[must_use]
    pub fn is_allowed(&self, chat_id: i64, sender_id: i64, is_private: bool) -> bool {
        let chats = &self.allowed_chat_ids;
        let senders = &self.allowed_sender_ids;
        let chat_ok = is_private || chats.is_empty() || chats.contains(&chat_id);
        let sender_ok = senders.is_empty() || senders.contains(&sender_id);
        chat_ok && sender_ok
    }

    /// Full path of the persisted session store
    #[must_use]
    pub fn sessions_file(&self) -> PathBuf {
        self.storage_path.join(SESSIONS_FILE_NAME)
    }
}

fn split_list<'a>(raw: Option<&'a str>) -> impl Iterator<Item = &'a str> + 'a {
    raw.unwrap_or_default()
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|token| !token.is_empty())
}

fn parse_ids(raw: Option<&str>) -> HashSet<i64> {
    split_list(raw)
        .filter_map(|id| id.parse::<i64>().ok())
        .collect()
}
