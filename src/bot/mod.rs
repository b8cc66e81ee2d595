/// Slash commands and their dispatcher
pub mod commands;
/// Error boundary around every handler
pub mod guard;
/// Auto-translation decision pipeline
pub mod pipeline;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;
/// Chat-client boundary and the Telegram implementation
pub mod transport;

pub use commands::{Command, CommandDispatcher};
pub use guard::guarded;
pub use pipeline::{SkipReason, TranslationPipeline, Verdict};
pub use transport::{ChatTransport, IncomingMessage, TelegramTransport};
