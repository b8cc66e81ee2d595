use crate::bot::transport::get_user_id_safe;
use crate::bot::{
    guarded, ChatTransport, Command, CommandDispatcher, IncomingMessage, TelegramTransport,
    TranslationPipeline,
};
use crate::config::{Settings, TRANSLATE_REQUEST_TIMEOUT_SECS};
use crate::sessions::SessionStore;
use crate::translation::{
    GoogleTranslator, LanguageDetector, LinguaSource, Localizer, TranslationService,
};
use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

/// Run the Telegram runtime until interrupted.
///
/// # Errors
///
/// Returns an error if an HTTP client cannot be built or the language
/// models fail to load.
pub async fn run_bot(settings: Arc<Settings>) -> Result<()> {
    let bot = Bot::with_client(
        settings.telegram_token.clone(),
        http_client(teloxide::net::default_reqwest_settings(), settings.use_ipv6)
            .context("failed to build Telegram HTTP client")?,
    );

    let translator: Arc<dyn TranslationService> = Arc::new(GoogleTranslator::new(
        http_client(
            reqwest::Client::builder().timeout(Duration::from_secs(TRANSLATE_REQUEST_TIMEOUT_SECS)),
            settings.use_ipv6,
        )
        .context("failed to build translation HTTP client")?,
        settings.translate_endpoint.clone(),
    ));
    info!("Translator initialized ({}).", settings.translate_endpoint);

    let sessions = Arc::new(SessionStore::open(settings.sessions_file()));
    info!(
        "Session store initialized at {}.",
        sessions.path().display()
    );

    let source = LinguaSource::load(None)
        .await
        .context("failed to load language models")?;
    info!("Language models loaded.");
    let detector = Arc::new(LanguageDetector::new(
        Box::new(source),
        settings.destination_language.clone(),
        settings.probability_threshold,
    ));
    let localizer = Arc::new(Localizer::new(
        translator.clone(),
        settings.ui_language.clone(),
        settings.destination_language.clone(),
    ));

    let pipeline = Arc::new(TranslationPipeline::new(
        settings.clone(),
        sessions.clone(),
        detector,
        translator.clone(),
    ));
    let commands = Arc::new(CommandDispatcher::new(
        settings.clone(),
        sessions.clone(),
        localizer,
        translator,
    ));
    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramTransport::new(bot.clone()));

    register_commands(&bot).await;
    if settings.send_intro {
        announce(&settings, transport.as_ref(), &commands).await;
    }

    info!(
        "Bot is running (destination language: {}).",
        settings.destination_language
    );

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![settings, pipeline, commands, transport])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped, flushing sessions.");
    sessions.save().await;
    Ok(())
}

fn http_client(builder: reqwest::ClientBuilder, use_ipv6: bool) -> reqwest::Result<reqwest::Client> {
    let builder = if use_ipv6 {
        builder.local_address(IpAddr::V6(Ipv6Addr::UNSPECIFIED))
    } else {
        builder
    };
    builder.build()
}

async fn register_commands(bot: &Bot) {
    match bot.set_my_commands(Command::bot_commands()).await {
        Ok(_) => info!("Bot commands registered."),
        Err(e) => warn!("Failed to register bot commands: {e}"),
    }
}

async fn announce(settings: &Settings, transport: &dyn ChatTransport, commands: &CommandDispatcher) {
    let intro = commands.intro().await;
    for &chat_id in settings.allowed_chats() {
        if let Err(e) = transport.send_message(chat_id, &intro).await {
            error!(chat_id, "Failed to send intro message: {e}");
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message().branch(
        dptree::filter(|msg: Message, settings: Arc<Settings>| {
            settings.is_allowed(msg.chat.id.0, get_user_id_safe(&msg), msg.chat.is_private())
        })
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            dptree::filter(|msg: Message| msg.chat.is_group() || msg.chat.is_supergroup())
                .endpoint(handle_group_message),
        ),
    )
}

async fn handle_command(
    msg: Message,
    cmd: Command,
    commands: Arc<CommandDispatcher>,
    transport: Arc<dyn ChatTransport>,
) -> Result<(), teloxide::RequestError> {
    let incoming = IncomingMessage::from_telegram(&msg);
    guarded(
        "Command",
        commands.execute(transport.as_ref(), &incoming, cmd),
    )
    .await;
    respond(())
}

async fn handle_group_message(
    msg: Message,
    pipeline: Arc<TranslationPipeline>,
    transport: Arc<dyn ChatTransport>,
) -> Result<(), teloxide::RequestError> {
    let incoming = IncomingMessage::from_telegram(&msg);
    guarded("Translation", pipeline.handle(transport.as_ref(), &incoming)).await;
    respond(())
}
