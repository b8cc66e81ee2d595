//! End-to-end message flows driven through fake transport and translator.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lingo_relay::bot::transport::PollContent;
use lingo_relay::bot::{
    ChatTransport, Command, CommandDispatcher, IncomingMessage, SkipReason, TranslationPipeline,
    Verdict,
};
use lingo_relay::config::Settings;
use lingo_relay::sessions::{Category, SessionStore};
use lingo_relay::translation::{
    Candidate, CandidateSource, LanguageDetector, Localizer, TranslationError, TranslationService,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const GROUP: i64 = -100_500;
const SENDER: i64 = 42;

#[derive(Default)]
struct FakeTransport {
    replies: Mutex<Vec<(i64, i32, String)>>,
    sent: Mutex<Vec<(i64, String)>>,
    members: HashSet<(i64, i64)>,
    private_fails: bool,
}

impl FakeTransport {
    fn replies(&self) -> Vec<(i64, i32, String)> {
        self.replies.lock().expect("transport log lock").clone()
    }

    fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().expect("transport log lock").clone()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn reply(&self, chat_id: i64, message_id: i32, text: &str) -> Result<()> {
        self.replies
            .lock()
            .expect("transport log lock")
            .push((chat_id, message_id, text.to_string()));
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        if self.private_fails {
            return Err(anyhow!("Forbidden: bot can't initiate conversation with a user"));
        }
        self.sent
            .lock()
            .expect("transport log lock")
            .push((chat_id, text.to_string()));
        Ok(())
    }

    async fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool> {
        Ok(self.members.contains(&(group_id, user_id)))
    }
}

/// Prefixes the text with the target language.
#[derive(Default)]
struct TaggingTranslator {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl TranslationService for TaggingTranslator {
    async fn translate(&self, text: &str, destination: &str) -> Result<String, TranslationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TranslationError::Api {
                status: 429,
                body: "Too Many Requests".to_string(),
            });
        }
        Ok(format!("[{destination}] {text}"))
    }
}

struct FixedSource(Vec<Candidate>);

impl CandidateSource for FixedSource {
    fn candidates(&self, _text: &str) -> Vec<Candidate> {
        self.0.clone()
    }
}

struct Relay {
    _dir: TempDir,
    settings: Arc<Settings>,
    sessions: Arc<SessionStore>,
    translator: Arc<TaggingTranslator>,
    pipeline: TranslationPipeline,
    commands: CommandDispatcher,
}

fn relay(candidates: Vec<Candidate>, translator: TaggingTranslator) -> Relay {
    relay_with(Settings::default(), candidates, translator)
}

fn relay_with(
    settings: Settings,
    candidates: Vec<Candidate>,
    translator: TaggingTranslator,
) -> Relay {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Arc::new(Settings {
        destination_language: "uk".to_string(),
        storage_path: dir.path().to_path_buf(),
        ..settings
    });
    let sessions = Arc::new(SessionStore::open(settings.sessions_file()));
    let translator = Arc::new(translator);
    let service: Arc<dyn TranslationService> = translator.clone();
    let detector = Arc::new(LanguageDetector::new(
        Box::new(FixedSource(candidates)),
        "uk",
        settings.probability_threshold,
    ));
    let localizer = Arc::new(Localizer::new(service.clone(), "en", "uk"));

    Relay {
        pipeline: TranslationPipeline::new(
            settings.clone(),
            sessions.clone(),
            detector,
            service.clone(),
        ),
        commands: CommandDispatcher::new(settings.clone(), sessions.clone(), localizer, service),
        _dir: dir,
        settings,
        sessions,
        translator,
    }
}

fn group_message(text: &str) -> IncomingMessage {
    IncomingMessage {
        chat_id: GROUP,
        message_id: 7,
        chat_title: Some("Kyiv expats".to_string()),
        is_group: true,
        sender_id: SENDER,
        text: Some(text.to_string()),
        ..IncomingMessage::default()
    }
}

#[tokio::test]
async fn test_foreign_message_is_translated_in_reply() {
    let relay = relay(
        vec![Candidate::new("fr", 0.93), Candidate::new("uk", 0.02)],
        TaggingTranslator::default(),
    );
    let transport = FakeTransport::default();

    let verdict = relay
        .pipeline
        .handle(&transport, &group_message("Bonjour le monde"))
        .await
        .expect("pipeline handled message");

    assert_eq!(
        verdict,
        Verdict::Translate {
            text: "Bonjour le monde".to_string(),
            source: "fr".to_string(),
        }
    );
    assert_eq!(
        transport.replies(),
        vec![(GROUP, 7, "🔄 <b>fr → uk</b>\n[uk] Bonjour le monde".to_string())]
    );
}

#[tokio::test]
async fn test_destination_language_is_left_alone() {
    // Destination scores above the threshold even though it ranks second
    let relay = relay(
        vec![Candidate::new("ru", 0.7), Candidate::new("uk", 0.25)],
        TaggingTranslator::default(),
    );
    let transport = FakeTransport::default();

    let verdict = relay
        .pipeline
        .handle(&transport, &group_message("Привіт усім"))
        .await
        .expect("pipeline handled message");

    assert_eq!(
        verdict,
        Verdict::Skip(SkipReason::ExcludedLanguage("uk".to_string()))
    );
    assert!(transport.replies().is_empty());
    assert_eq!(relay.translator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_excluded_sender_gets_no_reply() {
    let relay = relay(vec![Candidate::new("fr", 0.9)], TaggingTranslator::default());
    let transport = FakeTransport::default();
    relay
        .sessions
        .add(Category::ExcludedSenders, GROUP, SENDER)
        .await;

    let verdict = relay
        .pipeline
        .handle(&transport, &group_message("Bonjour"))
        .await
        .expect("pipeline handled message");

    assert_eq!(verdict, Verdict::Skip(SkipReason::ExcludedSender));
    assert!(transport.replies().is_empty());
    assert_eq!(relay.translator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_command_text_is_left_to_the_dispatcher() {
    let relay = relay(vec![Candidate::new("fr", 0.9)], TaggingTranslator::default());
    let transport = FakeTransport::default();

    let verdict = relay
        .pipeline
        .handle(&transport, &group_message("/start@other_bot"))
        .await
        .expect("pipeline handled message");

    assert_eq!(verdict, Verdict::Skip(SkipReason::Command));
    assert!(transport.replies().is_empty());
    assert_eq!(relay.translator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_trusted_client_language_skips_detection() {
    let relay = relay_with(
        Settings {
            trust_client_language: true,
            ..Settings::default()
        },
        vec![Candidate::new("fr", 0.9)],
        TaggingTranslator::default(),
    );
    let transport = FakeTransport::default();
    let msg = IncomingMessage {
        sender_language: Some("uk-UA".to_string()),
        ..group_message("Bonjour")
    };

    let verdict = relay
        .pipeline
        .handle(&transport, &msg)
        .await
        .expect("pipeline handled message");

    assert_eq!(verdict, Verdict::Skip(SkipReason::TrustedLanguage));
    assert!(transport.replies().is_empty());
    assert_eq!(relay.translator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_client_language_ignored_unless_trusted() {
    let relay = relay(vec![Candidate::new("fr", 0.9)], TaggingTranslator::default());
    let transport = FakeTransport::default();
    let msg = IncomingMessage {
        sender_language: Some("uk-UA".to_string()),
        ..group_message("Bonjour")
    };

    let verdict = relay
        .pipeline
        .handle(&transport, &msg)
        .await
        .expect("pipeline handled message");

    assert!(matches!(verdict, Verdict::Translate { ref source, .. } if source == "fr"));
    assert_eq!(transport.replies().len(), 1);
}

#[test]
fn test_trusted_shortcut_needs_matching_language() {
    let relay = relay_with(
        Settings {
            trust_client_language: true,
            ..Settings::default()
        },
        vec![Candidate::new("fr", 0.9)],
        TaggingTranslator::default(),
    );
    let msg = IncomingMessage {
        sender_language: Some("fr".to_string()),
        ..group_message("Bonjour")
    };

    assert!(matches!(
        relay.pipeline.evaluate(&msg),
        Verdict::Translate { .. }
    ));
}

#[tokio::test]
async fn test_message_without_text_is_ignored() {
    let relay = relay(vec![Candidate::new("fr", 0.9)], TaggingTranslator::default());
    let transport = FakeTransport::default();
    let sticker = IncomingMessage {
        text: None,
        ..group_message("")
    };

    let verdict = relay
        .pipeline
        .handle(&transport, &sticker)
        .await
        .expect("pipeline handled message");

    assert_eq!(verdict, Verdict::Skip(SkipReason::NoText));
    assert!(transport.replies().is_empty());
    assert_eq!(relay.translator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_poll_is_translated_as_question_and_answers() {
    let relay = relay(vec![Candidate::new("fr", 0.9)], TaggingTranslator::default());
    let transport = FakeTransport::default();
    let poll = IncomingMessage {
        text: None,
        poll: Some(PollContent {
            question: "On mange où".to_string(),
            options: vec!["Ici".to_string(), "Là-bas".to_string()],
        }),
        ..group_message("")
    };

    let verdict = relay
        .pipeline
        .handle(&transport, &poll)
        .await
        .expect("pipeline handled message");

    assert_eq!(
        verdict,
        Verdict::Translate {
            text: "On mange où: Ici, Là-bas".to_string(),
            source: "fr".to_string(),
        }
    );
    assert_eq!(
        transport.replies()[0].2,
        "🔄 <b>fr → uk</b>\n[uk] On mange où: Ici, Là-bas"
    );
}

#[tokio::test]
async fn test_unknown_language_is_still_translated() {
    let relay = relay(Vec::new(), TaggingTranslator::default());
    let transport = FakeTransport::default();

    let verdict = relay
        .pipeline
        .handle(&transport, &group_message("zzzz"))
        .await
        .expect("pipeline handled message");

    assert!(matches!(verdict, Verdict::Translate { ref source, .. } if source == "?"));
    assert_eq!(transport.replies().len(), 1);
}

#[tokio::test]
async fn test_translation_failure_surfaces_as_error() {
    let relay = relay(
        vec![Candidate::new("fr", 0.9)],
        TaggingTranslator {
            fail: true,
            ..TaggingTranslator::default()
        },
    );
    let transport = FakeTransport::default();

    let result = relay
        .pipeline
        .handle(&transport, &group_message("Bonjour"))
        .await;

    assert!(result.is_err());
    assert!(transport.replies().is_empty());
}

#[tokio::test]
async fn test_translate_command_with_language() {
    let relay = relay(Vec::new(), TaggingTranslator::default());
    let transport = FakeTransport::default();
    let msg = group_message("/translate es Hello");

    relay
        .commands
        .execute(&transport, &msg, Command::Translate("es Hello".to_string()))
        .await
        .expect("command executed");

    let replies = transport.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].2, "🔄 <b>es</b>\n[es] Hello");
}

#[tokio::test]
async fn test_translate_command_uses_replied_text() {
    let relay = relay(Vec::new(), TaggingTranslator::default());
    let transport = FakeTransport::default();
    let msg = IncomingMessage {
        reply_text: Some("Guten Morgen".to_string()),
        ..group_message("/translate")
    };

    relay
        .commands
        .execute(&transport, &msg, Command::Translate(String::new()))
        .await
        .expect("command executed");

    assert_eq!(transport.replies()[0].2, "🔄 <b>uk</b>\n[uk] Guten Morgen");
}

#[tokio::test]
async fn test_translate_command_reports_failure() {
    let relay = relay(
        Vec::new(),
        TaggingTranslator {
            fail: true,
            ..TaggingTranslator::default()
        },
    );
    let transport = FakeTransport::default();

    relay
        .commands
        .execute(
            &transport,
            &group_message("/translate de Hi"),
            Command::Translate("de Hi".to_string()),
        )
        .await
        .expect("command executed");

    let replies = transport.replies();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].2.starts_with("⚠️ Translation failed: API error 429"));
}

#[tokio::test]
async fn test_exclude_requires_membership_for_explicit_group() {
    let relay = relay(Vec::new(), TaggingTranslator::default());
    let transport = FakeTransport::default();
    let private = IncomingMessage {
        chat_id: SENDER,
        sender_id: SENDER,
        ..IncomingMessage::default()
    };

    relay
        .commands
        .execute(&transport, &private, Command::Exclude(GROUP.to_string()))
        .await
        .expect("command executed");

    assert!(!relay.sessions.exists(Category::ExcludedSenders, GROUP, SENDER));
    let replies = transport.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, SENDER);
    assert!(replies[0].2.contains("You must be a member of that group."));
    assert!(!relay.settings.sessions_file().exists());
}

#[tokio::test]
async fn test_exclude_by_member_from_private_chat() {
    let relay = relay(Vec::new(), TaggingTranslator::default());
    let transport = FakeTransport {
        members: HashSet::from([(GROUP, SENDER)]),
        ..FakeTransport::default()
    };
    let private = IncomingMessage {
        chat_id: SENDER,
        sender_id: SENDER,
        ..IncomingMessage::default()
    };

    relay
        .commands
        .execute(&transport, &private, Command::Exclude(GROUP.to_string()))
        .await
        .expect("command executed");

    assert!(relay.sessions.exists(Category::ExcludedSenders, GROUP, SENDER));
    // Answered in place, no group notice
    assert_eq!(transport.replies().len(), 1);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_exclude_in_group_answers_privately_and_informs_once() {
    let relay = relay(Vec::new(), TaggingTranslator::default());
    let transport = FakeTransport::default();
    let msg = group_message("/exclude");

    relay
        .commands
        .execute(&transport, &msg, Command::Exclude(String::new()))
        .await
        .expect("command executed");
    relay
        .commands
        .execute(&transport, &msg, Command::Check(String::new()))
        .await
        .expect("command executed");

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(chat, _)| *chat == SENDER));
    assert!(sent[1].1.contains("Your messages are not translated in this group."));

    let replies = transport.replies();
    assert_eq!(replies.len(), 1, "group notice is posted only once");
    assert_eq!(replies[0].0, GROUP);
    assert!(replies[0].2.contains("I answered you in a private message."));
    assert!(relay.sessions.exists(Category::Informed, GROUP, SENDER));
}

#[tokio::test]
async fn test_private_delivery_failure_falls_back_to_group_reply() {
    let relay = relay(Vec::new(), TaggingTranslator::default());
    let transport = FakeTransport {
        private_fails: true,
        ..FakeTransport::default()
    };

    relay
        .commands
        .execute(&transport, &group_message("/chat_id"), Command::ChatId)
        .await
        .expect("command executed");

    let replies = transport.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, GROUP);
    assert!(replies[0].2.contains(&format!("<code>{GROUP}</code>")));
    assert!(replies[0].2.contains("Kyiv expats"));
    assert!(!relay.sessions.exists(Category::Informed, GROUP, SENDER));
}

#[tokio::test]
async fn test_include_reenables_translation() {
    let relay = relay(vec![Candidate::new("fr", 0.9)], TaggingTranslator::default());
    let transport = FakeTransport::default();
    let msg = group_message("/include");

    relay
        .sessions
        .add(Category::ExcludedSenders, GROUP, SENDER)
        .await;
    relay
        .commands
        .execute(&transport, &msg, Command::Include(String::new()))
        .await
        .expect("command executed");

    assert!(!relay.sessions.exists(Category::ExcludedSenders, GROUP, SENDER));
    let verdict = relay.pipeline.evaluate(&group_message("Bonjour"));
    assert!(matches!(verdict, Verdict::Translate { .. }));
}

#[tokio::test]
async fn test_help_mentions_version() {
    let relay = relay(Vec::new(), TaggingTranslator::default());
    let transport = FakeTransport::default();

    relay
        .commands
        .execute(&transport, &group_message("/help"), Command::Help)
        .await
        .expect("command executed");

    let help = &transport.replies()[0].2;
    assert!(help.contains(&format!("v{}", lingo_relay::VERSION)));
    assert!(help.contains("/translate"));
    assert!(help.contains("<code>uk</code>"));
}

#[tokio::test]
async fn test_sessions_survive_restart() {
    let relay = relay(Vec::new(), TaggingTranslator::default());
    relay
        .sessions
        .add(Category::ExcludedSenders, GROUP, SENDER)
        .await;
    relay.sessions.add(Category::Informed, GROUP, 99).await;

    let reopened = SessionStore::open(relay.settings.sessions_file());

    assert!(reopened.exists(Category::ExcludedSenders, GROUP, SENDER));
    assert!(reopened.exists(Category::Informed, GROUP, 99));
    assert!(!reopened.exists(Category::ExcludedSenders, GROUP, 99));
}

#[tokio::test]
async fn test_intro_names_destination_language() {
    let relay = relay(Vec::new(), TaggingTranslator::default());

    let intro = relay.commands.intro().await;

    assert!(intro.contains("/help"));
    assert!(intro.ends_with("<code>uk</code>"));
}
