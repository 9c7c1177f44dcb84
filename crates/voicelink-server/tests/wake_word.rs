//! Wake-word handling at the session level.

use std::sync::Arc;
use std::time::Duration;

use voicelink_config::Settings;
use voicelink_core::audio::Codec;
use voicelink_core::AudioFormat;
use voicelink_memory::{ConversationStore, InMemoryStore};
use voicelink_server::events::{register_event_handlers, LoggingAudioSink};
use voicelink_server::providers::{
    IpApiLocationResolver, NoopStt, OpenAiChatModel, SilenceTts,
};
use voicelink_server::state::{AppState, ProviderSet};
use voicelink_server::transport::{Outbound, WsLink};
use voicelink_tools::AmapWeatherProvider;

fn test_state(store: Arc<InMemoryStore>) -> AppState {
    let mut settings = Settings::default();
    settings.chat.wakeup_words = vec!["小智".into()];
    settings.chat.enable_greeting = false;
    settings.vad.pool_size = 2;

    let providers = ProviderSet {
        llm: Arc::new(OpenAiChatModel::new(settings.llm.clone())),
        stt: Arc::new(NoopStt::new()),
        tts: Arc::new(SilenceTts::new()),
        location: Arc::new(IpApiLocationResolver::new()),
        weather: Arc::new(AmapWeatherProvider::new("")),
    };
    AppState::new(settings, providers, store)
}

async fn drain(rx: &mut tokio::sync::mpsc::Receiver<Outbound>) -> Vec<String> {
    let mut texts = Vec::new();
    while let Ok(Some(out)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        match out {
            Outbound::Text(text) => texts.push(text),
            Outbound::Binary(_) => texts.push("<binary>".into()),
        }
    }
    texts
}

// S1: greeting-suppressed wake word echoes STT and stays otherwise silent.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wake_word_suppresses_reply() {
    let store = Arc::new(InMemoryStore::new());
    let state = test_state(store.clone());
    register_event_handlers(
        &state.bus,
        store.clone() as Arc<dyn ConversationStore>,
        Arc::new(LoggingAudioSink),
    );

    let (link, mut rx) = WsLink::channel();
    let session = state
        .sessions
        .open(
            &state,
            "dev-1".into(),
            AudioFormat {
                codec: Codec::Pcm,
                ..AudioFormat::default()
            },
            Arc::new(link),
            String::new(),
        )
        .await
        .unwrap();

    session.handle_detect("小智！").await;

    let sent = drain(&mut rx).await;
    // Exactly one stt echo with the normalized wake word, no tts events.
    assert_eq!(sent.len(), 1, "unexpected messages: {sent:?}");
    assert!(sent[0].contains(r#""type":"stt""#));
    assert!(sent[0].contains("小智"));
    assert!(!sent[0].contains("！"));

    // No message was appended to memory.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(store
        .list(&session.session_id, 10, false)
        .await
        .unwrap()
        .is_empty());

    state.sessions.close(&session.session_id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_transcripts_do_not_dispatch() {
    let store = Arc::new(InMemoryStore::new());
    let state = test_state(store.clone());

    let (link, mut rx) = WsLink::channel();
    let session = state
        .sessions
        .open(
            &state,
            "dev-1".into(),
            AudioFormat {
                codec: Codec::Pcm,
                ..AudioFormat::default()
            },
            Arc::new(link),
            String::new(),
        )
        .await
        .unwrap();

    session.handle_detect("   ").await;
    let sent = drain(&mut rx).await;
    assert!(sent.is_empty(), "unexpected messages: {sent:?}");

    state.sessions.close(&session.session_id).await;
}
