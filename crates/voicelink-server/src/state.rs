//! Process-wide application state
//!
//! Built once at startup and injected into every session: settings, the
//! resolved provider set, the VAD pool, event bus, tool registry, and the
//! conversation store. Failures constructing any of these are fatal for the
//! process; failures inside a session never are.

use std::sync::Arc;

use async_trait::async_trait;

use voicelink_audio::VadPool;
use voicelink_config::{ListenMode, Settings};
use voicelink_core::eventbus::EventBus;
use voicelink_core::{AudioFormat, LanguageModel, LocationResolver, SpeechToText, TextToSpeech};
use voicelink_memory::ConversationStore;
use voicelink_tools::{ToolRegistry, WeatherProvider};

use crate::session::SessionManager;
use crate::ServerError;

/// Per-device configuration resolved once at session open.
#[derive(Debug, Clone)]
pub struct UserConfig {
    pub agent_id: String,
    pub system_prompt: String,
    pub wakeup_words: Vec<String>,
    pub enable_greeting: bool,
    pub listen_mode: ListenMode,
    pub output_format: AudioFormat,
}

#[async_trait]
pub trait UserConfigProvider: Send + Sync {
    async fn user_config(&self, device_id: &str) -> Result<UserConfig, ServerError>;
}

/// Settings-backed provider: every device gets the server-wide defaults.
/// The built-in device voice forces 24 kHz / 20 ms output.
pub struct StaticConfigProvider {
    settings: Settings,
}

impl StaticConfigProvider {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl UserConfigProvider for StaticConfigProvider {
    async fn user_config(&self, device_id: &str) -> Result<UserConfig, ServerError> {
        Ok(UserConfig {
            agent_id: device_id.to_string(),
            system_prompt: self.settings.server.system_prompt.clone(),
            wakeup_words: self.settings.chat.wakeup_words.clone(),
            enable_greeting: self.settings.chat.enable_greeting,
            listen_mode: ListenMode::Auto,
            output_format: AudioFormat::device_voice_output(),
        })
    }
}

/// The pluggable provider backends.
#[derive(Clone)]
pub struct ProviderSet {
    pub llm: Arc<dyn LanguageModel>,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub location: Arc<dyn LocationResolver>,
    pub weather: Arc<dyn WeatherProvider>,
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub config_provider: Arc<dyn UserConfigProvider>,
    pub providers: ProviderSet,
    pub vad_pool: Arc<VadPool>,
    pub bus: Arc<EventBus>,
    pub store: Arc<dyn ConversationStore>,
    pub tools: Arc<ToolRegistry>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        providers: ProviderSet,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let vad_pool = Arc::new(VadPool::new(settings.vad.clone()));
        Self {
            config_provider: Arc::new(StaticConfigProvider::new(settings.clone())),
            settings: Arc::new(settings),
            providers,
            vad_pool,
            bus: Arc::new(EventBus::new()),
            store,
            tools: Arc::new(ToolRegistry::new()),
            sessions: Arc::new(SessionManager::new()),
        }
    }

    pub fn with_config_provider(mut self, provider: Arc<dyn UserConfigProvider>) -> Self {
        self.config_provider = provider;
        self
    }
}
