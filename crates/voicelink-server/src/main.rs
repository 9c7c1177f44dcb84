//! Voicelink server entry point

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use voicelink_config::{load_settings, Settings};
use voicelink_memory::{ConversationStore, InMemoryStore, PgStore, PgStoreConfig};
use voicelink_server::events::{register_event_handlers, LoggingAudioSink};
use voicelink_server::providers::{
    IpApiLocationResolver, NoopStt, OpenAiChatModel, SilenceTts,
};
use voicelink_server::state::{AppState, ProviderSet};
use voicelink_server::websocket::serve;
use voicelink_tools::AmapWeatherProvider;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("VOICELINK_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing is not up yet.
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        env = env.as_deref().unwrap_or("default"),
        "Starting voicelink server"
    );

    let store: Arc<dyn ConversationStore> = if settings.memory.postgres_enabled {
        match PgStore::connect(PgStoreConfig {
            database_url: settings.memory.database_url.clone(),
            ..PgStoreConfig::default()
        })
        .await
        {
            Ok(store) => {
                tracing::info!("Postgres conversation store ready");
                Arc::new(store)
            }
            Err(e) => {
                tracing::error!(error = %e, "Postgres unavailable, falling back to in-memory");
                Arc::new(InMemoryStore::new())
            }
        }
    } else {
        tracing::info!("Using in-memory conversation store");
        Arc::new(InMemoryStore::new())
    };

    let providers = ProviderSet {
        llm: Arc::new(OpenAiChatModel::new(settings.llm.clone())),
        stt: Arc::new(NoopStt::new()),
        tts: Arc::new(SilenceTts::new()),
        location: Arc::new(IpApiLocationResolver::new()),
        weather: Arc::new(AmapWeatherProvider::new(settings.tools.amap_api_key.clone())),
    };

    let port = settings.server.port;
    let retention_days = settings.memory.retention_days;
    let state = AppState::new(settings, providers, store.clone());

    register_event_handlers(&state.bus, store.clone(), Arc::new(LoggingAudioSink));
    spawn_retention_task(store, retention_days);

    serve(state, port).await?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("voicelink={}", settings.log_level).into());

    let fmt_layer = if settings.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Daily retention sweep; a no-op when retention is disabled.
fn spawn_retention_task(store: Arc<dyn ConversationStore>, retention_days: u32) {
    if retention_days == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = store.prune(retention_days).await {
                tracing::warn!(error = %e, "Retention prune failed");
            }
        }
    });
}
