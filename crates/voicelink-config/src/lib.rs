//! Layered configuration for the voicelink server
//!
//! Priority: environment variables > `config/{env}.yaml` >
//! `config/default.yaml` > built-in defaults. Every option is optional;
//! defaults match the values in the protocol documentation.

pub mod settings;

pub use settings::{
    ChatSettings, ListenMode, LlmSettings, MemorySettings, PacerSettings, ServerSettings,
    Settings, ToolSettings, VadSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Load settings from `config/` with optional environment overlay.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder =
            builder.add_source(config::File::with_name(&format!("config/{env}")).required(false));
    }

    let cfg = builder
        .add_source(config::Environment::with_prefix("VOICELINK").separator("__"))
        .build()?;

    let settings: Settings = cfg.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}
