//! Voicelink server
//!
//! Device-facing WebSocket endpoint, per-connection session management, and
//! the process services (config provider, VAD pool, event bus, tool
//! registry, conversation store) injected into every session.

pub mod events;
pub mod protocol;
pub mod providers;
pub mod session;
pub mod state;
pub mod transport;
pub mod websocket;

pub use protocol::{AudioParams, ClientMessage, ListenState, ServerMessage, TtsState};
pub use session::{Session, SessionManager};
pub use state::{AppState, StaticConfigProvider, UserConfig, UserConfigProvider};
pub use transport::{Outbound, WsLink};
pub use websocket::create_router;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] voicelink_core::CoreError),

    #[error(transparent)]
    Memory(#[from] voicelink_memory::MemoryError),

    #[error("Internal error: {0}")]
    Internal(String),
}
