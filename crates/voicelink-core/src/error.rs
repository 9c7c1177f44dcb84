//! Core error type

use thiserror::Error;

/// Errors surfaced by core types and provider trait implementations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),

    #[error("Cancelled")]
    Cancelled,
}

impl CoreError {
    /// Provider-side failures are recoverable for the session: the dialogue
    /// surfaces a spoken error and keeps the connection open.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::Transport(_))
    }
}
