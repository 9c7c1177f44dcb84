//! Conversation memory
//!
//! Append-only per-session message log with at-most-once insertion keyed by
//! `message_id` and a strictly increasing `sequence_num` assigned inside the
//! store. The in-memory store is the default; the Postgres store persists
//! the same schema for production deployments.

pub mod memory;
pub mod pg;

pub use memory::InMemoryStore;
pub use pg::{PgStore, PgStoreConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use voicelink_core::Message;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Other(String),
}

/// Identifies the session a message belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub device_id: String,
    pub agent_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        device_id: impl Into<String>,
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            agent_id: agent_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// Session lifecycle states as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Ended,
    Reset,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Reset => "reset",
        }
    }
}

/// A message with its store-assigned position.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub sequence_num: i64,
    pub message: Message,
    pub created_at: DateTime<Utc>,
}

/// The conversation log contract.
///
/// Appends within one session serialize; appends across sessions proceed in
/// parallel. Re-appending a `message_id` already present is a silent no-op.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, key: &SessionKey, msg: &Message) -> Result<(), MemoryError>;

    /// Messages in ascending sequence order. With `newest_first` the newest
    /// `limit` messages are selected, then returned oldest-first.
    async fn list(
        &self,
        session_id: &str,
        limit: usize,
        newest_first: bool,
    ) -> Result<Vec<StoredMessage>, MemoryError>;

    /// Drop all messages of a session and mark it reset.
    async fn reset_session(&self, session_id: &str) -> Result<(), MemoryError>;

    /// Mark a session ended.
    async fn end_session(&self, session_id: &str) -> Result<(), MemoryError>;

    /// Delete messages older than the retention window. 0 days keeps
    /// everything.
    async fn prune(&self, retention_days: u32) -> Result<u64, MemoryError> {
        let _ = retention_days;
        Ok(0)
    }
}

/// Convenience: just the messages, oldest first.
pub async fn recent_messages(
    store: &dyn ConversationStore,
    session_id: &str,
    limit: usize,
) -> Result<Vec<Message>, MemoryError> {
    Ok(store
        .list(session_id, limit, true)
        .await?
        .into_iter()
        .map(|m| m.message)
        .collect())
}
