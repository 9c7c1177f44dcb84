//! In-memory conversation store
//!
//! Default store: sessions do not survive a restart. Each session log has
//! its own lock so appends across sessions never contend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;
use voicelink_core::Message;

use crate::{ConversationStore, MemoryError, SessionKey, SessionStatus, StoredMessage};

#[derive(Default)]
struct SessionLog {
    status: Option<SessionStatus>,
    messages: Vec<StoredMessage>,
    seen: HashSet<Uuid>,
}

/// HashMap-backed store.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionLog>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn log_for(&self, session_id: &str) -> Arc<Mutex<SessionLog>> {
        if let Some(log) = self.sessions.read().get(session_id) {
            return log.clone();
        }
        self.sessions
            .write()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Test/introspection helper: current status of a session.
    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.sessions
            .read()
            .get(session_id)
            .and_then(|log| log.lock().status)
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn append(&self, key: &SessionKey, msg: &Message) -> Result<(), MemoryError> {
        let log = self.log_for(&key.session_id);
        let mut log = log.lock();

        if !log.seen.insert(msg.message_id) {
            tracing::debug!(message_id = %msg.message_id, "Duplicate append ignored");
            return Ok(());
        }
        log.status.get_or_insert(SessionStatus::Active);

        let next_seq = log.messages.last().map(|m| m.sequence_num).unwrap_or(0) + 1;
        log.messages.push(StoredMessage {
            sequence_num: next_seq,
            message: msg.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list(
        &self,
        session_id: &str,
        limit: usize,
        newest_first: bool,
    ) -> Result<Vec<StoredMessage>, MemoryError> {
        let Some(log) = self.sessions.read().get(session_id).cloned() else {
            return Ok(Vec::new());
        };
        let log = log.lock();
        let messages = &log.messages;
        let slice = if newest_first {
            // Newest `limit`, re-ordered oldest-first.
            &messages[messages.len().saturating_sub(limit)..]
        } else {
            &messages[..limit.min(messages.len())]
        };
        Ok(slice.to_vec())
    }

    async fn reset_session(&self, session_id: &str) -> Result<(), MemoryError> {
        let log = self.log_for(session_id);
        let mut log = log.lock();
        log.messages.clear();
        log.seen.clear();
        log.status = Some(SessionStatus::Reset);
        Ok(())
    }

    async fn end_session(&self, session_id: &str) -> Result<(), MemoryError> {
        let log = self.log_for(session_id);
        log.lock().status = Some(SessionStatus::Ended);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(session: &str) -> SessionKey {
        SessionKey::new("dev-1", "agent-1", session)
    }

    #[tokio::test]
    async fn test_sequence_starts_at_one_and_is_contiguous() {
        let store = InMemoryStore::new();
        for text in ["你好", "你好，有什么可以帮你？", "再见"] {
            store.append(&key("s1"), &Message::user(text)).await.unwrap();
        }

        let messages = store.list("s1", 10, false).await.unwrap();
        let seqs: Vec<i64> = messages.iter().map(|m| m.sequence_num).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_duplicate_message_id_is_ignored() {
        let store = InMemoryStore::new();
        let msg = Message::user("你好");
        store.append(&key("s1"), &msg).await.unwrap();
        store.append(&key("s1"), &msg).await.unwrap();

        let messages = store.list("s1", 10, false).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_newest_first_returns_tail_in_ascending_order() {
        let store = InMemoryStore::new();
        for i in 1..=5 {
            store
                .append(&key("s1"), &Message::user(format!("m{i}")))
                .await
                .unwrap();
        }

        let messages = store.list("s1", 2, true).await.unwrap();
        let texts: Vec<&str> = messages.iter().map(|m| m.message.content.as_str()).collect();
        assert_eq!(texts, vec!["m4", "m5"]);
        assert!(messages[0].sequence_num < messages[1].sequence_num);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = InMemoryStore::new();
        store.append(&key("s1"), &Message::user("a")).await.unwrap();
        store.append(&key("s2"), &Message::user("b")).await.unwrap();

        assert_eq!(store.list("s1", 10, false).await.unwrap().len(), 1);
        assert_eq!(store.list("s2", 10, false).await.unwrap().len(), 1);
        assert_eq!(
            store.list("s2", 10, false).await.unwrap()[0].sequence_num,
            1
        );
    }

    #[tokio::test]
    async fn test_reset_clears_and_restarts_sequence() {
        let store = InMemoryStore::new();
        store.append(&key("s1"), &Message::user("a")).await.unwrap();
        store.reset_session("s1").await.unwrap();
        assert_eq!(store.status("s1"), Some(SessionStatus::Reset));
        assert!(store.list("s1", 10, false).await.unwrap().is_empty());

        store.append(&key("s1"), &Message::user("b")).await.unwrap();
        assert_eq!(
            store.list("s1", 10, false).await.unwrap()[0].sequence_num,
            1
        );
    }

    #[tokio::test]
    async fn test_end_session_marks_status() {
        let store = InMemoryStore::new();
        store.append(&key("s1"), &Message::user("a")).await.unwrap();
        store.end_session("s1").await.unwrap();
        assert_eq!(store.status("s1"), Some(SessionStatus::Ended));
    }
}
