//! Event routing
//!
//! Wires the bus topics to their side effects: message persistence,
//! session-end housekeeping, and audio storage. Message persistence runs on
//! a single worker so messages land in the store in emission order; audio
//! uploads fan out wider since ordering does not matter there.

use std::sync::Arc;

use async_trait::async_trait;

use voicelink_core::eventbus::{AudioSaveEvent, Event, EventBus, OverflowPolicy, Topic};
use voicelink_memory::{ConversationStore, SessionKey};

use crate::ServerError;

/// Destination for collected utterance/reply audio. The object-storage
/// uploader implements this; the default just logs the contract.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn save(&self, event: AudioSaveEvent) -> Result<(), ServerError>;
}

pub struct LoggingAudioSink;

#[async_trait]
impl AudioSink for LoggingAudioSink {
    async fn save(&self, event: AudioSaveEvent) -> Result<(), ServerError> {
        tracing::info!(
            device_id = %event.device_id,
            session_id = %event.session_id,
            message_id = %event.message_id,
            bytes = event.audio.len(),
            codec = event.codec.as_str(),
            source = event.source.as_str(),
            "Audio ready for storage (no sink configured)"
        );
        Ok(())
    }
}

/// Subscribe the standard handlers. Called once at startup.
pub fn register_event_handlers(
    bus: &EventBus,
    store: Arc<dyn ConversationStore>,
    audio_sink: Arc<dyn AudioSink>,
) {
    // One worker: persisted order must match emission order within a session.
    let message_store = store.clone();
    bus.subscribe_with(
        Topic::AddMessage,
        1,
        1000,
        OverflowPolicy::DropIncoming,
        move |event| {
            let store = message_store.clone();
            async move {
                let Event::AddMessage {
                    device_id,
                    agent_id,
                    session_id,
                    message,
                } = event
                else {
                    return;
                };
                let key = SessionKey::new(device_id, agent_id, session_id);
                if let Err(e) = store.append(&key, &message).await {
                    tracing::error!(error = %e, "Message persistence failed");
                }
            }
        },
    );

    let end_store = store;
    bus.subscribe(Topic::SessionEnd, move |event| {
        let store = end_store.clone();
        async move {
            let Event::SessionEnd { session_id, .. } = event else {
                return;
            };
            if let Err(e) = store.end_session(&session_id).await {
                tracing::error!(error = %e, session_id = %session_id, "Session-end update failed");
            }
        }
    });

    bus.subscribe_with(
        Topic::SaveAudio,
        5,
        500,
        OverflowPolicy::DropIncoming,
        move |event| {
            let sink = audio_sink.clone();
            async move {
                let Event::SaveAudio(save) = event else { return };
                if save.audio.is_empty() {
                    return;
                }
                if let Err(e) = sink.save(save).await {
                    tracing::error!(error = %e, "Audio save failed");
                }
            }
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use voicelink_core::{Message, Role};
    use voicelink_memory::InMemoryStore;

    #[tokio::test]
    async fn test_add_message_events_persist_in_order() {
        let bus = EventBus::new();
        let store = Arc::new(InMemoryStore::new());
        register_event_handlers(&bus, store.clone(), Arc::new(LoggingAudioSink));

        for text in ["一", "二", "三"] {
            bus.publish(Event::AddMessage {
                device_id: "dev-1".into(),
                agent_id: "agent-1".into(),
                session_id: "sess-1".into(),
                message: Message::user(text),
            });
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        let stored = store.list("sess-1", 10, false).await.unwrap();
        let texts: Vec<&str> = stored.iter().map(|m| m.message.content.as_str()).collect();
        assert_eq!(texts, vec!["一", "二", "三"]);
        assert_eq!(stored[0].message.role, Role::User);
    }

    #[tokio::test]
    async fn test_session_end_event_updates_store() {
        let bus = EventBus::new();
        let store = Arc::new(InMemoryStore::new());
        register_event_handlers(&bus, store.clone(), Arc::new(LoggingAudioSink));

        bus.publish(Event::AddMessage {
            device_id: "dev-1".into(),
            agent_id: "agent-1".into(),
            session_id: "sess-1".into(),
            message: Message::user("hi"),
        });
        bus.publish(Event::SessionEnd {
            device_id: "dev-1".into(),
            session_id: "sess-1".into(),
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(
            store.status("sess-1"),
            Some(voicelink_memory::SessionStatus::Ended)
        );
    }
}
