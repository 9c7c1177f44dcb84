//! In-process event bus
//!
//! Side effects (message persistence, audio upload, session-end housekeeping)
//! are decoupled from the real-time pipeline through topic subscriptions.
//! Publishing never blocks: each subscriber owns a bounded queue drained by a
//! pool of worker tasks, and overflow is resolved per subscriber policy.
//! Delivery is best-effort, at-most-once, with no cross-topic ordering.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::audio::Codec;
use crate::message::Message;

/// Default worker-pool size per subscriber.
pub const DEFAULT_WORKERS: usize = 10;
/// Default queue depth per subscriber.
pub const DEFAULT_QUEUE: usize = 1000;

/// Event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    AddMessage,
    SessionEnd,
    SaveAudio,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::AddMessage => "add_message",
            Topic::SessionEnd => "session_end",
            Topic::SaveAudio => "save_audio",
        }
    }
}

/// Which side of the conversation produced a saved audio blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSource {
    User,
    Tts,
    Asr,
}

impl AudioSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioSource::User => "user",
            AudioSource::Tts => "tts",
            AudioSource::Asr => "asr",
        }
    }
}

/// Payload of a `save_audio` event. The upload itself is a subscriber's
/// concern; the pipeline only guarantees this publication contract.
#[derive(Debug, Clone)]
pub struct AudioSaveEvent {
    pub device_id: String,
    pub session_id: String,
    pub message_id: Uuid,
    pub audio: Vec<u8>,
    pub codec: Codec,
    pub source: AudioSource,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Bus events
#[derive(Debug, Clone)]
pub enum Event {
    AddMessage {
        device_id: String,
        agent_id: String,
        session_id: String,
        message: Message,
    },
    SessionEnd {
        device_id: String,
        session_id: String,
    },
    SaveAudio(AudioSaveEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::AddMessage { .. } => Topic::AddMessage,
            Event::SessionEnd { .. } => Topic::SessionEnd,
            Event::SaveAudio(_) => Topic::SaveAudio,
        }
    }
}

/// What to do when a subscriber queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the incoming event
    #[default]
    DropIncoming,
    /// Discard the oldest queued event to make room
    DropOldest,
}

struct SubscriberQueue {
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    policy: OverflowPolicy,
    // Permit count mirrors queue length so workers can park without polling.
    ready: Semaphore,
}

impl SubscriberQueue {
    fn offer(&self, event: Event) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropIncoming => {
                    tracing::warn!(topic = %event.topic().as_str(), "Event queue full, dropping event");
                    return;
                }
                OverflowPolicy::DropOldest => {
                    queue.pop_front();
                    queue.push_back(event);
                    tracing::warn!("Event queue full, dropped oldest");
                    return;
                }
            }
        }
        queue.push_back(event);
        self.ready.add_permits(1);
    }
}

/// Topic dispatcher. One instance per process, injected into the session
/// manager and the pipeline.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<Topic, Vec<Arc<SubscriberQueue>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler with the default pool (10 workers, queue 1000).
    pub fn subscribe<F, Fut>(&self, topic: Topic, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe_with(
            topic,
            DEFAULT_WORKERS,
            DEFAULT_QUEUE,
            OverflowPolicy::default(),
            handler,
        );
    }

    /// Register a handler with an explicit worker pool and overflow policy.
    pub fn subscribe_with<F, Fut>(
        &self,
        topic: Topic,
        workers: usize,
        capacity: usize,
        policy: OverflowPolicy,
        handler: F,
    ) where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let sub = Arc::new(SubscriberQueue {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            policy,
            ready: Semaphore::new(0),
        });
        let handler = Arc::new(handler);

        for _ in 0..workers.max(1) {
            let sub = sub.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                loop {
                    let permit = match sub.ready.acquire().await {
                        Ok(p) => p,
                        Err(_) => return,
                    };
                    permit.forget();
                    let event = sub.queue.lock().pop_front();
                    if let Some(event) = event {
                        handler(event).await;
                    }
                }
            });
        }

        self.subscribers.write().entry(topic).or_default().push(sub);
    }

    /// Publish an event to every subscriber of its topic. Never blocks.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let subscribers = self.subscribers.read();
        let Some(subs) = subscribers.get(&topic) else {
            tracing::trace!(topic = topic.as_str(), "No subscribers for topic");
            return;
        };
        for sub in subs {
            sub.offer(event.clone());
        }
    }
}
