//! Session audio collector
//!
//! Accumulates the opus bytes of the user utterance and of the synthesized
//! reply, and publishes them as `save_audio` events on flush. Upload is a
//! subscriber's job; the collector only owns the buffers and the contract.

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;
use voicelink_core::audio::Codec;
use voicelink_core::eventbus::{AudioSaveEvent, AudioSource, Event, EventBus};
use voicelink_core::AudioFormat;

struct Side {
    data: Vec<u8>,
    enabled: bool,
}

/// Collects user-side and TTS-side audio for one session.
pub struct AudioCollector {
    bus: Arc<EventBus>,
    device_id: String,
    session_id: String,
    user: Mutex<Side>,
    tts: Mutex<Side>,
}

impl AudioCollector {
    pub fn new(bus: Arc<EventBus>, device_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            bus,
            device_id: device_id.into(),
            session_id: session_id.into(),
            user: Mutex::new(Side {
                data: Vec::new(),
                enabled: true,
            }),
            tts: Mutex::new(Side {
                data: Vec::new(),
                enabled: true,
            }),
        }
    }

    pub fn set_enabled(&self, user: bool, tts: bool) {
        self.user.lock().enabled = user;
        self.tts.lock().enabled = tts;
    }

    pub fn add_user(&self, frame: &[u8]) {
        let mut side = self.user.lock();
        if side.enabled && !frame.is_empty() {
            side.data.extend_from_slice(frame);
        }
    }

    pub fn add_tts(&self, frame: &[u8]) {
        let mut side = self.tts.lock();
        if side.enabled && !frame.is_empty() {
            side.data.extend_from_slice(frame);
        }
    }

    /// Publish the collected user audio under `message_id` and clear.
    pub fn flush_user(&self, message_id: Uuid, format: &AudioFormat) {
        let data = std::mem::take(&mut self.user.lock().data);
        self.publish(message_id, data, AudioSource::User, format);
    }

    /// Publish the collected TTS audio under `message_id` and clear.
    pub fn flush_tts(&self, message_id: Uuid, format: &AudioFormat) {
        let data = std::mem::take(&mut self.tts.lock().data);
        self.publish(message_id, data, AudioSource::Tts, format);
    }

    pub fn clear(&self) {
        self.user.lock().data.clear();
        self.tts.lock().data.clear();
    }

    fn publish(&self, message_id: Uuid, data: Vec<u8>, source: AudioSource, format: &AudioFormat) {
        if data.is_empty() {
            return;
        }
        self.bus.publish(Event::SaveAudio(AudioSaveEvent {
            device_id: self.device_id.clone(),
            session_id: self.session_id.clone(),
            message_id,
            audio: data,
            codec: format.codec,
            source,
            sample_rate: format.sample_rate,
            channels: format.channels,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::time::Duration;
    use voicelink_core::eventbus::Topic;

    #[tokio::test]
    async fn test_flush_publishes_and_clears() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe(Topic::SaveAudio, move |event| {
            let s = s.clone();
            async move {
                if let Event::SaveAudio(e) = event {
                    s.lock().push(e);
                }
            }
        });

        let collector = AudioCollector::new(bus, "dev-1", "sess-1");
        collector.add_user(&[1, 2, 3]);
        collector.add_user(&[4]);

        let id = Uuid::new_v4();
        collector.flush_user(id, &AudioFormat::default());
        tokio::time::sleep(Duration::from_millis(50)).await;

        {
            let events = seen.lock();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].audio, vec![1, 2, 3, 4]);
            assert_eq!(events[0].message_id, id);
            assert_eq!(events[0].source, AudioSource::User);
        }

        // Buffer cleared: a second flush publishes nothing.
        collector.flush_user(Uuid::new_v4(), &AudioFormat::default());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_side_collects_nothing() {
        let bus = Arc::new(EventBus::new());
        let collector = AudioCollector::new(bus, "dev-1", "sess-1");
        collector.set_enabled(false, true);
        collector.add_user(&[1, 2, 3]);
        assert!(collector.user.lock().data.is_empty());
    }
}
