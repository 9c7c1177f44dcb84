//! Provider traits for pluggable backends
//!
//! The dialogue pipeline never talks to a concrete vendor; it goes through
//! these traits. Real implementations live outside the core (they are
//! session-independent process services); tests use scripted doubles.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::AudioFormat;
use crate::error::CoreError;
use crate::message::{ChatDelta, Message, ToolSpec};

/// Streaming chat model with optional tool binding.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Open one streaming completion. The receiver closes when the model is
    /// done; dropping it cancels the upstream request.
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolSpec>,
    ) -> Result<mpsc::Receiver<ChatDelta>, CoreError>;
}

/// Handles to one open recognition stream.
///
/// Dropping `samples` signals end of utterance; the provider then emits the
/// finalized transcript on `transcripts` and closes it.
pub struct AsrStream {
    pub samples: mpsc::Sender<Vec<f32>>,
    pub transcripts: mpsc::Receiver<String>,
}

/// Streaming speech recognition.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn open_stream(&self, sample_rate: u32) -> Result<AsrStream, CoreError>;
}

/// One encoded audio frame of a synthesized sentence.
#[derive(Debug, Clone)]
pub struct TtsChunk {
    pub opus: Vec<u8>,
}

/// Streaming speech synthesis. One call per sentence; the receiver yields
/// that sentence's frames in order and closes when synthesis finishes.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        format: &AudioFormat,
    ) -> Result<mpsc::Receiver<TtsChunk>, CoreError>;
}

/// Resolved device location, used for template variables and as the default
/// city of the weather tools.
#[derive(Debug, Clone, Default)]
pub struct LocationInfo {
    pub ip: String,
    pub province: String,
    pub city: String,
    pub district: String,
}

impl LocationInfo {
    pub fn has_city(&self) -> bool {
        !self.city.is_empty()
    }
}

/// IP-based geolocation. Runs detached from the session open path; failures
/// are non-fatal.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, client_ip: &str) -> Result<LocationInfo, CoreError>;
}

/// Outbound surface toward one connected device.
///
/// The server crate implements this over the WebSocket sink; the pipeline
/// and dialogue crates only see this trait.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn send_tts_start(&self) -> Result<(), CoreError>;
    async fn send_tts_stop(&self) -> Result<(), CoreError>;
    async fn send_sentence_start(&self, text: &str) -> Result<(), CoreError>;
    async fn send_sentence_end(&self, text: &str) -> Result<(), CoreError>;
    async fn send_stt_text(&self, text: &str) -> Result<(), CoreError>;
    async fn send_audio_frame(&self, frame: &[u8]) -> Result<(), CoreError>;
}
