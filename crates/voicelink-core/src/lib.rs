//! Core types and traits for the voicelink dialogue server
//!
//! This crate provides the foundation shared by every other crate:
//! - Audio format descriptors and PCM conversion helpers
//! - The chat message model (roles, tool calls, streaming deltas)
//! - Provider traits for pluggable backends (LLM, ASR, TTS, location)
//! - The device transport trait implemented by the server crate
//! - An in-process event bus with bounded per-subscriber work pools

pub mod audio;
pub mod error;
pub mod eventbus;
pub mod message;
pub mod traits;

pub use audio::{AudioFormat, Codec};
pub use error::CoreError;
pub use eventbus::{AudioSaveEvent, AudioSource, Event, EventBus, OverflowPolicy, Topic};
pub use message::{
    ChatDelta, ContentPart, Message, MessageAggregator, Role, ToolCall, ToolSpec,
};
pub use traits::{
    AsrStream, DeviceTransport, LanguageModel, LocationInfo, LocationResolver, SpeechToText,
    TextToSpeech, TtsChunk,
};
