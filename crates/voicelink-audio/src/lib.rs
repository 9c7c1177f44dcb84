//! Audio pipeline for voicelink sessions
//!
//! Everything between the transport and the dialogue graph:
//! - Codec abstraction for inbound/outbound opus frames
//! - Voice activity detection with a pooled detector resource
//! - The inbound pipe (decode → downmix → windowed VAD → utterance state)
//! - The ASR adapter feeding a streaming recognizer
//! - The TTS pacer holding the client jitter buffer at its target depth
//! - The audio collector publishing `save_audio` events

pub mod asr;
pub mod codec;
pub mod collector;
pub mod inbound;
pub mod pacer;
pub mod vad;

pub use asr::{spawn_asr_adapter, AsrFeed};
pub use codec::{decoder_for, AudioDecoder, PassthroughDecoder};
pub use collector::AudioCollector;
pub use inbound::{InboundAudioPipe, PipeConfig, PipeEvent};
pub use pacer::{SentenceOutcome, TtsPacer};
pub use vad::{new_detector, EnergyVad, VadPool, VoiceDetector};

use thiserror::Error;

/// Audio pipeline errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("VAD error: {0}")]
    Vad(String),

    #[error("VAD pool exhausted")]
    ResourceExhausted,

    #[error("Channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Core(#[from] voicelink_core::CoreError),
}
