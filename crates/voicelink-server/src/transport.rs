//! Outbound transport link
//!
//! The WebSocket sink is owned by a single writer task; everything else
//! (pacer, dialogue graph, session control) talks to it through [`WsLink`],
//! which implements the `DeviceTransport` trait the pipeline crates depend
//! on. Sends block on the channel by design: the pacer is the rate limiter,
//! not this queue.

use async_trait::async_trait;
use tokio::sync::mpsc;

use voicelink_core::{CoreError, DeviceTransport};

use crate::protocol::{ServerMessage, TtsState};

/// One frame toward the device.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

/// Channel capacity toward the writer task.
const OUTBOUND_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct WsLink {
    tx: mpsc::Sender<Outbound>,
}

impl WsLink {
    /// Returns the link and the receiver the writer task drains.
    pub fn channel() -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (Self { tx }, rx)
    }

    pub async fn send_message(&self, msg: &ServerMessage) -> Result<(), CoreError> {
        let json = serde_json::to_string(msg)
            .map_err(|e| CoreError::Transport(format!("encode: {e}")))?;
        self.tx
            .send(Outbound::Text(json))
            .await
            .map_err(|_| CoreError::Transport("connection closed".into()))
    }

    async fn send_tts(&self, state: TtsState, text: Option<&str>) -> Result<(), CoreError> {
        self.send_message(&ServerMessage::Tts {
            state,
            text: text.map(str::to_string),
        })
        .await
    }
}

#[async_trait]
impl DeviceTransport for WsLink {
    async fn send_tts_start(&self) -> Result<(), CoreError> {
        self.send_tts(TtsState::Start, None).await
    }

    async fn send_tts_stop(&self) -> Result<(), CoreError> {
        self.send_tts(TtsState::Stop, None).await
    }

    async fn send_sentence_start(&self, text: &str) -> Result<(), CoreError> {
        self.send_tts(TtsState::SentenceStart, Some(text)).await
    }

    async fn send_sentence_end(&self, text: &str) -> Result<(), CoreError> {
        self.send_tts(TtsState::SentenceEnd, Some(text)).await
    }

    async fn send_stt_text(&self, text: &str) -> Result<(), CoreError> {
        self.send_message(&ServerMessage::Stt { text: text.into() })
            .await
    }

    async fn send_audio_frame(&self, frame: &[u8]) -> Result<(), CoreError> {
        self.tx
            .send(Outbound::Binary(frame.to_vec()))
            .await
            .map_err(|_| CoreError::Transport("connection closed".into()))
    }
}
