//! Device wire protocol
//!
//! Text frames carry JSON control messages; binary frames carry opus audio
//! at the negotiated format. A malformed text frame is logged and dropped,
//! never fatal to the session.

use serde::{Deserialize, Serialize};
use voicelink_core::audio::Codec;
use voicelink_core::AudioFormat;
use voicelink_config::ListenMode;

/// Audio parameters as they appear on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioParams {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_frame_duration")]
    pub frame_duration_ms: u32,
    #[serde(default)]
    pub format: Codec,
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

fn default_frame_duration() -> u32 {
    20
}

impl Default for AudioParams {
    fn default() -> Self {
        Self::from(AudioFormat::default())
    }
}

impl From<AudioFormat> for AudioParams {
    fn from(f: AudioFormat) -> Self {
        Self {
            sample_rate: f.sample_rate,
            channels: f.channels,
            frame_duration_ms: f.frame_duration_ms,
            format: f.codec,
        }
    }
}

impl From<AudioParams> for AudioFormat {
    fn from(p: AudioParams) -> Self {
        Self {
            sample_rate: p.sample_rate,
            channels: p.channels,
            frame_duration_ms: p.frame_duration_ms,
            codec: p.format,
        }
    }
}

/// Listen control states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenState {
    Start,
    Stop,
    Detect,
}

/// Client → server control messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        #[serde(default)]
        device_id: Option<String>,
        #[serde(default)]
        audio_params: Option<AudioParams>,
    },
    Listen {
        state: ListenState,
        #[serde(default)]
        mode: Option<ListenMode>,
        #[serde(default)]
        text: Option<String>,
    },
    Abort,
    Iot {
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// TTS event states sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    Start,
    SentenceStart,
    SentenceEnd,
    Stop,
}

/// Server → client control messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        session_id: String,
        transport: String,
        audio_params: AudioParams,
    },
    Tts {
        state: TtsState,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Stt {
        text: String,
    },
    Iot {
        #[serde(default)]
        payload: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_round_trip() {
        let raw = r#"{"type":"hello","device_id":"aa:bb:cc","audio_params":{"sample_rate":16000,"channels":1,"frame_duration_ms":20,"format":"opus"}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Hello {
                device_id,
                audio_params,
            } => {
                assert_eq!(device_id.as_deref(), Some("aa:bb:cc"));
                let params = audio_params.unwrap();
                assert_eq!(params.sample_rate, 16000);
                assert_eq!(params.format, Codec::Opus);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_listen_detect_carries_text() {
        let raw = r#"{"type":"listen","state":"detect","text":"小智！"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Listen { state, text, .. } => {
                assert_eq!(state, ListenState::Detect);
                assert_eq!(text.as_deref(), Some("小智！"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_tts_event_wire_format() {
        let msg = ServerMessage::Tts {
            state: TtsState::SentenceStart,
            text: Some("你好。".into()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"tts""#));
        assert!(json.contains(r#""state":"sentence_start""#));

        let stop = ServerMessage::Tts {
            state: TtsState::Stop,
            text: None,
        };
        let json = serde_json::to_string(&stop).unwrap();
        assert!(!json.contains("text"));
    }

    #[test]
    fn test_audio_params_defaults() {
        let params: AudioParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.sample_rate, 16000);
        assert_eq!(params.frame_duration_ms, 20);
        assert_eq!(params.channels, 1);
    }
}
