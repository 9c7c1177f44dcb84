//! Built-in provider implementations
//!
//! The chat model speaks the OpenAI-compatible streaming API (Ollama,
//! vLLM, and most hosted endpoints). ASR and TTS ship as development stubs:
//! real deployments plug vendor adapters in through the provider traits,
//! and the stubs keep the full pipeline exercisable without one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use voicelink_config::LlmSettings;
use voicelink_core::audio::pcm16_to_bytes;
use voicelink_core::{
    AsrStream, AudioFormat, ChatDelta, CoreError, LanguageModel, LocationInfo, LocationResolver,
    Message, Role, SpeechToText, TextToSpeech, ToolCall, ToolSpec, TtsChunk,
};

/// OpenAI-compatible streaming chat model.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    config: LlmSettings,
}

impl OpenAiChatModel {
    pub fn new(config: LlmSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolSpec]) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages.iter().map(wire_message).collect();
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });
        if !tools.is_empty() {
            let tools: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
        }
        body
    }
}

fn wire_message(msg: &Message) -> serde_json::Value {
    let mut m = serde_json::json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    });
    if !msg.tool_calls.is_empty() {
        let calls: Vec<serde_json::Value> = msg
            .tool_calls
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments }
                })
            })
            .collect();
        m["tool_calls"] = serde_json::Value::Array(calls);
    }
    if msg.role == Role::Tool {
        if let Some(id) = &msg.tool_call_id {
            m["tool_call_id"] = serde_json::Value::String(id.clone());
        }
    }
    m
}

/// Partially streamed tool call, keyed by choice index.
#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolSpec>,
    ) -> Result<mpsc::Receiver<ChatDelta>, CoreError> {
        let url = format!("{}/chat/completions", self.config.endpoint);
        let mut request = self.client.post(&url).json(&self.request_body(&messages, &tools));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::Provider(format!("llm request: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::Provider(format!(
                "llm status {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut line_buf = String::new();
            let mut calls: BTreeMap<u64, PartialCall> = BTreeMap::new();

            'outer: while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else {
                    tracing::warn!("LLM stream read error");
                    break;
                };
                line_buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = line_buf.find('\n') {
                    let line = line_buf[..pos].trim().to_string();
                    line_buf.drain(..=pos);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
                        tracing::debug!("Unparseable SSE line skipped");
                        continue;
                    };
                    let delta = &event["choices"][0]["delta"];

                    if let Some(content) = delta["content"].as_str() {
                        if !content.is_empty()
                            && tx.send(ChatDelta::text(content)).await.is_err()
                        {
                            return;
                        }
                    }
                    if let Some(tool_calls) = delta["tool_calls"].as_array() {
                        for tc in tool_calls {
                            let index = tc["index"].as_u64().unwrap_or(0);
                            let partial = calls.entry(index).or_default();
                            if let Some(id) = tc["id"].as_str() {
                                partial.id = id.to_string();
                            }
                            if let Some(name) = tc["function"]["name"].as_str() {
                                partial.name.push_str(name);
                            }
                            if let Some(args) = tc["function"]["arguments"].as_str() {
                                partial.arguments.push_str(args);
                            }
                        }
                    }
                }
            }

            // Completed tool calls surface once the stream settles.
            for (_, partial) in calls {
                if partial.name.is_empty() {
                    continue;
                }
                let call = ToolCall {
                    id: partial.id,
                    name: partial.name,
                    arguments: partial.arguments,
                };
                if tx.send(ChatDelta::tool_call(call)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

/// Development recognizer: consumes audio, produces no transcript.
pub struct NoopStt;

impl NoopStt {
    pub fn new() -> Self {
        tracing::warn!("No ASR provider configured; speech will not be transcribed");
        Self
    }
}

impl Default for NoopStt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechToText for NoopStt {
    async fn open_stream(&self, _sample_rate: u32) -> Result<AsrStream, CoreError> {
        let (samples_tx, mut samples_rx) = mpsc::channel::<Vec<f32>>(64);
        let (_transcript_tx, transcript_rx) = mpsc::channel(1);
        tokio::spawn(async move { while samples_rx.recv().await.is_some() {} });
        Ok(AsrStream {
            samples: samples_tx,
            transcripts: transcript_rx,
        })
    }
}

/// Development synthesizer: silence frames sized to the text length, so
/// pacing and markers behave like a real voice would.
pub struct SilenceTts;

impl SilenceTts {
    pub fn new() -> Self {
        tracing::warn!("No TTS provider configured; sentences synthesize as silence");
        Self
    }

    fn frames_for(text: &str, format: &AudioFormat) -> usize {
        // Rough speaking rate: 80 ms of audio per character.
        let ms = (text.chars().count() as u32 * 80).max(400);
        ms.div_ceil(format.frame_duration_ms.max(1)) as usize
    }
}

impl Default for SilenceTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextToSpeech for SilenceTts {
    async fn synthesize(
        &self,
        text: &str,
        format: &AudioFormat,
    ) -> Result<mpsc::Receiver<TtsChunk>, CoreError> {
        let frames = Self::frames_for(text, format);
        let frame = pcm16_to_bytes(&vec![0i16; format.samples_per_frame()]);
        let (tx, rx) = mpsc::channel(frames.max(1));
        tokio::spawn(async move {
            for _ in 0..frames {
                if tx.send(TtsChunk { opus: frame.clone() }).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// ip-api.com geolocation, no key required.
pub struct IpApiLocationResolver {
    client: reqwest::Client,
    base_url: String,
}

impl IpApiLocationResolver {
    pub fn new() -> Self {
        Self::with_base_url("http://ip-api.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for IpApiLocationResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationResolver for IpApiLocationResolver {
    async fn resolve(&self, client_ip: &str) -> Result<LocationInfo, CoreError> {
        #[derive(serde::Deserialize)]
        struct IpApiResponse {
            status: String,
            #[serde(default, rename = "regionName")]
            region_name: String,
            #[serde(default)]
            city: String,
        }

        let url = format!("{}/json/{}?lang=zh-CN", self.base_url, client_ip);
        let resp: IpApiResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::Provider(format!("geoip: {e}")))?
            .json()
            .await
            .map_err(|e| CoreError::Provider(format!("geoip decode: {e}")))?;

        if resp.status != "success" {
            return Err(CoreError::Provider("geoip lookup failed".into()));
        }
        Ok(LocationInfo {
            ip: client_ip.to_string(),
            province: resp.region_name,
            city: resp.city,
            district: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_includes_tools() {
        let model = OpenAiChatModel::new(LlmSettings::default());
        let body = model.request_body(
            &[Message::system("s"), Message::user("u")],
            &[ToolSpec {
                name: "get_weather".into(),
                description: "d".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
        );
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["tools"][0]["function"]["name"], "get_weather");
    }

    #[test]
    fn test_wire_message_for_tool_result() {
        let msg = Message::tool("{\"ok\":true}", "call_1");
        let wire = wire_message(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_1");
    }

    #[test]
    fn test_silence_tts_frame_count_scales_with_text() {
        let format = AudioFormat::device_voice_output();
        let short = SilenceTts::frames_for("嗯。", &format);
        let long = SilenceTts::frames_for("这是一个长得多的句子，应该有更多的音频帧。", &format);
        assert!(long > short);
        assert!(short >= 20); // 400 ms floor at 20 ms frames
    }
}
