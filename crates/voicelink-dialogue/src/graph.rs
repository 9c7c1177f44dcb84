//! Graph execution
//!
//! One `run` per finalized transcript. At most one run per session executes
//! at a time; the session dispatches them serially and hands each run its
//! own cancellation token for barge-in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use voicelink_audio::{SentenceOutcome, TtsPacer};
use voicelink_core::eventbus::{Event, EventBus};
use voicelink_core::{
    AudioFormat, DeviceTransport, LanguageModel, LocationInfo, Message, MessageAggregator,
    TextToSpeech, ToolCall,
};
use voicelink_memory::{recent_messages, ConversationStore, SessionKey};
use voicelink_tools::{ToolOutcome, ToolRegistry};

use crate::splitter::{SentenceSplitter, SplitterItem};
use crate::template::{ChatTemplate, TemplateVars};
use crate::{DialogueError, RECOVERABLE_ERROR_SENTENCE};

/// Upper bound on synthesizing and delivering one sentence.
const SENTENCE_TTS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Collaborators of one graph, shared across runs of a session.
#[derive(Clone)]
pub struct GraphDeps {
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
    pub transport: Arc<dyn DeviceTransport>,
    pub pacer: Arc<TtsPacer>,
    pub bus: Arc<EventBus>,
    pub store: Arc<dyn ConversationStore>,
    pub tools: Arc<ToolRegistry>,
}

#[derive(Clone)]
pub struct GraphConfig {
    pub key: SessionKey,
    pub output_format: AudioFormat,
    pub system_prompt: String,
    pub history_limit: usize,
    pub min_sentence_chars: usize,
    pub tool_loop_limit: usize,
    pub location: Arc<RwLock<LocationInfo>>,
}

pub struct DialogueGraph {
    deps: GraphDeps,
    config: GraphConfig,
}

impl DialogueGraph {
    pub fn new(deps: GraphDeps, config: GraphConfig) -> Self {
        Self { deps, config }
    }

    /// Execute the graph for one utterance.
    ///
    /// Cancellation is quiet: a cancelled run returns `Ok` without touching
    /// history further, and leaves TTS-stop to the abort path.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        user_text: &str,
        user_message_id: Uuid,
    ) -> Result<(), DialogueError> {
        let tts_started = AtomicBool::new(false);

        let user_msg = Message::user(user_text).with_message_id(user_message_id);
        self.publish_message(user_msg.clone());

        let history = match recent_messages(
            self.deps.store.as_ref(),
            &self.config.key.session_id,
            self.config.history_limit,
        )
        .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, "History load failed, running without it");
                Vec::new()
            }
        };

        let template = ChatTemplate::new(self.config.system_prompt.as_str());
        let vars = TemplateVars::new(self.config.location.read().clone());
        let mut messages = template.render(history, user_msg, &vars);

        let result = self.run_loop(&cancel, &mut messages, &tts_started).await;

        let last_message_id = match result {
            Ok(id) => id,
            Err(DialogueError::Cancelled) => {
                tracing::debug!("Dialogue run cancelled");
                return Ok(());
            }
            Err(e) => {
                tracing::error!(error = %e, "Dialogue run failed, speaking fallback");
                let _ = self
                    .speak(&cancel, RECOVERABLE_ERROR_SENTENCE, &tts_started)
                    .await;
                None
            }
        };

        self.deps.pacer.finish_burst().await;
        if let Some(id) = last_message_id {
            self.deps.pacer.flush_collected(id);
        }
        if tts_started.load(Ordering::SeqCst) && !cancel.is_cancelled() {
            self.deps
                .transport
                .send_tts_stop()
                .await
                .map_err(DialogueError::Tts)?;
        }
        Ok(())
    }

    /// The LLM ↔ tool loop. Returns the id of the last message whose audio
    /// went to the client, for the `save_audio` flush.
    async fn run_loop(
        &self,
        cancel: &CancellationToken,
        messages: &mut Vec<Message>,
        tts_started: &AtomicBool,
    ) -> Result<Option<Uuid>, DialogueError> {
        let key = &self.config.key;
        let specs = self.deps.tools.specs_for(&key.device_id, &key.agent_id);
        let mut last_message_id = None;

        for iteration in 0..self.config.tool_loop_limit {
            if cancel.is_cancelled() {
                return Err(DialogueError::Cancelled);
            }
            tracing::debug!(iteration, "LLM invocation");

            let mut deltas = self
                .deps
                .llm
                .chat_stream(messages.clone(), specs.clone())
                .await
                .map_err(DialogueError::Llm)?;

            let mut splitter = SentenceSplitter::new(self.config.min_sentence_chars);
            let mut aggregator = MessageAggregator::new();
            let mut streamed_calls: Vec<ToolCall> = Vec::new();

            loop {
                let delta = tokio::select! {
                    _ = cancel.cancelled() => return Err(DialogueError::Cancelled),
                    delta = deltas.recv() => delta,
                };
                let Some(delta) = delta else { break };

                aggregator.push(&delta);
                for item in splitter.push(&delta) {
                    match item {
                        SplitterItem::Sentence(sentence) => {
                            self.speak(cancel, &sentence, tts_started).await?;
                        }
                        SplitterItem::ToolCalls(calls) => streamed_calls.extend(calls),
                    }
                }
            }
            if let Some(rest) = splitter.flush() {
                self.speak(cancel, &rest, tts_started).await?;
            }

            // Stream closed: append the one aggregated assistant message.
            let Some(assistant) = aggregator.finish() else {
                tracing::debug!("Empty LLM stream, ending run");
                return Ok(last_message_id);
            };
            last_message_id = Some(assistant.message_id);
            messages.push(assistant.clone());
            self.publish_message(assistant);

            if streamed_calls.is_empty() {
                return Ok(last_message_id);
            }

            for call in &streamed_calls {
                if cancel.is_cancelled() {
                    return Err(DialogueError::Cancelled);
                }
                let outcome = match self
                    .deps
                    .tools
                    .invoke(&key.device_id, &key.agent_id, &call.name, &call.arguments)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        // The model decides what to make of a failed call.
                        tracing::warn!(tool = %call.name, error = %e, "Tool invocation failed");
                        ToolOutcome::feedback(
                            serde_json::json!({"success": false, "error": e.to_string()})
                                .to_string(),
                        )
                    }
                };

                let tool_msg = Message::tool(outcome.payload.clone(), &call.id);
                messages.push(tool_msg.clone());
                let tool_msg_id = tool_msg.message_id;
                self.publish_message(tool_msg);

                if outcome.is_terminal() {
                    tracing::debug!(tool = %call.name, "Terminal tool result, ending run");
                    if !outcome.payload.is_empty() {
                        self.speak(cancel, &outcome.payload, tts_started).await?;
                    }
                    return Ok(Some(tool_msg_id));
                }
            }
            // Feedback results present: re-enter the LLM with the grown history.
        }

        Err(DialogueError::ToolLoopLimit(self.config.tool_loop_limit))
    }

    /// Synthesize one sentence and pace it out, emitting the one-time
    /// TTS-start marker first.
    async fn speak(
        &self,
        cancel: &CancellationToken,
        text: &str,
        tts_started: &AtomicBool,
    ) -> Result<(), DialogueError> {
        if cancel.is_cancelled() {
            return Err(DialogueError::Cancelled);
        }
        if !tts_started.swap(true, Ordering::SeqCst) {
            self.deps
                .transport
                .send_tts_start()
                .await
                .map_err(DialogueError::Tts)?;
        }

        let outcome = tokio::time::timeout(SENTENCE_TTS_TIMEOUT, async {
            let chunks = self
                .deps
                .tts
                .synthesize(text, &self.config.output_format)
                .await
                .map_err(DialogueError::Tts)?;
            self.deps
                .pacer
                .speak_sentence(text, chunks)
                .await
                .map_err(DialogueError::from)
        })
        .await
        .map_err(|_| {
            DialogueError::Tts(voicelink_core::CoreError::Provider(
                "sentence synthesis timed out".into(),
            ))
        })??;

        match outcome {
            SentenceOutcome::Completed => Ok(()),
            SentenceOutcome::Aborted => Err(DialogueError::Cancelled),
        }
    }

    fn publish_message(&self, message: Message) {
        let key = &self.config.key;
        self.deps.bus.publish(Event::AddMessage {
            device_id: key.device_id.clone(),
            agent_id: key.agent_id.clone(),
            session_id: key.session_id.clone(),
            message,
        });
    }
}
