//! Session lifecycle
//!
//! One session per device connection. Opening a session resolves the device
//! config, spawns the inbound pipe, ASR adapter, and pacer, registers the
//! session-bound tools, and starts the dispatcher that turns finalized
//! transcripts into dialogue-graph runs, strictly one at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use voicelink_audio::{
    spawn_asr_adapter, AudioCollector, InboundAudioPipe, PipeConfig, PipeEvent, TtsPacer,
};
use voicelink_config::ListenMode;
use voicelink_core::eventbus::{Event, EventBus};
use voicelink_core::{AudioFormat, DeviceTransport, LocationInfo};
use voicelink_dialogue::{DialogueGraph, GraphConfig, GraphDeps};
use voicelink_memory::{ConversationStore, SessionKey};
use voicelink_tools::{
    ClearHistoryTool, CloseChatTool, SessionOps, ToolError, ToolRegistry, WeatherForecastTool,
    WeatherTool,
};

use crate::protocol::ListenState;
use crate::state::{AppState, UserConfig};
use crate::transport::WsLink;
use crate::ServerError;

pub struct Session {
    pub session_id: String,
    pub device_id: String,
    pub agent_id: String,
    cancel: CancellationToken,
    run_cancel: Mutex<CancellationToken>,
    run_active: AtomicBool,
    close_requested: AtomicBool,
    closed: AtomicBool,
    pipe: InboundAudioPipe,
    pacer: Arc<TtsPacer>,
    link: Arc<WsLink>,
    graph: DialogueGraph,
    location: Arc<RwLock<LocationInfo>>,
    user_config: UserConfig,
    bus: Arc<EventBus>,
    store: Arc<dyn voicelink_memory::ConversationStore>,
    tools: Arc<ToolRegistry>,
    /// Wake-word/detect texts from the reader, drained by the dispatcher.
    request_tx: mpsc::Sender<String>,
    dispatcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Session {
    /// Open a session for a fresh connection. Everything the session owns is
    /// cancelled through its token when the transport goes away.
    pub async fn open(
        state: &AppState,
        device_id: String,
        input_format: AudioFormat,
        link: Arc<WsLink>,
        client_ip: String,
    ) -> Result<Arc<Self>, ServerError> {
        let user_config = state.config_provider.user_config(&device_id).await?;
        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        let collector = Arc::new(AudioCollector::new(
            state.bus.clone(),
            device_id.clone(),
            session_id.clone(),
        ));
        let pacer = Arc::new(TtsPacer::new(
            link.clone(),
            collector.clone(),
            user_config.output_format,
            state.settings.pacer.target_buffer_ms,
        ));

        let (pipe, asr_feed_rx, event_rx) = InboundAudioPipe::spawn(
            PipeConfig {
                input_format,
                silence_threshold: Duration::from_millis(
                    state.settings.chat.chat_max_silence_duration,
                ),
                listen_mode: user_config.listen_mode,
            },
            state.vad_pool.clone(),
            collector,
            cancel.clone(),
        );

        let transcript_rx = spawn_asr_adapter(
            state.providers.stt.clone(),
            input_format.sample_rate,
            asr_feed_rx,
            cancel.clone(),
        );

        let location = Arc::new(RwLock::new(LocationInfo::default()));
        Self::spawn_location_lookup(state, location.clone(), client_ip, cancel.clone());

        let key = SessionKey::new(
            device_id.clone(),
            user_config.agent_id.clone(),
            session_id.clone(),
        );
        let graph = DialogueGraph::new(
            GraphDeps {
                llm: state.providers.llm.clone(),
                tts: state.providers.tts.clone(),
                transport: link.clone(),
                pacer: pacer.clone(),
                bus: state.bus.clone(),
                store: state.store.clone(),
                tools: state.tools.clone(),
            },
            GraphConfig {
                key,
                output_format: user_config.output_format,
                system_prompt: user_config.system_prompt.clone(),
                history_limit: state.settings.memory.history_limit,
                min_sentence_chars: state.settings.chat.min_sentence_chars,
                tool_loop_limit: state.settings.chat.tool_loop_limit,
                location: location.clone(),
            },
        );

        let (request_tx, request_rx) = mpsc::channel(8);
        let session = Arc::new(Self {
            session_id: session_id.clone(),
            agent_id: user_config.agent_id.clone(),
            device_id,
            cancel,
            run_cancel: Mutex::new(CancellationToken::new()),
            run_active: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            pipe,
            pacer,
            link,
            graph,
            location: location.clone(),
            user_config,
            bus: state.bus.clone(),
            store: state.store.clone(),
            tools: state.tools.clone(),
            request_tx,
            dispatcher: Mutex::new(None),
        });

        session.register_session_tools(state);
        let handle = tokio::spawn(Self::dispatch_loop(
            session.clone(),
            event_rx,
            transcript_rx,
            request_rx,
        ));
        *session.dispatcher.lock() = Some(handle);

        tracing::info!(
            session_id = %session_id,
            device_id = %session.device_id,
            input_rate = input_format.sample_rate,
            output_rate = session.user_config.output_format.sample_rate,
            "Session opened"
        );
        Ok(session)
    }

    fn register_session_tools(self: &Arc<Self>, state: &AppState) {
        let ops: Arc<dyn SessionOps> = Arc::new(SessionHandle(Arc::downgrade(self)));
        let scope = (self.device_id.as_str(), self.agent_id.as_str());

        state
            .tools
            .register_scoped(scope.0, scope.1, Arc::new(CloseChatTool::new(ops.clone())));
        state
            .tools
            .register_scoped(scope.0, scope.1, Arc::new(ClearHistoryTool::new(ops)));
        state.tools.register_scoped(
            scope.0,
            scope.1,
            Arc::new(WeatherTool::new(
                state.providers.weather.clone(),
                self.location.clone(),
            )),
        );
        state.tools.register_scoped(
            scope.0,
            scope.1,
            Arc::new(WeatherForecastTool::new(
                state.providers.weather.clone(),
                self.location.clone(),
            )),
        );
    }

    /// Location lookup runs off the open path; a failure only costs the
    /// template variables and the weather default.
    fn spawn_location_lookup(
        state: &AppState,
        location: Arc<RwLock<LocationInfo>>,
        client_ip: String,
        cancel: CancellationToken,
    ) {
        if client_ip.is_empty() {
            return;
        }
        let resolver = state.providers.location.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                resolved = resolver.resolve(&client_ip) => match resolved {
                    Ok(info) => {
                        tracing::debug!(city = %info.city, "Device location resolved");
                        *location.write() = info;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Location lookup failed");
                        location.write().ip = client_ip;
                    }
                }
            }
        });
    }

    /// Transport reader entry: never blocks.
    pub fn push_audio(&self, frame: Vec<u8>) {
        self.pipe.push_opus(frame);
    }

    pub fn output_format(&self) -> AudioFormat {
        self.user_config.output_format
    }

    pub fn handle_listen(&self, state: ListenState, mode: Option<ListenMode>) {
        if let Some(mode) = mode {
            self.pipe.set_listen_mode(mode);
        }
        match state {
            ListenState::Start => {}
            ListenState::Stop => self.pipe.finish_utterance(),
            // Detect is routed through handle_detect with its text.
            ListenState::Detect => {}
        }
    }

    /// Wake-word detection reported by the device.
    pub async fn handle_detect(&self, text: &str) {
        if self.run_active.load(Ordering::SeqCst) {
            // Barge-in: the device heard its wake word over our TTS.
            self.abort().await;
        }

        let normalized = normalize_wake_word(text);
        if self.is_wake_word(&normalized) && !self.user_config.enable_greeting {
            tracing::debug!(wake_word = %normalized, "Greeting suppressed");
            let _ = self.link.send_stt_text(&normalized).await;
            return;
        }
        if self.request_tx.send(text.to_string()).await.is_err() {
            tracing::debug!("Session dispatcher gone, detect dropped");
        }
    }

    fn is_wake_word(&self, normalized: &str) -> bool {
        !normalized.is_empty()
            && self
                .user_config
                .wakeup_words
                .iter()
                .any(|w| normalize_wake_word(w) == normalized)
    }

    /// Barge-in / explicit abort: stop the current run and its audio now.
    /// TTS-stop goes out only after the pacer has drained, so no frame of
    /// the aborted run can trail the stop marker.
    pub async fn abort(&self) {
        tracing::info!(session_id = %self.session_id, "Abort requested");
        self.run_cancel.lock().cancel();
        self.pacer.abort();
        self.pacer.wait_quiesced().await;
        let _ = self.link.send_tts_stop().await;
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(session_id = %self.session_id, "Session closing");
        self.tools
            .unregister_scoped(&self.device_id, &self.agent_id);
        self.bus.publish(Event::SessionEnd {
            device_id: self.device_id.clone(),
            session_id: self.session_id.clone(),
        });
        self.pacer.abort();
        self.cancel.cancel();
    }

    /// Wait for the dispatcher to observe cancellation. Must not be called
    /// from the dispatcher itself.
    async fn join_dispatcher(&self) {
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                tracing::warn!(session_id = %self.session_id, "Dispatcher slow to stop");
            }
        }
    }

    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Serial consumer of utterance events and transcripts: at most one
    /// graph run per session at any time.
    async fn dispatch_loop(
        session: Arc<Session>,
        mut events: mpsc::Receiver<PipeEvent>,
        mut transcripts: mpsc::Receiver<String>,
        mut requests: mpsc::Receiver<String>,
    ) {
        let mut pending_user_id: Option<Uuid> = None;
        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => return,

                Some(event) = events.recv() => match event {
                    PipeEvent::UtteranceStart => {
                        tracing::debug!(session_id = %session.session_id, "Listening");
                    }
                    PipeEvent::UtteranceEnd { message_id } => {
                        pending_user_id = Some(message_id);
                        // Anchor for the first-reply-frame latency log.
                        session.pacer.mark_utterance_end();
                    }
                },

                Some(text) = transcripts.recv() => {
                    let user_id = pending_user_id.take().unwrap_or_else(Uuid::new_v4);
                    session.process_text(&text, user_id).await;
                }

                Some(text) = requests.recv() => {
                    session.process_text(&text, Uuid::new_v4()).await;
                }

                else => return,
            }
        }
    }

    async fn process_text(self: &Arc<Self>, text: &str, user_message_id: Uuid) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let normalized = normalize_wake_word(text);
        if self.is_wake_word(&normalized) && !self.user_config.enable_greeting {
            let _ = self.link.send_stt_text(&normalized).await;
            return;
        }
        let _ = self.link.send_stt_text(text).await;

        // Arm a fresh run token; a stale barge-in must not cancel this run.
        self.pacer.reset().await;
        let run_token = self.cancel.child_token();
        *self.run_cancel.lock() = run_token.clone();

        self.run_active.store(true, Ordering::SeqCst);
        let started = std::time::Instant::now();
        let result = self.graph.run(run_token, text, user_message_id).await;
        self.run_active.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => tracing::info!(
                session_id = %self.session_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Dialogue run finished"
            ),
            Err(e) => tracing::error!(
                session_id = %self.session_id,
                error = %e,
                "Dialogue run failed"
            ),
        }

        if self.close_requested.load(Ordering::SeqCst) {
            self.close().await;
        }
    }
}

/// Weak handle the session-bound tools act through.
struct SessionHandle(Weak<Session>);

#[async_trait]
impl SessionOps for SessionHandle {
    async fn close_chat(&self) -> Result<(), ToolError> {
        if let Some(session) = self.0.upgrade() {
            // Deferred: the run still has to deliver the goodbye audio.
            session.close_requested.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn clear_history(&self) -> Result<(), ToolError> {
        let Some(session) = self.0.upgrade() else {
            return Ok(());
        };
        session
            .store
            .reset_session(&session.session_id)
            .await
            .map_err(|e| ToolError::Invoke(e.to_string()))
    }
}

/// Wake words match after stripping punctuation and whitespace.
fn normalize_wake_word(text: &str) -> String {
    text.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Tracks open sessions for the process.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(
        &self,
        state: &AppState,
        device_id: String,
        input_format: AudioFormat,
        link: Arc<WsLink>,
        client_ip: String,
    ) -> Result<Arc<Session>, ServerError> {
        let session = Session::open(state, device_id, input_format, link, client_ip).await?;
        self.sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Close and wait for the session's activities to observe cancellation.
    pub async fn close(&self, session_id: &str) {
        let session = self.sessions.write().remove(session_id);
        if let Some(session) = session {
            session.close().await;
            session.join_dispatcher().await;
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }
}
