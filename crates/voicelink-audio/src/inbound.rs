//! Inbound audio pipe
//!
//! Owns the path from transport reader to recognizer: a bounded frame queue
//! (drop-on-full so the reader never blocks), opus decode, mono downmix,
//! windowed majority-vote VAD, and the utterance state machine.
//!
//! Voice is declared for a window iff strictly more than half of its frames
//! are active; a tie counts as silence. An utterance ends when the last
//! window was negative and `silence_threshold` has elapsed since the last
//! voiced frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use voicelink_config::ListenMode;
use voicelink_core::audio::{downmix_to_mono, pcm16_to_f32, AudioFormat};

use crate::asr::AsrFeed;
use crate::codec::decoder_for;
use crate::collector::AudioCollector;
use crate::vad::{PooledVad, VadPool};
use crate::AudioError;

/// Capacity of the frame queue between transport reader and decode task.
const FRAME_QUEUE_CAPACITY: usize = 100;
/// VAD vote window in milliseconds.
const VAD_WINDOW_MS: u32 = 60;
/// Idle-side ASR pre-buffer cap, in seconds of audio.
const PREROLL_SECONDS: usize = 1;

/// Utterance lifecycle notifications for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeEvent {
    UtteranceStart,
    /// Carries the message id the user message and its saved audio share.
    UtteranceEnd { message_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub input_format: AudioFormat,
    pub silence_threshold: Duration,
    pub listen_mode: ListenMode,
}

enum PipeCtrl {
    SetListenMode(ListenMode),
    /// Manual-mode `listen stop`: end the utterance now.
    FinishUtterance,
}

/// Handle to the decode task. Cheap to clone into the transport reader.
#[derive(Clone)]
pub struct InboundAudioPipe {
    frame_tx: mpsc::Sender<Vec<u8>>,
    ctrl_tx: mpsc::UnboundedSender<PipeCtrl>,
    dropped: Arc<AtomicU64>,
}

impl InboundAudioPipe {
    /// Spawn the pipe. Returns the handle plus the ASR feed and the event
    /// stream consumed by the session.
    pub fn spawn(
        config: PipeConfig,
        vad_pool: Arc<VadPool>,
        collector: Arc<AudioCollector>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<AsrFeed>, mpsc::Receiver<PipeEvent>) {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let (asr_tx, asr_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(16);

        let pipe = Self {
            frame_tx,
            ctrl_tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        let task = PipeTask {
            config,
            vad_pool,
            collector,
            cancel,
            frame_rx,
            ctrl_rx,
            asr_tx,
            event_tx,
        };
        tokio::spawn(task.run());

        (pipe, asr_rx, event_rx)
    }

    /// Enqueue one wire frame. Never blocks; on a full queue the frame is
    /// dropped and counted.
    pub fn push_opus(&self, frame: Vec<u8>) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.frame_tx.try_send(frame) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % 50 == 0 {
                tracing::warn!(dropped, "Inbound frame queue full, dropping audio");
            }
        }
    }

    pub fn set_listen_mode(&self, mode: ListenMode) {
        let _ = self.ctrl_tx.send(PipeCtrl::SetListenMode(mode));
    }

    /// Manual-mode stop: close the current utterance immediately.
    pub fn finish_utterance(&self) {
        let _ = self.ctrl_tx.send(PipeCtrl::FinishUtterance);
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct PipeTask {
    config: PipeConfig,
    vad_pool: Arc<VadPool>,
    collector: Arc<AudioCollector>,
    cancel: CancellationToken,
    frame_rx: mpsc::Receiver<Vec<u8>>,
    ctrl_rx: mpsc::UnboundedReceiver<PipeCtrl>,
    asr_tx: mpsc::Sender<AsrFeed>,
    event_tx: mpsc::Sender<PipeEvent>,
}

impl PipeTask {
    async fn run(mut self) {
        let mut decoder = match decoder_for(&self.config.input_format) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "Cannot build inbound decoder, pipe inactive");
                return;
            }
        };

        let format = self.config.input_format;
        let samples_per_frame = format.samples_per_frame();
        let window_frames = format.frames_for_window(VAD_WINDOW_MS);
        let preroll_cap = format.sample_rate as usize * PREROLL_SECONDS;

        let mut listen_mode = self.config.listen_mode;
        let mut vad_buf: Vec<i16> = Vec::new();
        let mut preroll: Vec<f32> = Vec::new();
        let mut detector: Option<PooledVad> = None;
        let mut vad_bypassed = false;

        let mut speaking = false;
        let mut last_voice = Instant::now();
        let mut last_window_voiced = false;

        loop {
            let silence_deadline = last_voice + self.config.silence_threshold;
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Inbound pipe cancelled");
                    return;
                }

                Some(ctrl) = self.ctrl_rx.recv() => match ctrl {
                    PipeCtrl::SetListenMode(mode) => {
                        tracing::debug!(?mode, "Listen mode changed");
                        listen_mode = mode;
                    }
                    PipeCtrl::FinishUtterance => {
                        if speaking {
                            self.end_utterance(&mut speaking, &mut detector, &mut vad_bypassed).await;
                        }
                    }
                },

                frame = self.frame_rx.recv() => {
                    let Some(frame) = frame else {
                        tracing::debug!("Inbound frame channel closed");
                        return;
                    };
                    self.collector.add_user(&frame);

                    let pcm = match decoder.decode(&frame) {
                        Ok(pcm) => pcm,
                        Err(e) => {
                            tracing::warn!(error = %e, "Frame decode failed, skipping");
                            continue;
                        }
                    };
                    let mono = downmix_to_mono(&pcm, format.channels);
                    let samples_f32 = pcm16_to_f32(&mono);

                    if speaking {
                        if self.asr_tx.send(AsrFeed::Samples(samples_f32)).await.is_err() {
                            return;
                        }
                    } else {
                        preroll.extend_from_slice(&samples_f32);
                        if preroll.len() > preroll_cap {
                            let excess = preroll.len() - preroll_cap;
                            preroll.drain(..excess);
                        }
                    }

                    vad_buf.extend_from_slice(&mono);

                    // Run the vote once per full window.
                    while vad_buf.len() >= window_frames * samples_per_frame {
                        let voiced = self
                            .window_has_voice(
                                &vad_buf[..window_frames * samples_per_frame],
                                samples_per_frame,
                                window_frames,
                                listen_mode,
                                &mut detector,
                                &mut vad_bypassed,
                            )
                            .await;
                        vad_buf.drain(..window_frames * samples_per_frame);
                        last_window_voiced = voiced;

                        if voiced {
                            last_voice = Instant::now();
                            if !speaking {
                                speaking = true;
                                tracing::debug!("Utterance start");
                                let _ = self.event_tx.send(PipeEvent::UtteranceStart).await;
                                let _ = self.asr_tx.send(AsrFeed::Start).await;
                                if !preroll.is_empty() {
                                    let buffered = std::mem::take(&mut preroll);
                                    let _ = self.asr_tx.send(AsrFeed::Samples(buffered)).await;
                                }
                            }
                        } else if speaking
                            && Instant::now().duration_since(last_voice)
                                >= self.config.silence_threshold
                        {
                            self.end_utterance(&mut speaking, &mut detector, &mut vad_bypassed).await;
                        }
                    }
                }

                _ = tokio::time::sleep_until(silence_deadline), if speaking && !last_window_voiced => {
                    self.end_utterance(&mut speaking, &mut detector, &mut vad_bypassed).await;
                }
            }
        }
    }

    /// Majority vote over one window. Manual/realtime modes and a degraded
    /// (pool-exhausted) utterance treat every frame as active.
    async fn window_has_voice(
        &self,
        window: &[i16],
        samples_per_frame: usize,
        window_frames: usize,
        listen_mode: ListenMode,
        detector: &mut Option<PooledVad>,
        vad_bypassed: &mut bool,
    ) -> bool {
        if listen_mode != ListenMode::Auto || *vad_bypassed {
            return true;
        }

        if detector.is_none() {
            match self.vad_pool.acquire().await {
                Ok(vad) => *detector = Some(vad),
                Err(AudioError::ResourceExhausted) => {
                    tracing::warn!("VAD pool exhausted, treating utterance as voiced");
                    *vad_bypassed = true;
                    return true;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "VAD acquire failed, treating utterance as voiced");
                    *vad_bypassed = true;
                    return true;
                }
            }
        }
        let vad = detector.as_mut().expect("acquired above");

        let mut active = 0usize;
        for frame in window.chunks_exact(samples_per_frame) {
            match vad.is_voice(frame) {
                Ok(true) => active += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "VAD frame error, counting as silence");
                }
            }
        }
        // Strict majority: a tie is not voice.
        active * 2 > window_frames
    }

    async fn end_utterance(
        &self,
        speaking: &mut bool,
        detector: &mut Option<PooledVad>,
        vad_bypassed: &mut bool,
    ) {
        *speaking = false;
        *vad_bypassed = false;
        if let Some(mut vad) = detector.take() {
            vad.reset();
        }

        let message_id = Uuid::new_v4();
        tracing::debug!(%message_id, "Utterance end");
        let _ = self.asr_tx.send(AsrFeed::End).await;
        let _ = self
            .event_tx
            .send(PipeEvent::UtteranceEnd { message_id })
            .await;
        self.collector
            .flush_user(message_id, &self.config.input_format);
    }
}
