//! Outbound TTS pacer
//!
//! Synthesis runs faster than real time; the device only buffers about a
//! hundred milliseconds. The pacer sends the first `cache_frames` frames of
//! a speech burst back-to-back (filling the client buffer), then schedules
//! frame `n` at `start + (n - cache_frames) * frame_duration` so the buffer
//! depth holds at the target. On burst close it waits out the residual
//! playback time so TTS-stop never truncates audio on the device.
//!
//! A burst spans all sentences of one dialogue run; the frame counter and
//! start instant persist across sentences and reset per run.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use voicelink_core::{AudioFormat, DeviceTransport, TtsChunk};

use crate::collector::AudioCollector;
use crate::AudioError;

/// How a sentence left the pacer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceOutcome {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy)]
struct Burst {
    started: Instant,
    frames_sent: u64,
}

struct PacerState {
    burst: Option<Burst>,
    abort: CancellationToken,
}

/// Per-session outbound pacer.
pub struct TtsPacer {
    transport: Arc<dyn DeviceTransport>,
    collector: Arc<AudioCollector>,
    format: AudioFormat,
    cache_frames: u64,
    /// Optional digital-human fan-out; frames are offered non-blocking and
    /// dropped on overflow.
    meta_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    state: tokio::sync::Mutex<PacerState>,
    abort_handle: Mutex<CancellationToken>,
    /// Set at utterance end, consumed when the reply's first frame goes out.
    reply_anchor: Mutex<Option<Instant>>,
}

impl TtsPacer {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        collector: Arc<AudioCollector>,
        format: AudioFormat,
        target_buffer_ms: u32,
    ) -> Self {
        let cache_frames = target_buffer_ms.div_ceil(format.frame_duration_ms.max(1)) as u64;
        let abort = CancellationToken::new();
        Self {
            transport,
            collector,
            format,
            cache_frames,
            meta_tx: Mutex::new(None),
            state: tokio::sync::Mutex::new(PacerState {
                burst: None,
                abort: abort.clone(),
            }),
            abort_handle: Mutex::new(abort),
            reply_anchor: Mutex::new(None),
        }
    }

    /// Record the instant the user stopped speaking. The next burst's first
    /// frame logs the end-to-end reply latency against it.
    pub fn mark_utterance_end(&self) {
        *self.reply_anchor.lock() = Some(Instant::now());
    }

    pub fn set_meta_queue(&self, tx: mpsc::Sender<Vec<u8>>) {
        *self.meta_tx.lock() = Some(tx);
    }

    pub fn cache_frames(&self) -> u64 {
        self.cache_frames
    }

    /// Pace one sentence to the device, bracketed by sentence markers.
    ///
    /// Sentences are serialized on the internal state lock, so frames never
    /// interleave across sentences.
    pub async fn speak_sentence(
        &self,
        text: &str,
        mut chunks: mpsc::Receiver<TtsChunk>,
    ) -> Result<SentenceOutcome, AudioError> {
        let mut state = self.state.lock().await;
        let abort = state.abort.clone();

        if abort.is_cancelled() {
            drain(&mut chunks);
            return Ok(SentenceOutcome::Aborted);
        }

        self.transport.send_sentence_start(text).await?;

        let frame_duration = self.format.frame_duration();
        loop {
            let chunk = tokio::select! {
                _ = abort.cancelled() => {
                    drain(&mut chunks);
                    return Ok(SentenceOutcome::Aborted);
                }
                chunk = chunks.recv() => chunk,
            };
            let Some(chunk) = chunk else { break };

            let burst = state.burst.get_or_insert_with(|| Burst {
                started: Instant::now(),
                frames_sent: 0,
            });
            let n = burst.frames_sent;

            if n >= self.cache_frames {
                let due = burst.started + frame_duration * (n - self.cache_frames) as u32;
                tokio::select! {
                    _ = abort.cancelled() => {
                        drain(&mut chunks);
                        return Ok(SentenceOutcome::Aborted);
                    }
                    _ = tokio::time::sleep_until(due) => {}
                }
            }

            self.transport.send_audio_frame(&chunk.opus).await?;
            self.collector.add_tts(&chunk.opus);
            self.offer_meta(&chunk.opus);

            if let Some(burst) = state.burst.as_mut() {
                if burst.frames_sent == 0 {
                    if let Some(anchor) = self.reply_anchor.lock().take() {
                        tracing::info!(
                            latency_ms = anchor.elapsed().as_millis() as u64,
                            "First reply frame sent after utterance end"
                        );
                    }
                }
                burst.frames_sent += 1;
            }
        }

        self.transport.send_sentence_end(text).await?;
        Ok(SentenceOutcome::Completed)
    }

    /// Close the current burst: wait until the client has had time to play
    /// everything that was sent, then forget the burst.
    pub async fn finish_burst(&self) {
        let mut state = self.state.lock().await;
        if let Some(burst) = state.burst.take() {
            let total = self.format.frame_duration() * burst.frames_sent as u32;
            let elapsed = burst.started.elapsed();
            if total > elapsed {
                let residual = total - elapsed;
                tracing::debug!(
                    frames = burst.frames_sent,
                    residual_ms = residual.as_millis() as u64,
                    "Waiting for client playback to drain"
                );
                tokio::select! {
                    _ = state.abort.cancelled() => {}
                    _ = tokio::time::sleep(residual) => {}
                }
            }
        }
    }

    /// Flush the TTS side of the collector under the given message id.
    pub fn flush_collected(&self, message_id: Uuid) {
        self.collector.flush_tts(message_id, &self.format);
    }

    /// Barge-in: cancel pacing immediately. Queued sentences drain without
    /// sending; the next run gets a fresh abort token.
    pub fn abort(&self) {
        let handle = self.abort_handle.lock();
        handle.cancel();
        tracing::debug!("Pacer aborted");
    }

    /// Resolve once no sentence is in flight. The abort path waits on this
    /// before sending TTS-stop, so the stop marker is enqueued after the
    /// last pre-abort frame.
    pub async fn wait_quiesced(&self) {
        drop(self.state.lock().await);
    }

    /// Arm a fresh abort token for the next run. Called by the session before
    /// each dialogue run so a past barge-in does not bleed into it.
    pub async fn reset(&self) {
        let fresh = CancellationToken::new();
        let mut state = self.state.lock().await;
        state.burst = None;
        state.abort = fresh.clone();
        *self.abort_handle.lock() = fresh;
        self.collector.clear();
    }

    fn offer_meta(&self, frame: &[u8]) {
        let guard = self.meta_tx.lock();
        if let Some(tx) = guard.as_ref() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame.to_vec()) {
                tracing::debug!("Digital-human queue full, frame skipped");
            }
        }
    }
}

fn drain(chunks: &mut mpsc::Receiver<TtsChunk>) {
    while chunks.try_recv().is_ok() {}
    chunks.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use voicelink_core::eventbus::EventBus;
    use voicelink_core::CoreError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        SentenceStart(String),
        SentenceEnd(String),
        Frame,
    }

    /// Records every outbound call with the (tokio) instant it happened.
    #[derive(Default)]
    struct RecordingTransport {
        log: Mutex<Vec<(Instant, Sent)>>,
    }

    impl RecordingTransport {
        fn log(&self) -> Vec<(Instant, Sent)> {
            self.log.lock().clone()
        }
    }

    #[async_trait]
    impl DeviceTransport for RecordingTransport {
        async fn send_tts_start(&self) -> Result<(), CoreError> {
            Ok(())
        }
        async fn send_tts_stop(&self) -> Result<(), CoreError> {
            Ok(())
        }
        async fn send_sentence_start(&self, text: &str) -> Result<(), CoreError> {
            self.log
                .lock()
                .push((Instant::now(), Sent::SentenceStart(text.into())));
            Ok(())
        }
        async fn send_sentence_end(&self, text: &str) -> Result<(), CoreError> {
            self.log
                .lock()
                .push((Instant::now(), Sent::SentenceEnd(text.into())));
            Ok(())
        }
        async fn send_stt_text(&self, _text: &str) -> Result<(), CoreError> {
            Ok(())
        }
        async fn send_audio_frame(&self, _frame: &[u8]) -> Result<(), CoreError> {
            self.log.lock().push((Instant::now(), Sent::Frame));
            Ok(())
        }
    }

    fn make_pacer(target_buffer_ms: u32) -> (Arc<TtsPacer>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let bus = Arc::new(EventBus::new());
        let collector = Arc::new(AudioCollector::new(bus, "dev-1", "sess-1"));
        let pacer = Arc::new(TtsPacer::new(
            transport.clone(),
            collector,
            AudioFormat::device_voice_output(),
            target_buffer_ms,
        ));
        (pacer, transport)
    }

    async fn feed_chunks(n: usize) -> mpsc::Receiver<TtsChunk> {
        let (tx, rx) = mpsc::channel(n.max(1));
        for i in 0..n {
            tx.send(TtsChunk {
                opus: vec![i as u8; 10],
            })
            .await
            .unwrap();
        }
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_preroll_then_absolute_schedule() {
        // 120 ms target over 20 ms frames = 6 cache frames.
        let (pacer, transport) = make_pacer(120);
        assert_eq!(pacer.cache_frames(), 6);

        let start = Instant::now();
        let rx = feed_chunks(10).await;
        let outcome = pacer.speak_sentence("你好。", rx).await.unwrap();
        assert_eq!(outcome, SentenceOutcome::Completed);

        let frames: Vec<Instant> = transport
            .log()
            .iter()
            .filter(|(_, s)| *s == Sent::Frame)
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(frames.len(), 10);

        let frame_duration = Duration::from_millis(20);
        // Pre-roll: the first 6 frames go out without inter-frame sleeps.
        for t in &frames[..6] {
            assert!(t.duration_since(start) < frame_duration);
        }
        // Steady state: frame n is not sent before start + (n-6)*20ms.
        for (n, t) in frames.iter().enumerate().skip(6) {
            let due = start + frame_duration * (n as u32 - 6);
            assert!(*t >= due, "frame {n} sent early");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_markers_bracket_sentence_frames() {
        let (pacer, transport) = make_pacer(120);
        let rx = feed_chunks(3).await;
        pacer.speak_sentence("第一句。", rx).await.unwrap();

        let kinds: Vec<Sent> = transport.log().into_iter().map(|(_, s)| s).collect();
        assert_eq!(
            kinds,
            vec![
                Sent::SentenceStart("第一句。".into()),
                Sent::Frame,
                Sent::Frame,
                Sent::Frame,
                Sent::SentenceEnd("第一句。".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_counter_spans_sentences() {
        let (pacer, transport) = make_pacer(40); // cache = 2
        let start = Instant::now();

        pacer.speak_sentence("一。", feed_chunks(2).await).await.unwrap();
        pacer.speak_sentence("二。", feed_chunks(2).await).await.unwrap();

        let frames: Vec<Instant> = transport
            .log()
            .iter()
            .filter(|(_, s)| *s == Sent::Frame)
            .map(|(t, _)| *t)
            .collect();
        // Frames 2 and 3 belong to the second sentence but pace against the
        // burst start, not a fresh counter.
        let frame_duration = Duration::from_millis(20);
        assert!(frames[2] >= start);
        assert!(frames[3] >= start + frame_duration);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_burst_waits_out_playback() {
        let (pacer, _transport) = make_pacer(120);
        let start = Instant::now();

        pacer.speak_sentence("好。", feed_chunks(5).await).await.unwrap();
        pacer.finish_burst().await;

        // 5 frames * 20 ms of audio were sent; the pacer must not return
        // before the client could have played them.
        assert!(Instant::now().duration_since(start) >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_anchor_consumed_on_first_frame() {
        let (pacer, _transport) = make_pacer(120);
        pacer.mark_utterance_end();
        assert!(pacer.reply_anchor.lock().is_some());

        pacer.speak_sentence("好。", feed_chunks(2).await).await.unwrap();
        assert!(pacer.reply_anchor.lock().is_none());

        // Later sentences of the same burst leave the anchor alone.
        pacer.speak_sentence("再说。", feed_chunks(2).await).await.unwrap();
        assert!(pacer.reply_anchor.lock().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_stops_frames() {
        let (pacer, transport) = make_pacer(40);

        let (tx, rx) = mpsc::channel(16);
        for _ in 0..2 {
            tx.send(TtsChunk { opus: vec![0; 10] }).await.unwrap();
        }
        drop(tx);

        pacer.speak_sentence("前半。", rx).await.ok();
        pacer.abort();

        // Post-abort sentences drain without sending anything.
        let before = transport.log().len();
        let outcome = pacer
            .speak_sentence("后半。", feed_chunks(4).await)
            .await
            .unwrap();
        assert_eq!(outcome, SentenceOutcome::Aborted);
        assert_eq!(transport.log().len(), before);

        // After reset the pacer speaks again.
        pacer.reset().await;
        let outcome = pacer
            .speak_sentence("新句。", feed_chunks(1).await)
            .await
            .unwrap();
        assert_eq!(outcome, SentenceOutcome::Completed);
    }
}
