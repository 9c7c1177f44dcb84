//! ASR adapter
//!
//! Bridges the inbound pipe and a streaming recognizer: one provider stream
//! per utterance, opened on `Start`, finalized when `End` drops the sample
//! sender. Finalized transcripts flow out on a single ordered channel that
//! the session drains serially.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use voicelink_core::SpeechToText;

/// Feed protocol from the inbound pipe.
#[derive(Debug, Clone)]
pub enum AsrFeed {
    Start,
    Samples(Vec<f32>),
    End,
}

/// Spawn the adapter task. Returns the transcript stream.
pub fn spawn_asr_adapter(
    stt: Arc<dyn SpeechToText>,
    sample_rate: u32,
    mut feed_rx: mpsc::Receiver<AsrFeed>,
    cancel: CancellationToken,
) -> mpsc::Receiver<String> {
    let (transcript_tx, transcript_rx) = mpsc::channel(8);

    tokio::spawn(async move {
        let mut samples_tx: Option<mpsc::Sender<Vec<f32>>> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,

                feed = feed_rx.recv() => {
                    let Some(feed) = feed else { return };
                    match feed {
                        AsrFeed::Start => {
                            match stt.open_stream(sample_rate).await {
                                Ok(stream) => {
                                    samples_tx = Some(stream.samples);
                                    let tx = transcript_tx.clone();
                                    let mut transcripts = stream.transcripts;
                                    // Forward finalized transcripts; the provider
                                    // closes the stream after finalization.
                                    tokio::spawn(async move {
                                        while let Some(text) = transcripts.recv().await {
                                            if tx.send(text).await.is_err() {
                                                return;
                                            }
                                        }
                                    });
                                }
                                Err(e) => {
                                    tracing::error!(error = %e, "Failed to open ASR stream");
                                    samples_tx = None;
                                }
                            }
                        }
                        AsrFeed::Samples(samples) => {
                            if let Some(tx) = &samples_tx {
                                if tx.send(samples).await.is_err() {
                                    tracing::warn!("ASR stream dropped mid-utterance");
                                    samples_tx = None;
                                }
                            }
                        }
                        AsrFeed::End => {
                            // Dropping the sender signals end of utterance.
                            samples_tx = None;
                        }
                    }
                }
            }
        }
    });

    transcript_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use voicelink_core::{AsrStream, CoreError};

    /// Echoes the number of fed samples as the transcript.
    struct CountingStt;

    #[async_trait]
    impl SpeechToText for CountingStt {
        async fn open_stream(&self, _sample_rate: u32) -> Result<AsrStream, CoreError> {
            let (samples_tx, mut samples_rx) = mpsc::channel::<Vec<f32>>(64);
            let (transcript_tx, transcript_rx) = mpsc::channel(1);
            tokio::spawn(async move {
                let mut total = 0usize;
                while let Some(samples) = samples_rx.recv().await {
                    total += samples.len();
                }
                let _ = transcript_tx.send(format!("samples:{total}")).await;
            });
            Ok(AsrStream {
                samples: samples_tx,
                transcripts: transcript_rx,
            })
        }
    }

    #[tokio::test]
    async fn test_utterance_produces_final_transcript() {
        let cancel = CancellationToken::new();
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let mut transcripts =
            spawn_asr_adapter(Arc::new(CountingStt), 16000, feed_rx, cancel.clone());

        feed_tx.send(AsrFeed::Start).await.unwrap();
        feed_tx.send(AsrFeed::Samples(vec![0.0; 320])).await.unwrap();
        feed_tx.send(AsrFeed::Samples(vec![0.0; 160])).await.unwrap();
        feed_tx.send(AsrFeed::End).await.unwrap();

        let text = tokio::time::timeout(Duration::from_secs(1), transcripts.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "samples:480");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_two_utterances_two_transcripts() {
        let cancel = CancellationToken::new();
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let mut transcripts =
            spawn_asr_adapter(Arc::new(CountingStt), 16000, feed_rx, cancel.clone());

        for len in [320usize, 640] {
            feed_tx.send(AsrFeed::Start).await.unwrap();
            feed_tx.send(AsrFeed::Samples(vec![0.0; len])).await.unwrap();
            feed_tx.send(AsrFeed::End).await.unwrap();
        }

        let a = tokio::time::timeout(Duration::from_secs(1), transcripts.recv())
            .await
            .unwrap()
            .unwrap();
        let b = tokio::time::timeout(Duration::from_secs(1), transcripts.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("samples:320", "samples:640"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_samples_without_start_are_ignored() {
        let cancel = CancellationToken::new();
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let mut transcripts =
            spawn_asr_adapter(Arc::new(CountingStt), 16000, feed_rx, cancel.clone());

        feed_tx.send(AsrFeed::Samples(vec![0.0; 320])).await.unwrap();
        feed_tx.send(AsrFeed::End).await.unwrap();

        let res = tokio::time::timeout(Duration::from_millis(100), transcripts.recv()).await;
        assert!(res.is_err(), "no transcript expected without Start");
        cancel.cancel();
    }
}
