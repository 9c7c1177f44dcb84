//! Voice activity detection and the detector resource pool
//!
//! Detectors are mutually exclusive and pooled process-wide. A session
//! acquires one around an utterance; when the pool is drained past the
//! acquire timeout the caller degrades to treating input as always-voice
//! instead of failing the session.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use voicelink_config::VadSettings;

use crate::AudioError;

/// Frame-level voice decision over mono i16 PCM.
pub trait VoiceDetector: Send {
    /// `pcm` is exactly one frame at the configured rate.
    fn is_voice(&mut self, pcm: &[i16]) -> Result<bool, AudioError>;

    fn reset(&mut self);
}

/// Energy detector: frame is voice when its RMS level clears the threshold.
///
/// Default detector when the `webrtc-vad` feature is off, and the fallback
/// when native detector construction fails.
pub struct EnergyVad {
    threshold_db: f32,
}

impl EnergyVad {
    pub fn new(threshold_db: f32) -> Self {
        Self { threshold_db }
    }

    fn energy_db(pcm: &[i16]) -> f32 {
        if pcm.is_empty() {
            return -96.0;
        }
        let sum_squares: f64 = pcm
            .iter()
            .map(|&s| {
                let v = s as f64 / 32768.0;
                v * v
            })
            .sum();
        let rms = (sum_squares / pcm.len() as f64).sqrt();
        if rms > 0.0 {
            (20.0 * rms.log10()) as f32
        } else {
            -96.0
        }
    }
}

impl VoiceDetector for EnergyVad {
    fn is_voice(&mut self, pcm: &[i16]) -> Result<bool, AudioError> {
        Ok(Self::energy_db(pcm) > self.threshold_db)
    }

    fn reset(&mut self) {}
}

#[cfg(feature = "webrtc-vad")]
mod webrtc_impl {
    use super::*;
    use webrtc_vad::{SampleRate, Vad, VadMode};

    /// WebRTC VAD bound to the configured rate and aggressiveness.
    pub struct WebRtcDetector {
        vad: Vad,
        settings: VadSettings,
    }

    impl WebRtcDetector {
        pub fn new(settings: &VadSettings) -> Result<Self, AudioError> {
            Ok(Self {
                vad: Self::build(settings)?,
                settings: settings.clone(),
            })
        }

        fn build(settings: &VadSettings) -> Result<Vad, AudioError> {
            let rate = match settings.sample_rate {
                8000 => SampleRate::Rate8kHz,
                16000 => SampleRate::Rate16kHz,
                32000 => SampleRate::Rate32kHz,
                48000 => SampleRate::Rate48kHz,
                other => {
                    return Err(AudioError::Vad(format!(
                        "unsupported VAD sample rate: {other}"
                    )))
                }
            };
            let mode = match settings.mode {
                0 => VadMode::Quality,
                1 => VadMode::LowBitrate,
                2 => VadMode::Aggressive,
                _ => VadMode::VeryAggressive,
            };
            Ok(Vad::new_with_rate_and_mode(rate, mode))
        }
    }

    impl VoiceDetector for WebRtcDetector {
        fn is_voice(&mut self, pcm: &[i16]) -> Result<bool, AudioError> {
            self.vad
                .is_voice_segment(pcm)
                .map_err(|_| AudioError::Vad("invalid frame length for WebRTC VAD".into()))
        }

        fn reset(&mut self) {
            // Detector state must not leak across utterances.
            if let Ok(fresh) = Self::build(&self.settings) {
                self.vad = fresh;
            }
        }
    }

    // Vad holds a raw pointer into its own allocation; instances are only
    // ever used by the one task that acquired them from the pool.
    unsafe impl Send for WebRtcDetector {}
}

/// Construct a detector per settings.
pub fn new_detector(settings: &VadSettings) -> Box<dyn VoiceDetector> {
    #[cfg(feature = "webrtc-vad")]
    {
        match webrtc_impl::WebRtcDetector::new(settings) {
            Ok(vad) => return Box::new(vad),
            Err(e) => {
                tracing::warn!(error = %e, "WebRTC VAD unavailable, using energy detector");
            }
        }
    }
    Box::new(EnergyVad::new(settings.energy_threshold_db))
}

struct PoolInner {
    detectors: Mutex<VecDeque<Box<dyn VoiceDetector>>>,
    available: Arc<Semaphore>,
    acquire_timeout: Duration,
    settings: VadSettings,
}

/// Fixed-size detector pool.
pub struct VadPool {
    inner: Arc<PoolInner>,
    size: usize,
}

impl VadPool {
    pub fn new(settings: VadSettings) -> Self {
        let size = settings.pool_size.max(1);
        let mut detectors = VecDeque::with_capacity(size);
        for _ in 0..size {
            detectors.push_back(new_detector(&settings));
        }
        tracing::info!(pool_size = size, "VAD pool initialized");
        Self {
            inner: Arc::new(PoolInner {
                detectors: Mutex::new(detectors),
                available: Arc::new(Semaphore::new(size)),
                acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
                settings,
            }),
            size,
        }
    }

    /// Acquire a detector, waiting at most the configured timeout.
    ///
    /// `ResourceExhausted` is a degradation signal, not a session error: the
    /// caller treats the current utterance as always-voice and continues.
    pub async fn acquire(&self) -> Result<PooledVad, AudioError> {
        let permit = tokio::time::timeout(
            self.inner.acquire_timeout,
            self.inner.available.clone().acquire_owned(),
        )
        .await
        .map_err(|_| AudioError::ResourceExhausted)?
        .map_err(|_| AudioError::ResourceExhausted)?;

        let detector = self
            .inner
            .detectors
            .lock()
            .pop_front()
            // Permit accounting guarantees an instance is present.
            .unwrap_or_else(|| new_detector(&self.inner.settings));

        tracing::debug!(
            available = self.inner.available.available_permits(),
            pool_size = self.size,
            "Acquired VAD instance"
        );

        Ok(PooledVad {
            detector: Some(detector),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    pub fn available(&self) -> usize {
        self.inner.available.available_permits()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// RAII guard over a pooled detector; returns the instance on drop.
pub struct PooledVad {
    detector: Option<Box<dyn VoiceDetector>>,
    pool: Arc<PoolInner>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledVad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledVad")
            .field("detector", &self.detector.is_some())
            .finish()
    }
}

impl PooledVad {
    pub fn is_voice(&mut self, pcm: &[i16]) -> Result<bool, AudioError> {
        self.detector
            .as_mut()
            .expect("detector present until drop")
            .is_voice(pcm)
    }

    pub fn reset(&mut self) {
        if let Some(d) = self.detector.as_mut() {
            d.reset();
        }
    }
}

impl Drop for PooledVad {
    fn drop(&mut self) {
        if let Some(mut detector) = self.detector.take() {
            detector.reset();
            self.pool.detectors.lock().push_back(detector);
        }
        // _permit releases the slot after the instance is back.
    }
}
