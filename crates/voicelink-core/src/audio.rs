//! Audio format descriptors and PCM conversion helpers
//!
//! Frames travel the wire as opus packets; internally the pipeline works on
//! i16 PCM (VAD feed) and f32 PCM (ASR feed). Multi-channel input is
//! downmixed to mono by arithmetic average before VAD.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Audio codec carried in a binary frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Opus,
    Pcm,
    Wav,
    Mp3,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Opus => "opus",
            Codec::Pcm => "pcm",
            Codec::Wav => "wav",
            Codec::Mp3 => "mp3",
        }
    }
}

/// Negotiated stream format for one direction of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
    #[serde(default)]
    pub codec: Codec,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_duration_ms: 20,
            codec: Codec::Opus,
        }
    }
}

impl AudioFormat {
    /// Output format forced for the built-in device voices: 24 kHz, 20 ms.
    pub fn device_voice_output() -> Self {
        Self {
            sample_rate: 24000,
            channels: 1,
            frame_duration_ms: 20,
            codec: Codec::Opus,
        }
    }

    /// Samples per frame per channel.
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize) / 1000
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }

    /// Frames needed to cover `window_ms`, rounded up.
    pub fn frames_for_window(&self, window_ms: u32) -> usize {
        window_ms.div_ceil(self.frame_duration_ms.max(1)) as usize
    }
}

/// Convert interleaved multi-channel i16 PCM to mono by arithmetic average.
///
/// Mono input is returned unchanged.
pub fn downmix_to_mono(pcm: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return pcm.to_vec();
    }
    let ch = channels as usize;
    pcm.chunks_exact(ch)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / ch as i32) as i16
        })
        .collect()
}

/// i16 PCM to normalized f32 samples in [-1.0, 1.0].
pub fn pcm16_to_f32(pcm: &[i16]) -> Vec<f32> {
    pcm.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// f32 samples to i16 PCM, clamped.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// Little-endian bytes to i16 PCM. A trailing odd byte is ignored.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// i16 PCM to little-endian bytes.
pub fn pcm16_to_bytes(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_per_frame() {
        let fmt = AudioFormat::default();
        assert_eq!(fmt.samples_per_frame(), 320); // 16 kHz * 20 ms

        let out = AudioFormat::device_voice_output();
        assert_eq!(out.samples_per_frame(), 480); // 24 kHz * 20 ms
    }

    #[test]
    fn test_frames_for_window_rounds_up() {
        let fmt = AudioFormat::default();
        assert_eq!(fmt.frames_for_window(60), 3);

        let fmt = AudioFormat {
            frame_duration_ms: 25,
            ..AudioFormat::default()
        };
        assert_eq!(fmt.frames_for_window(60), 3); // ceil(60/25)
    }

    #[test]
    fn test_downmix_average() {
        let stereo = [100i16, 200, -100, -200, 0, 50];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![150, -150, 25]);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        let mono = [1i16, 2, 3];
        assert_eq!(downmix_to_mono(&mono, 1), vec![1, 2, 3]);
    }

    #[test]
    fn test_pcm_byte_round_trip() {
        let pcm = vec![0i16, 1, -1, i16::MAX, i16::MIN];
        assert_eq!(bytes_to_pcm16(&pcm16_to_bytes(&pcm)), pcm);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        let samples = [1.5f32, -1.5, 0.0];
        let pcm = f32_to_pcm16(&samples);
        assert_eq!(pcm[0], i16::MAX);
        assert_eq!(pcm[1], -i16::MAX);
        assert_eq!(pcm[2], 0);
    }
}
