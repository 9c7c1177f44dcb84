//! Inbound frame decoding
//!
//! Devices send opus packets at the negotiated input format. With the `opus`
//! feature the real decoder is used; without it frames are interpreted as
//! little-endian PCM16 so the rest of the pipeline stays exercisable.

use voicelink_core::audio::{bytes_to_pcm16, AudioFormat, Codec};

use crate::AudioError;

/// Decodes one wire frame into interleaved i16 PCM.
pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>, AudioError>;
}

/// Interprets the payload as raw PCM16 little-endian.
pub struct PassthroughDecoder;

impl AudioDecoder for PassthroughDecoder {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>, AudioError> {
        Ok(bytes_to_pcm16(packet))
    }
}

#[cfg(feature = "opus")]
pub use self::opus_impl::OpusFrameDecoder;

#[cfg(feature = "opus")]
mod opus_impl {
    use super::*;
    use audiopus::coder::Decoder;
    use audiopus::{Channels, SampleRate};

    /// Opus decoder bound to one stream format.
    pub struct OpusFrameDecoder {
        decoder: Decoder,
        channels: usize,
        /// Scratch sized for the largest frame opus allows (120 ms).
        scratch: Vec<i16>,
    }

    impl OpusFrameDecoder {
        pub fn new(format: &AudioFormat) -> Result<Self, AudioError> {
            let sample_rate = match format.sample_rate {
                8000 => SampleRate::Hz8000,
                12000 => SampleRate::Hz12000,
                16000 => SampleRate::Hz16000,
                24000 => SampleRate::Hz24000,
                48000 => SampleRate::Hz48000,
                other => {
                    return Err(AudioError::Codec(format!(
                        "unsupported opus sample rate: {other}"
                    )))
                }
            };
            let channels = match format.channels {
                1 => Channels::Mono,
                2 => Channels::Stereo,
                other => {
                    return Err(AudioError::Codec(format!(
                        "unsupported channel count: {other}"
                    )))
                }
            };
            let decoder = Decoder::new(sample_rate, channels)
                .map_err(|e| AudioError::Codec(e.to_string()))?;
            let max_samples = (format.sample_rate as usize * 120 / 1000) * format.channels as usize;
            Ok(Self {
                decoder,
                channels: format.channels as usize,
                scratch: vec![0i16; max_samples],
            })
        }
    }

    impl AudioDecoder for OpusFrameDecoder {
        fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>, AudioError> {
            let samples = self
                .decoder
                .decode(Some(packet), &mut self.scratch, false)
                .map_err(|e| AudioError::Codec(e.to_string()))?;
            Ok(self.scratch[..samples * self.channels].to_vec())
        }
    }
}

/// Build the decoder for a negotiated input format.
pub fn decoder_for(format: &AudioFormat) -> Result<Box<dyn AudioDecoder>, AudioError> {
    match format.codec {
        Codec::Pcm => Ok(Box::new(PassthroughDecoder)),
        Codec::Opus => {
            #[cfg(feature = "opus")]
            {
                Ok(Box::new(opus_impl::OpusFrameDecoder::new(format)?))
            }
            #[cfg(not(feature = "opus"))]
            {
                tracing::warn!("opus feature disabled, treating frames as PCM16");
                Ok(Box::new(PassthroughDecoder))
            }
        }
        other => Err(AudioError::Codec(format!(
            "unsupported inbound codec: {}",
            other.as_str()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicelink_core::audio::pcm16_to_bytes;

    #[test]
    fn test_passthrough_decodes_pcm16() {
        let pcm = vec![10i16, -10, 300];
        let mut dec = PassthroughDecoder;
        assert_eq!(dec.decode(&pcm16_to_bytes(&pcm)).unwrap(), pcm);
    }

    #[test]
    fn test_decoder_for_pcm() {
        let format = AudioFormat {
            codec: Codec::Pcm,
            ..AudioFormat::default()
        };
        assert!(decoder_for(&format).is_ok());
    }

    #[test]
    fn test_decoder_for_rejects_mp3_inbound() {
        let format = AudioFormat {
            codec: Codec::Mp3,
            ..AudioFormat::default()
        };
        assert!(decoder_for(&format).is_err());
    }
}
