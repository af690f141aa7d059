//! Engine waveform to telephony waveform conversion.
//!
//! The TTS engine emits mono 16-bit little-endian PCM at its native rate
//! (22050 Hz by default). Carriers expect 8 kHz, 8-bit μ-law. Conversion runs
//! in two stateless stages, so every chunk can be processed on its own:
//!
//! 1. point-sampling decimation down to 8000 Hz ([`downsample`])
//! 2. μ-law companding of every sample ([`linear_to_ulaw`])
mod mulaw;
mod resample;

use base64::Engine; // for STANDARD.decode()

pub use mulaw::{encode_ulaw, linear_to_ulaw, ulaw_to_linear};
pub use resample::{downsample, downsampled_len};

/// Sample rate every telephony frame is produced at.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Native rate of the engine's `pcm_22050` output format.
pub const DEFAULT_ENGINE_SAMPLE_RATE: u32 = 22_050;

/// Decode little-endian 16-bit PCM bytes into samples.
///
/// A trailing odd byte cannot form a sample and is dropped.
pub fn decode_pcm16le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Per-chunk transcoder from engine PCM to telephony μ-law.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transcoder {
    source_rate: u32,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_SAMPLE_RATE)
    }
}

impl Transcoder {
    pub fn new(source_rate: u32) -> Self {
        Self { source_rate }
    }

    /// Decimate to 8 kHz and compand. Output holds one byte per telephony sample.
    pub fn transcode(&self, samples: &[i16]) -> Vec<u8> {
        let reduced = downsample(samples, self.source_rate, TELEPHONY_SAMPLE_RATE);
        encode_ulaw(&reduced)
    }

    /// Same as [`Transcoder::transcode`], starting from raw little-endian PCM bytes.
    pub fn transcode_pcm_bytes(&self, bytes: &[u8]) -> Vec<u8> {
        self.transcode(&decode_pcm16le(bytes))
    }

    /// Decode a base64 engine payload and transcode it.
    pub fn transcode_base64(&self, payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(payload)?;
        Ok(self.transcode_pcm_bytes(&bytes))
    }
}
