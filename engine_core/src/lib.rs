//! Streaming text-to-speech engine client.
//!
//! The server only talks to the engine through [`SpeechEngine`] and
//! [`EngineConnection`], so a live call can be driven by the ElevenLabs
//! `stream-input` socket in production and by a scripted engine in tests.
mod elevenlabs;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use elevenlabs::ElevenLabsEngine;

/// Voice stability sent with every synthesis request.
pub const DEFAULT_STABILITY: f32 = 0.4;
/// Similarity boost sent with every synthesis request.
pub const DEFAULT_SIMILARITY_BOOST: f32 = 0.8;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine configuration error: {0}")]
    Config(String),

    #[error("failed to connect to engine: {0}")]
    Connect(String),

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("engine closed the connection abnormally (code {code}): {reason}")]
    Closed { code: u16, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: DEFAULT_STABILITY,
            similarity_boost: DEFAULT_SIMILARITY_BOOST,
        }
    }
}

/// One utterance to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_settings: VoiceSettings,
}

impl SynthesisRequest {
    /// Request with the fixed voice policy.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice_settings: VoiceSettings::default(),
        }
    }
}

/// Opens one engine connection per utterance.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Connect and submit `request`. Returns once the handshake completed and
    /// the request (plus end-of-input marker) has been written.
    async fn open(&self, request: &SynthesisRequest) -> Result<Box<dyn EngineConnection>, EngineError>;

    /// Native rate of the PCM the engine returns.
    fn sample_rate(&self) -> u32;
}

/// A live engine connection for a single utterance.
#[async_trait]
pub trait EngineConnection: Send {
    /// Next base64 PCM chunk.
    ///
    /// `None` means the engine finished normally. After an error or `None`
    /// the connection must not be polled again.
    async fn next_audio(&mut self) -> Option<Result<String, EngineError>>;

    /// Close the connection. Safe to call more than once.
    async fn close(&mut self);
}

/// Settings for the hosted engine, read from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub base_url: String,
    pub sample_rate: u32,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        let api_key = required_env("ELEVEN_API_KEY")?;
        let voice_id = required_env("ELEVEN_VOICE_ID")?;

        let model_id = std::env::var("ELEVEN_MODEL_ID")
            .unwrap_or_else(|_| "eleven_multilingual_v2".to_string());

        let base_url = std::env::var("ELEVEN_BASE_URL")
            .unwrap_or_else(|_| "wss://api.elevenlabs.io".to_string());

        let sample_rate = std::env::var("ELEVEN_SAMPLE_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(22_050);

        Ok(Self {
            api_key,
            voice_id,
            model_id,
            base_url,
            sample_rate,
        })
    }
}

fn required_env(key: &str) -> Result<String, EngineError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(EngineError::Config(format!("{key} must be set"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_uses_fixed_voice_policy() {
        let request = SynthesisRequest::new("Hello caller");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["text"], "Hello caller");
        assert!((json["voice_settings"]["stability"].as_f64().unwrap() - 0.4).abs() < 1e-6);
        assert!((json["voice_settings"]["similarity_boost"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_closed_error_message() {
        let err = EngineError::Closed { code: 1008, reason: "invalid api key".into() };
        assert!(err.to_string().contains("1008"));
        assert!(err.to_string().contains("invalid api key"));
    }
}
