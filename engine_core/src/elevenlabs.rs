use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{EngineConfig, EngineConnection, EngineError, SpeechEngine, SynthesisRequest};

/// Inbound message on the `stream-input` socket.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EngineMessage {
    audio: Option<String>,
    is_final: Option<bool>,
    error: Option<String>,
    message: Option<String>,
}

/// Client for the ElevenLabs `stream-input` websocket.
#[derive(Debug, Clone)]
pub struct ElevenLabsEngine {
    config: EngineConfig,
}

impl ElevenLabsEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn stream_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream-input?model_id={}&output_format=pcm_{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id,
            self.config.model_id,
            self.config.sample_rate,
        )
    }
}

/// Synthesis request followed by the end-of-input marker.
fn opening_messages(request: &SynthesisRequest) -> Result<[String; 2], EngineError> {
    let body = serde_json::to_string(request)
        .map_err(|e| EngineError::Protocol(format!("failed to encode request: {e}")))?;
    Ok([body, json!({ "text": "" }).to_string()])
}

#[async_trait]
impl SpeechEngine for ElevenLabsEngine {
    async fn open(&self, request: &SynthesisRequest) -> Result<Box<dyn EngineConnection>, EngineError> {
        let mut ws_request = self
            .stream_url()
            .into_client_request()
            .map_err(|e| EngineError::Config(format!("invalid engine url: {e}")))?;
        let key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|e| EngineError::Config(format!("invalid api key header: {e}")))?;
        ws_request.headers_mut().insert("xi-api-key", key);

        let (mut socket, _) = connect_async(ws_request)
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;
        debug!(voice_id = %self.config.voice_id, "engine connection open");

        for msg in opening_messages(request)? {
            socket
                .send(Message::Text(msg.into()))
                .await
                .map_err(|e| EngineError::Connect(format!("failed to send request: {e}")))?;
        }

        Ok(Box::new(ElevenLabsConnection { socket, closed: false }))
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

pub(crate) struct ElevenLabsConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl EngineConnection for ElevenLabsConnection {
    async fn next_audio(&mut self) -> Option<Result<String, EngineError>> {
        if self.closed {
            return None;
        }
        loop {
            let msg = match self.socket.next().await {
                None => return None,
                Some(Ok(msg)) => msg,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return None,
                Some(Err(e)) => return Some(Err(EngineError::Protocol(e.to_string()))),
            };

            match msg {
                Message::Text(text) => {
                    let parsed: EngineMessage = match serde_json::from_str(&text) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!("Dropping unparseable engine message: {e}");
                            continue;
                        }
                    };
                    if let Some(err) = parsed.error {
                        let detail = parsed.message.unwrap_or_default();
                        return Some(Err(EngineError::Protocol(format!("{err}: {detail}"))));
                    }
                    if let Some(audio) = parsed.audio.filter(|a| !a.is_empty()) {
                        return Some(Ok(audio));
                    }
                    if parsed.is_final == Some(true) {
                        debug!("engine reported final chunk");
                        return None;
                    }
                }
                Message::Close(frame) => {
                    self.closed = true;
                    return match frame {
                        Some(f) if f.code != CloseCode::Normal => Some(Err(EngineError::Closed {
                            code: u16::from(f.code),
                            reason: f.reason.as_str().to_string(),
                        })),
                        _ => None,
                    };
                }
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.socket.close(None).await {
            debug!("engine close: {e}");
        }
    }
}
