//! Common utilities for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use base64::Engine as _;
use engine_core::{EngineConnection, EngineError, SpeechEngine, SynthesisRequest};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use server::{app, config::ServerConfig, AppState};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub const ENGINE_SAMPLE_RATE: u32 = 16_000;
pub const STEP: Duration = Duration::from_secs(5);

pub type MediaClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle on one engine connection opened by the bridge.
pub struct EngineHandle {
    pub text: String,
    feed: mpsc::UnboundedSender<Result<String, EngineError>>,
    closed: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Push one PCM chunk as the engine would send it.
    pub fn send_pcm(&self, samples: &[i16]) -> bool {
        self.feed.send(Ok(pcm_chunk(samples))).is_ok()
    }

    pub fn fail(&self, message: &str) {
        let _ = self.feed.send(Err(EngineError::Protocol(message.to_string())));
    }

    /// End of utterance.
    pub fn finish(self) {}

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Engine driven step by step from the test body.
pub struct ScriptedEngine {
    connections: mpsc::UnboundedSender<EngineHandle>,
}

struct ScriptedConnection {
    rx: mpsc::UnboundedReceiver<Result<String, EngineError>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl SpeechEngine for ScriptedEngine {
    async fn open(&self, request: &SynthesisRequest) -> Result<Box<dyn EngineConnection>, EngineError> {
        let (feed, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let handle = EngineHandle {
            text: request.text.clone(),
            feed,
            closed: Arc::clone(&closed),
        };
        self.connections
            .send(handle)
            .map_err(|_| EngineError::Connect("test finished".into()))?;
        Ok(Box::new(ScriptedConnection { rx, closed }))
    }

    fn sample_rate(&self) -> u32 {
        ENGINE_SAMPLE_RATE
    }
}

#[async_trait]
impl EngineConnection for ScriptedConnection {
    async fn next_audio(&mut self) -> Option<Result<String, EngineError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.rx.close();
    }
}

pub fn pcm_chunk(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    connections: Mutex<mpsc::UnboundedReceiver<EngineHandle>>,
}

impl TestServer {
    /// Wait for the bridge to open the next engine connection.
    pub async fn next_connection(&self) -> EngineHandle {
        let mut connections = self.connections.lock().await;
        tokio::time::timeout(STEP, connections.recv())
            .await
            .expect("engine connection was not opened in time")
            .expect("engine dropped")
    }

    /// Every engine connection opened so far that the test has not taken yet.
    pub async fn drain_connections(&self) -> Vec<EngineHandle> {
        let mut connections = self.connections.lock().await;
        let mut opened = Vec::new();
        while let Ok(handle) = connections.try_recv() {
            opened.push(handle);
        }
        opened
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect_media(&self) -> MediaClient {
        let (ws, _) = connect_async(format!("ws://{}/media", self.addr))
            .await
            .expect("media socket should connect");
        ws
    }

    /// Connect and send a start event, waiting until the call is registered.
    pub async fn start_call(&self, call_sid: &str, stream_sid: &str) -> MediaClient {
        let mut ws = self.connect_media().await;
        send_event(&mut ws, start_event(call_sid, stream_sid)).await;
        let registry = self.state.registry.clone();
        let sid = call_sid.to_string();
        wait_until(move || registry.lookup(&sid).is_some()).await;
        ws
    }

    pub async fn speak(&self, body: Value) -> (u16, Value) {
        post_json(self.url("/speak"), body).await
    }

    /// Issue a speak command that resolves only when the speech ends.
    pub fn speak_in_background(&self, body: Value) -> JoinHandle<(u16, Value)> {
        tokio::spawn(post_json(self.url("/speak"), body))
    }
}

async fn post_json(url: String, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(url)
        .json(&body)
        .send()
        .await
        .expect("speak request failed");
    let status = response.status().as_u16();
    let body = response.json().await.unwrap_or(Value::Null);
    (status, body)
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        rate_limit_per_minute: 6000,
        ..ServerConfig::default()
    }
}

pub fn test_state() -> (AppState, mpsc::UnboundedReceiver<EngineHandle>) {
    test_state_with(test_config())
}

pub fn test_state_with(config: ServerConfig) -> (AppState, mpsc::UnboundedReceiver<EngineHandle>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = Arc::new(ScriptedEngine { connections: tx });
    (AppState::new(config, engine), rx)
}

/// Create a test app instance for in-process requests.
pub fn create_test_app() -> (Router, AppState) {
    let (state, _connections) = test_state();
    let router = app(state.clone()).expect("router should build");
    (router, state)
}

/// Serve the app on an ephemeral port.
pub async fn spawn_server() -> TestServer {
    spawn_server_with(test_config()).await
}

pub async fn spawn_server_with(config: ServerConfig) -> TestServer {
    let (state, connections) = test_state_with(config);
    let router = app(state.clone()).expect("router should build");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    TestServer {
        addr,
        state,
        connections: Mutex::new(connections),
    }
}

pub fn start_event(call_sid: &str, stream_sid: &str) -> Value {
    serde_json::json!({
        "event": "start",
        "sequenceNumber": "1",
        "start": { "callSid": call_sid, "streamSid": stream_sid, "tracks": ["inbound"] },
        "streamSid": stream_sid,
    })
}

pub fn inbound_media() -> Value {
    serde_json::json!({ "event": "media", "media": { "track": "inbound", "payload": "//8=" } })
}

pub async fn send_event(ws: &mut MediaClient, event: Value) {
    ws.send(Message::text(event.to_string())).await.expect("send failed");
}

/// Next JSON event the bridge wrote to the media socket.
pub async fn next_event(ws: &mut MediaClient) -> Value {
    loop {
        let message = tokio::time::timeout(STEP, ws.next())
            .await
            .expect("no event from bridge")
            .expect("media socket closed")
            .expect("media socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("bridge sent invalid json");
        }
    }
}

/// Assert nothing arrives on the media socket for a short while.
pub async fn assert_quiet(ws: &mut MediaClient) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "unexpected event: {result:?}");
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(STEP, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
