//! One in-flight text-to-speech rendering, scoped to a call session.
//!
//! A [`SpeechController`] is created per speak command. Its task opens an
//! engine connection, pushes every audio chunk through the [`Transcoder`] and
//! out to the call, and reports how it ended exactly once through the
//! [`SpeechHandle`]. The session only keeps a weak reference: the running task
//! owns the controller, so it is gone as soon as the task finishes.

use std::sync::{Arc, Mutex};

use audio_core::Transcoder;
use engine_core::{EngineConnection, SpeechEngine, SynthesisRequest};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::CallMetrics;
use crate::registry::SessionRegistry;
use crate::session::{CallSession, TelephonyFrame};

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no active session for call {0}")]
    SessionNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechState {
    Opening,
    Streaming,
    Cancelled,
    Completed,
    Failed,
}

/// How a speech instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechOutcome {
    /// The engine finished the utterance.
    Completed,
    /// Barge-in, a newer speak command, or the call ending.
    Cancelled,
    /// The engine connection failed.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    BargeIn,
    Replaced,
    CallEnded,
}

/// Final report delivered to whoever issued the speak command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechReport {
    pub speech_id: Uuid,
    pub call_sid: String,
    pub outcome: SpeechOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,
    pub frames: u64,
}

#[derive(Debug)]
pub struct SpeechController {
    id: Uuid,
    call_sid: String,
    state: Mutex<SpeechState>,
    cancel_reason: Mutex<Option<CancelReason>>,
    cancel: CancellationToken,
}

impl SpeechController {
    pub fn new(call_sid: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            call_sid: call_sid.into(),
            state: Mutex::new(SpeechState::Opening),
            cancel_reason: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn call_sid(&self) -> &str {
        &self.call_sid
    }

    pub fn state(&self) -> SpeechState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Close the engine connection. The first reason given wins.
    pub fn cancel(&self, reason: CancelReason) {
        {
            let mut slot = self.cancel_reason.lock().unwrap_or_else(|p| p.into_inner());
            slot.get_or_insert(reason);
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn cancel_reason(&self) -> Option<CancelReason> {
        *self.cancel_reason.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Opening -> Streaming. Fails if a cancel already landed.
    fn begin_streaming(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if self.cancel.is_cancelled() || *state != SpeechState::Opening {
            return false;
        }
        *state = SpeechState::Streaming;
        true
    }

    fn set_state(&self, next: SpeechState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = next;
    }

    /// Start speaking `text` into `session`, replacing any active speech.
    ///
    /// Returns as soon as the task is spawned; synthesis runs in the background.
    pub fn start(
        session: &Arc<CallSession>,
        engine: Arc<dyn SpeechEngine>,
        metrics: CallMetrics,
        text: &str,
    ) -> Result<SpeechHandle, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::InvalidRequest("text cannot be empty".to_string()));
        }

        let controller = Arc::new(SpeechController::new(session.call_sid()));
        session.replace_active_speech(&controller)?;
        CallMetrics::incr(&metrics.speeches_started);

        let (done_tx, done_rx) = oneshot::channel();
        let handle = SpeechHandle {
            speech_id: controller.id,
            call_sid: controller.call_sid.clone(),
            done: done_rx,
        };

        let task = SpeechTask {
            controller,
            session: Arc::clone(session),
            transcoder: Transcoder::new(engine.sample_rate()),
            engine,
            request: SynthesisRequest::new(text),
            metrics,
            frames: 0,
        };
        tokio::spawn(task.run(done_tx));

        Ok(handle)
    }
}

/// Look up the call and start speaking into it.
pub fn speak(
    registry: &SessionRegistry,
    engine: Arc<dyn SpeechEngine>,
    metrics: CallMetrics,
    call_sid: &str,
    text: &str,
) -> Result<SpeechHandle, SpeechError> {
    if text.trim().is_empty() {
        return Err(SpeechError::InvalidRequest("text cannot be empty".to_string()));
    }
    let session = registry
        .lookup(call_sid)
        .ok_or_else(|| SpeechError::SessionNotFound(call_sid.to_string()))?;
    SpeechController::start(&session, engine, metrics, text)
}

/// Returned to the speak caller; resolves once the speech ends.
#[derive(Debug)]
pub struct SpeechHandle {
    pub speech_id: Uuid,
    pub call_sid: String,
    done: oneshot::Receiver<SpeechReport>,
}

impl SpeechHandle {
    pub async fn wait(self) -> SpeechReport {
        match self.done.await {
            Ok(report) => report,
            Err(_) => SpeechReport {
                speech_id: self.speech_id,
                call_sid: self.call_sid,
                outcome: SpeechOutcome::Failed,
                cancel_reason: None,
                frames: 0,
            },
        }
    }
}

struct SpeechTask {
    controller: Arc<SpeechController>,
    session: Arc<CallSession>,
    engine: Arc<dyn SpeechEngine>,
    transcoder: Transcoder,
    request: SynthesisRequest,
    metrics: CallMetrics,
    frames: u64,
}

enum Step {
    Cancelled,
    Chunk(Option<Result<String, engine_core::EngineError>>),
}

impl SpeechTask {
    async fn run(mut self, done: oneshot::Sender<SpeechReport>) {
        let outcome = self.drive().await;

        let controller = &self.controller;
        controller.set_state(match outcome {
            SpeechOutcome::Completed => SpeechState::Completed,
            SpeechOutcome::Cancelled => SpeechState::Cancelled,
            SpeechOutcome::Failed => SpeechState::Failed,
        });
        self.session.clear_active_speech(controller);

        let counter = match outcome {
            SpeechOutcome::Completed => &self.metrics.speeches_completed,
            SpeechOutcome::Cancelled => &self.metrics.speeches_cancelled,
            SpeechOutcome::Failed => &self.metrics.speeches_failed,
        };
        CallMetrics::incr(counter);

        let report = SpeechReport {
            speech_id: controller.id,
            call_sid: controller.call_sid.clone(),
            outcome,
            cancel_reason: match outcome {
                SpeechOutcome::Cancelled => controller.cancel_reason(),
                _ => None,
            },
            frames: self.frames,
        };
        info!(
            call_sid = %report.call_sid,
            speech_id = %report.speech_id,
            outcome = ?report.outcome,
            frames = report.frames,
            "Speech finished"
        );
        // The speak caller may have stopped waiting.
        let _ = done.send(report);
    }

    async fn drive(&mut self) -> SpeechOutcome {
        let cancel = self.controller.cancel.clone();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SpeechOutcome::Cancelled,
            opened = self.engine.open(&self.request) => opened,
        };
        let mut conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
                warn!(call_sid = %self.controller.call_sid, "Engine connection failed: {e}");
                return SpeechOutcome::Failed;
            }
        };

        if !self.controller.begin_streaming() {
            conn.close().await;
            return SpeechOutcome::Cancelled;
        }
        debug!(call_sid = %self.controller.call_sid, speech_id = %self.controller.id, "Streaming speech");

        let outcome = self.pump(conn.as_mut(), &cancel).await;
        conn.close().await;
        outcome
    }

    async fn pump(&mut self, conn: &mut dyn EngineConnection, cancel: &CancellationToken) -> SpeechOutcome {
        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                chunk = conn.next_audio() => Step::Chunk(chunk),
            };

            match step {
                Step::Cancelled => return SpeechOutcome::Cancelled,
                Step::Chunk(None) => return SpeechOutcome::Completed,
                Step::Chunk(Some(Err(e))) => {
                    warn!(call_sid = %self.controller.call_sid, "Engine stream failed: {e}");
                    return SpeechOutcome::Failed;
                }
                Step::Chunk(Some(Ok(payload))) => {
                    if cancel.is_cancelled() {
                        return SpeechOutcome::Cancelled;
                    }
                    self.forward(&payload);
                }
            }
        }
    }

    fn forward(&mut self, payload: &str) {
        let audio = match self.transcoder.transcode_base64(payload) {
            Ok(audio) => audio,
            Err(e) => {
                warn!(call_sid = %self.controller.call_sid, "Dropping undecodable engine chunk: {e}");
                return;
            }
        };
        if audio.is_empty() {
            return;
        }
        if self.session.send_telephony_frame(&TelephonyFrame::new(audio)) {
            self.frames += 1;
        }
    }
}
