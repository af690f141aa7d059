use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics::{MetricsResponse, SystemMetrics};
use crate::speech::{self, CancelReason, SpeechOutcome};
use crate::validation::validate_speak_request;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    #[serde(rename = "callSid", alias = "callId")]
    call_sid: Option<String>,
    text: Option<String>,
    /// Hold the response until the speech ends.
    #[serde(default = "default_wait")]
    wait: bool,
}

fn default_wait() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct SpeakAccepted {
    pub call_sid: String,
    pub speech_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SpeakResponse {
    pub call_sid: String,
    pub speech_id: Uuid,
    pub outcome: SpeechOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,
    pub frames: u64,
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let metrics = &state.metrics;
    Json(MetricsResponse {
        timestamp: Utc::now(),
        system: SystemMetrics::collect(metrics.started_at),
        calls: metrics.calls.snapshot(state.registry.len()),
        speak: metrics.speak.stats(),
    })
}

pub async fn speak_endpoint(
    State(state): State<AppState>,
    Json(req): Json<SpeakRequest>,
) -> Result<axum::response::Response, ApiError> {
    let start_time = Instant::now();
    let result = speak(&state, req).await;

    let elapsed = start_time.elapsed().as_millis() as u64;
    state.metrics.speak.record_request(elapsed);
    if result.is_err() {
        state.metrics.speak.record_error();
    }
    result
}

async fn speak(state: &AppState, req: SpeakRequest) -> Result<axum::response::Response, ApiError> {
    let (call_sid, text) = validate_speak_request(req.call_sid.as_deref(), req.text.as_deref())?;

    info!(%call_sid, text_len = text.len(), "Speak request received");
    let handle = speech::speak(
        &state.registry,
        Arc::clone(&state.engine),
        state.metrics.calls.clone(),
        call_sid,
        text,
    )?;

    if !req.wait {
        let accepted = SpeakAccepted {
            call_sid: handle.call_sid.clone(),
            speech_id: handle.speech_id,
        };
        return Ok((StatusCode::ACCEPTED, Json(accepted)).into_response());
    }

    let report = handle.wait().await;
    Ok(Json(SpeakResponse {
        call_sid: report.call_sid,
        speech_id: report.speech_id,
        outcome: report.outcome,
        cancel_reason: report.cancel_reason,
        frames: report.frames,
    })
    .into_response())
}
