//! Per-call state owned by one telephony connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::metrics::CallMetrics;
use crate::protocol::OutboundMessage;
use crate::registry::SessionRegistry;
use crate::speech::{CancelReason, SpeechController, SpeechError};

/// Sending half of a telephony socket.
///
/// Writes are queued for the socket's writer task and never wait. Once the
/// writer is gone every send fails and the message is dropped.
#[derive(Debug, Clone)]
pub struct TelephonyLink {
    tx: mpsc::UnboundedSender<String>,
}

impl TelephonyLink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Link plus the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, text: String) -> bool {
        self.tx.send(text).is_ok()
    }
}

/// 8 kHz μ-law audio ready for the carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelephonyFrame {
    pub audio: Vec<u8>,
}

impl TelephonyFrame {
    pub fn new(audio: Vec<u8>) -> Self {
        Self { audio }
    }
}

/// One live phone call.
#[derive(Debug)]
pub struct CallSession {
    call_sid: String,
    stream_sid: String,
    link: TelephonyLink,
    active_speech: Mutex<Option<Weak<SpeechController>>>,
    ended: AtomicBool,
    clear_on_barge_in: bool,
    metrics: CallMetrics,
}

impl CallSession {
    pub fn new(
        call_sid: impl Into<String>,
        stream_sid: impl Into<String>,
        link: TelephonyLink,
        clear_on_barge_in: bool,
        metrics: CallMetrics,
    ) -> Self {
        Self {
            call_sid: call_sid.into(),
            stream_sid: stream_sid.into(),
            link,
            active_speech: Mutex::new(None),
            ended: AtomicBool::new(false),
            clear_on_barge_in,
            metrics,
        }
    }

    pub fn call_sid(&self) -> &str {
        &self.call_sid
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Register the session, tearing down any session it displaces.
    pub fn on_start(self: &Arc<Self>, registry: &SessionRegistry) {
        if let Some(previous) = registry.register(&self.call_sid, Arc::clone(self)) {
            if !Arc::ptr_eq(&previous, self) {
                info!(call_sid = %self.call_sid, "Replacing session from an earlier connection");
                previous.end(CancelReason::CallEnded);
            }
        }
        CallMetrics::incr(&self.metrics.sessions_started);
        info!(call_sid = %self.call_sid, stream_sid = %self.stream_sid, "Call connected");
    }

    /// Caller audio arrived. Cancels the active speech, if any.
    ///
    /// Returns true when speech was interrupted.
    pub fn on_inbound_audio(&self) -> bool {
        let Some(speech) = self.take_active_speech() else {
            return false;
        };
        info!(call_sid = %self.call_sid, speech_id = %speech.id(), "Caller interrupted, stopping speech");
        speech.cancel(CancelReason::BargeIn);
        CallMetrics::incr(&self.metrics.barge_ins);

        if self.clear_on_barge_in && !self.is_ended() {
            self.link.send(OutboundMessage::clear(&self.stream_sid).to_json());
        }
        true
    }

    /// Stop event or connection close. Safe to call repeatedly.
    pub fn on_stop(self: &Arc<Self>, registry: &SessionRegistry) {
        if !self.end(CancelReason::CallEnded) {
            return;
        }
        registry.remove_entry(&self.call_sid, self);
        info!(call_sid = %self.call_sid, "Call ended");
    }

    /// Mark ended and cancel speech. Returns false if already ended.
    fn end(&self, reason: CancelReason) -> bool {
        if self.ended.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(speech) = self.take_active_speech() {
            speech.cancel(reason);
        }
        CallMetrics::incr(&self.metrics.sessions_ended);
        true
    }

    /// Forward one frame tagged with this call's stream id.
    ///
    /// Dropped without queueing once the call ended or the socket closed.
    pub fn send_telephony_frame(&self, frame: &TelephonyFrame) -> bool {
        if self.is_ended() {
            CallMetrics::incr(&self.metrics.frames_dropped);
            return false;
        }
        let sent = self
            .link
            .send(OutboundMessage::media(&self.stream_sid, &frame.audio).to_json());
        if sent {
            CallMetrics::incr(&self.metrics.frames_sent);
        } else {
            CallMetrics::incr(&self.metrics.frames_dropped);
        }
        sent
    }

    /// Make `speech` the active speech, cancelling whatever was playing.
    pub fn replace_active_speech(&self, speech: &Arc<SpeechController>) -> Result<(), SpeechError> {
        let previous = {
            let mut active = self.lock_active();
            // Checked under the lock so a concurrent `end` cannot miss `speech`.
            if self.is_ended() {
                return Err(SpeechError::SessionNotFound(self.call_sid.clone()));
            }
            active.replace(Arc::downgrade(speech))
        };
        if let Some(previous) = previous.and_then(|w| w.upgrade()) {
            debug!(call_sid = %self.call_sid, speech_id = %previous.id(), "Replacing active speech");
            previous.cancel(CancelReason::Replaced);
        }
        Ok(())
    }

    /// Clear the active speech if it is still `speech`.
    pub fn clear_active_speech(&self, speech: &SpeechController) {
        let mut active = self.lock_active();
        if active
            .as_ref()
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), speech))
        {
            *active = None;
        }
    }

    pub fn active_speech(&self) -> Option<Arc<SpeechController>> {
        self.lock_active().as_ref().and_then(Weak::upgrade)
    }

    fn take_active_speech(&self) -> Option<Arc<SpeechController>> {
        self.lock_active().take().and_then(|w| w.upgrade())
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<Weak<SpeechController>>> {
        // Poisoning leaves the Option intact.
        self.active_speech
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
