//! Routes carrier media-stream events to the call session they belong to.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::metrics::CallMetrics;
use crate::protocol::{parse_inbound, InboundMessage, StartInfo};
use crate::session::{CallSession, TelephonyLink};
use crate::AppState;

/// State of one telephony socket. Holds at most one session.
pub struct MediaConnection {
    state: AppState,
    link: TelephonyLink,
    session: Option<Arc<CallSession>>,
}

impl MediaConnection {
    pub fn new(state: AppState, link: TelephonyLink) -> Self {
        Self {
            state,
            link,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Arc<CallSession>> {
        self.session.as_ref()
    }

    /// Handle one text frame. Malformed frames are counted and dropped.
    pub fn handle_text(&mut self, text: &str) {
        let message = match parse_inbound(text) {
            Ok(message) => message,
            Err(e) => {
                CallMetrics::incr(&self.state.metrics.calls.malformed_messages);
                debug!("Ignoring malformed media event: {e}");
                return;
            }
        };

        match message {
            InboundMessage::Start { start } => self.on_start(start),
            InboundMessage::Media { media } => {
                if !media.is_inbound() {
                    return;
                }
                if let Some(session) = &self.session {
                    session.on_inbound_audio();
                }
            }
            InboundMessage::Stop => {
                if let Some(session) = &self.session {
                    session.on_stop(&self.state.registry);
                }
            }
            InboundMessage::Unknown => {}
        }
    }

    fn on_start(&mut self, start: StartInfo) {
        if let Some(existing) = &self.session {
            warn!(
                call_sid = %existing.call_sid(),
                ignored_call_sid = %start.call_sid,
                "Ignoring repeated start on an open media stream"
            );
            return;
        }

        let session = Arc::new(CallSession::new(
            start.call_sid,
            start.stream_sid,
            self.link.clone(),
            self.state.config.clear_on_barge_in,
            self.state.metrics.calls.clone(),
        ));
        session.on_start(&self.state.registry);
        self.state
            .notifier
            .notify_call_started(session.call_sid(), session.stream_sid());
        self.session = Some(session);
    }

    /// Socket gone. Same teardown as a stop event.
    pub fn on_closed(&mut self) {
        if let Some(session) = &self.session {
            session.on_stop(&self.state.registry);
        }
    }
}

pub async fn media_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (link, mut outbound) = TelephonyLink::channel();

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                debug!("Media socket write failed: {e}");
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut connection = MediaConnection::new(state, link);
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => connection.handle_text(text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Media socket read failed: {e}");
                break;
            }
        }
    }

    connection.on_closed();
    if let Some(session) = connection.session() {
        info!(call_sid = %session.call_sid(), "Media stream closed");
    }
    writer.abort();
}
