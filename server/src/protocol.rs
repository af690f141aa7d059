//! Wire format of the carrier's media-stream socket.

use base64::Engine; // for STANDARD.encode()
use serde::{Deserialize, Serialize};

/// Inbound event from the telephony platform.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundMessage {
    Start { start: StartInfo },
    Media { media: InboundMedia },
    Stop,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInfo {
    pub call_sid: String,
    pub stream_sid: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMedia {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
}

impl InboundMedia {
    pub fn is_inbound(&self) -> bool {
        self.track.as_deref() == Some("inbound")
    }
}

/// Event written back to the telephony platform.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundMedia,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
}

#[derive(Debug, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl<'a> OutboundMessage<'a> {
    /// Media event carrying μ-law bytes for `stream_sid`.
    pub fn media(stream_sid: &'a str, audio: &[u8]) -> Self {
        OutboundMessage::Media {
            stream_sid,
            media: OutboundMedia {
                payload: base64::engine::general_purpose::STANDARD.encode(audio),
            },
        }
    }

    pub fn clear(stream_sid: &'a str) -> Self {
        OutboundMessage::Clear { stream_sid }
    }

    pub fn to_json(&self) -> String {
        // Only string fields; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub fn parse_inbound(text: &str) -> Result<InboundMessage, serde_json::Error> {
    serde_json::from_str(text)
}
