//! Tells the call-logic service a call's media stream is up.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("call logic responded with status {0}")]
    Status(u16),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallStarted<'a> {
    call_sid: &'a str,
    stream_sid: &'a str,
}

/// Fire-and-forget webhook. Failures are logged and never affect the call.
#[derive(Debug, Clone)]
pub struct CallNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl CallNotifier {
    pub fn new(url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {e}");
                reqwest::Client::new()
            });
        Self { client, url }
    }

    /// Notifier that never sends anything.
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            url: None,
        }
    }

    pub fn notify_call_started(&self, call_sid: &str, stream_sid: &str) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let client = self.client.clone();
        let call_sid = call_sid.to_string();
        let stream_sid = stream_sid.to_string();

        tokio::spawn(async move {
            match post_call_started(&client, &url, &call_sid, &stream_sid).await {
                Ok(()) => debug!(%call_sid, "Call logic notified"),
                Err(e) => warn!(%call_sid, "Could not notify call logic at {url}: {e}"),
            }
        });
    }
}

async fn post_call_started(
    client: &reqwest::Client,
    url: &str,
    call_sid: &str,
    stream_sid: &str,
) -> Result<(), NotifyError> {
    let response = client
        .post(url)
        .json(&CallStarted { call_sid, stream_sid })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(NotifyError::Status(status.as_u16()));
    }
    info!(%call_sid, "Call logic accepted call");
    Ok(())
}
