use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::request::StreamRequest;

use super::{CallbackSink, HookError, NotifyEvent, NotifyJob};

/// Posts callback jobs as JSON to HTTP endpoints.
pub struct HttpHooks {
    client: reqwest::Client,
    cwd: String,
}

#[derive(Serialize)]
struct HookBody<'a> {
    action: &'static str,
    #[serde(flatten)]
    request: &'a StreamRequest,
    #[serde(flatten)]
    event: EventFields<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EventFields<'a> {
    Dvr { cwd: &'a str, file: String },
    Close { send_bytes: u64, recv_bytes: u64 },
}

#[derive(Deserialize)]
struct HookReply {
    code: i64,
}

impl HttpHooks {
    pub fn new() -> Self {
        let cwd = std::env::current_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        Self {
            client: reqwest::Client::new(),
            cwd,
        }
    }

    fn body<'a>(&'a self, job: &'a NotifyJob) -> HookBody<'a> {
        let event = match &job.event {
            NotifyEvent::Dvr { file } => EventFields::Dvr {
                cwd: &self.cwd,
                file: file.display().to_string(),
            },
            NotifyEvent::Close {
                send_bytes,
                recv_bytes,
            } => EventFields::Close {
                send_bytes: *send_bytes,
                recv_bytes: *recv_bytes,
            },
        };
        HookBody {
            action: job.event.action(),
            request: &job.request,
            event,
        }
    }
}

impl Default for HttpHooks {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackSink for HttpHooks {
    async fn invoke(&self, url: &str, job: &NotifyJob, timeout: Duration) -> Result<(), HookError> {
        let text = self
            .client
            .post(url)
            .header("User-Agent", format!("streamdvr/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .json(&self.body(job))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        check_response(url, &text)
    }
}

/// Accepts an empty body, a bare `0`, or a JSON object with `code` 0.
pub fn check_response(url: &str, body: &str) -> Result<(), HookError> {
    let body = body.trim();
    if body.is_empty() || body == "0" {
        return Ok(());
    }
    match serde_json::from_str::<HookReply>(body) {
        Ok(HookReply { code: 0 }) => Ok(()),
        Ok(HookReply { code }) => Err(HookError::Rejected {
            url: url.to_string(),
            code,
        }),
        Err(_) => Err(HookError::InvalidResponse {
            url: url.to_string(),
            body: body.to_string(),
        }),
    }
}
