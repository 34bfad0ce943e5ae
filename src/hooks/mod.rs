mod http;
mod notifier;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Config, HttpHooksConfig, DEFAULT_VHOST};
use crate::request::StreamRequest;

pub use http::{check_response, HttpHooks};
pub use notifier::AsyncNotifier;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("callback {url} rejected with code {code}")]
    Rejected { url: String, code: i64 },
    #[error("callback {url} returned unexpected body: {body}")]
    InvalidResponse { url: String, body: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotifyEvent {
    /// A segment was finalized at `file`.
    Dvr { file: PathBuf },
    /// A client connection went away.
    Close { send_bytes: u64, recv_bytes: u64 },
}

impl NotifyEvent {
    pub fn action(&self) -> &'static str {
        match self {
            NotifyEvent::Dvr { .. } => "on_dvr",
            NotifyEvent::Close { .. } => "on_close",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyJob {
    pub request: StreamRequest,
    pub event: NotifyEvent,
}

impl NotifyJob {
    pub fn dvr(request: StreamRequest, file: PathBuf) -> Self {
        Self {
            request,
            event: NotifyEvent::Dvr { file },
        }
    }

    pub fn close(request: StreamRequest, send_bytes: u64, recv_bytes: u64) -> Self {
        Self {
            request,
            event: NotifyEvent::Close {
                send_bytes,
                recv_bytes,
            },
        }
    }
}

/// Delivers one job to one callback endpoint.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    async fn invoke(&self, url: &str, job: &NotifyJob, timeout: Duration) -> Result<(), HookError>;
}

/// Callback endpoints per vhost, read at delivery time so a reload applies to
/// jobs still waiting in the queue.
#[derive(Debug, Clone, Default)]
pub struct HookTable {
    vhosts: HashMap<String, HttpHooksConfig>,
}

impl HookTable {
    pub fn from_config(config: &Config) -> Self {
        let vhosts = config
            .vhosts
            .iter()
            .map(|v| (v.name.clone(), v.http_hooks.clone()))
            .collect();
        Self { vhosts }
    }

    /// URLs and timeout for `event` on `vhost`, `None` when nothing is
    /// configured.
    pub fn endpoints(&self, vhost: &str, event: &NotifyEvent) -> Option<(Vec<String>, Duration)> {
        let hooks = self
            .vhosts
            .get(vhost)
            .or_else(|| self.vhosts.get(DEFAULT_VHOST))?;
        if !hooks.enabled {
            return None;
        }
        let urls = match event {
            NotifyEvent::Dvr { .. } => &hooks.on_dvr,
            NotifyEvent::Close { .. } => &hooks.on_close,
        };
        if urls.is_empty() {
            return None;
        }
        Some((urls.clone(), Duration::from_secs(hooks.timeout_secs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HookTable {
        let config = Config::parse(
            r#"
[[vhosts]]
name = "__defaultVhost__"
[vhosts.http_hooks]
enabled = true
on_dvr = ["http://a/dvr", "http://b/dvr"]
timeout_secs = 5

[[vhosts]]
name = "quiet"
[vhosts.http_hooks]
enabled = false
on_dvr = ["http://c/dvr"]
"#,
        )
        .unwrap();
        HookTable::from_config(&config)
    }

    #[test]
    fn test_endpoints_fall_back_to_default_vhost() {
        let dvr = NotifyEvent::Dvr {
            file: PathBuf::from("/a.flv"),
        };
        let (urls, timeout) = table().endpoints("other", &dvr).unwrap();
        assert_eq!(urls, vec!["http://a/dvr", "http://b/dvr"]);
        assert_eq!(timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_disabled_or_empty_hooks_yield_nothing() {
        let dvr = NotifyEvent::Dvr {
            file: PathBuf::from("/a.flv"),
        };
        let close = NotifyEvent::Close {
            send_bytes: 1,
            recv_bytes: 2,
        };
        let table = table();
        assert!(table.endpoints("quiet", &dvr).is_none());
        assert!(table.endpoints("other", &close).is_none());
        assert!(HookTable::default().endpoints("x", &dvr).is_none());
    }
}
