mod jitter;
mod path;
mod plan;
mod segmenter;

use crate::config::{Config, VhostConfig};
use crate::error::DvrError;
use crate::hooks::{AsyncNotifier, HookTable, NotifyJob};
use crate::media::Frame;
use crate::request::StreamRequest;

pub use jitter::{JitterCorrector, JitterMode};
pub use path::{build_path, normalize_template};
pub use plan::{HeaderCache, Plan, Policy};
pub use segmenter::{Clock, NoHooks, SegmentHooks, Segmenter};

/// Recorder attached to one published stream.
///
/// Frames are only forwarded while the vhost's apply filter selects the
/// stream. The current segment is closed when the recorder is dropped.
pub struct Dvr {
    plan: Plan,
    request: StreamRequest,
    active: bool,
}

impl Dvr {
    pub fn new(
        vhost: &VhostConfig,
        request: StreamRequest,
        notifier: AsyncNotifier,
    ) -> Result<Self, DvrError> {
        let active = vhost.dvr.applies_to(&request.app, &request.stream);
        let plan = Plan::create(request.clone(), &vhost.dvr, notifier)?;
        tracing::debug!(
            stream = %request,
            plan = ?plan.kind(),
            active,
            "dvr created"
        );
        Ok(Self {
            plan,
            request,
            active,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.plan.set_clock(clock);
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    pub fn on_publish(&mut self) -> Result<(), DvrError> {
        if !self.active {
            return Ok(());
        }
        self.plan.on_publish()
    }

    pub fn on_unpublish(&mut self) {
        self.plan.on_unpublish();
    }

    pub fn on_meta_data(&mut self, frame: &Frame) -> Result<(), DvrError> {
        if !self.active {
            return Ok(());
        }
        self.plan.on_meta_data(frame)
    }

    pub fn on_audio(&mut self, frame: &Frame) -> Result<(), DvrError> {
        if !self.active {
            return Ok(());
        }
        self.plan.on_audio(frame)
    }

    pub fn on_video(&mut self, frame: &Frame) -> Result<(), DvrError> {
        if !self.active {
            return Ok(());
        }
        self.plan.on_video(frame)
    }

    /// Re-evaluates the apply filter and republishes when it flipped.
    pub fn reload(&mut self, vhost: &VhostConfig) -> Result<(), DvrError> {
        self.plan.reload(&vhost.dvr);

        let active = vhost.dvr.applies_to(&self.request.app, &self.request.stream);
        if active == self.active {
            return Ok(());
        }
        tracing::info!(stream = %self.request, active, "dvr apply filter changed");
        self.active = active;
        self.plan.on_unpublish();
        self.on_publish()
    }

    pub fn close(&mut self) -> Result<(), DvrError> {
        self.plan.close()
    }
}

impl Drop for Dvr {
    fn drop(&mut self) {
        if let Err(e) = self.plan.close() {
            tracing::warn!(stream = %self.request, error = %e, "failed to close dvr on drop");
        }
    }
}

/// Creates recorders from the vhost configuration and owns the shared
/// callback worker.
pub struct DvrService {
    config: Config,
    notifier: AsyncNotifier,
}

impl DvrService {
    pub fn new(config: Config, notifier: AsyncNotifier) -> Self {
        Self { config, notifier }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn notifier(&self) -> &AsyncNotifier {
        &self.notifier
    }

    /// Settings for `vhost`; an unknown vhost without a default records
    /// nothing.
    pub fn vhost_config(&self, vhost: &str) -> VhostConfig {
        self.config
            .vhost(vhost)
            .cloned()
            .unwrap_or_else(|| VhostConfig::new(vhost))
    }

    pub fn create_dvr(&self, request: StreamRequest) -> Result<Dvr, DvrError> {
        let vhost = self.vhost_config(&request.vhost);
        Dvr::new(&vhost, request, self.notifier.clone())
    }

    /// Swaps in new settings. Live recorders pick them up through
    /// [`Dvr::reload`]; callback endpoints apply immediately.
    pub fn reload(&mut self, config: Config) {
        self.notifier.reload(HookTable::from_config(&config));
        self.config = config;
        tracing::info!(vhosts = self.config.vhosts.len(), "dvr config reloaded");
    }

    /// Reports a finished client connection with its byte counters.
    pub fn notify_close(
        &self,
        request: &StreamRequest,
        send_bytes: u64,
        recv_bytes: u64,
    ) -> Result<(), DvrError> {
        self.notifier
            .execute(NotifyJob::close(request.clone(), send_bytes, recv_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::segmenter::tests::{ticking_clock, AVC_KEY};
    use super::*;
    use crate::hooks::{CallbackSink, HookError, NotifyEvent};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Events {
        seen: Mutex<Vec<NotifyEvent>>,
    }

    #[async_trait]
    impl CallbackSink for Events {
        async fn invoke(&self, _url: &str, job: &NotifyJob, _timeout: Duration) -> Result<(), HookError> {
            self.seen.lock().unwrap().push(job.event.clone());
            Ok(())
        }
    }

    fn config(dir: &Path, apply: &str) -> Config {
        Config::parse(&format!(
            r#"
[[vhosts]]
name = "__defaultVhost__"

[vhosts.dvr]
enabled = true
plan = "session"
path = "{}/[app]/[stream].[timestamp].flv"
apply = ["{apply}"]

[vhosts.http_hooks]
enabled = true
on_dvr = ["http://hooks/dvr"]
on_close = ["http://hooks/close"]
"#,
            dir.display()
        ))
        .unwrap()
    }

    fn service(config: Config) -> (DvrService, Arc<Events>) {
        let events = Arc::new(Events::default());
        let notifier = AsyncNotifier::new(HookTable::from_config(&config), events.clone());
        notifier.start().unwrap();
        (DvrService::new(config, notifier), events)
    }

    fn recorded(dir: &Path) -> usize {
        std::fs::read_dir(dir.join("live"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_apply_filter_gates_recording() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(config(dir.path(), "live/other"));
        let mut dvr = service
            .create_dvr(StreamRequest::new("v", "live", "cam"))
            .unwrap()
            .with_clock(ticking_clock());
        assert!(!dvr.is_active());

        dvr.on_publish().unwrap();
        dvr.on_video(&Frame::video(0, AVC_KEY.to_vec())).unwrap();
        assert!(!dvr.plan().is_enabled());
        assert_eq!(recorded(dir.path()), 0);

        // selecting the stream on reload starts recording right away
        let reloaded = config(dir.path(), "live/cam");
        dvr.reload(reloaded.vhost("v").unwrap()).unwrap();
        assert!(dvr.is_active());
        assert!(dvr.plan().is_enabled());
        dvr.on_video(&Frame::video(0, AVC_KEY.to_vec())).unwrap();
        dvr.on_unpublish();
        assert_eq!(recorded(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_drop_finalizes_open_segment() {
        let dir = tempfile::tempdir().unwrap();
        let (service, events) = service(config(dir.path(), "all"));
        let mut dvr = service
            .create_dvr(StreamRequest::new("v", "live", "cam"))
            .unwrap();
        dvr.on_publish().unwrap();
        dvr.on_video(&Frame::video(0, AVC_KEY.to_vec())).unwrap();
        let tmp = dvr.plan().segmenter().tmp_path().to_path_buf();
        let path = dvr.plan().segmenter().path().to_path_buf();
        drop(dvr);

        assert!(!tmp.exists());
        assert!(path.exists());
        service.notifier().shutdown().await;
        assert_eq!(
            *events.seen.lock().unwrap(),
            vec![NotifyEvent::Dvr { file: path }]
        );
    }

    #[tokio::test]
    async fn test_notify_close_carries_byte_counts() {
        let dir = tempfile::tempdir().unwrap();
        let (service, events) = service(config(dir.path(), "all"));
        let request = StreamRequest::new("v", "live", "cam").with_client("c7", "127.0.0.1");
        service.notify_close(&request, 4096, 128).unwrap();
        service.notifier().shutdown().await;
        assert_eq!(
            *events.seen.lock().unwrap(),
            vec![NotifyEvent::Close {
                send_bytes: 4096,
                recv_bytes: 128
            }]
        );
    }

    #[tokio::test]
    async fn test_reload_updates_callbacks() {
        let dir = tempfile::tempdir().unwrap();
        let (mut service, events) = service(config(dir.path(), "all"));
        let quiet = Config::parse("[[vhosts]]\nname = \"__defaultVhost__\"\n").unwrap();
        service.reload(quiet);
        assert!(!service.vhost_config("v").dvr.enabled);

        service
            .notify_close(&StreamRequest::new("v", "live", "cam"), 1, 1)
            .unwrap();
        service.notifier().shutdown().await;
        assert!(events.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_vhost_records_nothing() {
        let config = Config::parse("[[vhosts]]\nname = \"a\"\n[vhosts.dvr]\nenabled = true\n").unwrap();
        let notifier = AsyncNotifier::new(HookTable::default(), Arc::new(Events::default()));
        let service = DvrService::new(config, notifier);
        let vhost = service.vhost_config("b");
        assert_eq!(vhost.name, "b");
        assert!(!vhost.dvr.enabled);
    }
}
