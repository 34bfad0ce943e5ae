use std::path::PathBuf;

use crate::config::{DvrConfig, PlanKind};
use crate::error::DvrError;
use crate::hooks::{AsyncNotifier, NotifyJob};
use crate::media::Frame;
use crate::request::StreamRequest;

use super::segmenter::{Clock, SegmentHooks, Segmenter};

/// Most recent metadata and sequence headers, replayed at the head of every
/// rotated segment.
#[derive(Debug, Clone, Default)]
pub struct HeaderCache {
    pub metadata: Option<Frame>,
    pub sh_audio: Option<Frame>,
    pub sh_video: Option<Frame>,
}

impl HeaderCache {
    fn restamped(&self, timestamp: i64) -> Self {
        let restamp = |frame: &Option<Frame>| {
            frame.as_ref().map(|f| Frame {
                timestamp,
                ..f.clone()
            })
        };
        Self {
            metadata: restamp(&self.metadata),
            sh_audio: restamp(&self.sh_audio),
            sh_video: restamp(&self.sh_video),
        }
    }
}

pub enum Policy {
    /// One file per publish session.
    Session,
    /// One file per path, kept across publishes.
    Append { last_update_time: Option<i64> },
    /// Rotates once a segment reaches `duration_ms`.
    Segment { duration_ms: i64, cache: HeaderCache },
}

impl Policy {
    fn from_config(config: &DvrConfig) -> Self {
        match config.plan {
            PlanKind::Session => Policy::Session,
            PlanKind::Append => Policy::Append {
                last_update_time: None,
            },
            PlanKind::Segment => Policy::Segment {
                duration_ms: config.segment_duration_ms(),
                cache: HeaderCache::default(),
            },
        }
    }

    pub fn kind(&self) -> PlanKind {
        match self {
            Policy::Session => PlanKind::Session,
            Policy::Append { .. } => PlanKind::Append,
            Policy::Segment { .. } => PlanKind::Segment,
        }
    }
}

impl SegmentHooks for Policy {}

/// Recording policy bound to one stream.
pub struct Plan {
    request: StreamRequest,
    config: DvrConfig,
    segmenter: Segmenter,
    notifier: AsyncNotifier,
    enabled: bool,
    policy: Policy,
}

impl Plan {
    pub fn create(
        request: StreamRequest,
        config: &DvrConfig,
        notifier: AsyncNotifier,
    ) -> Result<Self, DvrError> {
        let segmenter = Segmenter::new(request.clone(), config);
        if config.plan == PlanKind::Append && !segmenter.format().supports_append() {
            tracing::error!(stream = %request, path = %config.path, "append plan needs an appendable format");
            return Err(DvrError::IllegalPlan(format!(
                "append cannot record to {}",
                segmenter.format().extension()
            )));
        }

        Ok(Self {
            request,
            config: config.clone(),
            segmenter,
            notifier,
            enabled: false,
            policy: Policy::from_config(config),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.set_clock(clock);
        self
    }

    pub fn set_clock(&mut self, clock: Clock) {
        self.segmenter.set_clock(clock);
    }

    pub fn kind(&self) -> PlanKind {
        self.policy.kind()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    pub fn on_publish(&mut self) -> Result<(), DvrError> {
        if self.enabled || !self.config.enabled {
            return Ok(());
        }

        match self.policy {
            Policy::Session | Policy::Segment { .. } => {
                self.close_segment()?;
                self.segmenter.open(true)?;
            }
            Policy::Append { .. } => self.segmenter.open(false)?,
        }

        self.enabled = true;
        Ok(())
    }

    /// Only a session ends its file here; the other plans keep recording
    /// into the same file until torn down.
    pub fn on_unpublish(&mut self) {
        if !self.enabled {
            return;
        }
        if let Policy::Session = self.policy {
            if let Err(e) = self.close_segment() {
                tracing::warn!(stream = %self.request, error = %e, "ignore dvr close error");
            }
            self.enabled = false;
        }
    }

    /// A segment plan caches the metadata even while disabled, so the first
    /// file after a publish can replay it.
    pub fn on_meta_data(&mut self, frame: &Frame) -> Result<(), DvrError> {
        if let Policy::Segment { cache, .. } = &mut self.policy {
            cache.metadata = Some(frame.clone());
        }
        if !self.enabled {
            return Ok(());
        }
        self.segmenter.write_metadata(frame)
    }

    /// Sequence headers are cached for segment replay even while disabled.
    pub fn on_audio(&mut self, frame: &Frame) -> Result<(), DvrError> {
        if let Policy::Segment { cache, .. } = &mut self.policy {
            if frame.is_sequence_header() {
                cache.sh_audio = Some(frame.clone());
            }
        }
        if !self.enabled {
            return Ok(());
        }
        self.update_duration(frame)?;
        self.segmenter.write_audio(frame, &mut self.policy)
    }

    /// Same caching rule as [`Plan::on_audio`].
    pub fn on_video(&mut self, frame: &Frame) -> Result<(), DvrError> {
        if let Policy::Segment { cache, .. } = &mut self.policy {
            if frame.is_sequence_header() {
                cache.sh_video = Some(frame.clone());
            }
        }
        if !self.enabled {
            return Ok(());
        }
        self.update_duration(frame)?;
        self.segmenter.write_video(frame, &mut self.policy)
    }

    /// Closes the current segment for good.
    pub fn close(&mut self) -> Result<(), DvrError> {
        self.enabled = false;
        self.close_segment()
    }

    /// Applies new settings from the same vhost. A changed plan kind needs a
    /// new `Plan` and is ignored here.
    pub fn reload(&mut self, config: &DvrConfig) {
        if config.plan != self.kind() {
            tracing::warn!(
                stream = %self.request,
                from = ?self.kind(),
                to = ?config.plan,
                "dvr plan change applies to the next publish only"
            );
        }
        if let Policy::Segment { duration_ms, .. } = &mut self.policy {
            *duration_ms = config.segment_duration_ms();
        }
        self.segmenter.reload(config);

        let plan = self.config.plan;
        self.config = config.clone();
        self.config.plan = plan;
    }

    fn update_duration(&mut self, frame: &Frame) -> Result<(), DvrError> {
        match self.policy {
            Policy::Session => Ok(()),
            Policy::Append { .. } => {
                self.refresh_append(frame.timestamp);
                Ok(())
            }
            Policy::Segment { duration_ms, .. } => self.rotate_segment(frame, duration_ms),
        }
    }

    /// Patches the summary once per interval of payload time.
    fn refresh_append(&mut self, timestamp: i64) {
        let interval = self.config.refresh_interval_ms;
        let Policy::Append { last_update_time } = &mut self.policy else {
            return;
        };
        match *last_update_time {
            Some(last) if timestamp >= last => {
                if timestamp - last < interval {
                    return;
                }
            }
            _ => {
                *last_update_time = Some(timestamp);
                return;
            }
        }
        *last_update_time = Some(timestamp);

        if let Err(e) = self.segmenter.refresh_metadata() {
            tracing::warn!(stream = %self.request, error = %e, "failed to refresh dvr metadata");
        }
    }

    fn rotate_segment(&mut self, frame: &Frame, duration_ms: i64) -> Result<(), DvrError> {
        if duration_ms <= 0 || !self.segmenter.is_overflow(duration_ms) {
            return Ok(());
        }
        if self.config.wait_keyframe && !frame.is_keyframe() {
            return Ok(());
        }

        self.close_segment()?;
        self.segmenter.open(true)?;

        // replayed headers carry the triggering frame's time so they add
        // nothing to the new segment's duration
        let replay = match &self.policy {
            Policy::Segment { cache, .. } => cache.restamped(frame.timestamp),
            _ => HeaderCache::default(),
        };
        if let Some(metadata) = &replay.metadata {
            self.segmenter.write_metadata(metadata)?;
        }
        if let Some(sh_video) = &replay.sh_video {
            self.segmenter.write_video(sh_video, &mut self.policy)?;
        }
        if let Some(sh_audio) = &replay.sh_audio {
            self.segmenter.write_audio(sh_audio, &mut self.policy)?;
        }
        Ok(())
    }

    fn close_segment(&mut self) -> Result<(), DvrError> {
        if let Some(path) = self.segmenter.close()? {
            self.on_reap_segment(path)?;
        }
        Ok(())
    }

    fn on_reap_segment(&self, path: PathBuf) -> Result<(), DvrError> {
        self.notifier
            .execute(NotifyJob::dvr(self.request.clone(), path))
    }
}
