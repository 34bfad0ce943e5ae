use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::config::DvrConfig;
use crate::container::{ContainerFormat, ContainerWriter};
use crate::error::DvrError;
use crate::media::Frame;
use crate::request::StreamRequest;

use super::jitter::{JitterCorrector, JitterMode};
use super::path::{build_path, normalize_template};

pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// Callbacks from the segmenter into the policy driving it.
pub trait SegmentHooks {
    fn filter_timestamp(&self, timestamp: i64) -> i64 {
        timestamp
    }

    /// Called on the first real keyframe of a segment, before it is written.
    fn on_video_keyframe(&mut self) -> Result<(), DvrError> {
        Ok(())
    }
}

/// No-op hooks for callers that do not need them.
pub struct NoHooks;

impl SegmentHooks for NoHooks {}

/// Owns one physical recording file at a time.
pub struct Segmenter {
    request: StreamRequest,
    template: String,
    format: ContainerFormat,
    jitter_mode: JitterMode,
    wait_keyframe: bool,
    clock: Clock,
    writer: ContainerWriter,
    jitter: Option<JitterCorrector>,
    path: PathBuf,
    tmp_path: PathBuf,
    /// Segment duration in ms.
    duration: i64,
    /// Duration across every segment of this stream in ms.
    stream_duration: i64,
    previous_timestamp: Option<i64>,
    has_keyframe: bool,
}

impl Segmenter {
    pub fn new(request: StreamRequest, config: &DvrConfig) -> Self {
        let template = normalize_template(&config.path);
        let format = ContainerFormat::from_path(&template);
        Self {
            request,
            template,
            format,
            jitter_mode: config.time_jitter,
            wait_keyframe: config.wait_keyframe,
            clock: Arc::new(Local::now),
            writer: ContainerWriter::new(format),
            jitter: None,
            path: PathBuf::new(),
            tmp_path: PathBuf::new(),
            duration: 0,
            stream_duration: 0,
            previous_timestamp: None,
            has_keyframe: false,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.set_clock(clock);
        self
    }

    /// Replaces the wall clock used to resolve time placeholders.
    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    /// Applies changed settings; takes effect on the next frame.
    pub fn reload(&mut self, config: &DvrConfig) {
        self.jitter_mode = config.time_jitter;
        self.wait_keyframe = config.wait_keyframe;
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_open()
    }

    /// Final path of the current or last segment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path actually being written, `<path>.tmp` until the segment is closed.
    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn stream_duration(&self) -> i64 {
        self.stream_duration
    }

    pub fn has_keyframe(&self) -> bool {
        self.has_keyframe
    }

    pub fn is_overflow(&self, max_duration_ms: i64) -> bool {
        self.duration >= max_duration_ms
    }

    pub fn writer(&self) -> &ContainerWriter {
        &self.writer
    }

    pub fn open(&mut self, use_tmp_file: bool) -> Result<(), DvrError> {
        if self.writer.is_open() {
            return Ok(());
        }

        let path = build_path(&self.template, &self.request, (self.clock)());
        let target_exists = path.exists();
        if target_exists && !self.format.supports_append() {
            tracing::error!(path = %path.display(), "cannot append to existing file");
            return Err(DvrError::AppendUnsupportedByFormat(path));
        }

        let fresh_jitter = self.create_jitter(target_exists);

        // an existing target is always appended in place
        let tmp_path = if target_exists || !use_tmp_file {
            path.clone()
        } else {
            let mut tmp = path.clone().into_os_string();
            tmp.push(".tmp");
            PathBuf::from(tmp)
        };

        let appended = self.writer.open(&tmp_path, target_exists)?;
        self.path = path;
        self.tmp_path = tmp_path;
        self.has_keyframe = false;
        self.previous_timestamp = None;

        if appended {
            if let (true, Some(resumed)) = (fresh_jitter, self.writer.resumed()) {
                self.duration = resumed.duration_ms;
            }
            tracing::info!(
                stream = %self.request,
                path = %self.path.display(),
                duration_ms = self.duration,
                "dvr appending to existing file"
            );
        } else {
            if let Err(e) = self.writer.write_header() {
                let _ = self.writer.close();
                return Err(e);
            }
            tracing::info!(
                stream = %self.request,
                path = %self.tmp_path.display(),
                "dvr segment opened"
            );
        }

        Ok(())
    }

    /// A new target gets fresh jitter state and zero duration; an existing
    /// one keeps the state this segmenter already has.
    fn create_jitter(&mut self, target_exists: bool) -> bool {
        if !target_exists {
            self.jitter = Some(JitterCorrector::new());
            self.duration = 0;
            return true;
        }
        if self.jitter.is_some() {
            return false;
        }
        self.jitter = Some(JitterCorrector::new());
        true
    }

    /// Finalizes the segment. Returns the final path when a segment was
    /// actually closed.
    pub fn close(&mut self) -> Result<Option<PathBuf>, DvrError> {
        if !self.writer.is_open() {
            return Ok(None);
        }

        let refreshed = self.refresh_metadata();
        let closed = self.writer.close();
        refreshed?;
        closed?;

        if self.tmp_path != self.path {
            std::fs::rename(&self.tmp_path, &self.path).map_err(|source| {
                tracing::error!(
                    from = %self.tmp_path.display(),
                    to = %self.path.display(),
                    error = %source,
                    "failed to rename segment"
                );
                DvrError::RenameFailed {
                    from: self.tmp_path.clone(),
                    to: self.path.clone(),
                    source,
                }
            })?;
        }

        tracing::info!(
            stream = %self.request,
            path = %self.path.display(),
            duration_ms = self.duration,
            "dvr segment closed"
        );
        Ok(Some(self.path.clone()))
    }

    pub fn write_metadata(&mut self, frame: &Frame) -> Result<(), DvrError> {
        if !self.writer.is_open() {
            return Ok(());
        }
        let mut metadata = frame.clone();
        if let Some(jitter) = self.jitter.as_mut() {
            jitter.correct(&mut metadata, self.jitter_mode);
        }
        self.writer.write_metadata(&metadata.payload)
    }

    pub fn write_audio(&mut self, frame: &Frame, hooks: &mut dyn SegmentHooks) -> Result<(), DvrError> {
        if !self.writer.is_open() {
            return Ok(());
        }
        let mut audio = frame.clone();

        if self.should_drop(&audio) {
            tracing::trace!(stream = %self.request, "drop audio before first keyframe");
            return Ok(());
        }

        self.correct(&mut audio);
        let timestamp = hooks.filter_timestamp(audio.timestamp);
        self.writer.write_audio(timestamp, &audio.payload)?;
        self.update_duration(audio.timestamp);
        Ok(())
    }

    pub fn write_video(&mut self, frame: &Frame, hooks: &mut dyn SegmentHooks) -> Result<(), DvrError> {
        if !self.writer.is_open() {
            return Ok(());
        }
        let mut video = frame.clone();

        if video.is_keyframe() && !self.has_keyframe {
            self.has_keyframe = true;
            hooks.on_video_keyframe()?;
        }

        if self.should_drop(&video) {
            tracing::trace!(stream = %self.request, "drop video before first keyframe");
            return Ok(());
        }

        self.correct(&mut video);
        let timestamp = hooks.filter_timestamp(video.timestamp);
        self.writer.write_video(timestamp, &video.payload)?;
        self.update_duration(video.timestamp);
        Ok(())
    }

    /// Patches the current size and duration into the metadata record.
    pub fn refresh_metadata(&mut self) -> Result<(), DvrError> {
        if !self.writer.is_open() {
            return Ok(());
        }
        let (filesize_offset, duration_offset) = self.writer.summary_offsets();
        if filesize_offset == 0 || duration_offset == 0 {
            return Ok(());
        }
        let filesize = self.writer.file_size();
        self.writer
            .patch_summary(filesize, self.duration as f64 / 1000.0)
    }

    fn should_drop(&self, frame: &Frame) -> bool {
        self.wait_keyframe && !self.has_keyframe && !frame.is_sequence_header()
    }

    fn correct(&mut self, frame: &mut Frame) {
        if let Some(jitter) = self.jitter.as_mut() {
            jitter.correct(frame, self.jitter_mode);
        }
    }

    /// Accumulates the non-negative step from the previous written frame; a
    /// timestamp in the past resets the reference instead.
    fn update_duration(&mut self, timestamp: i64) {
        let previous = match self.previous_timestamp {
            Some(p) if p <= timestamp => p,
            _ => timestamp,
        };
        let delta = timestamp - previous;
        self.duration += delta;
        self.stream_duration += delta;
        self.previous_timestamp = Some(timestamp);
    }
}
