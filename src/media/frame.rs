use std::sync::Arc;

const SOUND_FORMAT_AAC: u8 = 10;
const VIDEO_CODEC_AVC: u8 = 7;
const VIDEO_CODEC_HEVC: u8 = 12;
const VIDEO_FRAME_KEY: u8 = 1;
const PACKET_TYPE_SEQUENCE_HEADER: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Audio,
    Video,
    Metadata,
}

/// A timestamped media unit as carried in an FLV tag body.
///
/// The payload is shared; cloning a frame never copies media bytes, so a
/// recorder can keep its own copy and rewrite the timestamp freely.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub timestamp: i64,
    pub payload: Arc<[u8]>,
}

impl Frame {
    pub fn new(kind: FrameKind, timestamp: i64, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            kind,
            timestamp,
            payload: payload.into(),
        }
    }

    pub fn audio(timestamp: i64, payload: impl Into<Arc<[u8]>>) -> Self {
        Self::new(FrameKind::Audio, timestamp, payload)
    }

    pub fn video(timestamp: i64, payload: impl Into<Arc<[u8]>>) -> Self {
        Self::new(FrameKind::Video, timestamp, payload)
    }

    pub fn metadata(payload: impl Into<Arc<[u8]>>) -> Self {
        Self::new(FrameKind::Metadata, 0, payload)
    }

    pub fn is_audio(&self) -> bool {
        self.kind == FrameKind::Audio
    }

    pub fn is_video(&self) -> bool {
        self.kind == FrameKind::Video
    }

    pub fn is_av(&self) -> bool {
        self.is_audio() || self.is_video()
    }

    /// AVC/HEVC decoder configuration or AAC AudioSpecificConfig.
    pub fn is_sequence_header(&self) -> bool {
        match self.kind {
            FrameKind::Video => video_is_sequence_header(&self.payload),
            FrameKind::Audio => audio_is_sequence_header(&self.payload),
            FrameKind::Metadata => false,
        }
    }

    /// A decodable video keyframe; sequence headers do not count.
    pub fn is_keyframe(&self) -> bool {
        self.kind == FrameKind::Video && video_is_keyframe(&self.payload)
    }
}

fn video_codec(payload: &[u8]) -> Option<u8> {
    payload.first().map(|b| b & 0x0F)
}

fn video_is_avc_like(payload: &[u8]) -> bool {
    matches!(video_codec(payload), Some(VIDEO_CODEC_AVC) | Some(VIDEO_CODEC_HEVC))
}

pub fn video_is_sequence_header(payload: &[u8]) -> bool {
    video_is_avc_like(payload)
        && payload.len() >= 2
        && (payload[0] >> 4) == VIDEO_FRAME_KEY
        && payload[1] == PACKET_TYPE_SEQUENCE_HEADER
}

pub fn video_is_keyframe(payload: &[u8]) -> bool {
    video_is_avc_like(payload)
        && (payload[0] >> 4) == VIDEO_FRAME_KEY
        && !video_is_sequence_header(payload)
}

pub fn audio_is_sequence_header(payload: &[u8]) -> bool {
    payload.len() >= 2
        && (payload[0] >> 4) == SOUND_FORMAT_AAC
        && payload[1] == PACKET_TYPE_SEQUENCE_HEADER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_classification() {
        let sh = Frame::video(0, vec![0x17, 0x00, 0x00, 0x00, 0x00]);
        assert!(sh.is_sequence_header());
        assert!(!sh.is_keyframe());

        let key = Frame::video(0, vec![0x17, 0x01, 0x00, 0x00, 0x00]);
        assert!(key.is_keyframe());
        assert!(!key.is_sequence_header());

        let inter = Frame::video(0, vec![0x27, 0x01, 0x00, 0x00, 0x00]);
        assert!(!inter.is_keyframe());
        assert!(!inter.is_sequence_header());

        let hevc_key = Frame::video(0, vec![0x1C, 0x01]);
        assert!(hevc_key.is_keyframe());
    }

    #[test]
    fn test_non_avc_keyframe_is_not_keyframe() {
        // Sorenson H.263 keyframe has no AVC packet type
        let key = Frame::video(0, vec![0x12, 0x00]);
        assert!(!key.is_keyframe());
        assert!(!key.is_sequence_header());
    }

    #[test]
    fn test_audio_classification() {
        assert!(Frame::audio(0, vec![0xAF, 0x00, 0x12, 0x10]).is_sequence_header());
        assert!(!Frame::audio(0, vec![0xAF, 0x01, 0x21]).is_sequence_header());
        // MP3 has no sequence header
        assert!(!Frame::audio(0, vec![0x2F, 0x00]).is_sequence_header());
        assert!(!Frame::audio(0, vec![0xAF, 0x01]).is_keyframe());
    }

    #[test]
    fn test_empty_payload() {
        let frame = Frame::video(0, Vec::new());
        assert!(!frame.is_keyframe());
        assert!(!frame.is_sequence_header());
    }
}
