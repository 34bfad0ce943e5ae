mod reader;
mod writer;

use std::path::Path;

pub use reader::{read_all_tags, FlvReader, FlvTag};
pub use writer::{ContainerWriter, ResumedSummary, SERVICE_NAME};

pub const FLV_SIGNATURE: [u8; 3] = *b"FLV";
pub const FLV_HEADER_SIZE: usize = 9;
pub const TAG_HEADER_SIZE: usize = 11;
pub const PREVIOUS_TAG_SIZE: usize = 4;

pub const TAG_AUDIO: u8 = 8;
pub const TAG_VIDEO: u8 = 9;
pub const TAG_SCRIPT: u8 = 18;

/// On-disk container, chosen from the path template's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Flv,
    /// Placeholder: the file is created but nothing is encoded into it.
    Mp4,
}

impl ContainerFormat {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let is_mp4 = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("mp4"));
        if is_mp4 {
            ContainerFormat::Mp4
        } else {
            ContainerFormat::Flv
        }
    }

    pub fn supports_append(self) -> bool {
        matches!(self, ContainerFormat::Flv)
    }

    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Flv => "flv",
            ContainerFormat::Mp4 => "mp4",
        }
    }
}

#[cfg(test)]
pub(crate) use writer::tests::on_metadata_payload;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(ContainerFormat::from_path("/a/b.flv"), ContainerFormat::Flv);
        assert_eq!(ContainerFormat::from_path("/a/b.MP4"), ContainerFormat::Mp4);
        assert_eq!(ContainerFormat::from_path("/a/b"), ContainerFormat::Flv);
        assert!(ContainerFormat::Flv.supports_append());
        assert!(!ContainerFormat::Mp4.supports_append());
    }
}
