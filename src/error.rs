use std::path::PathBuf;

use thiserror::Error;

use crate::media::Amf0Error;

#[derive(Debug, Error)]
pub enum DvrError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to create directory {path}: {source}")]
    PathCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("container cannot append to existing file {0}")]
    CannotAppendToExistingPath(PathBuf),
    #[error("format of {0} does not support appending to an existing file")]
    AppendUnsupportedByFormat(PathBuf),
    #[error("illegal dvr plan: {0}")]
    IllegalPlan(String),
    #[error("failed to rename {from} to {to}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed metadata: {0}")]
    Encoding(#[from] Amf0Error),
    #[error("tag payload of {0} bytes exceeds the 24-bit size field")]
    TagTooLarge(usize),
    #[error("invalid flv data: {0}")]
    InvalidFlv(String),
    #[error("notify worker is not running")]
    WorkerNotRunning,
    #[error("no async runtime available to start the notify worker")]
    NoRuntime,
}

impl DvrError {
    /// Errors caused by the container format or plan configuration, fatal to
    /// starting a recording.
    pub fn is_format_policy(&self) -> bool {
        matches!(
            self,
            DvrError::CannotAppendToExistingPath(_)
                | DvrError::AppendUnsupportedByFormat(_)
                | DvrError::IllegalPlan(_)
        )
    }

    /// Errors that only abort the current write; the stream may keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DvrError::Io(_) | DvrError::Encoding(_) | DvrError::TagTooLarge(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        assert!(DvrError::IllegalPlan("append".into()).is_format_policy());
        assert!(DvrError::AppendUnsupportedByFormat(PathBuf::from("a.mp4")).is_format_policy());
        assert!(!DvrError::WorkerNotRunning.is_format_policy());

        let io = DvrError::from(std::io::Error::other("disk full"));
        assert!(io.is_recoverable());
        assert!(DvrError::Encoding(Amf0Error::UnexpectedEof(0)).is_recoverable());
        assert!(!DvrError::RenameFailed {
            from: PathBuf::from("a.tmp"),
            to: PathBuf::from("a"),
            source: std::io::Error::other("x"),
        }
        .is_recoverable());
    }
}
