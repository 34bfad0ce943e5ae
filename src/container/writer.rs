//! Incremental FLV writer with in-place summary patching.
//!
//! The metadata record is written once near the front of the file with
//! `filesize` and `duration` as its last two properties. Their 8-byte payload
//! offsets are remembered so `patch_summary` can rewrite them while the file
//! keeps growing.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::DvrError;
use crate::media::amf0::{self, Amf0Reader, Amf0Value, NUMBER_SIZE, OBJECT_END_SIZE};

use super::reader::FlvReader;
use super::{ContainerFormat, FLV_HEADER_SIZE, FLV_SIGNATURE, TAG_HEADER_SIZE};
use super::{TAG_AUDIO, TAG_SCRIPT, TAG_VIDEO};

const BUF_WRITER_SIZE: usize = 64 * 1024;
const MAX_TAG_DATA_SIZE: usize = 0x00FF_FFFF;
const FLV_TYPE_FLAGS_AV: u8 = 0x05;
const SET_DATA_FRAME: &str = "@setDataFrame";
pub const SERVICE_NAME: &str = "streamdvr";

/// Summary fields recovered from a file opened for append.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResumedSummary {
    pub duration_ms: i64,
}

pub struct ContainerWriter {
    format: ContainerFormat,
    out: Option<BufWriter<File>>,
    path: PathBuf,
    position: u64,
    duration_offset: u64,
    filesize_offset: u64,
    resumed: Option<ResumedSummary>,
}

impl ContainerWriter {
    pub fn new(format: ContainerFormat) -> Self {
        Self {
            format,
            out: None,
            path: PathBuf::new(),
            position: 0,
            duration_offset: 0,
            filesize_offset: 0,
            resumed: None,
        }
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn is_open(&self) -> bool {
        self.out.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the file, which is also the write cursor.
    pub fn file_size(&self) -> u64 {
        self.position
    }

    /// `(filesize_offset, duration_offset)`, zero while unknown.
    pub fn summary_offsets(&self) -> (u64, u64) {
        (self.filesize_offset, self.duration_offset)
    }

    pub fn resumed(&self) -> Option<ResumedSummary> {
        self.resumed
    }

    /// Opens `path`, appending when asked to and the file already has content.
    ///
    /// Returns `true` when the writer continues an existing file, in which case
    /// no header must be written.
    pub fn open(&mut self, path: &Path, append: bool) -> Result<bool, DvrError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| DvrError::PathCreationFailed {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let existing_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let appending = append && existing_len > 0;
        if appending && !self.format.supports_append() {
            return Err(DvrError::CannotAppendToExistingPath(path.to_path_buf()));
        }

        self.duration_offset = 0;
        self.filesize_offset = 0;
        self.resumed = None;
        self.path = path.to_path_buf();

        let file = if appending {
            // not O_APPEND: summary patches must be able to seek backwards
            let mut file = OpenOptions::new().read(true).write(true).open(path)?;
            self.recover_summary(&mut file)?;
            self.position = file.seek(SeekFrom::End(0))?;
            file
        } else {
            self.position = 0;
            File::create(path)?
        };

        self.out = Some(BufWriter::with_capacity(BUF_WRITER_SIZE, file));

        tracing::debug!(
            path = %path.display(),
            appending,
            position = self.position,
            "container opened"
        );
        Ok(appending)
    }

    fn recover_summary(&mut self, file: &mut File) -> Result<(), DvrError> {
        file.seek(SeekFrom::Start(0))?;
        let mut reader = match FlvReader::new(BufReader::new(&mut *file)) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot scan existing file");
                return Ok(());
            }
        };
        let tag = match reader.next_tag() {
            Ok(Some(tag)) if tag.tag_type == TAG_SCRIPT => tag,
            _ => return Ok(()),
        };

        let mut amf = Amf0Reader::new(&tag.data);
        if amf.read_string().is_err() {
            return Ok(());
        }
        let Ok(props) = amf.read_located_properties() else {
            return Ok(());
        };

        let body_start = tag.offset + TAG_HEADER_SIZE as u64;
        let number_offset = |key: &str| {
            props
                .iter()
                .find(|p| p.key == key && p.value.as_number().is_some())
                .map(|p| (body_start + p.value_offset as u64 + 1, p.value.as_number()))
        };

        if let (Some((filesize_offset, _)), Some((duration_offset, Some(secs)))) =
            (number_offset("filesize"), number_offset("duration"))
        {
            self.filesize_offset = filesize_offset;
            self.duration_offset = duration_offset;
            self.resumed = Some(ResumedSummary {
                duration_ms: (secs * 1000.0).max(0.0) as i64,
            });
        } else {
            // never add a second metadata record to an existing file
            self.resumed = Some(ResumedSummary { duration_ms: 0 });
        }
        Ok(())
    }

    pub fn write_header(&mut self) -> Result<(), DvrError> {
        if self.format != ContainerFormat::Flv {
            return Ok(());
        }
        let mut header = Vec::with_capacity(FLV_HEADER_SIZE + 4);
        header.extend_from_slice(&FLV_SIGNATURE);
        header.push(0x01);
        header.push(FLV_TYPE_FLAGS_AV);
        header.extend_from_slice(&(FLV_HEADER_SIZE as u32).to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes());
        self.write_bytes(&header)
    }

    /// Writes the metadata record once per file and remembers where the
    /// summary numbers live.
    pub fn write_metadata(&mut self, payload: &[u8]) -> Result<(), DvrError> {
        if self.format != ContainerFormat::Flv {
            return Ok(());
        }
        if self.duration_offset != 0 || self.filesize_offset != 0 || self.resumed.is_some() {
            return Ok(());
        }

        let body = build_metadata(payload)?;
        let tag_start = self.position;

        // object end (3B) and the duration number (8B) close the body
        let duration_offset = tag_start + (TAG_HEADER_SIZE + body.len()) as u64
            - OBJECT_END_SIZE as u64
            - 8;
        // "duration" key (2B length + 8B) and the filesize number sit before it
        let filesize_offset =
            duration_offset - (2 + "duration".len()) as u64 - NUMBER_SIZE as u64;

        self.write_tag(TAG_SCRIPT, 0, &body)?;
        self.duration_offset = duration_offset;
        self.filesize_offset = filesize_offset;
        Ok(())
    }

    pub fn write_audio(&mut self, timestamp: i64, payload: &[u8]) -> Result<(), DvrError> {
        if self.format != ContainerFormat::Flv {
            return Ok(());
        }
        self.write_tag(TAG_AUDIO, timestamp, payload)
    }

    pub fn write_video(&mut self, timestamp: i64, payload: &[u8]) -> Result<(), DvrError> {
        if self.format != ContainerFormat::Flv {
            return Ok(());
        }
        self.write_tag(TAG_VIDEO, timestamp, payload)
    }

    /// Overwrites the filesize and duration payloads in place.
    ///
    /// The write cursor is restored whether or not the patch succeeds.
    pub fn patch_summary(&mut self, filesize: u64, duration_secs: f64) -> Result<(), DvrError> {
        if self.duration_offset == 0 || self.filesize_offset == 0 {
            return Ok(());
        }
        let cursor = self.position;
        let filesize_offset = self.filesize_offset;
        let duration_offset = self.duration_offset;
        let out = self.out.as_mut().ok_or_else(not_open)?;

        let patched = (|| -> std::io::Result<()> {
            out.seek(SeekFrom::Start(filesize_offset))?;
            out.write_all(&(filesize as f64).to_be_bytes())?;
            out.seek(SeekFrom::Start(duration_offset))?;
            out.write_all(&duration_secs.to_be_bytes())?;
            Ok(())
        })();
        let restored = out.seek(SeekFrom::Start(cursor));

        match patched.and(restored) {
            Ok(_) => Ok(()),
            Err(e) => Err(self.abandon(e)),
        }
    }

    /// Flushes and syncs the file; the handle is released even on failure.
    pub fn close(&mut self) -> Result<(), DvrError> {
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };
        out.flush()?;
        out.get_ref().sync_all()?;
        Ok(())
    }

    fn write_tag(&mut self, tag_type: u8, timestamp: i64, data: &[u8]) -> Result<(), DvrError> {
        if data.len() > MAX_TAG_DATA_SIZE {
            return Err(DvrError::TagTooLarge(data.len()));
        }
        let size = data.len() as u32;
        let ts = timestamp.max(0) as u32;

        let mut header = [0u8; TAG_HEADER_SIZE];
        header[0] = tag_type;
        header[1..4].copy_from_slice(&size.to_be_bytes()[1..]);
        header[4..7].copy_from_slice(&ts.to_be_bytes()[1..]);
        header[7] = (ts >> 24) as u8;

        let out = self.out.as_mut().ok_or_else(not_open)?;
        let written = out
            .write_all(&header)
            .and_then(|_| out.write_all(data))
            .and_then(|_| out.write_all(&(TAG_HEADER_SIZE as u32 + size).to_be_bytes()));
        if let Err(e) = written {
            return Err(self.abandon(e));
        }
        self.position += (TAG_HEADER_SIZE + data.len() + 4) as u64;
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), DvrError> {
        let out = self.out.as_mut().ok_or_else(not_open)?;
        if let Err(e) = out.write_all(bytes) {
            return Err(self.abandon(e));
        }
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Releases the handle after a failed write. Buffered bytes are discarded
    /// so a half-written tag never reaches the file; the writer reports closed
    /// until the next `open`.
    fn abandon(&mut self, error: std::io::Error) -> DvrError {
        if let Some(out) = self.out.take() {
            let (_file, _unflushed) = out.into_parts();
        }
        tracing::error!(
            path = %self.path.display(),
            position = self.position,
            error = %error,
            "container write failed, file abandoned"
        );
        DvrError::Io(error)
    }
}

fn not_open() -> DvrError {
    DvrError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "container is not open",
    ))
}

/// Re-encodes an incoming metadata payload with zeroed `filesize` and
/// `duration` as the final two properties.
fn build_metadata(payload: &[u8]) -> Result<Vec<u8>, DvrError> {
    let mut reader = Amf0Reader::new(payload);
    let mut name = reader.read_string()?;
    if name == SET_DATA_FRAME {
        name = reader.read_string()?;
    }

    let found = payload.get(reader.pos()).copied().unwrap_or(0);
    let mut props = match reader.read_value()? {
        Amf0Value::Object(props) | Amf0Value::EcmaArray(props) => props,
        _ => {
            return Err(amf0::Amf0Error::UnexpectedType {
                expected: "object",
                found,
            }
            .into())
        }
    };

    props.retain(|(k, _)| k != "filesize" && k != "duration" && k != "service");
    props.push((
        "service".to_string(),
        Amf0Value::String(SERVICE_NAME.to_string()),
    ));
    props.push(("filesize".to_string(), Amf0Value::Number(0.0)));
    props.push(("duration".to_string(), Amf0Value::Number(0.0)));

    let mut body = Vec::with_capacity(payload.len() + 64);
    Amf0Value::String(name).encode(&mut body)?;
    Amf0Value::Object(props).encode(&mut body)?;
    Ok(body)
}
