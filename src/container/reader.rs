use std::io::Read;

use crate::error::DvrError;
use crate::media::{Frame, FrameKind};

use super::{FLV_HEADER_SIZE, FLV_SIGNATURE, PREVIOUS_TAG_SIZE, TAG_HEADER_SIZE};
use super::{TAG_AUDIO, TAG_SCRIPT, TAG_VIDEO};

#[derive(Debug, Clone)]
pub struct FlvTag {
    pub tag_type: u8,
    pub timestamp: u32,
    /// Absolute offset of the tag header in the file.
    pub offset: u64,
    pub data: Vec<u8>,
}

impl FlvTag {
    pub fn to_frame(&self) -> Option<Frame> {
        let kind = match self.tag_type {
            TAG_AUDIO => FrameKind::Audio,
            TAG_VIDEO => FrameKind::Video,
            TAG_SCRIPT => FrameKind::Metadata,
            _ => return None,
        };
        Some(Frame::new(kind, self.timestamp as i64, self.data.clone()))
    }
}

/// Sequential FLV tag reader.
pub struct FlvReader<R: Read> {
    reader: R,
    position: u64,
}

impl<R: Read> FlvReader<R> {
    /// Reads and validates the file header and `PreviousTagSize0`.
    pub fn new(mut reader: R) -> Result<Self, DvrError> {
        let mut header = [0u8; FLV_HEADER_SIZE + PREVIOUS_TAG_SIZE];
        reader.read_exact(&mut header)?;
        if header[..3] != FLV_SIGNATURE {
            return Err(DvrError::InvalidFlv("missing FLV signature".to_string()));
        }

        let data_offset = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as u64;
        let mut position = header.len() as u64;
        if data_offset > FLV_HEADER_SIZE as u64 {
            let extra = data_offset - FLV_HEADER_SIZE as u64;
            std::io::copy(&mut (&mut reader).take(extra), &mut std::io::sink())?;
            position += extra;
        }

        Ok(Self { reader, position })
    }

    /// Next tag, or `None` at a clean end of file.
    pub fn next_tag(&mut self) -> Result<Option<FlvTag>, DvrError> {
        let mut header = [0u8; TAG_HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            n if n < TAG_HEADER_SIZE => {
                return Err(DvrError::InvalidFlv(format!(
                    "truncated tag header at offset {}",
                    self.position
                )))
            }
            _ => {}
        }

        let offset = self.position;
        let tag_type = header[0] & 0x1F;
        let size = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
        let timestamp = u32::from_be_bytes([header[7], header[4], header[5], header[6]]);

        let mut data = vec![0u8; size];
        self.reader.read_exact(&mut data)?;

        let mut trailer = [0u8; PREVIOUS_TAG_SIZE];
        self.reader.read_exact(&mut trailer)?;
        let previous = u32::from_be_bytes(trailer) as usize;
        if previous != TAG_HEADER_SIZE + size {
            return Err(DvrError::InvalidFlv(format!(
                "previous tag size {} does not match tag at offset {}",
                previous, offset
            )));
        }

        self.position += (TAG_HEADER_SIZE + size + PREVIOUS_TAG_SIZE) as u64;

        Ok(Some(FlvTag {
            tag_type,
            timestamp,
            offset,
            data,
        }))
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reads every tag of an in-memory FLV file.
pub fn read_all_tags(bytes: &[u8]) -> Result<Vec<FlvTag>, DvrError> {
    let mut reader = FlvReader::new(bytes)?;
    let mut tags = Vec::new();
    while let Some(tag) = reader.next_tag()? {
        tags.push(tag);
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(tag_type: u8, timestamp: u32, data: &[u8]) -> Vec<u8> {
        let size = data.len() as u32;
        let mut out = vec![tag_type];
        out.extend_from_slice(&size.to_be_bytes()[1..]);
        out.extend_from_slice(&timestamp.to_be_bytes()[1..]);
        out.push((timestamp >> 24) as u8);
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(data);
        out.extend_from_slice(&(11 + size).to_be_bytes());
        out
    }

    fn header() -> Vec<u8> {
        vec![b'F', b'L', b'V', 1, 5, 0, 0, 0, 9, 0, 0, 0, 0]
    }

    #[test]
    fn test_reads_tags_with_extended_timestamp() {
        let mut file = header();
        file.extend(tag(TAG_VIDEO, 0x01_00_00_10, &[0x17, 0x01]));
        file.extend(tag(TAG_AUDIO, 40, &[0xAF, 0x01, 0x00]));

        let tags = read_all_tags(&file).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].timestamp, 0x01_00_00_10);
        assert_eq!(tags[0].offset, 13);
        assert_eq!(tags[1].offset, 13 + 11 + 2 + 4);
        assert_eq!(tags[1].data, vec![0xAF, 0x01, 0x00]);
        assert!(tags[1].to_frame().unwrap().is_audio());
    }

    #[test]
    fn test_rejects_bad_signature() {
        let mut file = header();
        file[0] = b'X';
        assert!(matches!(read_all_tags(&file), Err(DvrError::InvalidFlv(_))));
    }

    #[test]
    fn test_rejects_truncated_tag() {
        let mut file = header();
        file.extend(tag(TAG_VIDEO, 0, &[0x17, 0x01, 0x02]));
        file.truncate(file.len() - 6);
        assert!(read_all_tags(&file).is_err());
    }

    #[test]
    fn test_empty_body() {
        assert!(read_all_tags(&header()).unwrap().is_empty());
    }
}
