//! AMF0 values as found in FLV script tags.
//!
//! Only the subset a metadata record can carry is supported; references,
//! XML documents and typed objects are rejected as unknown markers.

use thiserror::Error;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;

const MAX_DEPTH: usize = 64;

/// Encoded size of a number: marker plus big-endian double.
pub const NUMBER_SIZE: usize = 9;
/// Encoded size of the object end marker `00 00 09`.
pub const OBJECT_END_SIZE: usize = 3;

#[derive(Debug, Error, PartialEq)]
pub enum Amf0Error {
    #[error("unexpected end of amf0 data at offset {0}")]
    UnexpectedEof(usize),
    #[error("unsupported amf0 marker 0x{marker:02x} at offset {offset}")]
    UnknownMarker { marker: u8, offset: usize },
    #[error("invalid utf-8 in amf0 string at offset {0}")]
    InvalidUtf8(usize),
    #[error("amf0 string of {0} bytes exceeds the short string limit")]
    StringTooLong(usize),
    #[error("expected amf0 {expected}, found marker 0x{found:02x}")]
    UnexpectedType { expected: &'static str, found: u8 },
    #[error("amf0 nesting too deep")]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, Amf0Value)>),
    Null,
    Undefined,
    EcmaArray(Vec<(String, Amf0Value)>),
    StrictArray(Vec<Amf0Value>),
    Date { millis: f64, timezone: i16 },
    LongString(String),
}

impl Amf0Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) | Amf0Value::LongString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Amf0Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Properties of an object or ECMA array.
    pub fn properties(&self) -> Option<&[(String, Amf0Value)]> {
        match self {
            Amf0Value::Object(props) | Amf0Value::EcmaArray(props) => Some(props),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Amf0Value> {
        self.properties()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), Amf0Error> {
        match self {
            Amf0Value::Number(n) => {
                out.push(MARKER_NUMBER);
                out.extend_from_slice(&n.to_be_bytes());
            }
            Amf0Value::Boolean(b) => {
                out.push(MARKER_BOOLEAN);
                out.push(u8::from(*b));
            }
            Amf0Value::String(s) => {
                out.push(MARKER_STRING);
                write_utf8(out, s)?;
            }
            Amf0Value::Object(props) => {
                out.push(MARKER_OBJECT);
                write_properties(out, props)?;
            }
            Amf0Value::Null => out.push(MARKER_NULL),
            Amf0Value::Undefined => out.push(MARKER_UNDEFINED),
            Amf0Value::EcmaArray(props) => {
                out.push(MARKER_ECMA_ARRAY);
                out.extend_from_slice(&(props.len() as u32).to_be_bytes());
                write_properties(out, props)?;
            }
            Amf0Value::StrictArray(items) => {
                out.push(MARKER_STRICT_ARRAY);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    item.encode(out)?;
                }
            }
            Amf0Value::Date { millis, timezone } => {
                out.push(MARKER_DATE);
                out.extend_from_slice(&millis.to_be_bytes());
                out.extend_from_slice(&timezone.to_be_bytes());
            }
            Amf0Value::LongString(s) => {
                out.push(MARKER_LONG_STRING);
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
        Ok(())
    }
}

/// Writes a key or short string body: u16 length then bytes.
fn write_utf8(out: &mut Vec<u8>, s: &str) -> Result<(), Amf0Error> {
    let len = u16::try_from(s.len()).map_err(|_| Amf0Error::StringTooLong(s.len()))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_properties(out: &mut Vec<u8>, props: &[(String, Amf0Value)]) -> Result<(), Amf0Error> {
    for (key, value) in props {
        write_utf8(out, key)?;
        value.encode(out)?;
    }
    out.extend_from_slice(&[0x00, 0x00, MARKER_OBJECT_END]);
    Ok(())
}

/// A property together with the offset of its value marker in the source buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedProperty {
    pub key: String,
    pub value: Amf0Value,
    pub value_offset: usize,
}

pub struct Amf0Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Amf0Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_value(&mut self) -> Result<Amf0Value, Amf0Error> {
        self.read_value_at_depth(0)
    }

    pub fn read_string(&mut self) -> Result<String, Amf0Error> {
        let found = self.peek_u8()?;
        match self.read_value()? {
            Amf0Value::String(s) | Amf0Value::LongString(s) => Ok(s),
            _ => Err(Amf0Error::UnexpectedType {
                expected: "string",
                found,
            }),
        }
    }

    /// Reads an object or ECMA array, keeping the offset of each top-level value.
    pub fn read_located_properties(&mut self) -> Result<Vec<LocatedProperty>, Amf0Error> {
        let marker = self.read_u8()?;
        match marker {
            MARKER_OBJECT => {}
            MARKER_ECMA_ARRAY => {
                self.take(4)?;
            }
            found => {
                return Err(Amf0Error::UnexpectedType {
                    expected: "object",
                    found,
                })
            }
        }

        let mut props = Vec::new();
        loop {
            let key = self.read_utf8()?;
            if key.is_empty() && self.peek_u8()? == MARKER_OBJECT_END {
                self.pos += 1;
                return Ok(props);
            }
            let value_offset = self.pos;
            let value = self.read_value_at_depth(1)?;
            props.push(LocatedProperty {
                key,
                value,
                value_offset,
            });
        }
    }

    fn read_value_at_depth(&mut self, depth: usize) -> Result<Amf0Value, Amf0Error> {
        if depth > MAX_DEPTH {
            return Err(Amf0Error::TooDeep);
        }

        let offset = self.pos;
        let marker = self.read_u8()?;
        let value = match marker {
            MARKER_NUMBER => Amf0Value::Number(self.read_f64()?),
            MARKER_BOOLEAN => Amf0Value::Boolean(self.read_u8()? != 0),
            MARKER_STRING => Amf0Value::String(self.read_utf8()?),
            MARKER_OBJECT => Amf0Value::Object(self.read_properties(depth)?),
            MARKER_NULL => Amf0Value::Null,
            MARKER_UNDEFINED => Amf0Value::Undefined,
            MARKER_ECMA_ARRAY => {
                // the count is advisory, the end marker terminates the array
                self.take(4)?;
                Amf0Value::EcmaArray(self.read_properties(depth)?)
            }
            MARKER_STRICT_ARRAY => {
                let count = self.read_u32()? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.read_value_at_depth(depth + 1)?);
                }
                Amf0Value::StrictArray(items)
            }
            MARKER_DATE => {
                let millis = self.read_f64()?;
                let tz = self.take(2)?;
                Amf0Value::Date {
                    millis,
                    timezone: i16::from_be_bytes([tz[0], tz[1]]),
                }
            }
            MARKER_LONG_STRING => {
                let len = self.read_u32()? as usize;
                let start = self.pos;
                let bytes = self.take(len)?;
                let s = std::str::from_utf8(bytes).map_err(|_| Amf0Error::InvalidUtf8(start))?;
                Amf0Value::LongString(s.to_string())
            }
            marker => return Err(Amf0Error::UnknownMarker { marker, offset }),
        };
        Ok(value)
    }

    fn read_properties(&mut self, depth: usize) -> Result<Vec<(String, Amf0Value)>, Amf0Error> {
        let mut props = Vec::new();
        loop {
            let key = self.read_utf8()?;
            if key.is_empty() && self.peek_u8()? == MARKER_OBJECT_END {
                self.pos += 1;
                return Ok(props);
            }
            let value = self.read_value_at_depth(depth + 1)?;
            props.push((key, value));
        }
    }

    fn read_utf8(&mut self) -> Result<String, Amf0Error> {
        let len = self.read_u16()? as usize;
        let start = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| Amf0Error::InvalidUtf8(start))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Amf0Error> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(Amf0Error::UnexpectedEof(self.pos))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn peek_u8(&self) -> Result<u8, Amf0Error> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(Amf0Error::UnexpectedEof(self.pos))
    }

    fn read_u8(&mut self) -> Result<u8, Amf0Error> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, Amf0Error> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, Amf0Error> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f64(&mut self) -> Result<f64, Amf0Error> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_be_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_object() -> Amf0Value {
        Amf0Value::Object(vec![
            ("width".to_string(), Amf0Value::Number(1280.0)),
            ("stereo".to_string(), Amf0Value::Boolean(true)),
            ("encoder".to_string(), Amf0Value::String("obs".to_string())),
            (
                "nested".to_string(),
                Amf0Value::EcmaArray(vec![("k".to_string(), Amf0Value::Null)]),
            ),
        ])
    }

    #[test]
    fn test_object_encodes_with_end_marker() {
        let mut out = Vec::new();
        sample_object().encode(&mut out).unwrap();
        assert_eq!(out[0], MARKER_OBJECT);
        assert_eq!(&out[out.len() - OBJECT_END_SIZE..], &[0x00, 0x00, 0x09]);

        let mut reader = Amf0Reader::new(&out);
        assert_eq!(reader.read_value().unwrap(), sample_object());
        assert!(reader.is_empty());
    }

    #[test]
    fn test_number_layout() {
        let mut out = Vec::new();
        Amf0Value::Number(1.5).encode(&mut out).unwrap();
        assert_eq!(out.len(), NUMBER_SIZE);
        assert_eq!(&out[1..], &1.5f64.to_be_bytes());
    }

    #[test]
    fn test_located_properties_point_at_value_markers() {
        let mut out = Vec::new();
        sample_object().encode(&mut out).unwrap();
        let props = Amf0Reader::new(&out).read_located_properties().unwrap();
        assert_eq!(props.len(), 4);
        assert_eq!(props[0].key, "width");
        assert_eq!(out[props[0].value_offset], MARKER_NUMBER);
        assert_eq!(
            &out[props[0].value_offset + 1..props[0].value_offset + 9],
            &1280f64.to_be_bytes()
        );
    }

    #[test]
    fn test_truncated_input_is_error() {
        let mut out = Vec::new();
        sample_object().encode(&mut out).unwrap();
        out.truncate(out.len() - 2);
        assert!(matches!(
            Amf0Reader::new(&out).read_value(),
            Err(Amf0Error::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_unknown_marker_rejected() {
        let err = Amf0Reader::new(&[0x07, 0x00, 0x01]).read_value().unwrap_err();
        assert_eq!(err, Amf0Error::UnknownMarker { marker: 0x07, offset: 0 });
    }

    #[test]
    fn test_read_string_rejects_number() {
        let mut out = Vec::new();
        Amf0Value::Number(3.0).encode(&mut out).unwrap();
        assert!(matches!(
            Amf0Reader::new(&out).read_string(),
            Err(Amf0Error::UnexpectedType { .. })
        ));
    }

    #[test]
    fn test_get_property() {
        let obj = sample_object();
        assert_eq!(obj.get("width").and_then(Amf0Value::as_number), Some(1280.0));
        assert_eq!(obj.get("encoder").and_then(Amf0Value::as_str), Some("obs"));
        assert!(obj.get("missing").is_none());
    }
}
