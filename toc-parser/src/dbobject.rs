//! Self-describing tag stream decoder.
//!
//! TOC bodies and bundle trailers embed a nested record format: each record
//! is a type code byte, an optional null-terminated field name, and a value.
//! The high bit of the type code marks an anonymous record (list elements
//! and stream roots); containers are varint-length-prefixed and terminated
//! by a zero byte that must land exactly on the declared boundary.
//!
//! [`TagDecoder`] yields a lazy event sequence; [`parse_root`] and
//! [`parse_one`] build an owned [`Value`] tree over it for consumers that
//! navigate by field name.

use tracing::debug;

use crate::reader::SliceReader;
use crate::types::{Guid, Sha1};
use crate::{Error, Result};

/// Anonymous-record flag on the type code.
const ANONYMOUS: u8 = 0x80;

mod code {
    pub const END: u8 = 0x00;
    pub const LIST: u8 = 0x01;
    pub const OBJECT: u8 = 0x02;
    pub const BOOL: u8 = 0x06;
    pub const STRING: u8 = 0x07;
    pub const U32: u8 = 0x08;
    pub const U64: u8 = 0x09;
    pub const I32: u8 = 0x0a;
    pub const F32: u8 = 0x0b;
    pub const U64_BE: u8 = 0x0c;
    pub const GUID: u8 = 0x0f;
    pub const SHA1: u8 = 0x10;
    pub const BLOB: u8 = 0x13;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    List,
    Object,
}

/// A decoded scalar, borrowing strings and blobs from the input slice.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar<'a> {
    Bool(bool),
    U32(u32),
    U64(u64),
    I32(i32),
    F32(f32),
    String(&'a str),
    Blob(&'a [u8]),
    Sha1(Sha1),
    Guid(Guid),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event<'a> {
    Begin {
        kind: ContainerKind,
        name: Option<&'a str>,
    },
    Scalar {
        name: Option<&'a str>,
        value: Scalar<'a>,
    },
    End,
}

/// Lazy event decoder over a tag stream.
pub struct TagDecoder<'a> {
    reader: SliceReader<'a>,
    /// End boundary of every open container, innermost last.
    stack: Vec<usize>,
}

impl<'a> TagDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: SliceReader::new(data),
            stack: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.reader.position()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Decode the next event; `None` once the top-level stream is exhausted.
    pub fn next_event(&mut self) -> Result<Option<Event<'a>>> {
        if self.stack.is_empty() && self.reader.remaining() == 0 {
            return Ok(None);
        }

        let at = self.reader.position();
        if let Some(&end) = self.stack.last() {
            if at >= end {
                return Err(Error::FormatMismatch(format!(
                    "container body ran past its declared boundary {end:#x} without a terminator"
                )));
            }
        }

        let raw = self.reader.read_u8()?;
        if raw == code::END {
            let end = self.stack.pop().ok_or_else(|| {
                Error::FormatMismatch(format!("stray container terminator at offset {at:#x}"))
            })?;
            if self.reader.position() != end {
                return Err(Error::FormatMismatch(format!(
                    "container terminator at offset {at:#x} does not land on the \
                     declared boundary {end:#x}"
                )));
            }
            return Ok(Some(Event::End));
        }

        let name = if raw & ANONYMOUS == 0 {
            Some(self.reader.read_cstring()?)
        } else {
            None
        };

        let event = match raw & !ANONYMOUS {
            kind @ (code::LIST | code::OBJECT) => {
                let size = self.reader.read_varint()? as usize;
                if size == 0 {
                    return Err(Error::FormatMismatch(format!(
                        "container at offset {at:#x} declares a zero-size body"
                    )));
                }
                if size > self.reader.remaining() {
                    return Err(Error::Truncated(format!(
                        "container at offset {at:#x} declares {size} bytes, {} remaining",
                        self.reader.remaining()
                    )));
                }
                let end = self.reader.position() + size;
                if let Some(&outer) = self.stack.last() {
                    if end > outer {
                        return Err(Error::FormatMismatch(format!(
                            "container at offset {at:#x} overruns its parent boundary {outer:#x}"
                        )));
                    }
                }
                self.stack.push(end);
                let kind = if kind == code::LIST {
                    ContainerKind::List
                } else {
                    ContainerKind::Object
                };
                Event::Begin { kind, name }
            }
            scalar => {
                let value = self.read_scalar(scalar, at)?;
                Event::Scalar { name, value }
            }
        };
        Ok(Some(event))
    }

    fn read_scalar(&mut self, kind: u8, at: usize) -> Result<Scalar<'a>> {
        let value = match kind {
            code::BOOL => Scalar::Bool(self.reader.read_u8()? != 0),
            code::STRING => {
                // Declared length covers the NUL terminator.
                let len = self.reader.read_varint()? as usize;
                if len == 0 {
                    return Err(Error::FormatMismatch(format!(
                        "string at offset {at:#x} declares a zero length"
                    )));
                }
                let bytes = self.reader.read_bytes(len - 1)?;
                if self.reader.read_u8()? != 0 {
                    return Err(Error::FormatMismatch(format!(
                        "string at offset {at:#x} is not null-terminated"
                    )));
                }
                let text = std::str::from_utf8(bytes).map_err(|_| {
                    Error::FormatMismatch(format!("invalid UTF-8 in string at offset {at:#x}"))
                })?;
                Scalar::String(text)
            }
            code::U32 => Scalar::U32(self.reader.read_u32_le()?),
            code::U64 => Scalar::U64(self.reader.read_u64_le()?),
            code::I32 => Scalar::I32(self.reader.read_i32_le()?),
            code::F32 => Scalar::F32(self.reader.read_f32_le()?),
            code::U64_BE => Scalar::U64(self.reader.read_u64_be()?),
            code::GUID => Scalar::Guid(Guid::new(self.reader.read_array()?)),
            code::SHA1 => Scalar::Sha1(Sha1::new(self.reader.read_array()?)),
            code::BLOB => Scalar::Blob(self.reader.read_prefixed_bytes()?),
            other => return Err(Error::UnknownTypeCode(other)),
        };
        Ok(value)
    }
}

/// An owned tag stream value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U32(u32),
    U64(u64),
    I32(i32),
    F32(f32),
    String(String),
    Blob(Vec<u8>),
    Sha1(Sha1),
    Guid(Guid),
    List(Vec<Value>),
    Object(Record),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U32(v) => Some(u64::from(*v)),
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_sha1(&self) -> Option<&Sha1> {
        match self {
            Value::Sha1(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<&Guid> {
        match self {
            Value::Guid(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Record> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }
}

impl<'a> Scalar<'a> {
    fn into_owned(self) -> Value {
        match self {
            Scalar::Bool(v) => Value::Bool(v),
            Scalar::U32(v) => Value::U32(v),
            Scalar::U64(v) => Value::U64(v),
            Scalar::I32(v) => Value::I32(v),
            Scalar::F32(v) => Value::F32(v),
            Scalar::String(v) => Value::String(v.to_string()),
            Scalar::Blob(v) => Value::Blob(v.to_vec()),
            Scalar::Sha1(v) => Value::Sha1(v),
            Scalar::Guid(v) => Value::Guid(v),
        }
    }
}

/// An object's fields in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Log field names outside `known` at debug level. The values stay
    /// reachable through [`Record::get`] for downstream tooling.
    pub fn log_unknown_fields(&self, context: &str, known: &[&str]) {
        for (name, _) in &self.fields {
            if !known.contains(&name.as_str()) {
                debug!("{context}: unrecognized field {name:?} carried as opaque");
            }
        }
    }
}

/// Parse the single root record of a stream into an owned [`Value`].
pub fn parse_root(data: &[u8]) -> Result<Value> {
    let (_, value, _) = parse_one(data)?;
    Ok(value)
}

/// Parse one complete record from the head of `data`.
///
/// Returns its field name (when not anonymous), the owned value, and the
/// number of bytes consumed.
pub fn parse_one(data: &[u8]) -> Result<(Option<String>, Value, usize)> {
    let mut decoder = TagDecoder::new(data);
    let event = decoder
        .next_event()?
        .ok_or_else(|| Error::Truncated("empty tag stream".into()))?;
    let (name, value) = match event {
        Event::Scalar { name, value } => (name.map(str::to_string), value.into_owned()),
        Event::Begin { kind, name } => {
            let name = name.map(str::to_string);
            (name, build_container(&mut decoder, kind)?)
        }
        Event::End => {
            return Err(Error::FormatMismatch(
                "tag stream begins with a container terminator".into(),
            ))
        }
    };
    Ok((name, value, decoder.position()))
}

fn build_container(decoder: &mut TagDecoder<'_>, kind: ContainerKind) -> Result<Value> {
    let mut items = Vec::new();
    let mut record = Record::default();
    loop {
        let event = decoder.next_event()?.ok_or_else(|| {
            Error::Truncated("tag stream ended inside an open container".into())
        })?;
        match event {
            Event::End => break,
            Event::Scalar { name, value } => match kind {
                ContainerKind::List => items.push(value.into_owned()),
                ContainerKind::Object => record
                    .fields
                    .push((name.unwrap_or_default().to_string(), value.into_owned())),
            },
            Event::Begin {
                kind: inner_kind,
                name,
            } => {
                let value = build_container(decoder, inner_kind)?;
                match kind {
                    ContainerKind::List => items.push(value),
                    ContainerKind::Object => record
                        .fields
                        .push((name.unwrap_or_default().to_string(), value)),
                }
            }
        }
    }
    Ok(match kind {
        ContainerKind::List => Value::List(items),
        ContainerKind::Object => Value::Object(record),
    })
}
