use std::io::{self, Read};
use std::string::FromUtf8Error;

use tracing::trace;

use crate::schema_types::{ElementId, ElementType, Edtd};
use crate::stream::{parse, VarIntError};

#[derive(thiserror::Error, Debug)]
pub enum ReaderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    VarInt(#[from] VarIntError),
    #[error("stream ended {missing} byte(s) short of element {id:#x}")]
    Truncated { id: ElementId, missing: u64 },
    #[error("element {id:#x} declares {size} bytes but its parent has only {available} left")]
    OverflowsParent {
        id: ElementId,
        size: u64,
        available: u64,
    },
    #[error("element ID is {length} bytes long, more than the maximum of {max}")]
    IdTooLong { length: usize, max: usize },
    #[error("element size is {length} bytes long, more than the maximum of {max}")]
    SizeTooLong { length: usize, max: usize },
    #[error("element {id:#x} has an unknown size")]
    UnknownSize { id: ElementId },
    #[error("no element is under the cursor")]
    NoElement,
    #[error("payload of element {id:#x} was already consumed")]
    PayloadConsumed { id: ElementId },
    #[error("element {id:#x} has {size} payload byte(s), which cannot be read as {element_type}")]
    InvalidPayload {
        id: ElementId,
        size: u64,
        element_type: ElementType,
    },
    #[error("payload of element {id:#x} is not valid UTF-8")]
    Utf8 {
        id: ElementId,
        source: FromUtf8Error,
    },
    #[error("element {id:#x} is a container; use `enter` to read its children")]
    ContainerValue { id: ElementId },
    #[error("the cursor is not inside a container")]
    NotInContainer,
}

/// Limits on the encoded width of element headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    pub max_id_length: usize,
    pub max_size_length: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_id_length: 4,
            max_size_length: 8,
        }
    }
}

impl ReaderConfig {
    /// Takes the limits from the compiled `EBMLMaxIDLength` and
    /// `EBMLMaxSizeLength` defaults, falling back to `ReaderConfig::default()`.
    pub fn from_schema_defaults(edtd: &Edtd) -> Self {
        let fallback = Self::default();
        let limit = |name: &str, fallback: usize| {
            edtd.definition_for_name(name)
                .and_then(|def| def.default_uint())
                .map_or(fallback, |value| value as usize)
        };
        Self {
            max_id_length: limit("EBMLMaxIDLength", fallback.max_id_length),
            max_size_length: limit("EBMLMaxSizeLength", fallback.max_size_length),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: ElementId,
    /// Payload size in bytes.
    pub size: u64,
    pub id_length: usize,
    pub size_length: usize,
    /// Number of containers enclosing this element.
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    /// Nanoseconds since 2001-01-01T00:00:00 UTC.
    Date(i64),
    Binary(Vec<u8>),
}

/**
Forward-only cursor over an EBML byte stream.

The reader keeps one entry per entered container holding the number of
container bytes not yet consumed. `advance` moves to the next sibling,
skipping whatever part of the current payload was not read, and returns
`Ok(None)` once the innermost container (or, at the top level, the stream) is
exhausted. It keeps returning `Ok(None)` until `leave` closes that container;
only `enter` and `leave` change the depth.
**/
#[derive(Debug)]
pub struct ElementReader<R> {
    reader: R,
    config: ReaderConfig,
    scopes: Vec<u64>,
    current: Option<ElementHeader>,
    unread: u64,
    consumed: bool,
}

impl<R: Read> ElementReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, ReaderConfig::default())
    }

    pub fn with_config(reader: R, config: ReaderConfig) -> Self {
        Self {
            reader,
            config,
            scopes: Vec::new(),
            current: None,
            unread: 0,
            consumed: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn current(&self) -> Option<&ElementHeader> {
        self.current.as_ref()
    }

    pub fn advance(&mut self) -> Result<Option<ElementHeader>, ReaderError> {
        self.skip()?;
        self.current = None;

        if let Some(&0) = self.scopes.last() {
            return Ok(None);
        }

        let (id, id_length) = match self.read_vint()? {
            Some(vint) => vint,
            None => match self.scopes.last() {
                None => return Ok(None),
                Some(&missing) => return Err(ReaderError::Truncated { id: 0, missing }),
            },
        };
        if id_length > self.config.max_id_length {
            return Err(ReaderError::IdTooLong {
                length: id_length,
                max: self.config.max_id_length,
            });
        }

        let (size, size_length) = self
            .read_vint()?
            .ok_or(VarIntError::UnexpectedEnd { needed: 1 })?;
        if size_length > self.config.max_size_length {
            return Err(ReaderError::SizeTooLong {
                length: size_length,
                max: self.config.max_size_length,
            });
        }
        if parse::is_unknown_size(size, size_length) {
            return Err(ReaderError::UnknownSize { id });
        }

        if let Some(remaining) = self.scopes.last_mut() {
            let header_length = (id_length + size_length) as u64;
            let available = remaining.saturating_sub(header_length);
            if size > available || header_length > *remaining {
                return Err(ReaderError::OverflowsParent {
                    id,
                    size,
                    available,
                });
            }
            *remaining -= header_length + size;
        }

        let header = ElementHeader {
            id,
            size,
            id_length,
            size_length,
            depth: self.scopes.len(),
        };
        trace!(id = header.id, size = header.size, depth = header.depth, "element header");

        self.current = Some(header);
        self.unread = size;
        self.consumed = false;
        Ok(Some(header))
    }

    /// Descends into the current element; subsequent `advance` calls walk its
    /// children.
    pub fn enter(&mut self) -> Result<(), ReaderError> {
        let header = self.current.ok_or(ReaderError::NoElement)?;
        if self.consumed {
            return Err(ReaderError::PayloadConsumed { id: header.id });
        }
        self.scopes.push(self.unread);
        self.unread = 0;
        self.current = None;
        Ok(())
    }

    /// Closes the innermost container, skipping whatever is left of it, and
    /// resumes in its parent. Needed even after `advance` reports the
    /// container exhausted.
    pub fn leave(&mut self) -> Result<(), ReaderError> {
        self.skip()?;
        self.current = None;
        let remaining = self.scopes.pop().ok_or(ReaderError::NotInContainer)?;
        self.skip_bytes(remaining, 0)
    }

    /// Discards any unread payload of the current element.
    pub fn skip(&mut self) -> Result<(), ReaderError> {
        let id = self.current.map_or(0, |header| header.id);
        let unread = self.unread;
        self.unread = 0;
        self.skip_bytes(unread, id)
    }

    pub fn read_uint(&mut self) -> Result<u64, ReaderError> {
        let (header, payload) = self.take_payload()?;
        parse::uint(&payload, payload.len())
            .map(|(_, value)| value)
            .map_err(|_| invalid_payload(&header, ElementType::UInt))
    }

    pub fn read_int(&mut self) -> Result<i64, ReaderError> {
        let (header, payload) = self.take_payload()?;
        parse::int(&payload, payload.len())
            .map(|(_, value)| value)
            .map_err(|_| invalid_payload(&header, ElementType::Int))
    }

    pub fn read_float(&mut self) -> Result<f64, ReaderError> {
        let (header, payload) = self.take_payload()?;
        parse::float(&payload, payload.len())
            .map(|(_, value)| value)
            .map_err(|_| invalid_payload(&header, ElementType::Float))
    }

    pub fn read_date(&mut self) -> Result<i64, ReaderError> {
        let (header, payload) = self.take_payload()?;
        parse::date(&payload, payload.len())
            .map(|(_, value)| value)
            .map_err(|_| invalid_payload(&header, ElementType::Date))
    }

    pub fn read_string(&mut self) -> Result<String, ReaderError> {
        let (header, mut payload) = self.take_payload()?;
        let length = parse::string(&payload, payload.len())
            .map(|(_, bytes)| bytes.len())
            .map_err(|_| invalid_payload(&header, ElementType::String))?;
        payload.truncate(length);
        String::from_utf8(payload).map_err(|source| ReaderError::Utf8 {
            id: header.id,
            source,
        })
    }

    pub fn read_binary(&mut self) -> Result<Vec<u8>, ReaderError> {
        let (_, payload) = self.take_payload()?;
        Ok(payload)
    }

    pub fn read_value(&mut self, element_type: ElementType) -> Result<Value, ReaderError> {
        Ok(match element_type {
            ElementType::Int => Value::Int(self.read_int()?),
            ElementType::UInt => Value::UInt(self.read_uint()?),
            ElementType::Float => Value::Float(self.read_float()?),
            ElementType::String => Value::String(self.read_string()?),
            ElementType::Date => Value::Date(self.read_date()?),
            ElementType::Binary => Value::Binary(self.read_binary()?),
            ElementType::Container => {
                let header = self.current.ok_or(ReaderError::NoElement)?;
                return Err(ReaderError::ContainerValue { id: header.id });
            }
        })
    }

    /// Reads the whole payload of the current element, leaving the stream
    /// positioned right after it.
    fn take_payload(&mut self) -> Result<(ElementHeader, Vec<u8>), ReaderError> {
        let header = self.current.ok_or(ReaderError::NoElement)?;
        if self.consumed {
            return Err(ReaderError::PayloadConsumed { id: header.id });
        }
        self.consumed = true;
        self.unread = 0;

        let mut payload = Vec::new();
        self.reader
            .by_ref()
            .take(header.size)
            .read_to_end(&mut payload)?;
        let missing = header.size - payload.len() as u64;
        if missing > 0 {
            return Err(ReaderError::Truncated {
                id: header.id,
                missing,
            });
        }
        Ok((header, payload))
    }

    fn skip_bytes(&mut self, count: u64, id: ElementId) -> Result<(), ReaderError> {
        let skipped = io::copy(&mut self.reader.by_ref().take(count), &mut io::sink())?;
        match count - skipped {
            0 => Ok(()),
            missing => Err(ReaderError::Truncated { id, missing }),
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>, ReaderError> {
        let mut byte = [0u8];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Reads one vint; `None` if the stream ended before its first byte.
    fn read_vint(&mut self) -> Result<Option<(u64, usize)>, ReaderError> {
        let leading = match self.read_byte()? {
            Some(byte) => byte,
            None => return Ok(None),
        };
        let length = parse::vint_length(leading)?;

        let mut buffer = [0u8; 8];
        buffer[0] = leading;
        let mut filled = 1;
        while filled < length {
            match self.reader.read(&mut buffer[filled..length]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let (_, vint) = parse::vint(&buffer[..filled]).map_err(parse::vint_error)?;
        Ok(Some(vint))
    }
}

fn invalid_payload(header: &ElementHeader, element_type: ElementType) -> ReaderError {
    ReaderError::InvalidPayload {
        id: header.id,
        size: header.size,
        element_type,
    }
}
