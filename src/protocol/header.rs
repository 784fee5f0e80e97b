//! OBEX header encoding and iteration.
//!
//! Header layout depends on the two high bits of the identifier:
//! ```text
//! 0b00 / 0b01: [id:1] [length:2BE, includes these 3 bytes] [value...]
//! 0b10:        [id:1] [value:1]
//! 0b11:        [id:1] [value:4BE]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Encoding class selected by a header identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderEncoding {
    /// Null-terminated UTF-16BE text, length-prefixed.
    Unicode,
    /// Opaque byte sequence, length-prefixed.
    Bytes,
    /// Single byte.
    Byte,
    /// Four-byte big-endian quantity.
    Word,
}

impl HeaderEncoding {
    /// Returns the encoding class of a header identifier.
    #[must_use]
    pub const fn of(id: u8) -> Self {
        match id >> 6 {
            0 => Self::Unicode,
            1 => Self::Bytes,
            2 => Self::Byte,
            _ => Self::Word,
        }
    }

    /// Returns the on-air size of a header carrying `value_len` bytes.
    #[must_use]
    pub const fn encoded_len(self, value_len: usize) -> usize {
        match self {
            Self::Unicode | Self::Bytes => 3 + value_len,
            Self::Byte => 2,
            Self::Word => 5,
        }
    }
}

/// A single decoded header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header identifier.
    pub id: u8,
    /// Header value without the id and length prefix.
    pub value: Bytes,
}

impl Header {
    /// Interprets the value as a one-byte quantity.
    #[must_use]
    pub fn as_u8(&self) -> Option<u8> {
        (self.value.len() == 1).then(|| self.value[0])
    }

    /// Interprets the value as a four-byte big-endian quantity.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.value.as_ref().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

/// Appends one header to `buf`.
pub(crate) fn put_header(buf: &mut BytesMut, id: u8, value: &[u8]) -> Result<(), CodecError> {
    match HeaderEncoding::of(id) {
        HeaderEncoding::Unicode | HeaderEncoding::Bytes => {
            let len = 3 + value.len();
            let len = u16::try_from(len).map_err(|_| CodecError::TooLarge {
                size: len,
                max: usize::from(u16::MAX),
            })?;
            buf.put_u8(id);
            buf.put_u16(len);
            buf.put_slice(value);
        }
        HeaderEncoding::Byte => {
            if value.len() != 1 {
                return Err(CodecError::HeaderWidth {
                    id,
                    expected: 1,
                    got: value.len(),
                });
            }
            buf.put_u8(id);
            buf.put_u8(value[0]);
        }
        HeaderEncoding::Word => {
            if value.len() != 4 {
                return Err(CodecError::HeaderWidth {
                    id,
                    expected: 4,
                    got: value.len(),
                });
            }
            buf.put_u8(id);
            buf.put_slice(value);
        }
    }
    Ok(())
}

/// Transcodes a name to null-terminated UTF-16BE.
///
/// An empty name encodes to an empty value, which OBEX uses to address the
/// root folder in SETPATH.
#[must_use]
pub fn encode_unicode(name: &str) -> Vec<u8> {
    if name.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity((name.len() + 1) * 2);
    for unit in name.encode_utf16().chain(std::iter::once(0)) {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

/// Decodes a null-terminated UTF-16BE header value.
#[must_use]
pub fn decode_unicode(value: &[u8]) -> String {
    let units: Vec<u16> = value
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Iterator over the headers of a packet.
#[derive(Debug, Clone)]
pub struct HeaderIter {
    data: Bytes,
    pos: usize,
}

impl HeaderIter {
    pub(crate) const fn new(data: Bytes, pos: usize) -> Self {
        Self { data, pos }
    }
}

impl Iterator for HeaderIter {
    type Item = Result<Header, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let id = self.data[self.pos];
        let remaining = self.data.len() - self.pos;
        let (start, end) = match HeaderEncoding::of(id) {
            HeaderEncoding::Unicode | HeaderEncoding::Bytes => {
                if remaining < 3 {
                    self.pos = self.data.len();
                    return Some(Err(CodecError::BadHeader(id)));
                }
                let len = usize::from(u16::from_be_bytes([
                    self.data[self.pos + 1],
                    self.data[self.pos + 2],
                ]));
                if len < 3 || len > remaining {
                    self.pos = self.data.len();
                    return Some(Err(CodecError::BadHeader(id)));
                }
                (self.pos + 3, self.pos + len)
            }
            HeaderEncoding::Byte => (self.pos + 1, self.pos + 2),
            HeaderEncoding::Word => (self.pos + 1, self.pos + 5),
        };

        if end > self.data.len() {
            self.pos = self.data.len();
            return Some(Err(CodecError::BadHeader(id)));
        }

        self.pos = end;
        Some(Ok(Header {
            id,
            value: self.data.slice(start..end),
        }))
    }
}
