//! OBEX request building and packet parsing.
//!
//! Every OBEX packet starts with the same prefix:
//! ```text
//! ┌──────────────┬──────────────┬─────────────────┬───────────┐
//! │ opcode/code  │  length (BE) │  fixed fields   │  headers  │
//! │   1 byte     │   2 bytes    │ CONNECT: 4,     │           │
//! │              │  (whole pkt) │ SETPATH: 2      │           │
//! └──────────────┴──────────────┴─────────────────┴───────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::header::{HeaderEncoding, HeaderIter, put_header};
use crate::protocol::opcode::{
    FINAL_BIT, OBEX_MAX_PACKET_SIZE, Opcode, ResponseCode, SRM_ENABLE, SRM_PARAM_WAIT, header_id,
};

/// Size of the opcode plus length prefix.
pub const PREFIX_LEN: usize = 3;

/// Request to build, with the fixed fields its opcode needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// CONNECT with version, flags and the largest packet we accept.
    Connect {
        version: u8,
        flags: u8,
        max_packet_length: u16,
    },
    Disconnect,
    Put,
    PutFinal,
    Get,
    GetFinal,
    /// SETPATH with its flags byte.
    SetPath { flags: u8 },
    Abort,
}

impl RequestKind {
    /// Returns the opcode of this request.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Connect { .. } => Opcode::Connect,
            Self::Disconnect => Opcode::Disconnect,
            Self::Put => Opcode::Put,
            Self::PutFinal => Opcode::PutFinal,
            Self::Get => Opcode::Get,
            Self::GetFinal => Opcode::GetFinal,
            Self::SetPath { .. } => Opcode::SetPath,
            Self::Abort => Opcode::Abort,
        }
    }

    /// Returns true if the request carries the final bit.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.opcode().is_final()
    }
}

/// Returns the size of the fixed fields following the prefix.
const fn fixed_len(opcode: Opcode) -> usize {
    match opcode {
        Opcode::Connect => 4,
        Opcode::SetPath => 2,
        _ => 0,
    }
}

/// Request packet under construction.
///
/// The length field is patched in by [`RequestBuilder::finish`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    buf: BytesMut,
    max_len: usize,
    opcode: Opcode,
    srm: Option<(bool, bool)>,
}

impl RequestBuilder {
    /// Starts a request that may grow up to `max_len` bytes.
    pub fn new(kind: RequestKind, max_len: usize) -> Result<Self, CodecError> {
        let max_len = max_len.min(OBEX_MAX_PACKET_SIZE);
        let opcode = kind.opcode();
        let needed = PREFIX_LEN + fixed_len(opcode);
        if needed > max_len {
            return Err(CodecError::TooLarge {
                size: needed,
                max: max_len,
            });
        }

        let mut buf = BytesMut::with_capacity(max_len);
        buf.put_u8(opcode.into());
        buf.put_u16(0);
        match kind {
            RequestKind::Connect {
                version,
                flags,
                max_packet_length,
            } => {
                buf.put_u8(version);
                buf.put_u8(flags);
                buf.put_u16(max_packet_length);
            }
            RequestKind::SetPath { flags } => {
                buf.put_u8(flags);
                // Constants byte, reserved
                buf.put_u8(0);
            }
            _ => {}
        }

        Ok(Self {
            buf,
            max_len,
            opcode,
            srm: None,
        })
    }

    /// Returns the opcode being built.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns the current encoded length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if only the prefix and fixed fields are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.len() == PREFIX_LEN + fixed_len(self.opcode)
    }

    /// Returns the bytes still available for headers.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.max_len.saturating_sub(self.buf.len())
    }

    /// Returns the SRM flags set on this request, as `(enable, wait)`.
    #[must_use]
    pub const fn srm(&self) -> Option<(bool, bool)> {
        self.srm
    }

    /// Appends a header, failing if it does not fit.
    pub fn add_header(&mut self, id: u8, value: &[u8]) -> Result<(), CodecError> {
        let size = self.buf.len() + HeaderEncoding::of(id).encoded_len(value.len());
        if size > self.max_len {
            return Err(CodecError::TooLarge {
                size,
                max: self.max_len,
            });
        }
        put_header(&mut self.buf, id, value)
    }

    /// Appends the SRM header, and the wait parameter when asked.
    pub fn set_srm(&mut self, enable: bool, wait: bool) -> Result<(), CodecError> {
        if enable {
            self.add_header(header_id::SRM, &[SRM_ENABLE])?;
        }
        if wait {
            self.add_header(header_id::SRM_PARAM, &[SRM_PARAM_WAIT])?;
        }
        self.srm = Some((enable, wait));
        Ok(())
    }

    /// Completes the packet.
    #[must_use]
    pub fn finish(mut self) -> Bytes {
        // Bounded by max_len which never exceeds u16::MAX
        let len = u16::try_from(self.buf.len()).unwrap_or(u16::MAX);
        self.buf[1..3].copy_from_slice(&len.to_be_bytes());
        self.buf.freeze()
    }
}

/// Fixed fields of a CONNECT request or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectInfo {
    /// OBEX version.
    pub version: u8,
    /// Connect flags.
    pub flags: u8,
    /// Largest packet the sender accepts.
    pub max_packet_length: u16,
}

/// A complete, validated OBEX packet.
///
/// The buffer is immutable and owned; moving the packet moves the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObexPacket {
    data: Bytes,
    headers_at: usize,
    connect: Option<ConnectInfo>,
    setpath_flags: Option<u8>,
}

impl ObexPacket {
    /// Parses a response packet.
    ///
    /// `connect` must be true when the packet answers a CONNECT request,
    /// since only then does it carry the connect fields.
    pub fn parse_response(data: Bytes, connect: bool) -> Result<Self, CodecError> {
        let fixed = if connect { 4 } else { 0 };
        let mut packet = Self::validate(data, fixed)?;
        if connect {
            packet.connect = Some(packet.read_connect_info());
        }
        Ok(packet)
    }

    /// Parses a request packet, using its opcode to find the fixed fields.
    pub fn parse_request(data: Bytes) -> Result<Self, CodecError> {
        let opcode = data.first().copied().and_then(Opcode::from_byte);
        let fixed = opcode.map_or(0, fixed_len);
        let mut packet = Self::validate(data, fixed)?;
        match opcode {
            Some(Opcode::Connect) => packet.connect = Some(packet.read_connect_info()),
            Some(Opcode::SetPath) => packet.setpath_flags = Some(packet.data[PREFIX_LEN]),
            _ => {}
        }
        Ok(packet)
    }

    fn validate(data: Bytes, fixed: usize) -> Result<Self, CodecError> {
        let need = PREFIX_LEN + fixed;
        if data.len() < need {
            return Err(CodecError::TooShort {
                need,
                got: data.len(),
            });
        }
        let declared = usize::from(u16::from_be_bytes([data[1], data[2]]));
        if declared != data.len() {
            return Err(CodecError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            headers_at: need,
            connect: None,
            setpath_flags: None,
        })
    }

    fn read_connect_info(&self) -> ConnectInfo {
        ConnectInfo {
            version: self.data[3],
            flags: self.data[4],
            max_packet_length: u16::from_be_bytes([self.data[5], self.data[6]]),
        }
    }

    /// Returns the first byte: the opcode of a request or the code of a response.
    #[must_use]
    pub fn code(&self) -> u8 {
        self.data[0]
    }

    /// Returns the response code, if it is one this client knows.
    #[must_use]
    pub fn response_code(&self) -> Option<ResponseCode> {
        ResponseCode::from_byte(self.code())
    }

    /// Returns true if the final bit is set.
    #[must_use]
    pub fn has_final_bit(&self) -> bool {
        self.code() & FINAL_BIT != 0
    }

    /// Returns true for a CONTINUE response, the only non-terminal response.
    #[must_use]
    pub fn is_continue(&self) -> bool {
        self.response_code() == Some(ResponseCode::Continue)
    }

    /// Returns the CONNECT fields, when present.
    #[must_use]
    pub const fn connect_info(&self) -> Option<ConnectInfo> {
        self.connect
    }

    /// Returns the SETPATH flags of a SETPATH request.
    #[must_use]
    pub const fn setpath_flags(&self) -> Option<u8> {
        self.setpath_flags
    }

    /// Iterates over the headers.
    #[must_use]
    pub fn headers(&self) -> HeaderIter {
        HeaderIter::new(self.data.clone(), self.headers_at)
    }

    /// Returns the value of the first well-formed header with this id.
    #[must_use]
    pub fn header(&self, id: u8) -> Option<Bytes> {
        self.headers()
            .map_while(Result::ok)
            .find(|h| h.id == id)
            .map(|h| h.value)
    }

    /// Returns the BODY or END-OF-BODY payload.
    #[must_use]
    pub fn body(&self) -> Option<Bytes> {
        self.headers()
            .map_while(Result::ok)
            .find(|h| h.id == header_id::BODY || h.id == header_id::END_OF_BODY)
            .map(|h| h.value)
    }

    /// Returns the whole packet.
    #[must_use]
    pub const fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    /// Consumes the packet, returning its buffer.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Returns the packet length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the packet holds no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers_at >= self.data.len()
    }
}
