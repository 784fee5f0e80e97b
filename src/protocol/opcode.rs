//! OBEX opcodes, response codes and header identifiers.
//!
//! Values are byte-exact with IrOBEX 1.5 as profiled by GOEP 2.x.

/// Final bit carried by terminal request opcodes and all response codes.
pub const FINAL_BIT: u8 = 0x80;

/// OBEX protocol version sent in CONNECT (1.0).
pub const OBEX_VERSION: u8 = 0x10;

/// Smallest packet size every OBEX implementation must accept.
pub const OBEX_MIN_PACKET_SIZE: usize = 255;

/// Largest packet size representable in the 16-bit length field.
pub const OBEX_MAX_PACKET_SIZE: usize = 65535;

/// Request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Open a session.
    Connect = 0x80,
    /// Close a session.
    Disconnect = 0x81,
    /// Push part of an object.
    Put = 0x02,
    /// Push the last part of an object.
    PutFinal = 0x82,
    /// Fetch part of an object.
    Get = 0x03,
    /// Fetch an object, request phase complete.
    GetFinal = 0x83,
    /// Change the current folder.
    SetPath = 0x85,
    /// Abort the current operation.
    Abort = 0xFF,
}

impl Opcode {
    /// Attempts to parse an opcode from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x80 => Some(Self::Connect),
            0x81 => Some(Self::Disconnect),
            0x02 => Some(Self::Put),
            0x82 => Some(Self::PutFinal),
            0x03 => Some(Self::Get),
            0x83 => Some(Self::GetFinal),
            0x85 => Some(Self::SetPath),
            0xFF => Some(Self::Abort),
            _ => None,
        }
    }

    /// Returns true if the final bit is set.
    #[must_use]
    pub const fn is_final(self) -> bool {
        (self as u8) & FINAL_BIT != 0
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        op as Self
    }
}

/// Response codes, without the final bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseCode {
    Continue = 0x10,
    Ok = 0x20,
    BadRequest = 0x40,
    Unauthorized = 0x41,
    Forbidden = 0x43,
    NotFound = 0x44,
    NotAcceptable = 0x46,
    PreconditionFailed = 0x4C,
    NotImplemented = 0x51,
    ServiceUnavailable = 0x53,
}

impl ResponseCode {
    /// Parses a response code, ignoring the final bit.
    ///
    /// Codes outside the set this client acts on return `None`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte & !FINAL_BIT {
            0x10 => Some(Self::Continue),
            0x20 => Some(Self::Ok),
            0x40 => Some(Self::BadRequest),
            0x41 => Some(Self::Unauthorized),
            0x43 => Some(Self::Forbidden),
            0x44 => Some(Self::NotFound),
            0x46 => Some(Self::NotAcceptable),
            0x4C => Some(Self::PreconditionFailed),
            0x51 => Some(Self::NotImplemented),
            0x53 => Some(Self::ServiceUnavailable),
            _ => None,
        }
    }

    /// Returns the on-air byte with the final bit set.
    #[must_use]
    pub const fn with_final(self) -> u8 {
        (self as u8) | FINAL_BIT
    }
}

/// Header identifiers consumed or produced by this crate.
///
/// The two high bits of an identifier select its encoding, see
/// [`HeaderEncoding`](crate::protocol::HeaderEncoding).
pub mod header_id {
    /// Object name, null-terminated UTF-16BE.
    pub const NAME: u8 = 0x01;
    /// Object type, null-terminated ASCII.
    pub const TYPE: u8 = 0x42;
    /// Object body chunk.
    pub const BODY: u8 = 0x48;
    /// Final object body chunk.
    pub const END_OF_BODY: u8 = 0x49;
    /// Service the session is directed to.
    pub const TARGET: u8 = 0x46;
    /// Application parameters TLV block.
    pub const APP_PARAM: u8 = 0x4C;
    /// Identifies the session on every request.
    pub const CONNECTION_ID: u8 = 0xCB;
    /// Single Response Mode.
    pub const SRM: u8 = 0x97;
    /// Single Response Mode parameters.
    pub const SRM_PARAM: u8 = 0x98;
}

/// Value of the SRM header that enables Single Response Mode.
pub const SRM_ENABLE: u8 = 0x01;

/// Value of the SRM parameter header that asks the peer to wait.
pub const SRM_PARAM_WAIT: u8 = 0x01;

/// SETPATH flag: back up one level before applying the name.
pub const SETPATH_FLAG_BACKUP: u8 = 0x01;

/// SETPATH flag: do not create the folder if it does not exist.
pub const SETPATH_FLAG_DONT_CREATE: u8 = 0x02;
