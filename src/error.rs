//! Error types for the pbap-client library.

use thiserror::Error;

use crate::types::PbaStatus;

/// The main error type for pbap-client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream framing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// OBEX packet encoding/decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Message bus error.
    #[error("message bus error: {0}")]
    Bus(#[from] BusError),

    /// GOEP client engine error.
    #[error("GOEP error: {0}")]
    Goep(#[from] GoepError),

    /// Service discovery error.
    #[error("SDP error: {0}")]
    Sdp(#[from] SdpError),

    /// The phone book client rejected the request.
    #[error("phone book client rejected the request: {0:?}")]
    Pba(PbaStatus),

    /// Operation timed out waiting for a response.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Invalid Bluetooth device address.
    #[error("invalid device address: {reason}")]
    InvalidAddress { reason: String },

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

/// Message bus errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The payload does not belong to the addressed component.
    #[error("invalid argument: payload does not target this component")]
    InvalidArgument,

    /// The queued payloads would exceed the configured heap budget.
    #[error("no memory: {requested} bytes requested, {available} available")]
    NoMemory { requested: usize, available: usize },

    /// The queue stayed full for the whole bounded wait.
    #[error("message queue is full")]
    Busy,

    /// The dispatcher has shut down.
    #[error("message queue closed")]
    Closed,
}

/// GOEP client engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GoepError {
    /// A parameter was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Every control block in the pool is in use.
    #[error("no free connection control block")]
    NoResources,

    /// The handle does not name an allocated control block.
    #[error("unknown handle {0}")]
    BadHandle(u16),

    /// The request is not admissible in the current state.
    #[error("invalid state for this operation")]
    InvalidState,

    /// The underlying transport is congested.
    #[error("transport congested")]
    Congest,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The pending packet could not be built.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Service discovery errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdpError {
    /// The peer has no record of the requested service.
    #[error("no matching service record")]
    NoRecord,

    /// Discovery or record registration failed.
    #[error("service discovery failed: {0}")]
    Failed(String),
}

/// OBEX packet codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Packet too short to contain its fixed prefix.
    #[error("packet too short: need at least {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },

    /// The length field disagrees with the buffer.
    #[error("length field says {declared} bytes, buffer holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Adding data would exceed the packet buffer size.
    #[error("packet would grow to {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    /// A header is truncated or has an inconsistent length.
    #[error("malformed header 0x{0:02x}")]
    BadHeader(u8),

    /// A fixed-size header was given a value of the wrong width.
    #[error("header 0x{id:02x} needs {expected} bytes, got {got}")]
    HeaderWidth { id: u8, expected: usize, got: usize },

    /// An application parameter has the wrong length or is truncated.
    #[error("malformed application parameter tag 0x{0:02x}")]
    BadAppParam(u8),
}

/// Stream framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Declared packet length is shorter than the packet prefix.
    #[error("packet length {0} is below the 3-byte minimum")]
    TooShort(usize),

    /// Declared packet length exceeds the receive limit.
    #[error("packet too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
}

/// Result type alias for pbap-client operations.
pub type Result<T> = std::result::Result<T, Error>;
