//! Stream framing for OBEX over a byte-stream transport.
//!
//! OBEX packets are self-delimiting, so RFCOMM carries them back to back:
//! ```text
//! ┌──────────────┬──────────────┬────────────────────────┐
//! │ opcode/code  │  length (BE) │  rest of the packet    │
//! │   1 byte     │   2 bytes    │  length - 3 bytes      │
//! └──────────────┴──────────────┴────────────────────────┘
//! ```

use bytes::{Buf, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::opcode::OBEX_MAX_PACKET_SIZE;
use crate::protocol::packet::PREFIX_LEN;

/// Packet decoder that handles partial data.
#[derive(Debug)]
pub struct PacketDecoder {
    buffer: BytesMut,
    max_packet: usize,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new(OBEX_MAX_PACKET_SIZE)
    }
}

impl PacketDecoder {
    /// Creates a decoder that accepts packets up to `max_packet` bytes.
    #[must_use]
    pub fn new(max_packet: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_packet,
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete packet.
    ///
    /// Returns `Ok(Some(packet))` with the whole packet including its prefix,
    /// `Ok(None)` if more data is needed, or an error if the length field is
    /// unusable. On error the first buffered byte is dropped so the next call
    /// resynchronises.
    pub fn decode(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.buffer.len() < PREFIX_LEN {
            return Ok(None);
        }

        let length = usize::from(u16::from_be_bytes([self.buffer[1], self.buffer[2]]));

        if length < PREFIX_LEN {
            self.buffer.advance(1);
            return Err(FrameError::TooShort(length));
        }
        if length > self.max_packet {
            self.buffer.advance(1);
            return Err(FrameError::TooLarge {
                size: length,
                max: self.max_packet,
            });
        }

        if self.buffer.len() < length {
            return Ok(None);
        }

        Ok(Some(self.buffer.split_to(length).freeze()))
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
