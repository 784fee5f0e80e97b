//! OBEX protocol definitions.
//!
//! This module contains the byte-level protocol types including:
//! - Opcodes, response codes and header identifiers
//! - Request building and packet parsing
//! - Header encoding and iteration
//! - Stream framing
//! - PBAP application parameters

pub mod app_param;
pub mod frame;
pub mod header;
pub mod opcode;
pub mod packet;

pub use app_param::{
    AppParams, ListOrder, PullPhoneBookParams, PullVCardEntryParams, PullVCardListingParams,
    SearchProperty, VCardFormat,
};
pub use frame::PacketDecoder;
pub use header::{Header, HeaderEncoding, HeaderIter, decode_unicode, encode_unicode};
pub use opcode::{
    FINAL_BIT, OBEX_MIN_PACKET_SIZE, OBEX_VERSION, Opcode, ResponseCode, SETPATH_FLAG_BACKUP,
    SETPATH_FLAG_DONT_CREATE, header_id,
};
pub use packet::{ConnectInfo, ObexPacket, RequestBuilder, RequestKind};
