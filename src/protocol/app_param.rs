//! PBAP application parameters.
//!
//! Parameters travel in the OBEX APP_PARAM header as a sequence of
//! big-endian TLV triplets:
//! ```text
//! [tag:1] [length:1] [value:length]
//! ```
//! Every tag except `SearchValue` has a fixed length.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Application parameter tags.
pub mod tag {
    pub const ORDER: u8 = 0x01;
    pub const SEARCH_VALUE: u8 = 0x02;
    pub const SEARCH_PROPERTY: u8 = 0x03;
    pub const MAX_LIST_COUNT: u8 = 0x04;
    pub const LIST_START_OFFSET: u8 = 0x05;
    pub const PROPERTY_SELECTOR: u8 = 0x06;
    pub const FORMAT: u8 = 0x07;
    pub const PHONE_BOOK_SIZE: u8 = 0x08;
    pub const NEW_MISSED_CALLS: u8 = 0x09;
    pub const PRIMARY_FOLDER_VERSION: u8 = 0x0A;
    pub const SECONDARY_FOLDER_VERSION: u8 = 0x0B;
    pub const VCARD_SELECTOR: u8 = 0x0C;
    pub const DATABASE_IDENTIFIER: u8 = 0x0D;
    pub const VCARD_SELECTOR_OPERATOR: u8 = 0x0E;
    pub const RESET_NEW_MISSED_CALLS: u8 = 0x0F;
    pub const SUPPORTED_FEATURES: u8 = 0x10;
}

/// Returns the fixed value length of a tag, or `None` for variable length
/// and unknown tags.
const fn fixed_len(tag: u8) -> Option<usize> {
    match tag {
        tag::ORDER
        | tag::SEARCH_PROPERTY
        | tag::FORMAT
        | tag::NEW_MISSED_CALLS
        | tag::VCARD_SELECTOR_OPERATOR
        | tag::RESET_NEW_MISSED_CALLS => Some(1),
        tag::MAX_LIST_COUNT | tag::LIST_START_OFFSET | tag::PHONE_BOOK_SIZE => Some(2),
        tag::SUPPORTED_FEATURES => Some(4),
        tag::PROPERTY_SELECTOR | tag::VCARD_SELECTOR => Some(8),
        tag::PRIMARY_FOLDER_VERSION | tag::SECONDARY_FOLDER_VERSION | tag::DATABASE_IDENTIFIER => {
            Some(16)
        }
        _ => None,
    }
}

/// The full set of PBAP application parameters.
///
/// Absent fields are not encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppParams {
    pub order: Option<u8>,
    pub search_value: Option<Bytes>,
    pub search_property: Option<u8>,
    pub max_list_count: Option<u16>,
    pub list_start_offset: Option<u16>,
    pub property_selector: Option<u64>,
    pub format: Option<u8>,
    pub phone_book_size: Option<u16>,
    pub new_missed_calls: Option<u8>,
    pub primary_folder_version: Option<[u8; 16]>,
    pub secondary_folder_version: Option<[u8; 16]>,
    pub vcard_selector: Option<u64>,
    pub database_identifier: Option<[u8; 16]>,
    pub vcard_selector_operator: Option<u8>,
    pub reset_new_missed_calls: Option<u8>,
    pub supported_features: Option<u32>,
}

impl AppParams {
    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Encodes the present fields in tag order.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();

        put_u8(&mut buf, tag::ORDER, self.order);
        if let Some(value) = &self.search_value {
            let len = u8::try_from(value.len()).map_err(|_| CodecError::BadAppParam(tag::SEARCH_VALUE))?;
            buf.put_u8(tag::SEARCH_VALUE);
            buf.put_u8(len);
            buf.put_slice(value);
        }
        put_u8(&mut buf, tag::SEARCH_PROPERTY, self.search_property);
        put_u16(&mut buf, tag::MAX_LIST_COUNT, self.max_list_count);
        put_u16(&mut buf, tag::LIST_START_OFFSET, self.list_start_offset);
        put_u64(&mut buf, tag::PROPERTY_SELECTOR, self.property_selector);
        put_u8(&mut buf, tag::FORMAT, self.format);
        put_u16(&mut buf, tag::PHONE_BOOK_SIZE, self.phone_book_size);
        put_u8(&mut buf, tag::NEW_MISSED_CALLS, self.new_missed_calls);
        put_array(&mut buf, tag::PRIMARY_FOLDER_VERSION, self.primary_folder_version.as_ref());
        put_array(&mut buf, tag::SECONDARY_FOLDER_VERSION, self.secondary_folder_version.as_ref());
        put_u64(&mut buf, tag::VCARD_SELECTOR, self.vcard_selector);
        put_array(&mut buf, tag::DATABASE_IDENTIFIER, self.database_identifier.as_ref());
        put_u8(&mut buf, tag::VCARD_SELECTOR_OPERATOR, self.vcard_selector_operator);
        put_u8(&mut buf, tag::RESET_NEW_MISSED_CALLS, self.reset_new_missed_calls);
        if let Some(features) = self.supported_features {
            buf.put_u8(tag::SUPPORTED_FEATURES);
            buf.put_u8(4);
            buf.put_u32(features);
        }

        Ok(buf.freeze())
    }

    /// Decodes a TLV block.
    ///
    /// Unknown tags are skipped; a known tag with the wrong length or a
    /// truncated triplet is an error.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut params = Self::default();
        let mut pos = 0;

        while pos < data.len() {
            if data.len() - pos < 2 {
                return Err(CodecError::BadAppParam(data[pos]));
            }
            let id = data[pos];
            let len = usize::from(data[pos + 1]);
            let start = pos + 2;
            let end = start + len;
            if end > data.len() {
                return Err(CodecError::BadAppParam(id));
            }
            let value = &data[start..end];
            pos = end;

            if id == tag::SEARCH_VALUE {
                params.search_value = Some(Bytes::copy_from_slice(value));
                continue;
            }
            match fixed_len(id) {
                Some(expected) if expected != len => return Err(CodecError::BadAppParam(id)),
                Some(_) => {}
                None => {
                    tracing::debug!("skipping unknown application parameter 0x{id:02x}");
                    continue;
                }
            }

            match id {
                tag::ORDER => params.order = Some(value[0]),
                tag::SEARCH_PROPERTY => params.search_property = Some(value[0]),
                tag::MAX_LIST_COUNT => params.max_list_count = Some(be_u16(value)),
                tag::LIST_START_OFFSET => params.list_start_offset = Some(be_u16(value)),
                tag::PROPERTY_SELECTOR => params.property_selector = Some(be_u64(value)),
                tag::FORMAT => params.format = Some(value[0]),
                tag::PHONE_BOOK_SIZE => params.phone_book_size = Some(be_u16(value)),
                tag::NEW_MISSED_CALLS => params.new_missed_calls = Some(value[0]),
                tag::PRIMARY_FOLDER_VERSION => params.primary_folder_version = Some(array16(value)),
                tag::SECONDARY_FOLDER_VERSION => {
                    params.secondary_folder_version = Some(array16(value));
                }
                tag::VCARD_SELECTOR => params.vcard_selector = Some(be_u64(value)),
                tag::DATABASE_IDENTIFIER => params.database_identifier = Some(array16(value)),
                tag::VCARD_SELECTOR_OPERATOR => params.vcard_selector_operator = Some(value[0]),
                tag::RESET_NEW_MISSED_CALLS => params.reset_new_missed_calls = Some(value[0]),
                tag::SUPPORTED_FEATURES => {
                    params.supported_features =
                        Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]));
                }
                _ => {}
            }
        }

        Ok(params)
    }
}

fn put_u8(buf: &mut BytesMut, id: u8, value: Option<u8>) {
    if let Some(v) = value {
        buf.put_u8(id);
        buf.put_u8(1);
        buf.put_u8(v);
    }
}

fn put_u16(buf: &mut BytesMut, id: u8, value: Option<u16>) {
    if let Some(v) = value {
        buf.put_u8(id);
        buf.put_u8(2);
        buf.put_u16(v);
    }
}

fn put_u64(buf: &mut BytesMut, id: u8, value: Option<u64>) {
    if let Some(v) = value {
        buf.put_u8(id);
        buf.put_u8(8);
        buf.put_u64(v);
    }
}

fn put_array(buf: &mut BytesMut, id: u8, value: Option<&[u8; 16]>) {
    if let Some(v) = value {
        buf.put_u8(id);
        buf.put_u8(16);
        buf.put_slice(v);
    }
}

fn be_u16(v: &[u8]) -> u16 {
    u16::from_be_bytes([v[0], v[1]])
}

fn be_u64(v: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&v[..8]);
    u64::from_be_bytes(bytes)
}

fn array16(v: &[u8]) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&v[..16]);
    bytes
}

/// vCard formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VCardFormat {
    V21 = 0x00,
    V30 = 0x01,
}

/// Sort order of a vCard listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListOrder {
    Indexed = 0x00,
    Alphanumeric = 0x01,
    Phonetic = 0x02,
}

/// Property searched by a vCard listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SearchProperty {
    Name = 0x00,
    Number = 0x01,
    Sound = 0x02,
}

/// Parameters of a PullPhoneBook request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullPhoneBookParams {
    pub property_selector: Option<u64>,
    pub format: Option<VCardFormat>,
    pub max_list_count: Option<u16>,
    pub list_start_offset: Option<u16>,
    pub reset_new_missed_calls: Option<bool>,
    pub vcard_selector: Option<u64>,
    pub vcard_selector_operator: Option<u8>,
}

impl From<PullPhoneBookParams> for AppParams {
    fn from(p: PullPhoneBookParams) -> Self {
        Self {
            property_selector: p.property_selector,
            format: p.format.map(|f| f as u8),
            max_list_count: p.max_list_count,
            list_start_offset: p.list_start_offset,
            reset_new_missed_calls: p.reset_new_missed_calls.map(u8::from),
            vcard_selector: p.vcard_selector,
            vcard_selector_operator: p.vcard_selector_operator,
            ..Self::default()
        }
    }
}

/// Parameters of a PullvCardListing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullVCardListingParams {
    pub order: Option<ListOrder>,
    pub search_value: Option<String>,
    pub search_property: Option<SearchProperty>,
    pub max_list_count: Option<u16>,
    pub list_start_offset: Option<u16>,
    pub reset_new_missed_calls: Option<bool>,
    pub vcard_selector: Option<u64>,
    pub vcard_selector_operator: Option<u8>,
}

impl From<PullVCardListingParams> for AppParams {
    fn from(p: PullVCardListingParams) -> Self {
        Self {
            order: p.order.map(|o| o as u8),
            search_value: p.search_value.map(Bytes::from),
            search_property: p.search_property.map(|s| s as u8),
            max_list_count: p.max_list_count,
            list_start_offset: p.list_start_offset,
            reset_new_missed_calls: p.reset_new_missed_calls.map(u8::from),
            vcard_selector: p.vcard_selector,
            vcard_selector_operator: p.vcard_selector_operator,
            ..Self::default()
        }
    }
}

/// Parameters of a PullvCardEntry request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullVCardEntryParams {
    pub property_selector: Option<u64>,
    pub format: Option<VCardFormat>,
}

impl From<PullVCardEntryParams> for AppParams {
    fn from(p: PullVCardEntryParams) -> Self {
        Self {
            property_selector: p.property_selector,
            format: p.format.map(|f| f as u8),
            ..Self::default()
        }
    }
}
