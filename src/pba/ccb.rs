//! Phone book connection control block.

use crate::event::{ConnOpen, Event, PullResponse};
use crate::goep::GoepHandle;
use crate::pba::state::PbaState;
use crate::protocol::OBEX_MIN_PACKET_SIZE;
use crate::transport::TransportTarget;
use crate::types::{BdAddr, PbaStatus, PbapFeatures, Repositories};

/// Profile version assumed when the server record omits it.
pub const PEER_DEFAULT_VERSION: u16 = 0x0101;

/// Operation in progress on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    PullPhoneBook,
    SetPhoneBook,
    PullVCardListing,
    PullVCardEntry,
}

impl Operation {
    /// Type header of a pull operation, NUL terminated.
    pub(crate) const fn type_header(self) -> Option<&'static [u8]> {
        match self {
            Self::PullPhoneBook => Some(b"x-bt/phonebook\0"),
            Self::PullVCardListing => Some(b"x-bt/vcard-listing\0"),
            Self::PullVCardEntry => Some(b"x-bt/vcard\0"),
            Self::SetPhoneBook => None,
        }
    }

    /// Wraps a response into the event of this operation.
    pub(crate) fn event(self, rsp: PullResponse) -> Event {
        match self {
            Self::PullPhoneBook => Event::PullPhoneBookRsp(rsp),
            Self::PullVCardListing => Event::PullVCardListingRsp(rsp),
            Self::PullVCardEntry => Event::PullVCardEntryRsp(rsp),
            Self::SetPhoneBook => Event::SetPhoneBookRsp {
                handle: rsp.handle,
                status: rsp.status,
            },
        }
    }

    /// Final event reporting a failure of this operation.
    pub(crate) fn failed(self, handle: u16, status: PbaStatus) -> Event {
        self.event(PullResponse::failed(handle, status))
    }
}

/// Walks a slash-separated path one component at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathCursor {
    path: String,
    offset: usize,
}

impl PathCursor {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Returns the next non-empty component and advances past it.
    pub(crate) fn next_component(&mut self) -> Option<String> {
        loop {
            let rest = self.path.get(self.offset..)?;
            if rest.is_empty() {
                return None;
            }
            let (component, consumed) = match rest.find('/') {
                Some(end) => (&rest[..end], end + 1),
                None => (rest, rest.len()),
            };
            self.offset += consumed;
            if !component.is_empty() {
                return Some(component.to_string());
            }
        }
    }

    /// Returns the part of the path not yet walked.
    pub(crate) fn remaining(&self) -> &str {
        self.path.get(self.offset..).unwrap_or_default()
    }
}

/// Per-connection state.
#[derive(Debug)]
pub(crate) struct PbaCcb {
    pub handle: u16,
    pub addr: BdAddr,
    /// Tags SDP replies and session events of this connection.
    pub session: u32,
    pub state: PbaState,

    pub security: u8,
    pub mtu: u16,
    pub local_features: PbapFeatures,

    pub peer_rfcomm: Option<u8>,
    pub peer_psm: Option<u16>,
    pub peer_repositories: Repositories,
    pub peer_features: PbapFeatures,
    pub peer_version: u16,
    pub send_supported_feat: bool,

    pub goep: Option<GoepHandle>,
    pub target: Option<TransportTarget>,
    pub goep_peer_mtu: u16,
    pub connection_id: Option<u32>,
    pub max_tx: u16,
    pub max_rx: u16,

    pub authenticate: bool,
    pub connected: bool,
    pub operation: Option<Operation>,
    pub path: Option<PathCursor>,
}

impl PbaCcb {
    pub(crate) fn new(
        handle: u16,
        addr: BdAddr,
        session: u32,
        security: u8,
        local_features: PbapFeatures,
        mtu: u16,
    ) -> Self {
        Self {
            handle,
            addr,
            session,
            state: PbaState::Init,
            security,
            mtu,
            local_features,
            peer_rfcomm: None,
            peer_psm: None,
            peer_repositories: Repositories::LOCAL,
            peer_features: PbapFeatures::PEER_DEFAULT,
            peer_version: PEER_DEFAULT_VERSION,
            send_supported_feat: false,
            goep: None,
            target: None,
            goep_peer_mtu: OBEX_MIN_PACKET_SIZE as u16,
            connection_id: None,
            max_tx: OBEX_MIN_PACKET_SIZE as u16,
            max_rx: mtu,
            authenticate: false,
            connected: false,
            operation: None,
            path: None,
        }
    }

    /// Builds the `ConnOpen` event for this connection.
    pub(crate) fn conn_open(&self, status: PbaStatus) -> Event {
        Event::ConnOpen(Box::new(ConnOpen {
            handle: self.handle,
            addr: self.addr,
            status,
            peer_features: self.peer_features,
            peer_repositories: self.peer_repositories,
            peer_version: self.peer_version,
            max_tx: self.max_tx,
            target: self.target,
        }))
    }
}
