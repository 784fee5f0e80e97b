//! Phone Book Access client.
//!
//! Global requests (enable, disable, register, deregister) act on the
//! client as a whole. Everything else belongs to one connection and runs
//! through the state table in [`state`]:
//!
//! ```text
//! open ─► SDP discovery ─► GOEP open ─► OBEX CONNECT ─► ConnOpen
//!                                                        │
//!            SetPhoneBook / Pull* ◄──────────────────────┘
//! ```
//!
//! Results reach the application as [`Event`]s posted back on the bus.

mod action;
mod ccb;
pub mod state;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::bus::{BusSender, Message, Payload};
use crate::error::SdpError;
use crate::event::Event;
use crate::goep::{GoepClient, GoepEvent};
use crate::protocol::{
    AppParams, OBEX_MIN_PACKET_SIZE, ObexPacket, PullPhoneBookParams, PullVCardEntryParams,
    PullVCardListingParams, header_id,
};
use crate::sdp::{PceRecord, PCE_PROFILE_VERSION, PseRecord, SdpClient, SdpRecordHandle};
use crate::types::{BdAddr, PbaStatus, PbapFeatures};

use ccb::PbaCcb;
pub use ccb::{Operation, PEER_DEFAULT_VERSION};
pub use state::{PbaEvent, PbaState};

/// Handle of a phone book connection; the pool slot plus one.
pub type PbaHandle = u16;

/// PBAP server target UUID sent with OBEX CONNECT.
pub const PBAP_TARGET_UUID: [u8; 16] = [
    0x79, 0x61, 0x35, 0xf0, 0xf0, 0xc5, 0x11, 0xd8, 0x09, 0x66, 0x08, 0x00, 0x20, 0x0c, 0x9a, 0x66,
];

/// Reply channel of an open request.
pub type OpenReply = oneshot::Sender<Result<PbaHandle, PbaStatus>>;

/// Direction of a SetPhoneBook request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPathFlag {
    /// Go to the root, then down the given path if any.
    Root,
    /// Go up one level.
    Up,
    /// Go down the given path; an absolute path starts at the root.
    Down,
}

/// One phone book operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PbaRequest {
    PullPhoneBook {
        name: String,
        params: Option<PullPhoneBookParams>,
    },
    SetPhoneBook {
        flag: SetPathFlag,
        name: Option<String>,
    },
    PullVCardListing {
        name: String,
        params: Option<PullVCardListingParams>,
    },
    PullVCardEntry {
        name: String,
        params: Option<PullVCardEntryParams>,
    },
}

impl PbaRequest {
    /// Returns the operation this request starts.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::PullPhoneBook { .. } => Operation::PullPhoneBook,
            Self::SetPhoneBook { .. } => Operation::SetPhoneBook,
            Self::PullVCardListing { .. } => Operation::PullVCardListing,
            Self::PullVCardEntry { .. } => Operation::PullVCardEntry,
        }
    }

    /// Returns the application parameters of a pull request.
    #[must_use]
    pub fn app_params(&self) -> Option<AppParams> {
        match self {
            Self::PullPhoneBook { params, .. } => params.clone().map(AppParams::from),
            Self::PullVCardListing { params, .. } => params.clone().map(AppParams::from),
            Self::PullVCardEntry { params, .. } => params.clone().map(AppParams::from),
            Self::SetPhoneBook { .. } => None,
        }
    }

    fn heap_size(&self) -> usize {
        match self {
            Self::PullPhoneBook { name, .. } | Self::PullVCardEntry { name, .. } => name.len(),
            Self::PullVCardListing { name, params } => {
                name.len()
                    + params
                        .as_ref()
                        .and_then(|p| p.search_value.as_ref())
                        .map_or(0, String::len)
            }
            Self::SetPhoneBook { name, .. } => name.as_ref().map_or(0, String::len),
        }
    }
}

/// Bus payload addressed to the phone book client.
#[derive(Debug)]
pub enum PbaMsg {
    Enable,
    Disable,
    Register {
        service_name: String,
    },
    Deregister,
    Open {
        addr: BdAddr,
        security: u8,
        features: PbapFeatures,
        mtu: u16,
        /// Receives the synchronous admission result.
        reply: Option<OpenReply>,
    },
    Close {
        handle: PbaHandle,
    },
    Request {
        handle: PbaHandle,
        request: PbaRequest,
    },
    SdpResult {
        handle: PbaHandle,
        discovery: u32,
        result: Result<PseRecord, SdpError>,
    },
    Goep {
        handle: PbaHandle,
        session: u32,
        event: GoepEvent,
    },
}

impl PbaMsg {
    pub(crate) const fn action(&self) -> &'static str {
        match self {
            Self::Enable => "pba_enable",
            Self::Disable => "pba_disable",
            Self::Register { .. } => "pba_register",
            Self::Deregister => "pba_deregister",
            Self::Open { .. } => "pba_open",
            Self::Close { .. } => "pba_close",
            Self::Request { .. } => "pba_request",
            Self::SdpResult { .. } => "pba_sdp_result",
            Self::Goep { event, .. } => event.name(),
        }
    }

    pub(crate) fn heap_size(&self) -> usize {
        match self {
            Self::Register { service_name } => service_name.len(),
            Self::Request { request, .. } => request.heap_size(),
            Self::SdpResult {
                result: Ok(record), ..
            } => record.heap_size(),
            Self::Goep { event, .. } => event.heap_size(),
            _ => 0,
        }
    }
}

/// Input of the connection state table, with its data.
#[derive(Debug)]
pub(crate) enum PbaInput {
    Open,
    Close,
    Request(PbaRequest),
    SdpOk(PseRecord),
    SdpFail,
    GoepOpened {
        peer_mtu: u16,
        our_mtu: u16,
    },
    GoepClosed,
    GoepResponse {
        packet: ObexPacket,
        is_final: bool,
        srm_enabled: bool,
        srm_wait: bool,
    },
}

impl PbaInput {
    const fn event(&self) -> PbaEvent {
        match self {
            Self::Open => PbaEvent::ApiOpen,
            Self::Close => PbaEvent::ApiClose,
            Self::Request(_) => PbaEvent::ApiRequest,
            Self::SdpOk(_) => PbaEvent::SdpOk,
            Self::SdpFail => PbaEvent::SdpFail,
            Self::GoepOpened { .. } => PbaEvent::GoepConnect,
            Self::GoepClosed => PbaEvent::GoepDisconnect,
            Self::GoepResponse { .. } => PbaEvent::GoepResponse,
        }
    }
}

/// The phone book client.
pub struct PbaClient {
    enabled: bool,
    pool: Vec<Option<PbaCcb>>,
    sdp: Box<dyn SdpClient>,
    bus: BusSender,
    prefer_l2cap: bool,
    record: Option<SdpRecordHandle>,
    next_session: u32,
}

impl PbaClient {
    /// Creates a disabled client with room for `max_connections`.
    #[must_use]
    pub fn new(
        max_connections: usize,
        sdp: Box<dyn SdpClient>,
        bus: BusSender,
        prefer_l2cap: bool,
    ) -> Self {
        Self {
            enabled: false,
            pool: std::iter::repeat_with(|| None).take(max_connections).collect(),
            sdp,
            bus,
            prefer_l2cap,
            record: None,
            next_session: 0,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the state of a connection.
    #[must_use]
    pub fn state(&self, handle: PbaHandle) -> Option<PbaState> {
        self.ccb(handle).map(|ccb| ccb.state)
    }

    /// Returns the number of connections in use.
    #[must_use]
    pub fn active(&self) -> usize {
        self.pool.iter().flatten().count()
    }

    /// Handles a bus message.
    pub fn handle(&mut self, goep: &mut GoepClient, msg: PbaMsg) {
        match msg {
            PbaMsg::Enable => self.enable(),
            PbaMsg::Disable => self.disable(goep),
            PbaMsg::Register { service_name } => self.register(service_name),
            PbaMsg::Deregister => self.deregister(),
            PbaMsg::Open {
                addr,
                security,
                features,
                mtu,
                reply,
            } => self.open(goep, addr, security, features, mtu, reply),
            PbaMsg::Close { handle } => match self.slot(handle) {
                Some(slot) => self.sm_execute(goep, slot, PbaInput::Close),
                None => tracing::debug!("close of unknown pba {}", handle),
            },
            PbaMsg::Request { handle, request } => match self.slot(handle) {
                Some(slot) => self.sm_execute(goep, slot, PbaInput::Request(request)),
                None => {
                    tracing::debug!("request on unknown pba {}", handle);
                    self.report(request.operation().failed(handle, PbaStatus::Fail));
                }
            },
            PbaMsg::SdpResult {
                handle,
                discovery,
                result,
            } => self.sdp_result(goep, handle, discovery, result),
            PbaMsg::Goep {
                handle,
                session,
                event,
            } => self.goep_event(goep, handle, session, event),
        }
    }

    fn enable(&mut self) {
        if self.enabled {
            tracing::debug!("pba already enabled");
        }
        self.enabled = true;
        tracing::info!("pba enabled");
        self.report(Event::Init {
            status: PbaStatus::Success,
        });
    }

    fn disable(&mut self, goep: &mut GoepClient) {
        if !self.enabled {
            self.report(Event::Deinit {
                status: PbaStatus::Disabled,
            });
            return;
        }
        for slot in 0..self.pool.len() {
            self.close_conn(goep, slot);
        }
        if let Some(record) = self.record.take() {
            if let Err(e) = self.sdp.remove_record(record) {
                tracing::warn!("failed to remove PCE record: {}", e);
            }
        }
        self.enabled = false;
        tracing::info!("pba disabled");
        self.report(Event::Deinit {
            status: PbaStatus::Success,
        });
    }

    fn register(&mut self, service_name: String) {
        if !self.enabled {
            self.report(Event::Registered {
                status: PbaStatus::Disabled,
            });
            return;
        }
        if let Some(old) = self.record.take() {
            if let Err(e) = self.sdp.remove_record(old) {
                tracing::warn!("failed to remove previous PCE record: {}", e);
            }
        }
        let status = match self.sdp.add_record(PceRecord {
            service_name,
            profile_version: PCE_PROFILE_VERSION,
        }) {
            Ok(record) => {
                self.record = Some(record);
                PbaStatus::Success
            }
            Err(e) => {
                tracing::warn!("failed to add PCE record: {}", e);
                PbaStatus::SdpError
            }
        };
        self.report(Event::Registered { status });
    }

    fn deregister(&mut self) {
        let status = match self.record.take() {
            Some(record) => match self.sdp.remove_record(record) {
                Ok(()) => PbaStatus::Success,
                Err(e) => {
                    tracing::warn!("failed to remove PCE record: {}", e);
                    PbaStatus::SdpError
                }
            },
            None => PbaStatus::Fail,
        };
        self.report(Event::Deregistered { status });
    }

    fn admit(&self, addr: BdAddr) -> Result<(usize, PbaHandle), PbaStatus> {
        if !self.enabled {
            return Err(PbaStatus::Disabled);
        }
        if self.pool.iter().flatten().any(|ccb| ccb.addr == addr) {
            return Err(PbaStatus::AlreadyConnected);
        }
        let slot = self
            .pool
            .iter()
            .position(Option::is_none)
            .ok_or(PbaStatus::NoResource)?;
        let handle = PbaHandle::try_from(slot + 1).map_err(|_| PbaStatus::NoResource)?;
        Ok((slot, handle))
    }

    fn open(
        &mut self,
        goep: &mut GoepClient,
        addr: BdAddr,
        security: u8,
        features: PbapFeatures,
        mtu: u16,
        reply: Option<OpenReply>,
    ) {
        let (slot, handle) = match self.admit(addr) {
            Ok(admitted) => admitted,
            Err(status) => {
                tracing::info!("open of {} rejected: {:?}", addr, status);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Err(status));
                    }
                    None => {
                        let ccb = PbaCcb::new(0, addr, 0, security, features, mtu);
                        self.report(ccb.conn_open(status));
                    }
                }
                return;
            }
        };

        self.next_session = self.next_session.wrapping_add(1);
        let mtu = mtu.max(OBEX_MIN_PACKET_SIZE as u16);
        self.pool[slot] = Some(PbaCcb::new(
            handle,
            addr,
            self.next_session,
            security,
            features,
            mtu,
        ));
        tracing::info!("pba {} opening to {}", handle, addr);
        if let Some(reply) = reply {
            let _ = reply.send(Ok(handle));
        }
        self.sm_execute(goep, slot, PbaInput::Open);
    }

    fn sdp_result(
        &mut self,
        goep: &mut GoepClient,
        handle: PbaHandle,
        discovery: u32,
        result: Result<PseRecord, SdpError>,
    ) {
        let Some(slot) = self.session_slot(handle, discovery) else {
            tracing::debug!("stale discovery result for pba {}", handle);
            return;
        };
        let input = match result {
            Ok(record) if record.is_usable() => PbaInput::SdpOk(record),
            Ok(_) => {
                tracing::warn!("pba {} server record has no channel", handle);
                PbaInput::SdpFail
            }
            Err(e) => {
                tracing::info!("pba {} discovery failed: {}", handle, e);
                PbaInput::SdpFail
            }
        };
        self.sm_execute(goep, slot, input);
    }

    fn goep_event(
        &mut self,
        goep: &mut GoepClient,
        handle: PbaHandle,
        session: u32,
        event: GoepEvent,
    ) {
        let Some(slot) = self.session_slot(handle, session) else {
            tracing::debug!("{} for released pba {}", event.name(), handle);
            return;
        };
        let input = match event {
            GoepEvent::Opened { peer_mtu, our_mtu } => PbaInput::GoepOpened { peer_mtu, our_mtu },
            GoepEvent::Closed => PbaInput::GoepClosed,
            GoepEvent::Response {
                packet,
                is_final,
                srm_enabled,
                srm_wait,
            } => PbaInput::GoepResponse {
                packet,
                is_final,
                srm_enabled,
                srm_wait,
            },
            GoepEvent::Congest | GoepEvent::Uncongest => {
                tracing::debug!("pba {} {}", handle, event.name());
                return;
            }
        };
        self.sm_execute(goep, slot, input);
    }

    /// Runs one transition of the connection state table.
    fn sm_execute(&mut self, goep: &mut GoepClient, slot: usize, input: PbaInput) {
        let Some(ccb) = self.pool.get_mut(slot).and_then(Option::as_mut) else {
            return;
        };
        let event = input.event();
        let Some((action, next)) = state::transition(ccb.state, event) else {
            tracing::debug!("pba {} dropped {:?} in {:?}", ccb.handle, event, ccb.state);
            return;
        };
        if ccb.state != next {
            tracing::debug!(
                "pba {} {:?} -> {:?} on {:?}",
                ccb.handle,
                ccb.state,
                next,
                event
            );
        }
        ccb.state = next;
        self.execute(goep, slot, action, input);
    }

    fn report(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.bus.post(Message::callback(Payload::Event(event))) {
            tracing::error!("failed to report {}: {}", name, e);
        }
    }

    fn slot(&self, handle: PbaHandle) -> Option<usize> {
        let slot = usize::from(handle).checked_sub(1)?;
        self.pool
            .get(slot)
            .and_then(Option::as_ref)
            .map(|_| slot)
    }

    fn session_slot(&self, handle: PbaHandle, session: u32) -> Option<usize> {
        self.slot(handle)
            .filter(|&slot| self.pool[slot].as_ref().is_some_and(|c| c.session == session))
    }

    fn ccb(&self, handle: PbaHandle) -> Option<&PbaCcb> {
        self.slot(handle).and_then(|slot| self.pool[slot].as_ref())
    }
}

/// Decodes the application parameters header of a response, if any.
fn response_app_params(packet: &ObexPacket) -> Option<AppParams> {
    let raw: Bytes = packet.header(header_id::APP_PARAM)?;
    match AppParams::decode(&raw) {
        Ok(params) => Some(params),
        Err(e) => {
            tracing::warn!("ignoring malformed application parameters: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests;
