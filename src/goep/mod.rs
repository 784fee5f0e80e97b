//! GOEP client engine.
//!
//! Runs one OBEX session per connection control block (CCB) drawn from a
//! fixed pool. Requests are built in place with
//! [`GoepClient::prepare_request`] and friends, then handed to the
//! transport by [`GoepClient::send_request`]. Transport events arrive
//! through the message bus and are reported to the session's callback.
//!
//! Main state machine:
//!
//! | State      | Req / ReqFinal         | Rsp / RspFinal                   | Connect    | Disconnect |
//! |------------|------------------------|----------------------------------|------------|------------|
//! | Opening    | disconnect             | disconnect                       | OpenedIdle | teardown   |
//! | OpenedIdle | OpenedReq / OpenedRsp  | disconnect                       |            | teardown   |
//! | OpenedReq  | OpenedReq / OpenedRsp  | notify; RspFinal → OpenedIdle    |            | teardown   |
//! | OpenedRsp  | ReqFinal only          | notify; RspFinal → OpenedIdle    |            | teardown   |

pub mod state;

use std::sync::Arc;

use bytes::Bytes;

use crate::bus::BusSender;
use crate::error::GoepError;
use crate::protocol::{
    OBEX_MIN_PACKET_SIZE, ObexPacket, Opcode, RequestBuilder, RequestKind, header_id,
    opcode::{SRM_ENABLE, SRM_PARAM_WAIT},
};
use crate::transport::{
    ObexTransport, ServerInfo, TransportEvent, TransportEvents, TransportHandle,
};

pub use state::{GoepState, SrmMachine, SrmState};
use state::GoepSmEvent;

/// Handle of an OBEX session; the pool slot plus one.
pub type GoepHandle = u16;

/// Receives the notifications of one session.
pub type GoepCallback = Box<dyn FnMut(GoepHandle, GoepEvent) + Send>;

/// Notification to the layer above.
#[derive(Debug)]
pub enum GoepEvent {
    /// The transport is up.
    Opened { peer_mtu: u16, our_mtu: u16 },
    /// A response arrived. The packet moves to the receiver.
    Response {
        packet: ObexPacket,
        is_final: bool,
        srm_enabled: bool,
        srm_wait: bool,
    },
    Congest,
    Uncongest,
    /// The session is gone; the handle is no longer valid.
    Closed,
}

impl GoepEvent {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Opened { .. } => "goep_opened",
            Self::Response { .. } => "goep_response",
            Self::Congest => "goep_congest",
            Self::Uncongest => "goep_uncongest",
            Self::Closed => "goep_closed",
        }
    }

    pub(crate) fn heap_size(&self) -> usize {
        match self {
            Self::Response { packet, .. } => packet.len(),
            _ => 0,
        }
    }
}

/// Bus payload addressed to the engine.
#[derive(Debug)]
pub enum GoepMsg {
    /// Something happened on a transport link.
    Transport {
        link: TransportHandle,
        event: TransportEvent,
    },
}

impl GoepMsg {
    pub(crate) const fn action(&self) -> &'static str {
        match self {
            Self::Transport { event, .. } => event.name(),
        }
    }

    pub(crate) fn heap_size(&self) -> usize {
        match self {
            Self::Transport {
                event: TransportEvent::Data(data),
                ..
            } => data.len(),
            Self::Transport { .. } => 0,
        }
    }
}

/// Connection control block.
struct Ccb {
    handle: GoepHandle,
    link: TransportHandle,
    peer_mtu: u16,
    our_mtu: u16,
    congested: bool,
    state: GoepState,
    srm: SrmMachine,
    awaiting_rsp: bool,
    pending: Option<RequestBuilder>,
    last_sent: Option<Opcode>,
    last_received: Option<u8>,
    callback: GoepCallback,
}

impl Ccb {
    fn notify(&mut self, event: GoepEvent) {
        tracing::trace!("goep {} notify {}", self.handle, event.name());
        (self.callback)(self.handle, event);
    }
}

/// The GOEP client engine.
pub struct GoepClient {
    pool: Vec<Option<Ccb>>,
    transport: Arc<dyn ObexTransport>,
    bus: BusSender,
    next_link: u32,
}

impl GoepClient {
    /// Creates an engine with room for `max_connections` sessions.
    #[must_use]
    pub fn new(max_connections: usize, transport: Arc<dyn ObexTransport>, bus: BusSender) -> Self {
        Self {
            pool: std::iter::repeat_with(|| None).take(max_connections).collect(),
            transport,
            bus,
            next_link: 0,
        }
    }

    /// Returns true if the transport can open L2CAP sessions.
    #[must_use]
    pub fn supports_l2cap(&self) -> bool {
        self.transport.supports_l2cap()
    }

    /// Allocates a session and starts opening its transport.
    pub fn open(
        &mut self,
        info: ServerInfo,
        callback: GoepCallback,
    ) -> Result<GoepHandle, GoepError> {
        info.validate()?;
        let slot = self
            .pool
            .iter()
            .position(Option::is_none)
            .ok_or(GoepError::NoResources)?;
        let handle = GoepHandle::try_from(slot + 1).map_err(|_| GoepError::NoResources)?;

        self.next_link = self.next_link.wrapping_add(1);
        let link = TransportHandle::new(self.next_link);
        self.transport
            .open(link, &info, TransportEvents::new(self.bus.clone(), link))?;

        tracing::info!("goep {} opening {} to {:?}", handle, link, info.target);
        self.pool[slot] = Some(Ccb {
            handle,
            link,
            peer_mtu: OBEX_MIN_PACKET_SIZE as u16,
            our_mtu: info.local_mtu,
            congested: false,
            state: GoepState::Opening,
            srm: SrmMachine::default(),
            awaiting_rsp: false,
            pending: None,
            last_sent: None,
            last_received: None,
            callback,
        });
        Ok(handle)
    }

    /// Starts building a request as the session's pending packet.
    ///
    /// `buff_size` is the largest packet wanted; it is clamped to the peer MTU.
    pub fn prepare_request(
        &mut self,
        handle: GoepHandle,
        kind: RequestKind,
        buff_size: usize,
    ) -> Result<(), GoepError> {
        let ccb = self.ccb_mut(handle)?;
        if buff_size < OBEX_MIN_PACKET_SIZE {
            return Err(GoepError::InvalidArgument("buffer below OBEX minimum"));
        }
        match kind {
            RequestKind::Connect {
                version,
                max_packet_length,
                ..
            } if version == 0 || usize::from(max_packet_length) < OBEX_MIN_PACKET_SIZE => {
                return Err(GoepError::InvalidArgument("bad CONNECT parameters"));
            }
            RequestKind::Abort => {
                return Err(GoepError::InvalidArgument("ABORT is not supported"));
            }
            _ => {}
        }
        if ccb.pending.is_some() {
            return Err(GoepError::InvalidState);
        }

        let size = buff_size
            .min(usize::from(ccb.peer_mtu))
            .max(OBEX_MIN_PACKET_SIZE);
        ccb.pending = Some(RequestBuilder::new(kind, size)?);
        Ok(())
    }

    /// Appends a header to the pending packet.
    pub fn request_add_header(
        &mut self,
        handle: GoepHandle,
        id: u8,
        data: &[u8],
    ) -> Result<(), GoepError> {
        let pending = self
            .ccb_mut(handle)?
            .pending
            .as_mut()
            .ok_or(GoepError::InvalidState)?;
        Ok(pending.add_header(id, data)?)
    }

    /// Adds the SRM headers to the pending packet.
    pub fn request_set_srm(
        &mut self,
        handle: GoepHandle,
        enable: bool,
        wait: bool,
    ) -> Result<(), GoepError> {
        let pending = self
            .ccb_mut(handle)?
            .pending
            .as_mut()
            .ok_or(GoepError::InvalidState)?;
        Ok(pending.set_srm(enable, wait)?)
    }

    /// Drops the pending packet, if any.
    pub fn discard_request(&mut self, handle: GoepHandle) -> Result<(), GoepError> {
        self.ccb_mut(handle)?.pending = None;
        Ok(())
    }

    /// Hands the pending packet to the transport.
    pub fn send_request(&mut self, handle: GoepHandle) -> Result<(), GoepError> {
        let slot = slot_of(handle)?;
        let ccb = self.ccb_mut(handle)?;
        let opcode = ccb
            .pending
            .as_ref()
            .ok_or(GoepError::InvalidState)?
            .opcode();
        if ccb.congested {
            return Err(GoepError::Congest);
        }

        let event = if opcode.is_final() {
            GoepSmEvent::ReqFinal
        } else {
            GoepSmEvent::Req
        };
        match ccb.state {
            GoepState::Init | GoepState::Opening => {
                tracing::warn!("goep {} request {:?} before connect", handle, opcode);
                self.disconnect(slot);
                return Err(GoepError::InvalidState);
            }
            GoepState::OpenedReq | GoepState::OpenedRsp
                if ccb.awaiting_rsp && !ccb.srm.is_enabled() =>
            {
                tracing::debug!("goep {} still awaiting a response", handle);
                return Err(GoepError::InvalidState);
            }
            GoepState::OpenedRsp if event == GoepSmEvent::Req => {
                tracing::debug!("goep {} non-final request after a final one", handle);
                return Err(GoepError::InvalidState);
            }
            GoepState::OpenedIdle | GoepState::OpenedReq | GoepState::OpenedRsp => {}
        }

        let builder = ccb.pending.take().ok_or(GoepError::InvalidState)?;
        let (enable, wait) = builder.srm().unwrap_or((false, false));
        ccb.srm.on_request(enable, wait);
        ccb.last_sent = Some(opcode);
        ccb.awaiting_rsp = true;
        ccb.state = if event == GoepSmEvent::ReqFinal {
            GoepState::OpenedRsp
        } else {
            GoepState::OpenedReq
        };
        let link = ccb.link;
        let packet = builder.finish();

        tracing::trace!(
            "goep {} send {:?} ({} bytes) srm {:?}",
            handle,
            opcode,
            packet.len(),
            ccb.srm.state()
        );
        if let Err(e) = self.transport.send(link, packet) {
            tracing::warn!("goep {} send failed: {}", handle, e);
            self.disconnect(slot);
            return Err(e);
        }
        Ok(())
    }

    /// Releases the session at once. No callback is made.
    pub fn close(&mut self, handle: GoepHandle) -> Result<(), GoepError> {
        let slot = slot_of(handle)?;
        let ccb = self
            .pool
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or(GoepError::BadHandle(handle))?;
        tracing::info!("goep {} closed", handle);
        self.transport.close(ccb.link);
        Ok(())
    }

    /// Returns the main state of a session.
    #[must_use]
    pub fn state(&self, handle: GoepHandle) -> Option<GoepState> {
        self.ccb(handle).map(|ccb| ccb.state)
    }

    /// Returns the SRM machine of a session.
    #[must_use]
    pub fn srm(&self, handle: GoepHandle) -> Option<SrmMachine> {
        self.ccb(handle).map(|ccb| ccb.srm)
    }

    /// Returns the negotiated `(peer, ours)` MTUs of a session.
    #[must_use]
    pub fn mtu(&self, handle: GoepHandle) -> Option<(u16, u16)> {
        self.ccb(handle).map(|ccb| (ccb.peer_mtu, ccb.our_mtu))
    }

    /// Returns the code of the last response received on a session.
    #[must_use]
    pub fn last_received(&self, handle: GoepHandle) -> Option<u8> {
        self.ccb(handle).and_then(|ccb| ccb.last_received)
    }

    /// Returns the number of sessions in use.
    #[must_use]
    pub fn active(&self) -> usize {
        self.pool.iter().flatten().count()
    }

    /// Handles a bus message.
    pub fn handle(&mut self, msg: GoepMsg) {
        let GoepMsg::Transport { link, event } = msg;
        let Some(slot) = self
            .pool
            .iter()
            .position(|ccb| ccb.as_ref().is_some_and(|ccb| ccb.link == link))
        else {
            tracing::debug!("{} for released {}, dropped", event.name(), link);
            return;
        };

        match event {
            TransportEvent::Opened { peer_mtu, our_mtu } => {
                self.execute(slot, GoepSmEvent::Connect, None, (peer_mtu, our_mtu));
            }
            TransportEvent::Data(data) => self.on_data(slot, data),
            TransportEvent::Congest(congested) => self.on_congest(slot, congested),
            TransportEvent::Closed => {
                self.execute(slot, GoepSmEvent::Disconnect, None, (0, 0));
            }
        }
    }

    fn on_data(&mut self, slot: usize, data: Bytes) {
        let Some(ccb) = self.pool.get(slot).and_then(Option::as_ref) else {
            return;
        };
        let connect = ccb.last_sent == Some(Opcode::Connect);
        let packet = match ObexPacket::parse_response(data, connect) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("goep {} malformed response: {}", ccb.handle, e);
                self.disconnect(slot);
                return;
            }
        };

        let event = if packet.is_continue() {
            GoepSmEvent::Rsp
        } else {
            GoepSmEvent::RspFinal
        };
        self.execute(slot, event, Some(packet), (0, 0));
    }

    fn on_congest(&mut self, slot: usize, congested: bool) {
        let Some(ccb) = self.pool.get_mut(slot).and_then(Option::as_mut) else {
            return;
        };
        if ccb.congested == congested {
            return;
        }
        ccb.congested = congested;
        ccb.notify(if congested {
            GoepEvent::Congest
        } else {
            GoepEvent::Uncongest
        });
    }

    /// Runs one transition of the main state machine for an inbound event.
    fn execute(
        &mut self,
        slot: usize,
        event: GoepSmEvent,
        packet: Option<ObexPacket>,
        mtu: (u16, u16),
    ) {
        let Some(ccb) = self.pool.get_mut(slot).and_then(Option::as_mut) else {
            return;
        };
        tracing::debug!("goep {} {:?} in {:?}", ccb.handle, event, ccb.state);

        match (ccb.state, event) {
            (_, GoepSmEvent::Disconnect) => self.disconnect(slot),
            (GoepState::Opening, GoepSmEvent::Connect) => {
                let (peer_mtu, our_mtu) = mtu;
                ccb.peer_mtu = peer_mtu;
                ccb.our_mtu = our_mtu;
                ccb.state = GoepState::OpenedIdle;
                tracing::info!("goep {} opened, mtu {}/{}", ccb.handle, peer_mtu, our_mtu);
                ccb.notify(GoepEvent::Opened { peer_mtu, our_mtu });
            }
            (
                GoepState::OpenedReq | GoepState::OpenedRsp,
                GoepSmEvent::Rsp | GoepSmEvent::RspFinal,
            ) if ccb.awaiting_rsp => {
                let Some(packet) = packet else { return };
                let is_final = event == GoepSmEvent::RspFinal;
                ccb.last_received = Some(packet.code());

                let (srm_enabled, srm_wait) = if is_final {
                    let flags = (ccb.srm.is_enabled(), ccb.srm.is_waiting());
                    ccb.srm.reset();
                    ccb.state = GoepState::OpenedIdle;
                    ccb.awaiting_rsp = false;
                    flags
                } else {
                    let enable = packet.header(header_id::SRM).as_deref() == Some(&[SRM_ENABLE]);
                    let wait =
                        packet.header(header_id::SRM_PARAM).as_deref() == Some(&[SRM_PARAM_WAIT]);
                    ccb.srm.on_response(enable, wait);
                    // Without SRM the peer sends nothing more until asked
                    ccb.awaiting_rsp = ccb.srm.is_enabled();
                    (ccb.srm.is_enabled(), ccb.srm.is_waiting())
                };

                ccb.notify(GoepEvent::Response {
                    packet,
                    is_final,
                    srm_enabled,
                    srm_wait,
                });
            }
            (state, GoepSmEvent::Rsp | GoepSmEvent::RspFinal) => {
                tracing::warn!(
                    "goep {} unexpected response 0x{:02x} in {:?}, disconnecting",
                    ccb.handle,
                    packet.as_ref().map_or(0, ObexPacket::code),
                    state
                );
                drop(packet);
                self.disconnect(slot);
            }
            (state, event) => {
                tracing::debug!("goep {} ignored {:?} in {:?}", ccb.handle, event, state);
            }
        }
    }

    /// Notifies the callback, releases the transport and frees the slot.
    fn disconnect(&mut self, slot: usize) {
        let Some(mut ccb) = self.pool.get_mut(slot).and_then(Option::take) else {
            return;
        };
        tracing::info!("goep {} disconnected", ccb.handle);
        ccb.notify(GoepEvent::Closed);
        self.transport.close(ccb.link);
    }

    fn ccb(&self, handle: GoepHandle) -> Option<&Ccb> {
        let slot = slot_of(handle).ok()?;
        self.pool.get(slot).and_then(Option::as_ref)
    }

    fn ccb_mut(&mut self, handle: GoepHandle) -> Result<&mut Ccb, GoepError> {
        let slot = slot_of(handle)?;
        self.pool
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(GoepError::BadHandle(handle))
    }
}

const fn slot_of(handle: GoepHandle) -> Result<usize, GoepError> {
    match (handle as usize).checked_sub(1) {
        Some(slot) => Ok(slot),
        None => Err(GoepError::BadHandle(handle)),
    }
}
