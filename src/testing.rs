//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{BufMut, Bytes, BytesMut};

use crate::bus::{self, BusSender, Dispatcher, Message, Payload};
use crate::config::StackConfig;
use crate::error::GoepError;
use crate::event::{Event, EventDispatcher, Subscription};
use crate::pba::PbaMsg;
use crate::protocol::header::put_header;
use crate::protocol::{OBEX_VERSION, ObexPacket};
use crate::sdp::{PseRecord, StaticSdp};
use crate::stack::Stack;
use crate::transport::{ObexTransport, ServerInfo, TransportEvents, TransportHandle};
use crate::types::{BdAddr, PbapFeatures, Repositories};

/// Answers a request with zero or more response packets.
pub(crate) type Responder = Box<dyn FnMut(&ObexPacket) -> Vec<Bytes> + Send>;

#[derive(Default)]
struct MockState {
    links: HashMap<TransportHandle, (ServerInfo, TransportEvents)>,
    last: Option<TransportHandle>,
    sent: Vec<ObexPacket>,
    closed: Vec<TransportHandle>,
    fail_sends: bool,
    l2cap: bool,
    auto_accept: Option<u16>,
    responder: Option<Responder>,
}

/// Transport that records what it is asked to do.
///
/// Links come up only when [`MockTransport::accept`] is called, unless
/// auto-accept is set. Sent requests are parsed and kept for inspection.
#[derive(Default)]
pub(crate) struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn events(&self, link: TransportHandle) -> (ServerInfo, TransportEvents) {
        self.lock().links.get(&link).cloned().unwrap()
    }

    pub(crate) fn set_l2cap(&self, supported: bool) {
        self.lock().l2cap = supported;
    }

    /// Brings every new link up at once with this peer MTU.
    pub(crate) fn auto_accept(&self, peer_mtu: u16) {
        self.lock().auto_accept = Some(peer_mtu);
    }

    /// Answers every sent request through `responder`.
    pub(crate) fn respond_with(&self, responder: Responder) {
        self.lock().responder = Some(responder);
    }

    pub(crate) fn last_link(&self) -> Option<TransportHandle> {
        self.lock().last
    }

    pub(crate) fn server(&self, link: TransportHandle) -> Option<ServerInfo> {
        self.lock().links.get(&link).map(|(info, _)| *info)
    }

    pub(crate) fn accept(&self, link: TransportHandle, peer_mtu: u16) {
        let (info, events) = self.events(link);
        events.opened(peer_mtu, info.local_mtu).unwrap();
    }

    pub(crate) fn deliver(&self, link: TransportHandle, data: Bytes) {
        self.events(link).1.data(data).unwrap();
    }

    pub(crate) fn congest(&self, link: TransportHandle, congested: bool) {
        self.events(link).1.congest(congested).unwrap();
    }

    /// Reports the link as lost.
    pub(crate) fn fail(&self, link: TransportHandle) {
        self.events(link).1.closed().unwrap();
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Returns and forgets the requests sent so far.
    pub(crate) fn take_sent(&self) -> Vec<ObexPacket> {
        std::mem::take(&mut self.lock().sent)
    }

    pub(crate) fn closed(&self) -> Vec<TransportHandle> {
        self.lock().closed.clone()
    }
}

impl ObexTransport for MockTransport {
    fn open(
        &self,
        link: TransportHandle,
        info: &ServerInfo,
        events: TransportEvents,
    ) -> Result<(), GoepError> {
        let mut state = self.lock();
        if let Some(peer_mtu) = state.auto_accept {
            events.opened(peer_mtu, info.local_mtu).unwrap();
        }
        state.links.insert(link, (*info, events));
        state.last = Some(link);
        Ok(())
    }

    fn send(&self, link: TransportHandle, packet: Bytes) -> Result<(), GoepError> {
        let mut state = self.lock();
        if state.fail_sends {
            return Err(GoepError::TransportError("send refused".into()));
        }
        let request = ObexPacket::parse_request(packet).unwrap();
        let responses = match state.responder.as_mut() {
            Some(responder) => responder(&request),
            None => Vec::new(),
        };
        if let Some((_, events)) = state.links.get(&link) {
            for response in responses {
                events.data(response).unwrap();
            }
        }
        state.sent.push(request);
        Ok(())
    }

    fn close(&self, link: TransportHandle) {
        self.lock().closed.push(link);
    }

    fn supports_l2cap(&self) -> bool {
        self.lock().l2cap
    }
}

fn packet(code: u8, fixed: &[u8], headers: &[(u8, &[u8])]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(code);
    buf.put_u16(0);
    buf.put_slice(fixed);
    for (id, value) in headers {
        put_header(&mut buf, *id, value).unwrap();
    }
    let len = u16::try_from(buf.len()).unwrap();
    buf[1..3].copy_from_slice(&len.to_be_bytes());
    buf.freeze()
}

/// Builds a response packet.
pub(crate) fn response(code: u8, headers: &[(u8, &[u8])]) -> Bytes {
    packet(code, &[], headers)
}

/// Builds a CONNECT response packet.
pub(crate) fn connect_response(code: u8, max_packet: u16, headers: &[(u8, &[u8])]) -> Bytes {
    let [hi, lo] = max_packet.to_be_bytes();
    packet(code, &[OBEX_VERSION, 0, hi, lo], headers)
}

pub(crate) const PEER: BdAddr = BdAddr::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);

/// A phone book server record reachable over RFCOMM.
pub(crate) fn pse_record(scn: u8) -> PseRecord {
    PseRecord {
        service_name: Some("Phonebook".into()),
        rfcomm_channel: Some(scn),
        l2cap_psm: None,
        supported_repositories: Some(Repositories::LOCAL),
        supported_features: Some(PbapFeatures::DOWNLOAD),
        profile_version: Some(0x0102),
    }
}

/// A whole stack driven by hand: messages are dispatched only by
/// [`Harness::run`].
pub(crate) struct Harness {
    pub stack: Stack,
    pub dispatcher: Dispatcher<Stack>,
    pub bus: BusSender,
    pub transport: Arc<MockTransport>,
    pub sdp: StaticSdp,
    pub subscription: Subscription,
}

impl Harness {
    pub(crate) fn new(config: StackConfig, sdp: StaticSdp) -> Self {
        let (bus, mut dispatcher) = bus::channel(config.bus);
        Stack::register(&mut dispatcher);
        let transport = MockTransport::new();
        let events = EventDispatcher::new(config.event_capacity);
        let subscription = events.subscribe(None);
        let stack = Stack::new(
            &config,
            transport.clone(),
            Box::new(sdp.clone()),
            events,
            &bus,
        );
        Self {
            stack,
            dispatcher,
            bus,
            transport,
            sdp,
            subscription,
        }
    }

    pub(crate) fn post(&self, msg: PbaMsg) {
        self.bus.post(Message::call(Payload::Pba(msg))).unwrap();
    }

    pub(crate) fn run(&mut self) -> usize {
        self.dispatcher.dispatch_pending(&mut self.stack)
    }

    /// Returns the events dispatched so far.
    pub(crate) fn events(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.subscription.try_recv()).collect()
    }
}
