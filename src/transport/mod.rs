//! Transport layer carrying OBEX packets.
//!
//! The GOEP engine drives a transport through [`ObexTransport`]. Calls
//! never block: opening, sending and closing start work whose outcome is
//! reported later as a [`TransportEvent`] posted on the message bus.
//! Currently only RFCOMM over an OS-bound serial device is implemented.

pub mod serial;

use bytes::Bytes;

use crate::bus::{BusSender, Message, Payload};
use crate::error::{BusError, GoepError};
use crate::goep::GoepMsg;
use crate::protocol::OBEX_MIN_PACKET_SIZE;
use crate::types::BdAddr;

/// Highest RFCOMM server channel number.
pub const RFCOMM_MAX_SCN: u8 = 30;

/// Identifies one transport link for its whole life. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(u32);

impl TransportHandle {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Where to reach the OBEX server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportTarget {
    /// RFCOMM server channel.
    Rfcomm { scn: u8 },
    /// L2CAP protocol/service multiplexer.
    L2cap { psm: u16 },
}

impl TransportTarget {
    #[must_use]
    pub const fn is_l2cap(self) -> bool {
        matches!(self, Self::L2cap { .. })
    }
}

/// Parameters of an OBEX session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub addr: BdAddr,
    pub target: TransportTarget,
    /// Largest packet we are willing to receive.
    pub local_mtu: u16,
    /// Security requirements passed to the transport.
    pub security: u8,
}

impl ServerInfo {
    /// Checks the parameters can address a server.
    pub fn validate(&self) -> Result<(), GoepError> {
        match self.target {
            TransportTarget::Rfcomm { scn } if scn == 0 || scn > RFCOMM_MAX_SCN => {
                return Err(GoepError::InvalidArgument("RFCOMM channel out of range"));
            }
            // Valid PSMs are odd
            TransportTarget::L2cap { psm } if psm & 0x0001 == 0 => {
                return Err(GoepError::InvalidArgument("L2CAP PSM must be odd"));
            }
            _ => {}
        }
        if usize::from(self.local_mtu) < OBEX_MIN_PACKET_SIZE {
            return Err(GoepError::InvalidArgument("MTU below OBEX minimum"));
        }
        Ok(())
    }
}

/// What happened on a link.
#[derive(Debug)]
pub enum TransportEvent {
    /// The link is up.
    Opened { peer_mtu: u16, our_mtu: u16 },
    /// One complete OBEX packet arrived.
    Data(Bytes),
    /// Outbound flow control changed; true when congested.
    Congest(bool),
    /// The link is gone, or never came up.
    Closed,
}

impl TransportEvent {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Opened { .. } => "transport_opened",
            Self::Data(_) => "transport_data",
            Self::Congest(_) => "transport_congest",
            Self::Closed => "transport_closed",
        }
    }
}

/// Reports events of one link to the GOEP engine through the bus.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    bus: BusSender,
    link: TransportHandle,
}

impl TransportEvents {
    #[must_use]
    pub const fn new(bus: BusSender, link: TransportHandle) -> Self {
        Self { bus, link }
    }

    /// Returns the link these events belong to.
    #[must_use]
    pub const fn link(&self) -> TransportHandle {
        self.link
    }

    pub fn opened(&self, peer_mtu: u16, our_mtu: u16) -> Result<(), BusError> {
        self.post(TransportEvent::Opened { peer_mtu, our_mtu })
    }

    pub fn data(&self, packet: Bytes) -> Result<(), BusError> {
        self.post(TransportEvent::Data(packet))
    }

    pub fn congest(&self, congested: bool) -> Result<(), BusError> {
        self.post(TransportEvent::Congest(congested))
    }

    pub fn closed(&self) -> Result<(), BusError> {
        self.post(TransportEvent::Closed)
    }

    fn post(&self, event: TransportEvent) -> Result<(), BusError> {
        self.bus.post(Message::call(Payload::Goep(GoepMsg::Transport {
            link: self.link,
            event,
        })))
    }

    /// Posts, waiting for queue space. Used from I/O tasks.
    pub async fn post_async(&self, event: TransportEvent) -> Result<(), BusError> {
        self.bus
            .post_timeout(Message::call(Payload::Goep(GoepMsg::Transport {
                link: self.link,
                event,
            })))
            .await
    }
}

/// Trait for transport implementations.
pub trait ObexTransport: Send + Sync {
    /// Starts connecting `link` to the server.
    ///
    /// Completion is reported through `events`: `Opened` on success,
    /// `Closed` on failure.
    fn open(
        &self,
        link: TransportHandle,
        info: &ServerInfo,
        events: TransportEvents,
    ) -> Result<(), GoepError>;

    /// Queues one complete OBEX packet.
    fn send(&self, link: TransportHandle, packet: Bytes) -> Result<(), GoepError>;

    /// Releases the link. Closing an unknown link is a no-op.
    fn close(&self, link: TransportHandle);

    /// Returns true if [`TransportTarget::L2cap`] is supported.
    fn supports_l2cap(&self) -> bool;
}

pub use serial::{SerialConfig, SerialTransport};
