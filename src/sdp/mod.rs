//! Service discovery interface.
//!
//! The phone book client looks up the peer's PBAP server record before
//! connecting and publishes its own client record on registration.
//! Discovery is asynchronous: the result is handed to an [`SdpReply`],
//! which posts it on the message bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bus::{BusSender, Message, Payload};
use crate::error::{BusError, SdpError};
use crate::pba::PbaMsg;
use crate::types::{BdAddr, PbapFeatures, Repositories};

/// Service class of a phone book server (PSE).
pub const UUID_PBAP_PSE: u16 = 0x112F;

/// Service class of a phone book client (PCE).
pub const UUID_PBAP_PCE: u16 = 0x112E;

/// PBAP version published in our client record.
pub const PCE_PROFILE_VERSION: u16 = 0x0102;

/// Attributes of a peer's phone book server record.
///
/// Absent attributes are `None`; defaults are applied by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PseRecord {
    pub service_name: Option<String>,
    pub rfcomm_channel: Option<u8>,
    pub l2cap_psm: Option<u16>,
    pub supported_repositories: Option<Repositories>,
    pub supported_features: Option<PbapFeatures>,
    pub profile_version: Option<u16>,
}

impl PseRecord {
    /// A record reachable over RFCOMM with every other attribute absent.
    #[must_use]
    pub fn rfcomm(channel: u8) -> Self {
        Self {
            rfcomm_channel: Some(channel),
            ..Self::default()
        }
    }

    /// Returns true if the record names a channel or PSM to connect to.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.rfcomm_channel.is_some() || self.l2cap_psm.is_some()
    }

    pub(crate) fn heap_size(&self) -> usize {
        self.service_name.as_ref().map_or(0, String::len)
    }
}

/// Our phone book client record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PceRecord {
    pub service_name: String,
    pub profile_version: u16,
}

/// Handle of a registered local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SdpRecordHandle(pub u32);

/// Completion slot of one discovery. Consumed by [`SdpReply::complete`].
#[derive(Debug)]
pub struct SdpReply {
    bus: BusSender,
    handle: u16,
    discovery: u32,
}

impl SdpReply {
    #[must_use]
    pub(crate) const fn new(bus: BusSender, handle: u16, discovery: u32) -> Self {
        Self {
            bus,
            handle,
            discovery,
        }
    }

    /// Delivers the discovery result to the phone book client.
    pub fn complete(self, result: Result<PseRecord, SdpError>) -> Result<(), BusError> {
        self.bus.post(Message::call(Payload::Pba(PbaMsg::SdpResult {
            handle: self.handle,
            discovery: self.discovery,
            result,
        })))
    }
}

/// Service discovery client.
pub trait SdpClient: Send + Sync {
    /// Starts looking up `service` on `addr`; the result goes to `reply`.
    fn discover(&self, addr: BdAddr, service: u16, reply: SdpReply) -> Result<(), SdpError>;

    /// Publishes a local record.
    fn add_record(&self, record: PceRecord) -> Result<SdpRecordHandle, SdpError>;

    /// Withdraws a local record.
    fn remove_record(&self, handle: SdpRecordHandle) -> Result<(), SdpError>;
}

#[derive(Debug, Default)]
struct StaticSdpInner {
    peers: HashMap<BdAddr, PseRecord>,
    local: HashMap<SdpRecordHandle, PceRecord>,
    next_handle: u32,
}

/// SDP client answering from a fixed table of peer records.
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct StaticSdp {
    inner: Arc<Mutex<StaticSdpInner>>,
}

impl StaticSdp {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the server record of a peer.
    #[must_use]
    pub fn with_peer(self, addr: BdAddr, record: PseRecord) -> Self {
        self.lock().peers.insert(addr, record);
        self
    }

    /// Returns the local records currently published.
    #[must_use]
    pub fn local_records(&self) -> Vec<PceRecord> {
        self.lock().local.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaticSdpInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SdpClient for StaticSdp {
    fn discover(&self, addr: BdAddr, service: u16, reply: SdpReply) -> Result<(), SdpError> {
        let record = if service == UUID_PBAP_PSE {
            self.lock().peers.get(&addr).cloned()
        } else {
            None
        };
        tracing::debug!("discovery of 0x{:04x} on {}: {:?}", service, addr, record);
        reply
            .complete(record.ok_or(SdpError::NoRecord))
            .map_err(|e| SdpError::Failed(e.to_string()))
    }

    fn add_record(&self, record: PceRecord) -> Result<SdpRecordHandle, SdpError> {
        let mut inner = self.lock();
        inner.next_handle += 1;
        let handle = SdpRecordHandle(inner.next_handle);
        inner.local.insert(handle, record);
        Ok(handle)
    }

    fn remove_record(&self, handle: SdpRecordHandle) -> Result<(), SdpError> {
        self.lock()
            .local
            .remove(&handle)
            .map(|_| ())
            .ok_or(SdpError::NoRecord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{self, ComponentId, Handlers};
    use crate::config::BusConfig;

    #[derive(Default)]
    struct Results(Vec<(u16, u32, Result<PseRecord, SdpError>)>);

    fn collect(results: &mut Results, payload: Payload) {
        if let Payload::Pba(PbaMsg::SdpResult {
            handle,
            discovery,
            result,
        }) = payload
        {
            results.0.push((handle, discovery, result));
        }
    }

    #[test]
    fn test_static_sdp_answers_through_the_bus() {
        let peer = BdAddr::new([1, 2, 3, 4, 5, 6]);
        let record = PseRecord::rfcomm(19);
        let sdp = StaticSdp::new().with_peer(peer, record.clone());

        let (sender, mut dispatcher) = bus::channel::<Results>(BusConfig::default());
        dispatcher.register(
            ComponentId::PbaClient,
            Handlers {
                call: collect,
                callback: None,
            },
        );

        sdp.discover(peer, UUID_PBAP_PSE, SdpReply::new(sender.clone(), 1, 7))
            .unwrap();
        sdp.discover(
            BdAddr::new([9; 6]),
            UUID_PBAP_PSE,
            SdpReply::new(sender, 2, 8),
        )
        .unwrap();

        let mut results = Results::default();
        dispatcher.dispatch_pending(&mut results);
        assert_eq!(results.0.len(), 2);
        assert_eq!(results.0[0], (1, 7, Ok(record)));
        assert_eq!(results.0[1], (2, 8, Err(SdpError::NoRecord)));
    }

    #[test]
    fn test_local_records() {
        let sdp = StaticSdp::new();
        let handle = sdp
            .add_record(PceRecord {
                service_name: "Phonebook Access PCE".into(),
                profile_version: PCE_PROFILE_VERSION,
            })
            .unwrap();
        assert_eq!(sdp.local_records().len(), 1);

        sdp.remove_record(handle).unwrap();
        assert!(sdp.local_records().is_empty());
        assert_eq!(sdp.remove_record(handle), Err(SdpError::NoRecord));
    }

    #[test]
    fn test_usable_record() {
        assert!(!PseRecord::default().is_usable());
        assert!(
            PseRecord {
                l2cap_psm: Some(0x1005),
                ..PseRecord::default()
            }
            .is_usable()
        );
    }
}
