//! Application events.
//!
//! The phone book client reports every outcome as an [`Event`]. Events are
//! broadcast, so any number of [`Subscription`]s can observe them.

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::broadcast;

use crate::protocol::{AppParams, ObexPacket};
use crate::transport::TransportTarget;
use crate::types::{BdAddr, PbaStatus, PbapFeatures, Repositories};

/// Outcome of a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnOpen {
    pub handle: u16,
    pub addr: BdAddr,
    pub status: PbaStatus,
    /// Features the server advertised, or the default when it did not.
    pub peer_features: PbapFeatures,
    pub peer_repositories: Repositories,
    pub peer_version: u16,
    /// Largest request we may send.
    pub max_tx: u16,
    /// How the session is carried, once known.
    pub target: Option<TransportTarget>,
}

/// One fragment of a pull operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResponse {
    pub handle: u16,
    pub status: PbaStatus,
    /// True for the last fragment of the operation.
    pub is_final: bool,
    /// Body data carried by this fragment.
    pub data: Option<Bytes>,
    /// Application parameters carried by this fragment.
    pub app_params: Option<AppParams>,
    /// The final response packet, handed over whole.
    pub packet: Option<ObexPacket>,
}

impl PullResponse {
    pub(crate) fn failed(handle: u16, status: PbaStatus) -> Self {
        Self {
            handle,
            status,
            is_final: true,
            data: None,
            app_params: None,
            packet: None,
        }
    }

    fn heap_size(&self) -> usize {
        let data = self.data.as_ref().map_or(0, Bytes::len);
        let params = self
            .app_params
            .as_ref()
            .and_then(|p| p.search_value.as_ref())
            .map_or(0, Bytes::len);
        self.packet.as_ref().map_or(data, ObexPacket::len) + params
    }
}

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The client was enabled.
    Init { status: PbaStatus },
    /// The client was disabled and every connection torn down.
    Deinit { status: PbaStatus },
    /// The local client record was published.
    Registered { status: PbaStatus },
    /// The local client record was withdrawn.
    Deregistered { status: PbaStatus },
    ConnOpen(Box<ConnOpen>),
    ConnClose { handle: u16, addr: BdAddr },
    PullPhoneBookRsp(PullResponse),
    SetPhoneBookRsp { handle: u16, status: PbaStatus },
    PullVCardListingRsp(PullResponse),
    PullVCardEntryRsp(PullResponse),
}

/// Kinds of [`Event`], for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Init,
    Deinit,
    Registered,
    Deregistered,
    ConnOpen,
    ConnClose,
    PullPhoneBookRsp,
    SetPhoneBookRsp,
    PullVCardListingRsp,
    PullVCardEntryRsp,
}

impl Event {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Init { .. } => EventKind::Init,
            Self::Deinit { .. } => EventKind::Deinit,
            Self::Registered { .. } => EventKind::Registered,
            Self::Deregistered { .. } => EventKind::Deregistered,
            Self::ConnOpen(_) => EventKind::ConnOpen,
            Self::ConnClose { .. } => EventKind::ConnClose,
            Self::PullPhoneBookRsp(_) => EventKind::PullPhoneBookRsp,
            Self::SetPhoneBookRsp { .. } => EventKind::SetPhoneBookRsp,
            Self::PullVCardListingRsp(_) => EventKind::PullVCardListingRsp,
            Self::PullVCardEntryRsp(_) => EventKind::PullVCardEntryRsp,
        }
    }

    /// Returns the connection the event belongs to, if any.
    #[must_use]
    pub fn handle(&self) -> Option<u16> {
        match self {
            Self::ConnOpen(open) => Some(open.handle),
            Self::ConnClose { handle, .. } | Self::SetPhoneBookRsp { handle, .. } => Some(*handle),
            Self::PullPhoneBookRsp(rsp)
            | Self::PullVCardListingRsp(rsp)
            | Self::PullVCardEntryRsp(rsp) => Some(rsp.handle),
            Self::Init { .. }
            | Self::Deinit { .. }
            | Self::Registered { .. }
            | Self::Deregistered { .. } => None,
        }
    }

    /// Returns the status carried by the event.
    ///
    /// A closed connection reports [`PbaStatus::Success`].
    #[must_use]
    pub fn status(&self) -> PbaStatus {
        match self {
            Self::Init { status }
            | Self::Deinit { status }
            | Self::Registered { status }
            | Self::Deregistered { status }
            | Self::SetPhoneBookRsp { status, .. } => *status,
            Self::ConnOpen(open) => open.status,
            Self::ConnClose { .. } => PbaStatus::Success,
            Self::PullPhoneBookRsp(rsp)
            | Self::PullVCardListingRsp(rsp)
            | Self::PullVCardEntryRsp(rsp) => rsp.status,
        }
    }

    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Deinit { .. } => "deinit",
            Self::Registered { .. } => "registered",
            Self::Deregistered { .. } => "deregistered",
            Self::ConnOpen(_) => "conn_open",
            Self::ConnClose { .. } => "conn_close",
            Self::PullPhoneBookRsp(_) => "pull_phone_book_rsp",
            Self::SetPhoneBookRsp { .. } => "set_phone_book_rsp",
            Self::PullVCardListingRsp(_) => "pull_vcard_listing_rsp",
            Self::PullVCardEntryRsp(_) => "pull_vcard_entry_rsp",
        }
    }

    pub(crate) fn heap_size(&self) -> usize {
        match self {
            Self::ConnOpen(_) => std::mem::size_of::<ConnOpen>(),
            Self::PullPhoneBookRsp(rsp)
            | Self::PullVCardListingRsp(rsp)
            | Self::PullVCardEntryRsp(rsp) => rsp.heap_size(),
            _ => 0,
        }
    }
}

/// Subscription filter for specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Filter by connection handle.
    pub handle: Option<u16>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            handle: None,
        }
    }

    /// Restricts the filter to one connection.
    #[must_use]
    pub const fn handle(mut self, handle: u16) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        if let Some(handle) = self.handle {
            if event.handle() != Some(handle) {
                return false;
            }
        }
        true
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: Option<EventFilter>,
}

impl Subscription {
    fn accepts(&self, event: &Event) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(event))
    }

    /// Receives the next matching event.
    ///
    /// Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("subscription lagged, {} events lost", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next matching event already delivered, without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!("subscription lagged, {} events lost", n);
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Turns the subscription into a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = Event> {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        tracing::debug!("event {} (handle {:?})", event.name(), event.handle());
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribes to events with an optional filter.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the channel is closed.
    pub async fn wait_for(
        &self,
        filter: EventFilter,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        let mut subscription = self.subscribe(Some(filter));
        tokio::time::timeout(timeout, subscription.recv())
            .await
            .ok()
            .flatten()
    }
}
