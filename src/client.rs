//! Main [`PbapClient`] implementation.
//!
//! The client owns the task that drains the message bus and offers an
//! async API on top of it: every call posts one request and waits for the
//! event that answers it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{OwnedMutexGuard, oneshot};
use tokio::task::JoinHandle;

use crate::bus::{self, BusSender, Message, Payload};
use crate::config::StackConfig;
use crate::error::{Error, Result};
use crate::event::{ConnOpen, Event, EventDispatcher, EventFilter, EventKind, Subscription};
use crate::pba::{Operation, PbaHandle, PbaMsg, PbaRequest, SetPathFlag};
use crate::protocol::{
    AppParams, PullPhoneBookParams, PullVCardEntryParams, PullVCardListingParams,
};
use crate::sdp::SdpClient;
use crate::stack::Stack;
use crate::transport::{ObexTransport, SerialConfig, SerialTransport};
use crate::types::{BdAddr, PbaStatus, PbapFeatures};

/// Default largest packet we accept.
pub const DEFAULT_MTU: u16 = 32767;

/// Parameters of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Security requirements passed to the transport.
    pub security: u8,
    /// Features we support, sent to servers that accept them.
    pub features: PbapFeatures,
    /// Largest packet we accept.
    pub mtu: u16,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            security: 0,
            features: PbapFeatures::DOWNLOAD | PbapFeatures::BROWSING,
            mtu: DEFAULT_MTU,
        }
    }
}

impl OpenOptions {
    #[must_use]
    pub const fn security(mut self, security: u8) -> Self {
        self.security = security;
        self
    }

    #[must_use]
    pub const fn features(mut self, features: PbapFeatures) -> Self {
        self.features = features;
        self
    }

    #[must_use]
    pub const fn mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }
}

/// Everything a pull operation returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pulled {
    /// Body of every fragment, in order.
    pub data: Bytes,
    /// Application parameters of the last fragment that carried any.
    pub app_params: Option<AppParams>,
}

/// Events of one request, in order.
///
/// The connection takes no other request through the same client until
/// the final event has been received or this is dropped.
pub struct Fragments {
    subscription: Subscription,
    turn: Option<OwnedMutexGuard<()>>,
}

impl Fragments {
    /// Receives the next event of the request.
    ///
    /// Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        let event = self.subscription.recv().await?;
        self.observe(&event);
        Some(event)
    }

    fn observe(&mut self, event: &Event) {
        let done = match event {
            Event::PullPhoneBookRsp(rsp)
            | Event::PullVCardListingRsp(rsp)
            | Event::PullVCardEntryRsp(rsp) => rsp.is_final,
            _ => true,
        };
        if done {
            self.turn = None;
        }
    }
}

/// Phone book access client.
pub struct PbapClient {
    bus: BusSender,
    events: EventDispatcher,
    timeout: Duration,
    /// One request at a time per connection.
    turns: Mutex<HashMap<PbaHandle, Arc<tokio::sync::Mutex<()>>>>,
    task: Option<JoinHandle<()>>,
}

impl PbapClient {
    /// Starts a client over a serial transport.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn serial(config: StackConfig, serial: SerialConfig, sdp: Box<dyn SdpClient>) -> Self {
        Self::start(config, Arc::new(SerialTransport::new(serial)), sdp)
    }

    /// Builds the stack and spawns the task that serves it.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn start(
        config: StackConfig,
        transport: Arc<dyn ObexTransport>,
        sdp: Box<dyn SdpClient>,
    ) -> Self {
        let (bus, mut dispatcher) = bus::channel(config.bus);
        Stack::register(&mut dispatcher);
        let events = EventDispatcher::new(config.event_capacity);
        let mut stack = Stack::new(&config, transport, sdp, events.clone(), &bus);

        let task = tokio::spawn(async move {
            dispatcher.run(&mut stack).await;
        });

        Self {
            bus,
            events,
            timeout: config.request_timeout,
            turns: Mutex::new(HashMap::new()),
            task: Some(task),
        }
    }

    /// Subscribes to every event.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe(None)
    }

    /// Returns the number of messages waiting on the bus.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.bus.queue_depth()
    }

    /// Enables the phone book client.
    pub async fn enable(&self) -> Result<()> {
        let event = self
            .send_and_wait(PbaMsg::Enable, EventFilter::kinds(vec![EventKind::Init]))
            .await?;
        expect_success(event.status())
    }

    /// Disables the phone book client, closing every connection.
    pub async fn disable(&self) -> Result<()> {
        let event = self
            .send_and_wait(PbaMsg::Disable, EventFilter::kinds(vec![EventKind::Deinit]))
            .await?;
        expect_success(event.status())
    }

    /// Publishes our client record.
    pub async fn register(&self, service_name: impl Into<String>) -> Result<()> {
        let msg = PbaMsg::Register {
            service_name: service_name.into(),
        };
        let event = self
            .send_and_wait(msg, EventFilter::kinds(vec![EventKind::Registered]))
            .await?;
        expect_success(event.status())
    }

    /// Withdraws our client record.
    pub async fn deregister(&self) -> Result<()> {
        let event = self
            .send_and_wait(
                PbaMsg::Deregister,
                EventFilter::kinds(vec![EventKind::Deregistered]),
            )
            .await?;
        expect_success(event.status())
    }

    /// Connects to the phone book server of `addr`.
    ///
    /// Returns once the OBEX session is up. A refusal is returned as
    /// [`Error::Pba`] with the reason.
    pub async fn open(&self, addr: BdAddr, options: OpenOptions) -> Result<ConnOpen> {
        let mut subscription = self.events.subscribe(Some(EventFilter::kinds(vec![
            EventKind::ConnOpen,
            EventKind::ConnClose,
        ])));
        let (tx, rx) = oneshot::channel();
        self.send(PbaMsg::Open {
            addr,
            security: options.security,
            features: options.features,
            mtu: options.mtu,
            reply: Some(tx),
        })
        .await?;

        let handle = tokio::time::timeout(self.timeout, rx)
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|_| Error::ChannelClosed)?
            .map_err(Error::Pba)?;
        tracing::debug!("open of {} admitted as {}", addr, handle);

        loop {
            match self.wait(&mut subscription).await? {
                Event::ConnOpen(info) if info.handle == handle => {
                    expect_success(info.status)?;
                    return Ok(*info);
                }
                Event::ConnClose { handle: closed, .. } if closed == handle => {
                    return Err(Error::Pba(PbaStatus::Fail));
                }
                _ => {}
            }
        }
    }

    /// Closes a connection and waits until it is gone.
    pub async fn close(&self, handle: PbaHandle) -> Result<()> {
        self.send_and_wait(
            PbaMsg::Close { handle },
            EventFilter::kinds(vec![EventKind::ConnClose]).handle(handle),
        )
        .await
        .map(drop)
    }

    /// Starts a request and returns the events it produces.
    ///
    /// Pull operations may report several fragments; the last one has
    /// `is_final` set. A request on a connection that is still serving an
    /// earlier one from this client waits for it to finish.
    pub async fn request(&self, handle: PbaHandle, request: PbaRequest) -> Result<Fragments> {
        let turn = self.turn(handle).await?;
        let kind = response_kind(request.operation());
        let subscription = self.events.subscribe(Some(
            EventFilter::kinds(vec![kind, EventKind::ConnClose]).handle(handle),
        ));
        self.send(PbaMsg::Request { handle, request }).await?;
        Ok(Fragments {
            subscription,
            turn: Some(turn),
        })
    }

    /// Changes the current phone book folder.
    pub async fn set_phone_book(
        &self,
        handle: PbaHandle,
        flag: SetPathFlag,
        name: Option<&str>,
    ) -> Result<()> {
        let request = PbaRequest::SetPhoneBook {
            flag,
            name: name.map(str::to_string),
        };
        let mut fragments = self.request(handle, request).await?;
        match self.next(&mut fragments).await? {
            Event::SetPhoneBookRsp { status, .. } => expect_success(status),
            _ => Err(Error::Pba(PbaStatus::GoepError)),
        }
    }

    /// Downloads a whole phone book object, such as `telecom/pb.vcf`.
    pub async fn pull_phone_book(
        &self,
        handle: PbaHandle,
        name: &str,
        params: Option<PullPhoneBookParams>,
    ) -> Result<Pulled> {
        let request = PbaRequest::PullPhoneBook {
            name: name.to_string(),
            params,
        };
        self.collect(handle, request).await
    }

    /// Downloads the vCard listing of a folder.
    pub async fn pull_vcard_listing(
        &self,
        handle: PbaHandle,
        name: &str,
        params: Option<PullVCardListingParams>,
    ) -> Result<Pulled> {
        let request = PbaRequest::PullVCardListing {
            name: name.to_string(),
            params,
        };
        self.collect(handle, request).await
    }

    /// Downloads one vCard, such as `3.vcf`.
    pub async fn pull_vcard_entry(
        &self,
        handle: PbaHandle,
        name: &str,
        params: Option<PullVCardEntryParams>,
    ) -> Result<Pulled> {
        let request = PbaRequest::PullVCardEntry {
            name: name.to_string(),
            params,
        };
        self.collect(handle, request).await
    }

    async fn collect(&self, handle: PbaHandle, request: PbaRequest) -> Result<Pulled> {
        let mut fragments = self.request(handle, request).await?;
        let mut data = BytesMut::new();
        let mut app_params = None;
        loop {
            match self.next(&mut fragments).await? {
                Event::PullPhoneBookRsp(rsp)
                | Event::PullVCardListingRsp(rsp)
                | Event::PullVCardEntryRsp(rsp) => {
                    expect_success(rsp.status)?;
                    if let Some(chunk) = rsp.data {
                        data.extend_from_slice(&chunk);
                    }
                    if rsp.app_params.is_some() {
                        app_params = rsp.app_params;
                    }
                    if rsp.is_final {
                        return Ok(Pulled {
                            data: data.freeze(),
                            app_params,
                        });
                    }
                }
                Event::ConnClose { .. } => return Err(Error::Pba(PbaStatus::GoepError)),
                _ => {}
            }
        }
    }

    async fn send(&self, msg: PbaMsg) -> Result<()> {
        self.bus
            .post_timeout(Message::call(Payload::Pba(msg)))
            .await?;
        Ok(())
    }

    /// Sends a request and waits for the first event matching `filter`.
    async fn send_and_wait(&self, msg: PbaMsg, filter: EventFilter) -> Result<Event> {
        // Subscribe first; the answer may be dispatched before send returns
        let mut subscription = self.events.subscribe(Some(filter));
        self.send(msg).await?;
        self.wait(&mut subscription).await
    }

    /// Waits for this client's turn on a connection.
    async fn turn(&self, handle: PbaHandle) -> Result<OwnedMutexGuard<()>> {
        let turn = {
            let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(turns.entry(handle).or_default())
        };
        tokio::time::timeout(self.timeout, turn.lock_owned())
            .await
            .map_err(|_| self.timeout_error())
    }

    async fn next(&self, fragments: &mut Fragments) -> Result<Event> {
        let event = self.wait(&mut fragments.subscription).await?;
        fragments.observe(&event);
        Ok(event)
    }

    async fn wait(&self, subscription: &mut Subscription) -> Result<Event> {
        tokio::select! {
            biased;
            event = subscription.recv() => event.ok_or(Error::ChannelClosed),
            () = tokio::time::sleep(self.timeout) => Err(self.timeout_error()),
        }
    }

    fn timeout_error(&self) -> Error {
        Error::Timeout {
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Drop for PbapClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

const fn response_kind(op: Operation) -> EventKind {
    match op {
        Operation::PullPhoneBook => EventKind::PullPhoneBookRsp,
        Operation::SetPhoneBook => EventKind::SetPhoneBookRsp,
        Operation::PullVCardListing => EventKind::PullVCardListingRsp,
        Operation::PullVCardEntry => EventKind::PullVCardEntryRsp,
    }
}

fn expect_success(status: PbaStatus) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::Pba(status))
    }
}
