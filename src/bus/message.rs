//! Messages carried by the bus.
//!
//! A message owns its payload by value. Posting moves it into the queue,
//! dispatch moves it into the handler, and it is dropped when the handler
//! returns.

use crate::error::BusError;
use crate::event::Event;
use crate::goep::GoepMsg;
use crate::pba::PbaMsg;

/// Components reachable through the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentId {
    /// GOEP client engine.
    Goep,
    /// Phone book access client.
    PbaClient,
}

/// Which handler of a component receives the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Request into the component.
    Call,
    /// Result travelling back towards the application.
    Callback,
}

/// Message payload; the variant is the action tag.
#[derive(Debug)]
pub enum Payload {
    /// Input to the GOEP client engine.
    Goep(GoepMsg),
    /// Input to the phone book client.
    Pba(PbaMsg),
    /// Event for the application.
    Event(Event),
}

impl Payload {
    /// Returns the component this payload is meant for.
    #[must_use]
    pub const fn component(&self) -> ComponentId {
        match self {
            Self::Goep(_) => ComponentId::Goep,
            Self::Pba(_) | Self::Event(_) => ComponentId::PbaClient,
        }
    }

    /// Returns a short name of the action, for tracing.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Goep(msg) => msg.action(),
            Self::Pba(msg) => msg.action(),
            Self::Event(event) => event.name(),
        }
    }

    /// Returns the number of heap bytes the payload owns.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        match self {
            Self::Goep(msg) => msg.heap_size(),
            Self::Pba(msg) => msg.heap_size(),
            Self::Event(event) => event.heap_size(),
        }
    }
}

/// A unit of work for exactly one component.
#[derive(Debug)]
pub struct Message {
    pub signal: Signal,
    pub target: ComponentId,
    pub payload: Payload,
}

impl Message {
    /// Creates a call to the component owning `payload`.
    #[must_use]
    pub const fn call(payload: Payload) -> Self {
        Self {
            signal: Signal::Call,
            target: payload.component(),
            payload,
        }
    }

    /// Creates a callback to the component owning `payload`.
    #[must_use]
    pub const fn callback(payload: Payload) -> Self {
        Self {
            signal: Signal::Callback,
            target: payload.component(),
            payload,
        }
    }

    /// Checks that the payload belongs to the target component.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.payload.component() == self.target {
            Ok(())
        } else {
            Err(BusError::InvalidArgument)
        }
    }
}
