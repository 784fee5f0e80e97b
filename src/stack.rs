//! The components served by one message bus.
//!
//! A [`Stack`] owns the GOEP engine, the phone book client and the event
//! fan-out. The task draining the bus owns the stack, so every handler
//! runs with exclusive access and no locking.

use std::sync::Arc;

use crate::bus::{BusSender, ComponentId, Dispatcher, Handlers, Payload};
use crate::config::StackConfig;
use crate::event::EventDispatcher;
use crate::goep::GoepClient;
use crate::pba::PbaClient;
use crate::sdp::SdpClient;
use crate::transport::ObexTransport;

/// State of every component behind the bus.
pub struct Stack {
    pub goep: GoepClient,
    pub pba: PbaClient,
    pub events: EventDispatcher,
}

impl Stack {
    /// Builds the components, all posting to `bus`.
    #[must_use]
    pub fn new(
        config: &StackConfig,
        transport: Arc<dyn ObexTransport>,
        sdp: Box<dyn SdpClient>,
        events: EventDispatcher,
        bus: &BusSender,
    ) -> Self {
        Self {
            goep: GoepClient::new(config.goep_max_connections, transport, bus.clone()),
            pba: PbaClient::new(
                config.pba_max_connections,
                sdp,
                bus.clone(),
                config.prefer_l2cap,
            ),
            events,
        }
    }

    /// Registers the handlers of every component.
    pub fn register(dispatcher: &mut Dispatcher<Self>) {
        dispatcher.register(
            ComponentId::Goep,
            Handlers {
                call: goep_call,
                callback: None,
            },
        );
        dispatcher.register(
            ComponentId::PbaClient,
            Handlers {
                call: pba_call,
                callback: Some(pba_callback),
            },
        );
    }
}

fn goep_call(stack: &mut Stack, payload: Payload) {
    match payload {
        Payload::Goep(msg) => stack.goep.handle(msg),
        other => tracing::warn!("goep cannot handle {}", other.action()),
    }
}

fn pba_call(stack: &mut Stack, payload: Payload) {
    match payload {
        Payload::Pba(msg) => stack.pba.handle(&mut stack.goep, msg),
        other => tracing::warn!("pba cannot handle {}", other.action()),
    }
}

fn pba_callback(stack: &mut Stack, payload: Payload) {
    match payload {
        Payload::Event(event) => stack.events.dispatch(event),
        other => tracing::warn!("pba callback cannot take {}", other.action()),
    }
}
