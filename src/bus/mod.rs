//! Single-consumer message bus with a component dispatch table.
//!
//! Producers on any task hold a [`BusSender`] and only ever enqueue. One
//! task owns the [`Dispatcher`] together with the component state and
//! drains the queue in FIFO order, routing each message by component id
//! and signal to a registered handler pair.
//!
//! Every payload owns its buffers. The bytes it owns are charged against a
//! heap budget when posted and released once its handler has returned.

pub mod message;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TryRecvError, error::TrySendError};

use crate::config::BusConfig;
use crate::error::BusError;

pub use message::{ComponentId, Message, Payload, Signal};

/// Handler invoked with exclusive access to the component state.
pub type Handler<C> = fn(&mut C, Payload);

/// Handlers of one component, selected by [`Signal`].
pub struct Handlers<C> {
    pub call: Handler<C>,
    pub callback: Option<Handler<C>>,
}

/// Bytes currently owned by queued payloads.
#[derive(Debug)]
struct HeapBudget {
    used: AtomicUsize,
    limit: usize,
}

impl HeapBudget {
    fn charge(&self, size: usize) -> Result<(), BusError> {
        if size == 0 {
            return Ok(());
        }
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|total| *total <= self.limit)
            })
            .map(|_| ())
            .map_err(|used| BusError::NoMemory {
                requested: size,
                available: self.limit.saturating_sub(used),
            })
    }

    fn release(&self, size: usize) {
        if size > 0 {
            self.used.fetch_sub(size, Ordering::AcqRel);
        }
    }
}

/// Creates a bus, returning the producer side and the dispatcher.
#[must_use]
pub fn channel<C>(config: BusConfig) -> (BusSender, Dispatcher<C>) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let heap = Arc::new(HeapBudget {
        used: AtomicUsize::new(0),
        limit: config.heap_budget,
    });

    let sender = BusSender {
        tx,
        heap: Arc::clone(&heap),
        config,
    };
    let dispatcher = Dispatcher {
        rx,
        heap,
        handlers: HashMap::new(),
    };
    (sender, dispatcher)
}

/// Producer side of the bus. Cheap to clone.
#[derive(Clone)]
pub struct BusSender {
    tx: mpsc::Sender<Message>,
    heap: Arc<HeapBudget>,
    config: BusConfig,
}

impl std::fmt::Debug for BusSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSender")
            .field("queue_depth", &self.queue_depth())
            .field("heap_used", &self.heap.used.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl BusSender {
    /// Enqueues a message without waiting.
    ///
    /// # Errors
    ///
    /// - [`BusError::InvalidArgument`] if the payload does not belong to the target
    /// - [`BusError::NoMemory`] if the payload exceeds the remaining heap budget
    /// - [`BusError::Busy`] if the queue is full
    /// - [`BusError::Closed`] if the dispatcher is gone
    ///
    /// # Panics
    ///
    /// Panics on a full queue when the bus is configured with `abort_on_full`.
    pub fn post(&self, msg: Message) -> Result<(), BusError> {
        msg.validate()?;
        let size = msg.payload.heap_size();
        let action = msg.payload.action();
        self.heap.charge(size)?;

        match self.tx.try_send(msg) {
            Ok(()) => {
                tracing::trace!("posted {} ({} bytes)", action, size);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.heap.release(size);
                self.on_full(action)
            }
            Err(TrySendError::Closed(_)) => {
                self.heap.release(size);
                Err(BusError::Closed)
            }
        }
    }

    /// Enqueues a message, waiting up to the configured post timeout for space.
    ///
    /// # Errors
    ///
    /// Same as [`BusSender::post`].
    pub async fn post_timeout(&self, msg: Message) -> Result<(), BusError> {
        msg.validate()?;
        let size = msg.payload.heap_size();
        let action = msg.payload.action();
        self.heap.charge(size)?;

        match self.tx.send_timeout(msg, self.config.post_timeout).await {
            Ok(()) => {
                tracing::trace!("posted {} ({} bytes)", action, size);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                self.heap.release(size);
                self.on_full(action)
            }
            Err(SendTimeoutError::Closed(_)) => {
                self.heap.release(size);
                Err(BusError::Closed)
            }
        }
    }

    fn on_full(&self, action: &str) -> Result<(), BusError> {
        if self.config.abort_on_full {
            tracing::error!("message queue full, aborting on {}", action);
            panic!("message queue full while posting {action}");
        }
        tracing::error!("message queue full, dropped {}", action);
        Err(BusError::Busy)
    }

    /// Returns the number of queued messages.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer side of the bus.
pub struct Dispatcher<C> {
    rx: mpsc::Receiver<Message>,
    heap: Arc<HeapBudget>,
    handlers: HashMap<ComponentId, Handlers<C>>,
}

impl<C> Dispatcher<C> {
    /// Registers the handler pair of a component, replacing any previous one.
    pub fn register(&mut self, id: ComponentId, handlers: Handlers<C>) {
        self.handlers.insert(id, handlers);
    }

    /// Drains the queue until every sender is dropped.
    pub async fn run(&mut self, ctx: &mut C) {
        while let Some(msg) = self.rx.recv().await {
            self.dispatch(ctx, msg);
        }
        tracing::debug!("message bus closed");
    }

    /// Dispatches every message already queued, including those posted by
    /// the handlers themselves. Returns the number dispatched.
    pub fn dispatch_pending(&mut self, ctx: &mut C) -> usize {
        let mut count = 0;
        loop {
            match self.rx.try_recv() {
                Ok(msg) => {
                    self.dispatch(ctx, msg);
                    count += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return count,
            }
        }
    }

    /// Invokes the target handler on the caller's task, bypassing the queue.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidArgument`] if the payload does not belong to
    /// the target or no handler is registered for it.
    pub fn inter_profile_call(&self, ctx: &mut C, msg: Message) -> Result<(), BusError> {
        msg.validate()?;
        if !self.handlers.contains_key(&msg.target) {
            return Err(BusError::InvalidArgument);
        }
        self.route(ctx, msg);
        Ok(())
    }

    fn dispatch(&self, ctx: &mut C, msg: Message) {
        let size = msg.payload.heap_size();
        self.route(ctx, msg);
        self.heap.release(size);
    }

    fn route(&self, ctx: &mut C, msg: Message) {
        let Some(handlers) = self.handlers.get(&msg.target) else {
            tracing::debug!(
                "no handler for {:?}, dropped {}",
                msg.target,
                msg.payload.action()
            );
            return;
        };

        tracing::trace!("dispatch {:?} {}", msg.signal, msg.payload.action());
        match msg.signal {
            Signal::Call => (handlers.call)(ctx, msg.payload),
            Signal::Callback => match handlers.callback {
                Some(callback) => callback(ctx, msg.payload),
                None => tracing::debug!(
                    "{:?} has no callback handler, dropped {}",
                    msg.target,
                    msg.payload.action()
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event::Event;
    use crate::pba::{PbaMsg, PbaRequest};
    use crate::types::PbaStatus;

    #[derive(Default)]
    struct Log(Vec<String>);

    fn record_call(log: &mut Log, payload: Payload) {
        log.0.push(format!("call {}", payload.action()));
    }

    fn record_callback(log: &mut Log, payload: Payload) {
        log.0.push(format!("callback {}", payload.action()));
    }

    fn bus(config: BusConfig) -> (BusSender, Dispatcher<Log>) {
        let (sender, mut dispatcher) = channel(config);
        dispatcher.register(
            ComponentId::PbaClient,
            Handlers {
                call: record_call,
                callback: Some(record_callback),
            },
        );
        (sender, dispatcher)
    }

    fn close(handle: u16) -> Message {
        Message::call(Payload::Pba(PbaMsg::Close { handle }))
    }

    fn pull(name: &str) -> Message {
        Message::call(Payload::Pba(PbaMsg::Request {
            handle: 1,
            request: PbaRequest::PullPhoneBook {
                name: name.to_string(),
                params: None,
            },
        }))
    }

    #[test]
    fn test_dispatch_in_fifo_order() {
        let (sender, mut dispatcher) = bus(BusConfig::default());
        sender.post(close(1)).unwrap();
        sender
            .post(Message::callback(Payload::Event(Event::Deinit {
                status: PbaStatus::Success,
            })))
            .unwrap();
        sender.post(Message::call(Payload::Pba(PbaMsg::Enable))).unwrap();
        assert_eq!(sender.queue_depth(), 3);

        let mut log = Log::default();
        assert_eq!(dispatcher.dispatch_pending(&mut log), 3);
        assert_eq!(
            log.0,
            vec!["call pba_close", "callback deinit", "call pba_enable"]
        );
        assert_eq!(sender.queue_depth(), 0);
    }

    #[test]
    fn test_mismatched_target_is_invalid_argument() {
        let (sender, _dispatcher) = bus(BusConfig::default());
        let mut msg = close(1);
        msg.target = ComponentId::Goep;
        assert_eq!(sender.post(msg), Err(BusError::InvalidArgument));
        assert_eq!(sender.queue_depth(), 0);
    }

    #[test]
    fn test_full_queue_is_busy() {
        let (sender, _dispatcher) = bus(BusConfig::default().capacity(2));
        sender.post(close(1)).unwrap();
        sender.post(close(2)).unwrap();
        assert_eq!(sender.post(close(3)), Err(BusError::Busy));
    }

    #[test]
    #[should_panic(expected = "message queue full")]
    fn test_full_queue_aborts_when_configured() {
        let (sender, _dispatcher) = bus(BusConfig::default().capacity(1).abort_on_full(true));
        sender.post(close(1)).unwrap();
        let _ = sender.post(close(2));
    }

    #[test]
    fn test_heap_budget_is_released_after_dispatch() {
        let (sender, mut dispatcher) = bus(BusConfig::default().heap_budget(10));
        sender.post(pull("telecom/pb.vcf")).unwrap_err();
        sender.post(pull("pb.vcf")).unwrap();
        assert!(matches!(
            sender.post(pull("pb.vcf")),
            Err(BusError::NoMemory {
                requested: 6,
                available: 4
            })
        ));

        let mut log = Log::default();
        dispatcher.dispatch_pending(&mut log);
        sender.post(pull("pb.vcf")).unwrap();
    }

    #[test]
    fn test_closed_bus() {
        let (sender, dispatcher) = bus(BusConfig::default());
        drop(dispatcher);
        assert_eq!(sender.post(close(1)), Err(BusError::Closed));
    }

    #[test]
    fn test_missing_callback_handler_drops_message() {
        let (sender, mut dispatcher) = channel::<Log>(BusConfig::default());
        dispatcher.register(
            ComponentId::PbaClient,
            Handlers {
                call: record_call,
                callback: None,
            },
        );
        sender
            .post(Message::callback(Payload::Event(Event::Init {
                status: PbaStatus::Success,
            })))
            .unwrap();

        let mut log = Log::default();
        assert_eq!(dispatcher.dispatch_pending(&mut log), 1);
        assert!(log.0.is_empty());
    }

    #[test]
    fn test_inter_profile_call_bypasses_queue() {
        let (sender, dispatcher) = bus(BusConfig::default());
        let mut log = Log::default();
        dispatcher.inter_profile_call(&mut log, close(7)).unwrap();
        assert_eq!(log.0, vec!["call pba_close"]);
        assert_eq!(sender.queue_depth(), 0);

        let goep = Message {
            signal: Signal::Call,
            target: ComponentId::Goep,
            payload: Payload::Goep(crate::goep::GoepMsg::Transport {
                link: crate::transport::TransportHandle::new(1),
                event: crate::transport::TransportEvent::Closed,
            }),
        };
        assert_eq!(
            dispatcher.inter_profile_call(&mut log, goep),
            Err(BusError::InvalidArgument)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_timeout_waits_for_space() {
        let (sender, mut dispatcher) = bus(
            BusConfig::default()
                .capacity(1)
                .post_timeout(Duration::from_millis(50)),
        );
        sender.post(close(1)).unwrap();
        assert_eq!(sender.post_timeout(close(2)).await, Err(BusError::Busy));

        let mut log = Log::default();
        dispatcher.dispatch_pending(&mut log);
        sender.post_timeout(close(3)).await.unwrap();
        assert_eq!(sender.queue_depth(), 1);
    }
}
