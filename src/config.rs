//! Runtime configuration.

use std::time::Duration;

/// Default number of queued bus messages.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Default wait for queue space in [`crate::bus::BusSender::post_timeout`].
pub const DEFAULT_POST_TIMEOUT: Duration = Duration::from_millis(100);

/// Default limit on bytes owned by queued payloads.
pub const DEFAULT_HEAP_BUDGET: usize = 256 * 1024;

/// Default number of simultaneous OBEX sessions.
pub const DEFAULT_GOEP_CONNECTIONS: usize = 4;

/// Default number of simultaneous phone book connections.
pub const DEFAULT_PBA_CONNECTIONS: usize = 2;

/// Default capacity of the application event broadcast.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default timeout of the async client calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Message bus configuration.
#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    /// Queue capacity in messages.
    pub capacity: usize,
    /// Bounded wait for queue space.
    pub post_timeout: Duration,
    /// Bytes queued payloads may own in total.
    pub heap_budget: usize,
    /// Panic instead of reporting `Busy` when the queue is full.
    pub abort_on_full: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUS_CAPACITY,
            post_timeout: DEFAULT_POST_TIMEOUT,
            heap_budget: DEFAULT_HEAP_BUDGET,
            abort_on_full: false,
        }
    }
}

impl BusConfig {
    /// Sets the queue capacity.
    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the bounded wait for queue space.
    #[must_use]
    pub const fn post_timeout(mut self, timeout: Duration) -> Self {
        self.post_timeout = timeout;
        self
    }

    /// Sets the heap budget.
    #[must_use]
    pub const fn heap_budget(mut self, bytes: usize) -> Self {
        self.heap_budget = bytes;
        self
    }

    /// Makes a full queue fatal.
    #[must_use]
    pub const fn abort_on_full(mut self, abort: bool) -> Self {
        self.abort_on_full = abort;
        self
    }
}

/// Configuration of the whole stack.
#[derive(Debug, Clone, Copy)]
pub struct StackConfig {
    pub bus: BusConfig,
    /// Size of the OBEX session pool.
    pub goep_max_connections: usize,
    /// Size of the phone book connection pool.
    pub pba_max_connections: usize,
    /// Use L2CAP when both the peer and the transport support it.
    pub prefer_l2cap: bool,
    /// Capacity of the application event broadcast.
    pub event_capacity: usize,
    /// Timeout of the async client calls.
    pub request_timeout: Duration,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            goep_max_connections: DEFAULT_GOEP_CONNECTIONS,
            pba_max_connections: DEFAULT_PBA_CONNECTIONS,
            prefer_l2cap: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl StackConfig {
    /// Sets the bus configuration.
    #[must_use]
    pub const fn bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }

    /// Sets the size of the OBEX session pool.
    #[must_use]
    pub const fn goep_max_connections(mut self, count: usize) -> Self {
        self.goep_max_connections = count;
        self
    }

    /// Sets the size of the phone book connection pool.
    #[must_use]
    pub const fn pba_max_connections(mut self, count: usize) -> Self {
        self.pba_max_connections = count;
        self
    }

    /// Sets whether L2CAP is preferred over RFCOMM.
    #[must_use]
    pub const fn prefer_l2cap(mut self, prefer: bool) -> Self {
        self.prefer_l2cap = prefer;
        self
    }

    /// Sets the event broadcast capacity.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets the async client call timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
