//! Session states of the GOEP client engine.

/// Main state of an OBEX session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoepState {
    /// Slot allocated, nothing started.
    Init,
    /// Waiting for the transport to come up.
    Opening,
    /// Connected, no request outstanding.
    OpenedIdle,
    /// A non-final request has been sent.
    OpenedReq,
    /// A final request has been sent; only final requests may follow.
    OpenedRsp,
}

impl GoepState {
    /// Returns true once the transport is up.
    #[must_use]
    pub const fn is_opened(self) -> bool {
        matches!(self, Self::OpenedIdle | Self::OpenedReq | Self::OpenedRsp)
    }
}

/// Inputs of the main state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GoepSmEvent {
    Connect,
    Disconnect,
    Req,
    ReqFinal,
    Rsp,
    RspFinal,
}

/// Single Response Mode negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SrmState {
    /// No negotiation in progress.
    #[default]
    Idle,
    /// We asked for SRM and wait for the peer's answer.
    Req,
    /// Both sides enabled SRM but one of them asked to wait.
    EnableWait,
    /// Responses flow without further requests.
    Enable,
    /// SRM is off for this operation.
    Disable,
}

/// SRM sub-state machine with the wait flag of each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SrmMachine {
    state: SrmState,
    local_wait: bool,
    peer_wait: bool,
}

impl SrmMachine {
    #[must_use]
    pub const fn state(&self) -> SrmState {
        self.state
    }

    /// Returns true once responses may arrive without requests.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self.state, SrmState::Enable)
    }

    /// Returns true while either side holds the exchange.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.local_wait || self.peer_wait
    }

    #[must_use]
    pub const fn local_wait(&self) -> bool {
        self.local_wait
    }

    #[must_use]
    pub const fn peer_wait(&self) -> bool {
        self.peer_wait
    }

    /// Applies the SRM headers of an outgoing request.
    pub fn on_request(&mut self, enable: bool, wait: bool) {
        match self.state {
            SrmState::Idle if enable => {
                self.state = SrmState::Req;
                self.local_wait = wait;
            }
            SrmState::Idle => self.state = SrmState::Disable,
            SrmState::Req => self.local_wait = wait,
            SrmState::EnableWait => {
                if !wait {
                    self.local_wait = false;
                }
                self.settle();
            }
            SrmState::Enable | SrmState::Disable => {}
        }
    }

    /// Applies the SRM headers of a non-final response.
    pub fn on_response(&mut self, enable: bool, wait: bool) {
        match self.state {
            SrmState::Req if enable => {
                self.peer_wait = wait;
                self.state = SrmState::EnableWait;
                self.settle();
            }
            SrmState::Req => {
                self.state = SrmState::Disable;
                self.local_wait = false;
                self.peer_wait = false;
            }
            SrmState::EnableWait => {
                if !wait {
                    self.peer_wait = false;
                }
                self.settle();
            }
            SrmState::Idle | SrmState::Enable | SrmState::Disable => {}
        }
    }

    /// Forgets the negotiation; called on every final response.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn settle(&mut self) {
        if !self.local_wait && !self.peer_wait {
            self.state = SrmState::Enable;
        }
    }
}
