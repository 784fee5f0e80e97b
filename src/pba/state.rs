//! Per-connection state table of the phone book client.

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PbaState {
    Init,
    /// Discovering, opening the session or connecting OBEX.
    Opening,
    /// Connected and idle.
    Opened,
    /// An operation is in progress.
    Requesting,
    /// OBEX DISCONNECT sent.
    Closing,
}

impl PbaState {
    const COUNT: usize = 5;
}

/// Table input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PbaEvent {
    ApiOpen,
    ApiClose,
    ApiRequest,
    SdpOk,
    SdpFail,
    GoepConnect,
    GoepDisconnect,
    GoepResponse,
}

impl PbaEvent {
    const COUNT: usize = 8;
}

/// Work done on a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PbaAction {
    /// Change state only.
    Ignore,
    StartDiscovery,
    OpenGoep,
    SdpFailed,
    SendConnect,
    ConnectRsp,
    SendRequest,
    RejectRequest,
    OpResponse,
    SendDisconnect,
    DisconnectRsp,
    CloseConn,
    GoepClosed,
    FreeResponse,
}

type Entry = Option<(PbaAction, PbaState)>;

use PbaAction as A;
use PbaState as S;

/// `[state][event] -> (action, next state)`; `None` drops the event.
///
/// Columns: `ApiOpen, ApiClose, ApiRequest, SdpOk, SdpFail, GoepConnect,
/// GoepDisconnect, GoepResponse`.
const STATE_TABLE: [[Entry; PbaEvent::COUNT]; PbaState::COUNT] = [
    // Init
    [
        Some((A::StartDiscovery, S::Opening)),
        None,
        None,
        None,
        None,
        None,
        None,
        None,
    ],
    // Opening
    [
        Some((A::Ignore, S::Opening)),
        Some((A::CloseConn, S::Init)),
        Some((A::RejectRequest, S::Opening)),
        Some((A::OpenGoep, S::Opening)),
        Some((A::SdpFailed, S::Init)),
        Some((A::SendConnect, S::Opening)),
        Some((A::GoepClosed, S::Init)),
        Some((A::ConnectRsp, S::Opening)),
    ],
    // Opened
    [
        Some((A::Ignore, S::Opened)),
        Some((A::SendDisconnect, S::Closing)),
        Some((A::SendRequest, S::Requesting)),
        None,
        None,
        None,
        Some((A::GoepClosed, S::Init)),
        Some((A::FreeResponse, S::Opened)),
    ],
    // Requesting
    [
        Some((A::Ignore, S::Requesting)),
        Some((A::CloseConn, S::Init)),
        Some((A::RejectRequest, S::Requesting)),
        None,
        None,
        None,
        Some((A::GoepClosed, S::Init)),
        Some((A::OpResponse, S::Opened)),
    ],
    // Closing
    [
        Some((A::Ignore, S::Closing)),
        Some((A::Ignore, S::Closing)),
        Some((A::RejectRequest, S::Closing)),
        None,
        None,
        None,
        Some((A::GoepClosed, S::Init)),
        Some((A::DisconnectRsp, S::Init)),
    ],
];

/// Looks up the transition for `event` in `state`.
pub(crate) const fn transition(state: PbaState, event: PbaEvent) -> Entry {
    STATE_TABLE[state as usize][event as usize]
}
