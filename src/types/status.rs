//! Status codes reported to the application.

use crate::protocol::ResponseCode;

/// Outcome of a phone book client operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PbaStatus {
    Success,
    /// Generic failure.
    Fail,
    /// A connection to this peer already exists.
    AlreadyConnected,
    /// No free connection slot.
    NoResource,
    /// Service discovery failed or found no usable record.
    SdpError,
    /// The OBEX session layer failed.
    GoepError,
    /// The peer rejected authentication.
    AuthFail,
    /// The client is not enabled.
    Disabled,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    NotAcceptable,
    PreconditionFailed,
    NotImplemented,
    ServiceUnavailable,
}

impl PbaStatus {
    /// Maps a terminal OBEX response code.
    ///
    /// Codes without a dedicated status map to [`PbaStatus::Fail`].
    #[must_use]
    pub const fn from_response(code: u8) -> Self {
        match ResponseCode::from_byte(code) {
            Some(ResponseCode::Ok) => Self::Success,
            Some(ResponseCode::BadRequest) => Self::BadRequest,
            Some(ResponseCode::Unauthorized) => Self::Unauthorized,
            Some(ResponseCode::Forbidden) => Self::Forbidden,
            Some(ResponseCode::NotFound) => Self::NotFound,
            Some(ResponseCode::NotAcceptable) => Self::NotAcceptable,
            Some(ResponseCode::PreconditionFailed) => Self::PreconditionFailed,
            Some(ResponseCode::NotImplemented) => Self::NotImplemented,
            Some(ResponseCode::ServiceUnavailable) => Self::ServiceUnavailable,
            Some(ResponseCode::Continue) | None => Self::Fail,
        }
    }

    /// Returns true for [`PbaStatus::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}
