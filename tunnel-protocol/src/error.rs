use thiserror::Error;

/// Failure vocabulary shared by the relay and the agent.
///
/// The agent only ever logs these; the relay additionally maps each
/// variant to a public HTTP status code via [`ErrorKind::status_code`].
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ErrorKind {
    /// The referenced tunnel id is not registered.
    #[error("tunnel not found")]
    NotFound,

    /// `create` was called with a `preferredId` that is already live.
    #[error("tunnel id already exists")]
    AlreadyExists,

    /// The tunnel exists but has no attached control channel.
    #[error("tunnel is not connected")]
    NotConnected,

    /// No reply arrived before the pending request's deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// The control channel closed while a request was in flight.
    #[error("channel dropped mid-request")]
    ChannelDropped,

    /// The tunnel was deleted while a request was in flight.
    #[error("tunnel was deleted")]
    TunnelGone,

    /// The relay failed to serialize or write the frame to the channel.
    #[error("failed to send frame")]
    SendFailed,

    /// A management request body was malformed.
    #[error("bad request")]
    BadRequest,

    /// Anything else unexpected.
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// The HTTP status code a public caller should see for this failure.
    /// Returned as a raw `u16` so this crate does not need to depend on
    /// an HTTP library; callers map it into their own status type.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::NotConnected => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::ChannelDropped | ErrorKind::TunnelGone | ErrorKind::SendFailed => 502,
            ErrorKind::BadRequest => 400,
            ErrorKind::Internal => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_cover_every_variant() {
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::AlreadyExists.status_code(), 409);
        assert_eq!(ErrorKind::NotConnected.status_code(), 503);
        assert_eq!(ErrorKind::Timeout.status_code(), 504);
        assert_eq!(ErrorKind::ChannelDropped.status_code(), 502);
        assert_eq!(ErrorKind::TunnelGone.status_code(), 502);
        assert_eq!(ErrorKind::SendFailed.status_code(), 502);
        assert_eq!(ErrorKind::BadRequest.status_code(), 400);
        assert_eq!(ErrorKind::Internal.status_code(), 500);
    }
}
