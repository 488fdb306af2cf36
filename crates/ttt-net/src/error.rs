//! Error taxonomy for the client core.

use crate::framing::FrameError;

/// Errors surfaced by the transport, matchmaking and match-channel layers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetError {
    /// The server rejected the device credential. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transport-level failure. Retried only by the rejoin loop.
    #[error("socket error: {0}")]
    Socket(String),

    /// An operation needed a live connection and there was none.
    #[error("socket is not connected")]
    NotConnected,

    /// A socket reconnect was requested before any successful authentication.
    #[error("no session; connect first")]
    NoSession,

    /// A match operation was requested while not joined to a match.
    #[error("not in a match")]
    NotInMatch,

    /// An inbound payload could not be decoded.
    #[error("malformed payload: {0}")]
    Decode(String),

    /// The server answered a request with an application-level error.
    #[error("server rejected request: {0}")]
    Rejected(String),
}

/// Convenience alias used throughout the crate.
pub type NetResult<T> = Result<T, NetError>;

impl From<serde_json::Error> for NetError {
    fn from(e: serde_json::Error) -> Self {
        NetError::Decode(e.to_string())
    }
}

impl From<FrameError> for NetError {
    fn from(e: FrameError) -> Self {
        NetError::Socket(e.to_string())
    }
}

impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> Self {
        NetError::Socket(e.to_string())
    }
}
