//! Session error types.

use tds_values::TypeError;
use tds_wire::ProtocolError;
use tds_wire::diag::Diagnostic;

/// Alias for session-layer results.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection establishment or negotiation failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server closed the stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// A previous fatal error has doomed this session.
    #[error("session unusable after a fatal server error")]
    Doomed,

    /// Wire-level protocol failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Packet framing failure.
    #[error("codec error: {0}")]
    Codec(#[from] tds_codec::CodecError),

    /// Value conversion failure.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// The server reported an error.
    #[error("server error: {0}")]
    Server(Diagnostic),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(&'static str),

    /// The login sequence did not finish in time.
    #[error("login timed out")]
    LoginTimeout,

    /// The request did not produce a response in time; a cancel was sent.
    #[error("request timed out")]
    Timeout,

    /// Transport-level I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the operation on a fresh session may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::LoginTimeout | Self::Timeout | Self::Io(_)
        )
    }

    /// The server diagnostic behind this error, when there is one.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::Server(diag) => Some(diag),
            _ => None,
        }
    }
}
