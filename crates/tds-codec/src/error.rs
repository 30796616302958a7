//! Framing-layer errors.

use tds_wire::ProtocolError;

/// Errors raised while framing or unframing TDS packets.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The packet header is malformed (length smaller than the header).
    #[error("invalid packet header")]
    InvalidHeader,

    /// A packet claims a length above the negotiated maximum.
    #[error("packet of {size} bytes exceeds the maximum of {max}")]
    PacketTooLarge {
        /// Claimed packet length.
        size: usize,
        /// Negotiated maximum.
        max: usize,
    },

    /// The peer closed the stream in the middle of a message.
    #[error("connection closed mid-message")]
    ConnectionClosed,

    /// Header parsing failed at the protocol level.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport-level I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
