//! Protocol-level error type.

use thiserror::Error;

/// Errors raised while encoding or decoding the TDS wire format.
///
/// Every variant is fatal for the connection that produced it: a malformed
/// stream cannot be resynchronized, so the session layer closes the
/// transport when one of these surfaces.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The buffer ended in the middle of a protocol field.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// An unrecognized packet type byte.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// An unrecognized token tag byte.
    #[error("invalid token type: 0x{0:02X}")]
    InvalidTokenType(u8),

    /// An unrecognized wire data type byte.
    #[error("invalid TDS data type: 0x{0:02X}")]
    InvalidDataType(u8),

    /// A field carried a value outside its legal range.
    #[error("invalid {field}: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u64,
    },

    /// A length prefix disagrees with the surrounding framing.
    #[error("invalid length {length} for {context}")]
    InvalidLength {
        /// Declared length.
        length: usize,
        /// What was being decoded.
        context: &'static str,
    },

    /// A parameter value exceeds its declared maximum size.
    ///
    /// Raised locally before any bytes are written, so a truncated request
    /// is never sent to the server.
    #[error("data truncation: value length {length} exceeds declared maximum {max}")]
    Truncation {
        /// Encoded value length in bytes.
        length: usize,
        /// Declared maximum in bytes.
        max: usize,
    },

    /// Text could not be represented in the session character set.
    #[error("unmappable character for server charset {0}")]
    Unmappable(&'static str),

    /// The protocol exchange itself went wrong (sequence violations,
    /// unsupported server responses).
    #[error("protocol violation: {0}")]
    Violation(&'static str),

    /// A value conversion failed while materializing or marshalling data.
    #[error(transparent)]
    Type(#[from] tds_values::TypeError),
}
