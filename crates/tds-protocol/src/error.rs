//! Protocol-level error types.

use thiserror::Error;

/// Errors raised while decoding or encoding TDS wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Not enough bytes are buffered to finish the current item.
    ///
    /// The resumable decoder treats this as "feed me another packet";
    /// it only escapes to callers when a message ends mid-token.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// A packet header declared an impossible length.
    #[error("invalid packet length {length} (allowed {min}..={max})")]
    InvalidPacketLength {
        /// Declared length.
        length: usize,
        /// Smallest legal length (the header alone).
        min: usize,
        /// Largest legal length.
        max: usize,
    },

    /// Unknown packet type byte.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Token tag that cannot be decoded or skipped.
    #[error("protocol confusion: got a 0x{0:02X} token")]
    InvalidTokenType(u8),

    /// Column type code that the decoder does not know.
    #[error("protocol confusion: unknown data type 0x{0:02X}")]
    InvalidDataType(u8),

    /// A value carried a length that its type does not allow.
    #[error("invalid length {length} for type 0x{type_id:02X}")]
    InvalidValueLength {
        /// Type code of the column.
        type_id: u8,
        /// Offending length.
        length: usize,
    },

    /// A row arrived before any column metadata.
    #[error("row data received without column metadata")]
    MissingMetadata,

    /// A length-prefixed token body was buffered in full but is too short
    /// for the fields it must carry.
    #[error("malformed 0x{0:02X} token body")]
    MalformedToken(u8),

    /// The message ended in the middle of a token.
    #[error("message truncated with {remaining} undecoded bytes")]
    TruncatedMessage {
        /// Bytes left in the buffer at end of message.
        remaining: usize,
    },

    /// Text could not be decoded.
    #[error("string encoding error: {0}")]
    StringEncoding(String),
}

impl ProtocolError {
    /// Reinterpret a short read inside a fully buffered token body.
    ///
    /// More packets cannot complete such a body, so `UnexpectedEof` there
    /// means the body itself is malformed.
    #[must_use]
    pub(crate) fn within_body(self, tag: u8) -> Self {
        match self {
            Self::UnexpectedEof => Self::MalformedToken(tag),
            other => other,
        }
    }
}
