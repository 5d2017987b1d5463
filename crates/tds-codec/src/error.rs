//! Codec error types.

use thiserror::Error;

use tds_protocol::{PacketType, ProtocolError};

/// Errors raised while moving packets over a transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The transport failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A packet header or payload was malformed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An outgoing packet exceeds the negotiated size.
    #[error("packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge {
        /// Size of the packet.
        size: usize,
        /// Negotiated limit.
        max: usize,
    },

    /// The server sent a packet that is not a tabular response.
    #[error("unexpected {0:?} packet from server")]
    UnexpectedPacketType(PacketType),

    /// The peer closed the transport.
    #[error("connection closed")]
    ConnectionClosed,
}

impl CodecError {
    /// Whether the transport can no longer be trusted after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::PacketTooLarge { .. })
    }
}
