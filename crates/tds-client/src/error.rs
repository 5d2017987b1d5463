//! Client error types.
//!
//! Errors fall into a few classes that decide what is still usable after
//! they are raised:
//!
//! - connection fatal ([`Error::Framing`], [`Error::Io`],
//!   [`Error::ConnectionClosed`]): the physical connection is poisoned.
//! - statement fatal ([`Error::ProtocolConfusion`], [`Error::Protocol`],
//!   [`Error::Server`], [`Error::QueryCanceled`]): the current response is
//!   abandoned; the connection stays usable once it has been drained.
//! - local ([`Error::LobRange`], [`Error::NoCurrentRow`], [`Error::Type`],
//!   ...): nothing but the failing call is affected.

use tds_codec::CodecError;
use tds_protocol::{ProtocolError, ServerMessage};
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed packet or broken framing. The connection cannot be reused.
    #[error("framing error: {0}")]
    Framing(CodecError),

    /// A token arrived that makes no sense in the current state.
    #[error("protocol confusion: got a 0x{tag:02X} token")]
    ProtocolConfusion {
        /// Tag of the offending token.
        tag: u8,
    },

    /// The token stream could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server returned an error at or above the fatal severity.
    #[error("server error {number}: {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Error class/severity (0-25).
        class: u8,
        /// Error state.
        state: u8,
        /// Error message.
        message: String,
        /// Server name where error occurred.
        server: Option<String>,
        /// Stored procedure name (if applicable).
        procedure: Option<String>,
        /// Line number in the SQL batch or procedure.
        line: i32,
    },

    /// The request was canceled, either explicitly or by the command timeout.
    #[error("query was canceled or timed out")]
    QueryCanceled {
        /// Whether the command timeout fired.
        timed_out: bool,
    },

    /// A large-object position or length was out of range.
    #[error("{operation}: position {position} length {length} out of range")]
    LobRange {
        /// Operation that failed.
        operation: &'static str,
        /// Requested 1-based position, or the new length for truncation.
        position: u64,
        /// Current length of the value.
        length: u64,
    },

    /// No row is current: before the first advance or after the last row.
    #[error("no current row")]
    NoCurrentRow,

    /// The column index or name does not exist in the current result set.
    #[error("invalid column: {0}")]
    InvalidColumn(String),

    /// Fetch size larger than the row limit.
    #[error("fetch size {fetch_size} exceeds max rows {max_rows}")]
    InvalidFetchSize {
        /// Requested fetch size.
        fetch_size: usize,
        /// Current row limit.
        max_rows: usize,
    },

    /// An update was executed but the server returned a result set.
    #[error("a result set was returned where an update count was expected")]
    ResultSetProduced,

    /// An earlier error left the statement without a usable result state.
    #[error("statement is unusable until the next execution")]
    Unusable,

    /// Another statement holds the connection.
    #[error("connection is busy with another statement")]
    ConnectionBusy,

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Type conversion error.
    #[error("type error: {0}")]
    Type(#[from] tds_types::TypeError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::ConnectionClosed => Self::ConnectionClosed,
            CodecError::Io(e) => Self::Io(e),
            other => Self::Framing(other),
        }
    }
}

impl From<&ServerMessage> for Error {
    fn from(msg: &ServerMessage) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self::Server {
            number: msg.number,
            class: msg.class,
            state: msg.state,
            message: msg.message.clone(),
            server: non_empty(&msg.server),
            procedure: non_empty(&msg.procedure),
            line: msg.line,
        }
    }
}

const ROW_TAG: u8 = 0xD1;

impl Error {
    /// Map a decode failure, turning unknown tags into protocol confusion.
    pub(crate) fn from_decode(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidTokenType(tag) => Self::ProtocolConfusion { tag },
            // a row before any column metadata
            ProtocolError::MissingMetadata => Self::ProtocolConfusion { tag: ROW_TAG },
            other => Self::Protocol(other),
        }
    }

    /// Check if the physical connection is unusable after this error.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Framing(_) | Self::Io(_) | Self::ConnectionClosed)
    }

    /// Check if this error reports a cancel or command timeout.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::QueryCanceled { .. })
    }

    /// Check if this error indicates a protocol/driver bug.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::ProtocolConfusion { .. })
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        matches!(self, Self::Server { number: n, .. } if *n == number)
    }

    /// Get the error class/severity if this is a server error.
    ///
    /// Server error classes range from 0-25:
    /// - 0-10: Informational
    /// - 11-16: User errors
    /// - 17-19: Resource/hardware errors
    /// - 20-25: System errors (connection terminating)
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { class, .. } => Some(*class),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::MessageKind;

    #[test]
    fn test_codec_error_mapping() {
        assert!(matches!(
            Error::from(CodecError::ConnectionClosed),
            Error::ConnectionClosed
        ));
        let framing = Error::from(CodecError::PacketTooLarge { size: 70000, max: 4096 });
        assert!(framing.is_connection_fatal());
        assert!(!framing.is_protocol_error());
    }

    #[test]
    fn test_unknown_tag_is_confusion() {
        let e = Error::from_decode(ProtocolError::InvalidTokenType(0x42));
        assert_eq!(e.to_string(), "protocol confusion: got a 0x42 token");
        assert!(!e.is_connection_fatal());
    }

    #[test]
    fn test_server_error_from_message() {
        let msg = ServerMessage {
            kind: MessageKind::Error,
            number: 208,
            state: 1,
            class: 16,
            message: "Invalid object name 'nope'.".into(),
            server: "db1".into(),
            procedure: String::new(),
            line: 1,
        };
        let e = Error::from(&msg);
        assert!(e.is_server_error(208));
        assert_eq!(e.class(), Some(16));
        assert!(matches!(e, Error::Server { procedure: None, server: Some(_), .. }));
    }

    #[test]
    fn test_cancel_message() {
        let e = Error::QueryCanceled { timed_out: true };
        assert!(e.is_canceled());
        assert_eq!(e.to_string(), "query was canceled or timed out");
    }
}
