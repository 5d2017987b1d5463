//! # tds-protocol
//!
//! IO-agnostic implementation of the Tabular Data Stream wire format:
//! packet headers, response tokens, column values and request payloads.
//!
//! ## Design Philosophy
//!
//! This crate contains no networking logic and makes no assumptions about
//! the async runtime. Every decoder works on an in-memory buffer and reports
//! [`ProtocolError::UnexpectedEof`] when it needs more bytes, so the
//! transport in `tds-codec` can feed it one packet at a time.
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use tds_protocol::{Token, TokenDecoder};
//!
//! let mut decoder = TokenDecoder::new();
//! let mut buf = BytesMut::from(&[0xFD, 0x10, 0x00, 0xC1, 0x00, 3, 0, 0, 0, 0, 0, 0, 0][..]);
//! match decoder.decode(&mut buf).unwrap() {
//!     Some(Token::EndOfResults(done)) => assert_eq!(done.update_count(), Some(3)),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod collation;
pub mod decoder;
pub mod error;
pub mod packet;
pub mod request;
pub mod token;
pub mod types;
pub mod value;

pub use collation::Collation;
pub use decoder::TokenDecoder;
pub use error::ProtocolError;
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType,
};
pub use request::{ParamType, ParamValue, ProcId, Request, RpcParam, RpcRequest};
pub use token::{
    ColumnDescriptor, ColumnMetadata, Done, DoneKind, DoneStatus, EnvChange, LobLayout,
    MessageKind, OutputParameter, ServerMessage, Token, TokenType, TypeInfo,
};
pub use types::{ColumnFlags, MAX_LENGTH_PLP, TypeId};
pub use value::{ColumnValue, Date, DateTime, LobKind, LobValue, Numeric, Time};
