//! # tds-codec
//!
//! Async framing layer for TDS packet handling.
//!
//! This crate turns a byte stream into TDS packets and back. Responses are
//! handed out packet by packet so the token decoder above can work through a
//! large result without buffering the whole message; requests are split into
//! packets of the negotiated size.
//!
//! ## Architecture
//!
//! ```text
//! transport → PacketReader (TdsCodec) → Connection::read_packet → token decoder
//! request   → packetize → PacketWriter (TdsCodec) → transport
//! ```
//!
//! ### Cancellation Safety
//!
//! The connection splits the transport into read and write halves. A
//! [`CancelHandle`] shares the write half, so an attention packet can be sent
//! from another task while a read is pending.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;

pub use connection::{BoxTransport, CancelHandle, Connection, Transport};
pub use error::CodecError;
pub use framed::{PacketReader, PacketWriter};
pub use message::{Message, MessageAssembler, packetize};
pub use packet_codec::{Packet, TdsCodec};
