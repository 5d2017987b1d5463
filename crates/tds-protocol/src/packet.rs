//! Packet header layout.
//!
//! Every frame on the wire starts with the same eight bytes:
//!
//! ```text
//! +------+--------+-------------+-----------+-----------+--------+
//! | type | status | length (BE) | spid (BE) | packet id | window |
//! |  u8  |   u8   |     u16     |    u16    |    u8     |   u8   |
//! +------+--------+-------------+-----------+-----------+--------+
//! ```
//!
//! `length` counts the header itself plus the payload.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Largest packet size a server negotiates.
pub const MAX_PACKET_SIZE: usize = 32767;

/// Smallest packet size a server negotiates.
pub const MIN_PACKET_SIZE: usize = 512;

/// Packet size used until the server announces another one.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL batch request.
    SqlBatch = 0x01,
    /// Remote procedure call.
    Rpc = 0x03,
    /// Tabular response from the server.
    TabularResult = 0x04,
    /// Out-of-band attention (cancel) signal.
    Attention = 0x06,
}

impl PacketType {
    /// Create a packet type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::SqlBatch),
            0x03 => Ok(Self::Rpc),
            0x04 => Ok(Self::TabularResult),
            0x06 => Ok(Self::Attention),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

bitflags! {
    /// Packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// More packets of this message follow.
        const NORMAL = 0x00;
        /// Last packet of the message.
        const END_OF_MESSAGE = 0x01;
        /// Sender asks the receiver to ignore this message.
        const IGNORE_EVENT = 0x02;
    }
}

/// Packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of packet.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including header.
    pub length: u16,
    /// Server process id (channel).
    pub spid: u16,
    /// Sequence number, wraps at 255.
    pub packet_id: u8,
    /// Window, always 0.
    pub window: u8,
}

impl PacketHeader {
    /// Create a header with the given type, status and total length.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 1,
            window: 0,
        }
    }

    /// Decode a header from the front of `src`.
    ///
    /// The length field is checked against `max_size`: anything shorter
    /// than the header itself or longer than `max_size` is a framing error.
    pub fn decode(src: &mut impl Buf, max_size: usize) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::UnexpectedEof);
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status = PacketStatus::from_bits_retain(src.get_u8());
        let length = src.get_u16();
        let spid = src.get_u16();
        let packet_id = src.get_u8();
        let window = src.get_u8();

        let declared = usize::from(length);
        if declared < PACKET_HEADER_SIZE || declared > max_size {
            return Err(ProtocolError::InvalidPacketLength {
                length: declared,
                min: PACKET_HEADER_SIZE,
                max: max_size,
            });
        }

        Ok(Self {
            packet_type,
            status,
            length,
            spid,
            packet_id,
            window,
        })
    }

    /// Write the header to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Encode into a fresh buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Payload bytes that follow the header.
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        (self.length as usize).saturating_sub(PACKET_HEADER_SIZE)
    }

    /// Whether this is the last packet of its message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Set the sequence number.
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }
}
