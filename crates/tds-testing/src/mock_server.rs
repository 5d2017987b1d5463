//! Scripted TDS server for client tests.
//!
//! The server runs over an in-memory duplex stream and is driven step by
//! step from the test: receive a request, answer with a token stream, hold
//! back the end of a message, or wait for an attention packet. No login is
//! performed; the client side of the pair behaves like an authenticated
//! session.
//!
//! ## Example
//!
//! ```rust,ignore
//! let (transport, mut server) = MockTdsServer::pair();
//! tokio::spawn(async move {
//!     let request = server.recv().await?;
//!     assert_eq!(request.sql()?, "SELECT 1");
//!     server.send(TokenStream::new().done_count(0).build()).await
//! });
//! // Hand `transport` to the client...
//! ```

use bytes::{Buf, Bytes};
use futures_util::{SinkExt, StreamExt};
use tds_codec::{CodecError, Message, MessageAssembler, PacketReader, PacketWriter, packetize};
use tds_protocol::codec::{decode_utf16, read_b_varchar};
use tds_protocol::{DEFAULT_PACKET_SIZE, PacketStatus, PacketType};
use thiserror::Error;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

use crate::tokens::attention_ack;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// Framing error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The client sent something the server could not parse.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The client closed the connection.
    #[error("client disconnected")]
    Disconnected,
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// A request received by the server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// The reassembled message.
    pub message: Message,
}

impl RecordedRequest {
    /// Packet type of the request.
    pub fn packet_type(&self) -> PacketType {
        self.message.packet_type
    }

    /// Whether this is an attention signal.
    pub fn is_attention(&self) -> bool {
        self.message.packet_type == PacketType::Attention
    }

    fn body(&self) -> Result<Bytes> {
        let mut payload = self.message.payload.clone();
        if payload.remaining() < 4 {
            return Err(MockServerError::Protocol("missing ALL_HEADERS".into()));
        }
        let total = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        if payload.remaining() < total {
            return Err(MockServerError::Protocol("short ALL_HEADERS".into()));
        }
        payload.advance(total);
        Ok(payload)
    }

    /// SQL text of a batch, or the statement of an `sp_executesql` call.
    pub fn sql(&self) -> Result<String> {
        let mut body = self.body()?;
        match self.message.packet_type {
            PacketType::SqlBatch => decode_utf16(&body).map_err(protocol),
            PacketType::Rpc => {
                // proc id form, option flags, then the statement parameter
                if body.remaining() < 6 || body.get_u16_le() != 0xFFFF {
                    return Err(MockServerError::Protocol("not an sp_executesql call".into()));
                }
                body.advance(4);
                read_string_param(&mut body)
            }
            other => Err(MockServerError::Protocol(format!(
                "no SQL text in {other:?}"
            ))),
        }
    }

    /// Name of a stored procedure called by name.
    pub fn procedure_name(&self) -> Result<Option<String>> {
        let mut body = self.body()?;
        if self.message.packet_type != PacketType::Rpc || body.remaining() < 2 {
            return Err(MockServerError::Protocol("not an RPC".into()));
        }
        let len = usize::from(body.get_u16_le());
        if len == 0xFFFF {
            return Ok(None);
        }
        if body.remaining() < len * 2 {
            return Err(MockServerError::Protocol("short procedure name".into()));
        }
        decode_utf16(&body.split_to(len * 2)).map(Some).map_err(protocol)
    }
}

fn protocol(e: impl std::fmt::Display) -> MockServerError {
    MockServerError::Protocol(e.to_string())
}

/// Read an NVARCHAR parameter (name, status, type info, value).
fn read_string_param(body: &mut Bytes) -> Result<String> {
    read_b_varchar(body).map_err(protocol)?;
    // status, type, max length, collation
    if body.remaining() < 1 + 1 + 2 + 5 {
        return Err(MockServerError::Protocol("short parameter".into()));
    }
    body.advance(2);
    let max_length = body.get_u16_le();
    body.advance(5);

    let mut data = Vec::new();
    if max_length == 0xFFFF {
        if body.remaining() < 8 {
            return Err(MockServerError::Protocol("short PLP parameter".into()));
        }
        body.advance(8);
        loop {
            if body.remaining() < 4 {
                return Err(MockServerError::Protocol("short PLP chunk".into()));
            }
            let len = body.get_u32_le() as usize;
            if len == 0 {
                break;
            }
            if body.remaining() < len {
                return Err(MockServerError::Protocol("short PLP chunk".into()));
            }
            data.extend_from_slice(&body.split_to(len));
        }
    } else {
        if body.remaining() < 2 {
            return Err(MockServerError::Protocol("short parameter".into()));
        }
        let len = usize::from(body.get_u16_le());
        if body.remaining() < len {
            return Err(MockServerError::Protocol("short parameter".into()));
        }
        data.extend_from_slice(&body.split_to(len));
    }
    decode_utf16(&data).map_err(protocol)
}

/// Scripted TDS server over an in-memory stream.
pub struct MockTdsServer {
    reader: PacketReader<ReadHalf<DuplexStream>>,
    writer: PacketWriter<WriteHalf<DuplexStream>>,
    assembler: MessageAssembler,
    packet_size: usize,
}

impl MockTdsServer {
    /// Create a connected (client transport, server) pair.
    pub fn pair() -> (DuplexStream, Self) {
        Self::pair_with_packet_size(DEFAULT_PACKET_SIZE)
    }

    /// Create a pair whose responses use `packet_size` byte packets.
    pub fn pair_with_packet_size(packet_size: usize) -> (DuplexStream, Self) {
        let (client, server) = tokio::io::duplex(DUPLEX_CAPACITY);
        let (read_half, write_half) = tokio::io::split(server);
        let server = Self {
            reader: PacketReader::new(read_half),
            writer: PacketWriter::new(write_half),
            assembler: MessageAssembler::new(),
            packet_size,
        };
        (client, server)
    }

    /// Packet size used for responses.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Change the packet size used for subsequent responses.
    pub fn set_packet_size(&mut self, packet_size: usize) {
        self.packet_size = packet_size;
    }

    /// Wait for the next complete request.
    pub async fn recv(&mut self) -> Result<RecordedRequest> {
        loop {
            let packet = match self.reader.next().await {
                Some(packet) => packet?,
                None => return Err(MockServerError::Disconnected),
            };
            if let Some(message) = self.assembler.push(packet) {
                tracing::debug!(
                    packet_type = ?message.packet_type,
                    len = message.len(),
                    "mock server received request"
                );
                return Ok(RecordedRequest { message });
            }
        }
    }

    /// Send a complete response.
    pub async fn send(&mut self, tokens: Bytes) -> Result<()> {
        self.send_part(&tokens, true).await
    }

    /// Send part of a response.
    ///
    /// With `end_of_message` false the last packet is sent without the
    /// end-of-message bit, so the client keeps waiting for more.
    pub async fn send_part(&mut self, tokens: &[u8], end_of_message: bool) -> Result<()> {
        let mut packets = packetize(PacketType::TabularResult, tokens, self.packet_size);
        if !end_of_message {
            if let Some(last) = packets.last_mut() {
                last.header.status = PacketStatus::NORMAL;
            }
        }
        for packet in packets {
            self.writer.feed(packet).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive a request and answer it.
    pub async fn respond(&mut self, tokens: Bytes) -> Result<RecordedRequest> {
        let request = self.recv().await?;
        self.send(tokens).await?;
        Ok(request)
    }

    /// Wait for an attention packet and acknowledge it.
    ///
    /// `pending` is sent first, unterminated by an end-of-message bit, to
    /// model tokens the server already had in flight.
    pub async fn acknowledge_attention(&mut self, pending: &[u8]) -> Result<()> {
        let request = self.recv().await?;
        if !request.is_attention() {
            return Err(MockServerError::Protocol(format!(
                "expected attention, got {:?}",
                request.packet_type()
            )));
        }
        if !pending.is_empty() {
            self.send_part(pending, false).await?;
        }
        self.send(attention_ack()).await
    }
}

impl std::fmt::Debug for MockTdsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTdsServer")
            .field("packet_size", &self.packet_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_codec::Connection;
    use tds_protocol::{Request, RpcParam, RpcRequest};

    #[tokio::test]
    async fn test_records_batch_text() {
        let (transport, mut server) = MockTdsServer::pair();
        let mut conn = Connection::new(transport);
        let request = Request::batch("SELECT 1");
        conn.send_message(request.packet_type(), request.encode())
            .await
            .unwrap();

        let recorded = server.recv().await.unwrap();
        assert_eq!(recorded.packet_type(), PacketType::SqlBatch);
        assert_eq!(recorded.sql().unwrap(), "SELECT 1");
    }

    #[tokio::test]
    async fn test_records_rpc_statement_and_procedure() {
        let (transport, mut server) = MockTdsServer::pair();
        let mut conn = Connection::new(transport);

        let params = vec![RpcParam::input("", tds_protocol::ParamValue::Int(1))];
        let request = Request::from(RpcRequest::execute_sql("SELECT @p1", params));
        conn.send_message(request.packet_type(), request.encode())
            .await
            .unwrap();
        let recorded = server.recv().await.unwrap();
        assert_eq!(recorded.sql().unwrap(), "SELECT @p1");
        assert_eq!(recorded.procedure_name().unwrap(), None);

        let request = Request::from(RpcRequest::procedure("dbo.do_work"));
        conn.send_message(request.packet_type(), request.encode())
            .await
            .unwrap();
        let recorded = server.recv().await.unwrap();
        assert_eq!(
            recorded.procedure_name().unwrap().as_deref(),
            Some("dbo.do_work")
        );
    }

    #[tokio::test]
    async fn test_partial_response_keeps_client_waiting() {
        let (transport, mut server) = MockTdsServer::pair();
        let mut conn = Connection::new(transport);
        server.send_part(&[0xFD], false).await.unwrap();
        let packet = conn.read_packet().await.unwrap();
        assert!(!packet.is_end_of_message());
    }
}
