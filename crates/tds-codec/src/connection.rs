//! Split I/O connection for cancellation safety.
//!
//! The transport is split into read and write halves so an attention packet
//! can be sent while another task is blocked reading a response.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tds_protocol::packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PacketType,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::error::CodecError;
use crate::framed::{PacketReader, PacketWriter};
use crate::message::packetize;
use crate::packet_codec::{Packet, TdsCodec};

/// Any byte stream a connection can run over.
///
/// The stream must already be logged in; this crate never sends login or
/// TLS handshake packets.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed transport, for callers that do not want to be generic.
pub type BoxTransport = Box<dyn Transport>;

#[derive(Debug, Default)]
struct Signals {
    /// A request was sent and its final end token has not been read yet.
    in_flight: AtomicBool,
    /// An attention packet was sent for the in-flight request.
    attention_sent: AtomicBool,
}

/// A TDS connection with split I/O for cancellation safety.
///
/// # Cancellation
///
/// The server is cancelled out of band with an attention packet. Its
/// acknowledgement is an end token with the attention bit set; recognizing
/// it is left to the token layer, which then calls
/// [`Connection::finish_response`].
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: PacketReader<ReadHalf<T>>,
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    signals: Arc<Signals>,
    packet_size: usize,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a new connection using the default packet size.
    pub fn new(transport: T) -> Self {
        Self::with_packet_size(transport, DEFAULT_PACKET_SIZE)
    }

    /// Create a new connection with a negotiated packet size.
    ///
    /// The size is clamped to the range servers can negotiate.
    pub fn with_packet_size(transport: T, packet_size: usize) -> Self {
        let packet_size = packet_size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
        let (read_half, write_half) = tokio::io::split(transport);
        let read_codec = TdsCodec::new().with_max_packet_size(packet_size);

        Self {
            reader: PacketReader::with_codec(read_half, read_codec),
            writer: Arc::new(Mutex::new(PacketWriter::new(write_half))),
            signals: Arc::new(Signals::default()),
            packet_size,
        }
    }

    /// Negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Apply a packet size announced by the server.
    pub fn set_packet_size(&mut self, packet_size: usize) {
        let packet_size = packet_size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
        tracing::debug!(packet_size, "packet size changed");
        self.packet_size = packet_size;
        *self.reader.codec_mut() = TdsCodec::new().with_max_packet_size(packet_size);
    }

    /// Get a handle for cancelling requests on this connection.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle<T> {
        CancelHandle {
            writer: Arc::clone(&self.writer),
            signals: Arc::clone(&self.signals),
        }
    }

    /// Whether a response is still outstanding.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.signals.in_flight.load(Ordering::Acquire)
    }

    /// Whether an attention packet was sent for the outstanding response.
    #[must_use]
    pub fn attention_sent(&self) -> bool {
        self.signals.attention_sent.load(Ordering::Acquire)
    }

    /// Mark the outstanding response as fully read.
    pub fn finish_response(&self) {
        self.signals.in_flight.store(false, Ordering::Release);
        self.signals.attention_sent.store(false, Ordering::Release);
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Send a complete message, split into packets of the negotiated size.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
    ) -> Result<(), CodecError> {
        let packets = packetize(packet_type, &payload, self.packet_size);
        tracing::debug!(
            packet_type = ?packet_type,
            payload_len = payload.len(),
            packets = packets.len(),
            "sending message"
        );

        let mut writer = self.writer.lock().await;
        writer.codec_mut().reset_packet_id();
        self.signals.attention_sent.store(false, Ordering::Release);
        self.signals.in_flight.store(true, Ordering::Release);

        for packet in packets {
            writer.feed(packet).await?;
        }
        writer.flush().await
    }

    /// Read the next response packet.
    ///
    /// This future is cancel safe: dropping it keeps any partially received
    /// packet buffered for the next call.
    pub async fn read_packet(&mut self) -> Result<Packet, CodecError> {
        match self.reader.next().await {
            Some(Ok(packet)) if packet.header.packet_type == PacketType::TabularResult => {
                Ok(packet)
            }
            Some(Ok(packet)) => Err(CodecError::UnexpectedPacketType(packet.header.packet_type)),
            Some(Err(e)) => Err(e),
            None => Err(CodecError::ConnectionClosed),
        }
    }
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("packet_size", &self.packet_size)
            .field("in_flight", &self.is_in_flight())
            .field("attention_sent", &self.attention_sent())
            .finish_non_exhaustive()
    }
}

/// Handle for cancelling requests on a connection.
///
/// This can be cloned and sent to other tasks to enable cancellation
/// from a different async context.
pub struct CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    signals: Arc<Signals>,
}

impl<T> CancelHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Send an attention packet for the outstanding request.
    ///
    /// Returns `false` without writing anything when no response is
    /// outstanding or an attention was already sent for it.
    pub async fn cancel(&self) -> Result<bool, CodecError> {
        if !self.signals.in_flight.load(Ordering::Acquire) {
            return Ok(false);
        }
        if self.signals.attention_sent.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }

        tracing::debug!("sending attention packet");
        let mut writer = self.writer.lock().await;
        for packet in packetize(PacketType::Attention, &[], MIN_PACKET_SIZE) {
            writer.feed(packet).await?;
        }
        writer.flush().await?;
        Ok(true)
    }

    /// Whether an attention packet is awaiting acknowledgement.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.signals.attention_sent.load(Ordering::Acquire)
    }
}

impl<T> Clone for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            signals: Arc::clone(&self.signals),
        }
    }
}

impl<T> std::fmt::Debug for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelling", &self.signals.attention_sent.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
