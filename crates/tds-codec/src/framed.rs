//! Packet halves for async I/O.
//!
//! - `PacketReader<T>` - read-only stream for receiving packets
//! - `PacketWriter<T>` - write-only sink for sending packets
//!
//! Both sit on one half of a split transport so an attention packet can be
//! written while a read is pending.
//!
//! The reader never pulls bytes past the end of the frame it is assembling:
//! it asks the transport for the eight header bytes, then for exactly the
//! declared payload. Partial progress lives in the reader, so dropping a
//! pending `next()` (for example on a timeout) loses no bytes.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::BytesMut;
use futures_core::Stream;
use futures_util::Sink;
use pin_project_lite::pin_project;
use tds_protocol::packet::{PACKET_HEADER_SIZE, PacketHeader};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::codec::{Decoder, FramedWrite};

use crate::error::CodecError;
use crate::packet_codec::{Packet, TdsCodec};

pin_project! {
    /// A read-only packet stream for receiving TDS packets.
    pub struct PacketReader<T> {
        #[pin]
        inner: T,
        codec: TdsCodec,
        frame: BytesMut,
    }
}

impl<T> PacketReader<T>
where
    T: AsyncRead,
{
    /// Create a new packet reader over the given transport.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, TdsCodec::new())
    }

    /// Create a new packet reader with a custom codec.
    pub fn with_codec(transport: T, codec: TdsCodec) -> Self {
        Self {
            inner: transport,
            codec,
            frame: BytesMut::with_capacity(PACKET_HEADER_SIZE),
        }
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &TdsCodec {
        &self.codec
    }

    /// Get a mutable reference to the codec.
    pub fn codec_mut(&mut self) -> &mut TdsCodec {
        &mut self.codec
    }

    /// Bytes of the frame currently being assembled.
    pub fn partial_len(&self) -> usize {
        self.frame.len()
    }
}

impl<T> Stream for PacketReader<T>
where
    T: AsyncRead,
{
    type Item = Result<Packet, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            let want = if this.frame.len() < PACKET_HEADER_SIZE {
                PACKET_HEADER_SIZE
            } else {
                let header = PacketHeader::decode(
                    &mut &this.frame[..PACKET_HEADER_SIZE],
                    this.codec.max_packet_size(),
                )?;
                usize::from(header.length)
            };

            if this.frame.len() >= want {
                if let Some(packet) = this.codec.decode(this.frame)? {
                    return Poll::Ready(Some(Ok(packet)));
                }
            }

            let start = this.frame.len();
            this.frame.resize(want, 0);
            let mut read_buf = ReadBuf::new(&mut this.frame[start..]);
            let polled = this.inner.as_mut().poll_read(cx, &mut read_buf);
            let filled = read_buf.filled().len();
            this.frame.truncate(start + filled);

            if let Err(e) = ready!(polled) {
                return Poll::Ready(Some(Err(e.into())));
            }
            if filled == 0 {
                if this.frame.is_empty() {
                    return Poll::Ready(None);
                }
                this.frame.clear();
                return Poll::Ready(Some(Err(CodecError::ConnectionClosed)));
            }
        }
    }
}

impl<T> std::fmt::Debug for PacketReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketReader")
            .field("partial_len", &self.frame.len())
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// A write-only packet sink for sending TDS packets.
    pub struct PacketWriter<T> {
        #[pin]
        inner: FramedWrite<T, TdsCodec>,
    }
}

impl<T> PacketWriter<T>
where
    T: AsyncWrite,
{
    /// Create a new packet writer over the given transport.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, TdsCodec::new())
    }

    /// Create a new packet writer with a custom codec.
    pub fn with_codec(transport: T, codec: TdsCodec) -> Self {
        Self {
            inner: FramedWrite::new(transport, codec),
        }
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &TdsCodec {
        self.inner.encoder()
    }

    /// Get a mutable reference to the codec.
    pub fn codec_mut(&mut self) -> &mut TdsCodec {
        self.inner.encoder_mut()
    }
}

impl<T> Sink<Packet> for PacketWriter<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Packet) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for PacketWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketWriter")
            .field("max_packet_size", &self.inner.encoder().max_packet_size())
            .finish_non_exhaustive()
    }
}
