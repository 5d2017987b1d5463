//! Connection exclusivity and the token pump.
//!
//! A physical connection carries one response at a time. [`Connection`] is
//! a cheap, cloneable handle; the wire behind it sits in an async mutex and
//! a statement that dispatches a request holds the guard (the lease) until
//! it has read the response to the end, drained it, or been closed.
//!
//! ```text
//! Statement ──lease──▶ Wire { tds_codec::Connection, TokenDecoder, buffer }
//!                              ▲
//! CancelHandle ──write half────┘
//! ```

use std::sync::Arc;

use bytes::BytesMut;
use encoding_rs::Encoding;
use tds_codec::{BoxTransport, Transport};
use tds_protocol::{Done, EnvChange, ProtocolError, Request, Token, TokenDecoder};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::cancel::CancelHandle;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::statement::Statement;

/// Exclusive access to the wire, held by the statement reading a response.
pub(crate) type Lease = OwnedMutexGuard<Wire>;

/// Reading side of one physical connection.
pub(crate) struct Wire {
    conn: tds_codec::Connection<BoxTransport>,
    decoder: TokenDecoder,
    buf: BytesMut,
    /// The last packet of the current response has been read.
    eom: bool,
    /// A framing or I/O error left the stream in an unknown position.
    poisoned: bool,
}

impl Wire {
    fn new(transport: BoxTransport, config: &Config, charset: &'static Encoding) -> Self {
        Self {
            conn: tds_codec::Connection::with_packet_size(transport, config.packet_size),
            decoder: TokenDecoder::with_charset(charset),
            buf: BytesMut::new(),
            eom: true,
            poisoned: false,
        }
    }

    /// Send a request, first draining whatever a dropped statement left behind.
    pub(crate) async fn dispatch(&mut self, request: &Request) -> Result<()> {
        if self.poisoned {
            return Err(Error::ConnectionClosed);
        }
        if self.conn.is_in_flight() {
            tracing::debug!("draining abandoned response");
            self.drain_response().await?;
        }

        self.decoder.reset();
        self.buf.clear();
        self.eom = false;
        let sent = self
            .conn
            .send_message(request.packet_type(), request.encode())
            .await;
        sent.map_err(|e| self.poison(e.into()))
    }

    /// Decode the next token of the current response.
    ///
    /// Returns `None` once the message ended on a token boundary. Cancel
    /// safe: the buffer only changes after a whole packet has arrived.
    pub(crate) async fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            if let Some(token) = self.decoder.decode(&mut self.buf).map_err(Error::from_decode)? {
                tracing::trace!(token = token_name(&token), "token");
                if let Token::EnvChange(change) = &token {
                    self.apply_env_change(change);
                }
                return Ok(Some(token));
            }

            if self.eom {
                if self.buf.is_empty() && !self.decoder.is_mid_token() {
                    return Ok(None);
                }
                return Err(Error::Protocol(ProtocolError::TruncatedMessage {
                    remaining: self.buf.len(),
                }));
            }

            let packet = match self.conn.read_packet().await {
                Ok(packet) => packet,
                Err(e) => return Err(self.poison(e.into())),
            };
            tracing::trace!(
                len = packet.payload.len(),
                eom = packet.is_end_of_message(),
                "packet"
            );
            self.eom = packet.is_end_of_message();
            self.buf.unsplit(packet.payload);
        }
    }

    fn apply_env_change(&mut self, change: &EnvChange) {
        match change {
            EnvChange::PacketSize { new } => self.conn.set_packet_size(*new),
            EnvChange::Charset { new } => match Encoding::for_label(new.as_bytes()) {
                Some(charset) => {
                    tracing::debug!(charset = charset.name(), "charset changed");
                    self.decoder.set_charset(charset);
                }
                None => tracing::debug!(charset = %new, "unknown charset, keeping current"),
            },
            EnvChange::Database { new, old } => {
                tracing::debug!(database = %new, previous = %old, "database changed");
            }
            other => tracing::trace!(change = ?other, "environment change"),
        }
    }

    /// Read the rest of the response token by token.
    ///
    /// With an attention outstanding this keeps reading, across messages if
    /// needed, until the server acknowledges it. Undecodable data falls
    /// back to a packet-level skip.
    pub(crate) async fn drain_response(&mut self) -> Result<()> {
        if self.conn.attention_sent() {
            tracing::debug!("draining response up to attention acknowledgement");
        }
        loop {
            match self.next_token().await {
                Ok(Some(Token::EndOfResults(done))) if done.was_canceled() => break,
                Ok(Some(_)) => {}
                // the acknowledgement follows in its own message
                Ok(None) if self.conn.attention_sent() => {
                    self.decoder.reset();
                    self.eom = false;
                }
                Ok(None) => break,
                Err(e) if e.is_connection_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable data while draining");
                    self.skip_undecodable().await?;
                    break;
                }
            }
        }
        self.conn.finish_response();
        Ok(())
    }

    /// Give up on the current response after an error.
    ///
    /// `undecodable` means the decoder lost its place, so the rest of the
    /// message is skipped at packet level.
    pub(crate) async fn abandon(&mut self, undecodable: bool) -> Result<()> {
        if !undecodable {
            return self.drain_response().await;
        }
        self.skip_undecodable().await?;
        self.conn.finish_response();
        Ok(())
    }

    /// Skip packets up to the end of the message.
    ///
    /// While an attention is outstanding, messages are skipped until one
    /// ends with the acknowledgement, which is always the last token of its
    /// message. Only the tail of the skipped data is kept to look for it.
    async fn skip_undecodable(&mut self) -> Result<()> {
        let mut tail = std::mem::take(&mut self.buf);
        self.decoder.reset();
        loop {
            if self.eom {
                if !self.conn.attention_sent() || Done::is_attention_ack(&tail) {
                    return Ok(());
                }
                tail.clear();
                self.eom = false;
            }
            let packet = match self.conn.read_packet().await {
                Ok(packet) => packet,
                Err(e) => return Err(self.poison(e.into())),
            };
            self.eom = packet.is_end_of_message();
            tail.unsplit(packet.payload);
            if tail.len() > Done::TOKEN_SIZE {
                let _ = tail.split_to(tail.len() - Done::TOKEN_SIZE);
            }
        }
    }

    /// Mark the response as complete once its final end token was read.
    pub(crate) async fn end_response(&mut self) -> Result<()> {
        if self.conn.attention_sent() {
            // the cancel raced with the end of the response
            return self.drain_response().await;
        }
        if !self.eom {
            tracing::warn!("data after final end token, discarding");
            self.skip_undecodable().await?;
        }
        self.conn.finish_response();
        Ok(())
    }

    pub(crate) fn finish_response(&self) {
        self.conn.finish_response();
    }

    pub(crate) fn attention_sent(&self) -> bool {
        self.conn.attention_sent()
    }

    pub(crate) fn cancel_handle(&self) -> tds_codec::CancelHandle<BoxTransport> {
        self.conn.cancel_handle()
    }

    pub(crate) fn packet_size(&self) -> usize {
        self.conn.packet_size()
    }

    fn poison(&mut self, e: Error) -> Error {
        tracing::warn!(error = %e, "connection poisoned");
        self.poisoned = true;
        e
    }
}

fn token_name(token: &Token) -> &'static str {
    match token {
        Token::ColumnMetadata(_) => "COLMETADATA",
        Token::Row(_) => "ROW",
        Token::Message(_) => "MESSAGE",
        Token::ReturnStatus(_) => "RETURNSTATUS",
        Token::OutputParameter(_) => "RETURNVALUE",
        Token::EndOfResults(_) => "DONE",
        Token::EnvChange(_) => "ENVCHANGE",
        Token::Order(_) => "ORDER",
        Token::Unknown { .. } => "UNKNOWN",
    }
}

/// Handle to one physical, already authenticated connection.
///
/// Cloning the handle does not open a new connection; every clone and every
/// [`Statement`] created from it share the same wire and take turns on it.
#[derive(Clone)]
pub struct Connection {
    wire: Arc<Mutex<Wire>>,
    cancel: CancelHandle,
    config: Arc<Config>,
}

impl Connection {
    /// Wrap an authenticated transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration does not validate.
    pub fn new(transport: impl Transport, config: Config) -> Result<Self> {
        config.validate()?;
        let charset = config.encoding()?;
        let wire = Wire::new(Box::new(transport), &config, charset);
        let cancel = CancelHandle::new(wire.cancel_handle());
        tracing::debug!(packet_size = config.packet_size, charset = charset.name(), "connection ready");
        Ok(Self {
            wire: Arc::new(Mutex::new(wire)),
            cancel,
            config: Arc::new(config),
        })
    }

    /// Create a statement on this connection.
    #[must_use]
    pub fn statement(&self) -> Statement {
        Statement::new(self.clone())
    }

    /// Get a handle for cancelling the request in flight.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Configuration the connection was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether a statement currently holds the connection.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.wire.try_lock().is_err()
    }

    /// Negotiated packet size, or `None` while a statement holds the wire.
    #[must_use]
    pub fn packet_size(&self) -> Option<usize> {
        self.wire.try_lock().ok().map(|wire| wire.packet_size())
    }

    /// Wait for the connection to become free.
    pub(crate) async fn lease(&self) -> Lease {
        Arc::clone(&self.wire).lock_owned().await
    }

    /// Take the connection if no statement holds it.
    pub(crate) fn try_lease(&self) -> Result<Lease> {
        Arc::clone(&self.wire)
            .try_lock_owned()
            .map_err(|_| Error::ConnectionBusy)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("busy", &self.is_busy())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
