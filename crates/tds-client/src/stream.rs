//! Response reading for one dispatched request.
//!
//! [`ResultStream`] owns the connection lease while a response is being
//! read, runs every token through the [`ResultMachine`] and decides what a
//! failure costs:
//!
//! - framing and I/O errors poison the connection;
//! - decode errors skip the rest of the message at packet level, and
//!   out-of-place tokens drain it token by token; either way the connection
//!   is released and the stream left unusable;
//! - an attention acknowledgement, or a command timeout, ends the response
//!   with [`Error::QueryCanceled`].
//!
//! The lease is released as soon as the final end token has been read.

use tokio::time::{Instant, timeout_at};

use crate::connection::Lease;
use crate::error::{Error, Result};
use crate::state::{ResultMachine, ResultState, Step};

pub(crate) struct ResultStream {
    lease: Option<Lease>,
    machine: ResultMachine,
    deadline: Option<Instant>,
    timed_out: bool,
    unusable: bool,
}

impl ResultStream {
    /// A stream with no response to read.
    pub(crate) fn idle() -> Self {
        Self {
            lease: None,
            machine: ResultMachine::finished(),
            deadline: None,
            timed_out: false,
            unusable: false,
        }
    }

    /// Start reading the response to a request just sent over `lease`.
    pub(crate) fn new(lease: Lease, deadline: Option<Instant>) -> Self {
        Self {
            lease: Some(lease),
            machine: ResultMachine::new(),
            deadline,
            timed_out: false,
            unusable: false,
        }
    }

    pub(crate) fn state(&self) -> ResultState {
        self.machine.state()
    }

    /// Whether the response is still being read.
    pub(crate) fn is_active(&self) -> bool {
        self.lease.is_some()
    }

    pub(crate) fn is_unusable(&self) -> bool {
        self.unusable
    }

    /// Raise a pending cancel before anything else is handed out.
    pub(crate) async fn checkpoint(&mut self) -> Result<()> {
        let Some(wire) = self.lease.as_mut() else {
            return Ok(());
        };
        if !wire.attention_sent() {
            return Ok(());
        }
        let drained = wire.drain_response().await;
        self.finish_canceled(drained)
    }

    /// Classify the next token. `None` once the response is complete.
    pub(crate) async fn next_step(&mut self) -> Result<Option<Step>> {
        if self.unusable {
            return Err(Error::Unusable);
        }
        self.checkpoint().await?;
        let Some(wire) = self.lease.as_mut() else {
            return Ok(None);
        };

        let token = match self.deadline {
            Some(deadline) => match timeout_at(deadline, wire.next_token()).await {
                Ok(token) => token,
                Err(_) => return Err(self.time_out().await),
            },
            None => wire.next_token().await,
        };

        let token = match token {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!("response ended without a final end token");
                self.machine = ResultMachine::finished();
                wire.finish_response();
                self.release();
                return Ok(None);
            }
            Err(e) => return Err(self.fail(e, true).await),
        };

        match self.machine.accept(token) {
            Ok(Step::Canceled) => {
                if let Some(wire) = self.lease.as_mut() {
                    wire.finish_response();
                }
                self.release();
                Err(Error::QueryCanceled {
                    timed_out: self.timed_out,
                })
            }
            Ok(step) => {
                if self.machine.is_finished() {
                    self.end().await?;
                }
                Ok(Some(step))
            }
            Err(e) => Err(self.fail(e, false).await),
        }
    }

    async fn end(&mut self) -> Result<()> {
        let Some(wire) = self.lease.as_mut() else {
            return Ok(());
        };
        let ended = wire.end_response().await;
        self.release();
        ended
    }

    async fn time_out(&mut self) -> Error {
        tracing::debug!("command timeout, cancelling");
        self.timed_out = true;
        let Some(wire) = self.lease.as_mut() else {
            return Error::QueryCanceled { timed_out: true };
        };
        if let Err(e) = wire.cancel_handle().cancel().await {
            self.release();
            return e.into();
        }
        let drained = wire.drain_response().await;
        match self.finish_canceled(drained) {
            Ok(()) => Error::QueryCanceled { timed_out: true },
            Err(e) => e,
        }
    }

    fn finish_canceled(&mut self, drained: Result<()>) -> Result<()> {
        self.machine = ResultMachine::finished();
        self.release();
        drained?;
        Err(Error::QueryCanceled {
            timed_out: self.timed_out,
        })
    }

    /// Abandon the response after an error.
    ///
    /// `undecodable` is set when the decoder itself failed; otherwise the
    /// token was well formed but out of place and the drain can go on
    /// token by token.
    async fn fail(&mut self, e: Error, undecodable: bool) -> Error {
        self.machine = ResultMachine::finished();
        if e.is_connection_fatal() {
            self.release();
            return e;
        }

        tracing::warn!(error = %e, "abandoning response");
        self.unusable = true;
        if let Some(wire) = self.lease.as_mut() {
            if let Err(drain_error) = wire.abandon(undecodable).await {
                tracing::warn!(error = %drain_error, "drain after protocol error failed");
            }
        }
        self.release();
        e
    }

    pub(crate) fn release(&mut self) {
        if self.lease.take().is_some() {
            tracing::trace!("connection released");
        }
    }
}

impl std::fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("state", &self.machine.state())
            .field("active", &self.is_active())
            .field("timed_out", &self.timed_out)
            .field("unusable", &self.unusable)
            .finish_non_exhaustive()
    }
}
