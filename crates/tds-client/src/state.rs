//! Result stream state machine.
//!
//! Classifies each decoded token against the position in the response and
//! tells the caller what it means for navigation. The machine does no I/O
//! and never looks past the token it is given.
//!
//! ## State Transitions
//!
//! ```text
//! AwaitingResult ──COLMETADATA──▶ InResultSet ──ROW──▶ InResultSet
//! InResultSet ──DONE(more)──▶ EndOfResult ──COLMETADATA──▶ InResultSet
//! AwaitingResult / EndOfResult ──DONE(count)──▶ EndOfResult
//! any ──final DONE──▶ EndOfBatch
//! ```
//!
//! Messages, return status and output parameters leave the state unchanged.

use tds_protocol::{
    ColumnMetadata, ColumnValue, Done, DoneKind, OutputParameter, ServerMessage, Token, TokenType,
};

use crate::error::{Error, Result};

/// Position in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultState {
    /// Waiting for the first token of a result.
    AwaitingResult,
    /// Rows of a result set are arriving.
    InResultSet,
    /// A result ended and more follow.
    EndOfResult {
        /// Row count reported by the end token, if any.
        row_count: Option<u64>,
    },
    /// The response is complete.
    EndOfBatch,
}

/// Meaning of one token.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    /// A result set starts.
    ResultSet(ColumnMetadata),
    /// A row of the current result set.
    Row(Vec<ColumnValue>),
    /// Error or informational message.
    Message(ServerMessage),
    /// Stored procedure return status.
    ReturnStatus(i32),
    /// Stored procedure output parameter.
    Output(OutputParameter),
    /// The current result set ended.
    ResultEnd {
        /// Rows the server reported for it.
        row_count: Option<u64>,
        /// Nothing follows.
        last: bool,
    },
    /// A statement without a result set reported an update count.
    UpdateCount {
        /// Rows affected.
        count: u64,
        /// Nothing follows.
        last: bool,
    },
    /// The response ended without a count.
    BatchEnd,
    /// The server acknowledged an attention signal.
    Canceled,
    /// Nothing the navigation layer cares about.
    Ignored,
}

/// Token classifier for one response.
#[derive(Debug)]
pub(crate) struct ResultMachine {
    state: ResultState,
}

impl ResultMachine {
    /// A machine waiting for the first result of a fresh response.
    pub(crate) fn new() -> Self {
        Self {
            state: ResultState::AwaitingResult,
        }
    }

    /// A machine with nothing left to read.
    pub(crate) fn finished() -> Self {
        Self {
            state: ResultState::EndOfBatch,
        }
    }

    pub(crate) fn state(&self) -> ResultState {
        self.state
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state == ResultState::EndOfBatch
    }

    /// Classify the next token in arrival order.
    pub(crate) fn accept(&mut self, token: Token) -> Result<Step> {
        let step = match token {
            Token::ColumnMetadata(columns) => match self.state {
                ResultState::AwaitingResult | ResultState::EndOfResult { .. } => {
                    tracing::debug!(columns = columns.len(), "result set started");
                    self.state = ResultState::InResultSet;
                    Step::ResultSet(columns)
                }
                _ => return Err(self.confusion(TokenType::ColMetaData as u8)),
            },
            Token::Row(values) => match self.state {
                ResultState::InResultSet => Step::Row(values),
                _ => return Err(self.confusion(TokenType::Row as u8)),
            },
            Token::EndOfResults(done) => self.end(done)?,
            Token::Message(msg) => Step::Message(msg),
            Token::ReturnStatus(status) => Step::ReturnStatus(status),
            Token::OutputParameter(param) => Step::Output(param),
            Token::EnvChange(_) | Token::Order(_) => Step::Ignored,
            Token::Unknown { tag, .. } => {
                tracing::debug!(tag, "skipping unknown token");
                Step::Ignored
            }
        };
        Ok(step)
    }

    fn end(&mut self, done: Done) -> Result<Step> {
        if self.state == ResultState::EndOfBatch {
            return Err(self.confusion(done_tag(done.kind)));
        }
        if done.was_canceled() {
            tracing::debug!("attention acknowledged");
            self.state = ResultState::EndOfBatch;
            return Ok(Step::Canceled);
        }

        // DONEINPROC is always followed by the procedure's own end token
        let last = !done.has_more() && done.kind != DoneKind::InProc;
        let row_count = done.update_count();
        let next = if last {
            ResultState::EndOfBatch
        } else {
            ResultState::EndOfResult { row_count }
        };

        let step = match (self.state, row_count) {
            (ResultState::InResultSet, _) => Step::ResultEnd { row_count, last },
            (_, Some(count)) => Step::UpdateCount { count, last },
            (_, None) if last => Step::BatchEnd,
            (_, None) => Step::Ignored,
        };
        tracing::debug!(from = ?self.state, to = ?next, "end of result");
        self.state = next;
        Ok(step)
    }

    fn confusion(&self, tag: u8) -> Error {
        tracing::warn!(tag, state = ?self.state, "token out of place");
        Error::ProtocolConfusion { tag }
    }
}

fn done_tag(kind: DoneKind) -> u8 {
    match kind {
        DoneKind::Done => TokenType::Done as u8,
        DoneKind::Proc => TokenType::DoneProc as u8,
        DoneKind::InProc => TokenType::DoneInProc as u8,
    }
}
