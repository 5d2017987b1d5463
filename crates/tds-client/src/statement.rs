//! Statement execution and result navigation.
//!
//! A [`Statement`] sends one request at a time and walks its response:
//! results with [`Statement::advance_result`], rows of the current result
//! set with [`Statement::advance_row`], values of the current row with the
//! typed accessors. Column indexes are zero-based.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut stmt = conn.statement();
//! let mut is_rows = stmt.execute(Request::batch("SELECT 1; UPDATE t SET x = 1")).await?;
//! loop {
//!     if is_rows {
//!         while stmt.advance_row().await? {
//!             let id: Option<i32> = stmt.get(0)?;
//!         }
//!     } else if stmt.update_count() == -1 {
//!         break;
//!     }
//!     is_rows = stmt.advance_result().await?;
//! }
//! ```
//!
//! ## Connection sharing
//!
//! Statements created from the same [`Connection`] take turns: dispatching
//! waits until no other statement is reading a response. A statement
//! releases the connection once it has read its response to the end, on
//! [`Statement::skip_to_end`], on [`Statement::close`] or when dropped.

use std::time::Duration;

use bytes::Bytes;
use tds_protocol::{ColumnMetadata, ColumnValue, OutputParameter, Request, RpcRequest};
use tds_types::{FromSql, ToSql, TypeError, type_name};
use tokio::time::Instant;

use crate::cancel::CancelHandle;
use crate::connection::{Connection, Lease};
use crate::error::{Error, Result};
use crate::lob::{Blob, Clob};
use crate::output::{OutputCollector, OutputHandler};
use crate::row::Row;
use crate::row_cache::RowCache;
use crate::state::{ResultState, Step};
use crate::stream::ResultStream;
use crate::warnings::WarningChain;

/// What the statement is positioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Nothing dispatched, or the response has been read.
    Idle,
    /// Dispatched, before the first result.
    BeforeFirst,
    /// On a result set.
    ResultSet,
    /// On an update count.
    UpdateCount,
}

/// Executes requests on a connection and exposes their results.
pub struct Statement {
    conn: Connection,
    stream: ResultStream,
    cursor: Cursor,
    metadata: Option<ColumnMetadata>,
    cache: RowCache,
    /// Rows of the current result set taken off the wire.
    rows_read: usize,
    /// The end token of the current result set has been read.
    result_done: bool,
    update_count: Option<u64>,
    warnings: WarningChain,
    outputs: OutputCollector,
    handler: Option<Box<dyn OutputHandler>>,
    max_rows: usize,
    timeout: Option<Duration>,
    was_null: bool,
}

impl Statement {
    pub(crate) fn new(conn: Connection) -> Self {
        let config = conn.config();
        let cache = RowCache::new(config.fetch_size);
        let warnings = WarningChain::new(config.fatal_severity);
        let max_rows = config.max_rows;
        let timeout = config.command_timeout;
        Self {
            conn,
            stream: ResultStream::idle(),
            cursor: Cursor::Idle,
            metadata: None,
            cache,
            rows_read: 0,
            result_done: true,
            update_count: None,
            warnings,
            outputs: OutputCollector::default(),
            handler: None,
            max_rows,
            timeout,
            was_null: false,
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Send a request and position before its first result.
    ///
    /// Any unread part of the previous response is skipped first. Waits
    /// while another statement holds the connection.
    pub async fn dispatch(&mut self, request: impl Into<Request>) -> Result<()> {
        self.skip_to_end().await?;
        let lease = self.conn.lease().await;
        self.send(lease, request.into()).await
    }

    /// Like [`dispatch`](Self::dispatch), but fails with
    /// [`Error::ConnectionBusy`] instead of waiting for the connection.
    pub async fn try_dispatch(&mut self, request: impl Into<Request>) -> Result<()> {
        self.skip_to_end().await?;
        let lease = self.conn.try_lease()?;
        self.send(lease, request.into()).await
    }

    async fn send(&mut self, mut lease: Lease, request: Request) -> Result<()> {
        self.warnings.clear();
        self.outputs.clear();
        self.leave_result();
        self.cursor = Cursor::Idle;

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        lease.dispatch(&request).await?;
        tracing::debug!(packet_type = ?request.packet_type(), "request dispatched");
        self.stream = ResultStream::new(lease, deadline);
        self.cursor = Cursor::BeforeFirst;
        Ok(())
    }

    /// Send a request and move to its first result.
    ///
    /// Returns `true` if the first result is a result set.
    pub async fn execute(&mut self, request: impl Into<Request>) -> Result<bool> {
        self.dispatch(request).await?;
        self.advance_result().await
    }

    /// Run SQL text, through `sp_executesql` when there are parameters.
    ///
    /// Parameters are bound as `@p1`, `@p2`, ... in order.
    pub async fn execute_sql(&mut self, sql: &str, params: &[&dyn ToSql]) -> Result<bool> {
        let request = if params.is_empty() {
            Request::batch(sql)
        } else {
            let params = params
                .iter()
                .enumerate()
                .map(|(i, p)| p.to_param(format!("@p{}", i + 1)))
                .collect::<std::result::Result<Vec<_>, TypeError>>()?;
            Request::from(RpcRequest::execute_sql(sql, params))
        };
        self.execute(request).await
    }

    /// Send a request that must not produce rows.
    ///
    /// Returns the last update count reported, or 0 if there was none.
    ///
    /// # Errors
    ///
    /// [`Error::ResultSetProduced`] if any result is a result set. The rest
    /// of the response is skipped either way.
    pub async fn execute_update(&mut self, request: impl Into<Request>) -> Result<u64> {
        self.dispatch(request).await?;
        let mut last = 0;
        loop {
            match self.advance_result().await {
                Ok(true) => {
                    self.skip_to_end().await?;
                    return Err(Error::ResultSetProduced);
                }
                Ok(false) => match self.update_count {
                    Some(count) if self.cursor == Cursor::UpdateCount => last = count,
                    _ => return Ok(last),
                },
                Err(e) => {
                    if let Err(skip_error) = self.skip_to_end().await {
                        tracing::debug!(error = %skip_error, "skip after failed update");
                    }
                    return Err(e);
                }
            }
        }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Move to the next result: a result set or an update count.
    ///
    /// Returns `true` for a result set. `false` with
    /// [`update_count`](Self::update_count) of `-1` means the response is
    /// exhausted. Unread rows of the current result set are skipped.
    pub async fn advance_result(&mut self) -> Result<bool> {
        self.checkpoint().await?;
        if self.stream.is_unusable() {
            return Err(Error::Unusable);
        }
        if self.cursor == Cursor::ResultSet {
            self.discard_rows().await?;
        }
        self.leave_result();

        let is_result_set = loop {
            match self.next_step().await? {
                Some(Step::ResultSet(columns)) => {
                    self.enter_result_set(columns);
                    break true;
                }
                Some(Step::UpdateCount { count, last }) => {
                    tracing::trace!(count, last, "update count");
                    self.cursor = Cursor::UpdateCount;
                    self.update_count = Some(count);
                    break false;
                }
                Some(_) => {}
                None => {
                    self.cursor = Cursor::Idle;
                    break false;
                }
            }
        };

        match self.warnings.take_fatal() {
            Some(e) => Err(e),
            None => Ok(is_result_set),
        }
    }

    /// Move to the next row of the current result set.
    ///
    /// A fatal server error decoded while fetching is raised once the rows
    /// fetched before it have been handed out.
    pub async fn advance_row(&mut self) -> Result<bool> {
        self.checkpoint().await?;
        self.was_null = false;
        if self.cursor != Cursor::ResultSet {
            return Ok(false);
        }
        if self.cache.advance() {
            return Ok(true);
        }
        if let Some(e) = self.warnings.take_fatal() {
            return Err(e);
        }
        if self.result_done {
            return Ok(false);
        }

        self.fill().await?;
        if self.cache.advance() {
            return Ok(true);
        }
        match self.warnings.take_fatal() {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }

    /// Fetch every remaining row of the current result set into the cache.
    ///
    /// Returns the number of rows cached ahead of the current one.
    pub async fn load_remaining(&mut self) -> Result<usize> {
        self.checkpoint().await?;
        let Some(columns) = self.metadata.clone() else {
            return Ok(0);
        };
        self.cache.compact();
        while !self.result_done && !self.warnings.has_fatal() {
            if self.limit_reached() {
                self.discard_rows().await?;
                break;
            }
            match self.next_step().await? {
                Some(Step::Row(values)) => {
                    self.cache.push(Row::new(columns.clone(), values));
                    self.rows_read += 1;
                }
                Some(Step::ResultEnd { .. }) | None => self.result_done = true,
                Some(_) => {}
            }
        }
        tracing::debug!(rows = self.cache.buffered(), "loaded rest of result set");
        Ok(self.cache.buffered())
    }

    /// Read and discard the rest of the response, then release the
    /// connection. Messages still reach the warning chain.
    pub async fn skip_to_end(&mut self) -> Result<()> {
        let skipped = async {
            while self.stream.is_active() {
                self.next_step().await?;
            }
            Ok::<(), Error>(())
        }
        .await;
        self.leave_result();
        self.cursor = Cursor::Idle;
        match skipped {
            // the response is over either way
            Err(e) if e.is_canceled() || matches!(e, Error::Unusable) => Ok(()),
            other => other,
        }
    }

    /// Skip the rest of the response and drop the statement.
    pub async fn close(mut self) -> Result<()> {
        self.skip_to_end().await
    }

    async fn fill(&mut self) -> Result<()> {
        let Some(columns) = self.metadata.clone() else {
            return Ok(());
        };
        self.cache.begin_batch();
        let mut limit = self.cache.fetch_size();
        if self.max_rows > 0 {
            limit = limit.min(self.max_rows.saturating_sub(self.rows_read));
        }

        let mut fetched = 0;
        while fetched < limit && !self.warnings.has_fatal() {
            match self.next_step().await? {
                Some(Step::Row(values)) => {
                    self.cache.push(Row::new(columns.clone(), values));
                    self.rows_read += 1;
                    fetched += 1;
                }
                Some(Step::ResultEnd { row_count, last }) => {
                    tracing::trace!(?row_count, last, "end of result set");
                    self.result_done = true;
                    break;
                }
                None => {
                    self.result_done = true;
                    break;
                }
                Some(_) => {}
            }
        }
        tracing::trace!(fetched, "row batch fetched");

        if self.limit_reached() && !self.result_done {
            tracing::debug!(max_rows = self.max_rows, "row limit reached, discarding rest of result set");
            self.discard_rows().await?;
        }
        Ok(())
    }

    fn limit_reached(&self) -> bool {
        self.max_rows > 0 && self.rows_read >= self.max_rows
    }

    async fn discard_rows(&mut self) -> Result<()> {
        let mut discarded = 0usize;
        while !self.result_done {
            match self.next_step().await? {
                Some(Step::Row(_)) => discarded += 1,
                Some(Step::ResultEnd { .. }) | None => self.result_done = true,
                Some(_) => {}
            }
        }
        if discarded > 0 {
            tracing::debug!(discarded, "discarded unread rows");
        }
        Ok(())
    }

    /// Next navigation step; messages and procedure outputs are routed on
    /// the way.
    async fn next_step(&mut self) -> Result<Option<Step>> {
        loop {
            let step = self.stream.next_step().await;
            match self.settle(step)? {
                Some(Step::Message(msg)) => self.warnings.push(msg),
                Some(Step::ReturnStatus(status)) => self.output_handler().on_return_status(status),
                Some(Step::Output(param)) => self.output_handler().on_output_parameter(param),
                Some(Step::Ignored) => {}
                other => return Ok(other),
            }
        }
    }

    async fn checkpoint(&mut self) -> Result<()> {
        let checked = self.stream.checkpoint().await;
        self.settle(checked)
    }

    /// A canceled response leaves nothing to navigate, not even rows
    /// already cached.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(&result, Err(e) if e.is_canceled()) {
            self.leave_result();
            self.cursor = Cursor::Idle;
        }
        result
    }

    fn output_handler(&mut self) -> &mut dyn OutputHandler {
        match self.handler.as_deref_mut() {
            Some(handler) => handler,
            None => &mut self.outputs,
        }
    }

    fn enter_result_set(&mut self, columns: ColumnMetadata) {
        self.cursor = Cursor::ResultSet;
        self.metadata = Some(columns);
        self.cache.clear();
        self.rows_read = 0;
        self.result_done = false;
    }

    fn leave_result(&mut self) {
        self.metadata = None;
        self.cache.clear();
        self.update_count = None;
        self.result_done = true;
        self.was_null = false;
    }

    // ========================================================================
    // Current position
    // ========================================================================

    /// The current row.
    ///
    /// # Errors
    ///
    /// [`Error::NoCurrentRow`] before the first [`advance_row`](Self::advance_row)
    /// of a result set and after its last row.
    pub fn current_row(&self) -> Result<&Row> {
        self.cache.current().ok_or(Error::NoCurrentRow)
    }

    /// Column metadata of the current result set.
    #[must_use]
    pub fn current_metadata(&self) -> Option<&ColumnMetadata> {
        self.metadata.as_ref()
    }

    /// Update count of the current result, `-1` for result sets and once
    /// the response is exhausted.
    #[must_use]
    pub fn update_count(&self) -> i64 {
        match (self.cursor, self.update_count) {
            (Cursor::UpdateCount, Some(count)) => i64::try_from(count).unwrap_or(i64::MAX),
            _ => -1,
        }
    }

    /// Position of the response reader.
    #[must_use]
    pub fn state(&self) -> ResultState {
        self.stream.state()
    }

    /// Rows fetched but not handed out yet.
    #[must_use]
    pub fn buffered_rows(&self) -> usize {
        self.cache.buffered()
    }

    // ========================================================================
    // Values of the current row
    // ========================================================================

    fn column(&mut self, index: usize) -> Result<Option<&ColumnValue>> {
        let row = self.cache.current().ok_or(Error::NoCurrentRow)?;
        let value = row.value(index)?;
        self.was_null = value.is_null();
        Ok((!value.is_null()).then_some(value))
    }

    /// Raw value of a column, `None` for NULL.
    pub fn value(&mut self, index: usize) -> Result<Option<&ColumnValue>> {
        self.column(index)
    }

    /// Typed value of a column, `None` for NULL.
    pub fn get<T: FromSql>(&mut self, index: usize) -> Result<Option<T>> {
        match self.column(index)? {
            Some(value) => Ok(Some(T::from_sql(value)?)),
            None => Ok(None),
        }
    }

    /// Binary value of a column.
    pub fn bytes(&mut self, index: usize) -> Result<Option<Bytes>> {
        self.get(index)
    }

    /// Character value of a column.
    pub fn string(&mut self, index: usize) -> Result<Option<String>> {
        self.get(index)
    }

    /// Binary large object of a column.
    pub fn blob(&mut self, index: usize) -> Result<Option<Blob>> {
        match self.column(index)? {
            None => Ok(None),
            Some(ColumnValue::Lob(lob)) => Ok(Some(Blob::from_lob(lob.clone()))),
            Some(ColumnValue::Binary(bytes)) => Ok(Some(Blob::from_bytes(bytes.clone()))),
            Some(other) => Err(mismatch("binary", other)),
        }
    }

    /// Character large object of a column.
    pub fn clob(&mut self, index: usize) -> Result<Option<Clob>> {
        match self.column(index)? {
            None => Ok(None),
            Some(ColumnValue::Lob(lob)) => Clob::from_lob(lob.clone()).map(Some),
            Some(ColumnValue::String(text)) => Ok(Some(Clob::from_string(text))),
            Some(other) => Err(mismatch("text", other)),
        }
    }

    /// Whether the last value read was SQL NULL.
    #[must_use]
    pub fn was_null(&self) -> bool {
        self.was_null
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Rows fetched per batch. `0` keeps the current cache capacity.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFetchSize`] if a row limit is set and `rows`
    /// exceeds it.
    pub fn set_fetch_size(&mut self, rows: usize) -> Result<()> {
        if self.max_rows > 0 && rows > self.max_rows {
            return Err(Error::InvalidFetchSize {
                fetch_size: rows,
                max_rows: self.max_rows,
            });
        }
        self.cache.set_fetch_size(rows);
        Ok(())
    }

    /// Rows fetched per batch.
    #[must_use]
    pub fn fetch_size(&self) -> usize {
        self.cache.fetch_size()
    }

    /// Limit the rows delivered per result set, `0` for no limit.
    pub fn set_max_rows(&mut self, rows: usize) {
        self.max_rows = rows;
    }

    /// Row limit per result set.
    #[must_use]
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Timeout for the next request, `None` to wait forever.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    // ========================================================================
    // Warnings and outputs
    // ========================================================================

    /// Messages received during the current execution.
    #[must_use]
    pub fn warnings(&self) -> &WarningChain {
        &self.warnings
    }

    /// Forget the messages received so far.
    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    /// Return status of the last procedure call, when no handler is set.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.outputs.return_status
    }

    /// Output parameters of the last procedure call, when no handler is set.
    #[must_use]
    pub fn output_parameters(&self) -> &[OutputParameter] {
        &self.outputs.params
    }

    /// Route return status and output parameters to `handler`.
    pub fn set_output_handler(&mut self, handler: impl OutputHandler + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// Get a handle for cancelling this statement's request.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.conn.cancel_handle()
    }
}

fn mismatch(expected: &'static str, value: &ColumnValue) -> Error {
    Error::Type(TypeError::TypeMismatch {
        expected,
        actual: type_name(value),
    })
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("cursor", &self.cursor)
            .field("stream", &self.stream)
            .field("fetch_size", &self.cache.fetch_size())
            .field("cache_capacity", &self.cache.capacity())
            .field("max_rows", &self.max_rows)
            .field("warnings", &self.warnings.len())
            .finish_non_exhaustive()
    }
}
