//! Row cache.
//!
//! Rows are fetched from the token stream in batches of `fetch_size` and
//! handed out one at a time. A new batch replaces the consumed one; the
//! bulk mode used by [`RowCache::compact`] keeps the current row, drops the
//! ones before it and lets the cache grow until the result set ends.

use crate::row::Row;

/// Buffer of decoded rows for the current result set.
#[derive(Debug)]
pub(crate) struct RowCache {
    rows: Vec<Row>,
    /// Index of the next row to hand out.
    next: usize,
    current: Option<usize>,
    capacity: usize,
    fetch_size: usize,
}

impl RowCache {
    pub(crate) fn new(fetch_size: usize) -> Self {
        let capacity = fetch_size.max(1);
        Self {
            rows: Vec::with_capacity(capacity),
            next: 0,
            current: None,
            capacity,
            fetch_size: capacity,
        }
    }

    /// Move to the next cached row.
    pub(crate) fn advance(&mut self) -> bool {
        if self.next < self.rows.len() {
            self.current = Some(self.next);
            self.next += 1;
            true
        } else {
            self.current = None;
            false
        }
    }

    pub(crate) fn current(&self) -> Option<&Row> {
        self.current.and_then(|i| self.rows.get(i))
    }

    /// Rows cached but not handed out yet.
    pub(crate) fn buffered(&self) -> usize {
        self.rows.len() - self.next
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn fetch_size(&self) -> usize {
        self.fetch_size
    }

    /// Change the batch size. `0` means the current capacity; a larger size
    /// grows the cache and keeps the rows already in it.
    pub(crate) fn set_fetch_size(&mut self, fetch_size: usize) {
        let fetch_size = if fetch_size == 0 {
            self.capacity
        } else {
            fetch_size
        };
        if fetch_size > self.capacity {
            tracing::debug!(from = self.capacity, to = fetch_size, "growing row cache");
            self.rows.reserve(fetch_size - self.rows.len());
            self.capacity = fetch_size;
        }
        self.fetch_size = fetch_size;
    }

    /// Start a new batch, dropping every row handed out so far.
    pub(crate) fn begin_batch(&mut self) {
        self.rows.drain(..self.next);
        self.next = 0;
        self.current = None;
    }

    pub(crate) fn push(&mut self, row: Row) {
        if self.rows.len() == self.capacity {
            self.capacity *= 2;
            tracing::debug!(capacity = self.capacity, "row cache capacity doubled");
            self.rows.reserve(self.capacity - self.rows.len());
        }
        self.rows.push(row);
    }

    /// Drop rows before the current one ahead of a bulk load.
    pub(crate) fn compact(&mut self) {
        let keep_from = self.current.unwrap_or(self.next);
        if keep_from == 0 {
            return;
        }
        tracing::debug!(dropped = keep_from, kept = self.rows.len() - keep_from, "compacting row cache");
        self.rows.drain(..keep_from);
        self.next -= keep_from;
        self.current = self.current.map(|i| i - keep_from);
    }

    /// Forget every row, keeping the configured sizes.
    pub(crate) fn clear(&mut self) {
        self.rows.clear();
        self.next = 0;
        self.current = None;
    }
}
