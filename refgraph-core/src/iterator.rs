//! Lazy, cursor-driven iteration over store rows.
//!
//! Each batch is read in its own short read-only transaction; nothing is held
//! open between batches. Concurrent writers are therefore visible (or not)
//! batch by batch, never blocked.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::store::{Database, Tx, TxMode};
use std::collections::VecDeque;
use tracing::debug;

/// Where the next batch starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Keys greater than or equal to this one.
    From(String),
    /// Keys strictly greater than this one.
    After(String),
}

impl Cursor {
    pub(crate) fn key(&self) -> &str {
        match self {
            Cursor::From(key) | Cursor::After(key) => key,
        }
    }

    /// SQL comparison operator for this cursor's bound.
    pub(crate) fn operator(&self) -> &'static str {
        match self {
            Cursor::From(_) => ">=",
            Cursor::After(_) => ">",
        }
    }
}

/// One fetched batch and the cursor for the batch after it.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<Cursor>,
}

impl<T> Page<T> {
    /// Page for an ascending key scan: a short batch means the range is done,
    /// otherwise resume after the last key.
    pub fn ascending(items: Vec<T>, limit: usize, key: impl Fn(&T) -> String) -> Self {
        let next = if items.len() < limit {
            None
        } else {
            items.last().map(|last| Cursor::After(key(last)))
        };
        Self { items, next }
    }
}

/// Reads one batch inside a transaction.
pub trait PageFetcher {
    type Item;

    fn fetch(&self, tx: &mut dyn Tx, cursor: &Cursor, limit: usize) -> Result<Page<Self::Item>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterStatus {
    /// More items may follow.
    Active,
    /// Ended cleanly.
    Done,
    /// Ended because a fetch failed; the error was yielded once.
    Failed,
    /// Released by [`PagedIterator::close`].
    Closed,
}

/// Pull-based sequence that refills its buffer one batch at a time.
///
/// Yields `Ok(item)` values and, on failure, a single `Err` after which the
/// sequence is over. [`PagedIterator::status`] tells a clean end from a failed
/// one.
pub struct PagedIterator<'a, D, F: PageFetcher> {
    db: &'a D,
    ctx: Context,
    fetcher: F,
    cursor: Option<Cursor>,
    batch_size: usize,
    buffer: VecDeque<F::Item>,
    status: IterStatus,
}

impl<'a, D: Database, F: PageFetcher> PagedIterator<'a, D, F> {
    pub fn new(db: &'a D, ctx: &Context, fetcher: F, start: Option<Cursor>, batch_size: usize) -> Self {
        let status = if start.is_some() {
            IterStatus::Active
        } else {
            IterStatus::Done
        };
        Self {
            db,
            ctx: ctx.clone(),
            fetcher,
            cursor: start,
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            status,
        }
    }

    pub fn status(&self) -> IterStatus {
        self.status
    }

    /// Drop buffered items and restart from `from` (inclusive).
    pub fn seek(&mut self, from: impl Into<String>) -> Result<()> {
        if self.status == IterStatus::Closed {
            return Err(Error::InvalidOperation("iterator is closed".to_string()));
        }
        self.buffer.clear();
        self.cursor = Some(Cursor::From(from.into()));
        self.status = IterStatus::Active;
        Ok(())
    }

    /// Release buffered rows. Later calls to `next` return `None`.
    pub fn close(&mut self) {
        self.buffer.clear();
        self.cursor = None;
        self.status = IterStatus::Closed;
    }

    fn fill(&mut self) -> Result<()> {
        let Some(cursor) = self.cursor.take() else {
            self.status = IterStatus::Done;
            return Ok(());
        };
        self.ctx.check()?;
        debug!(cursor = cursor.key(), batch_size = self.batch_size, "fetching batch");

        let fetcher = &self.fetcher;
        let limit = self.batch_size;
        let page = self
            .db
            .transact(&self.ctx, TxMode::ReadOnly, |tx| fetcher.fetch(tx, &cursor, limit))?;

        self.cursor = page.next;
        self.buffer.extend(page.items);
        if self.buffer.is_empty() && self.cursor.is_none() {
            self.status = IterStatus::Done;
        }
        Ok(())
    }
}

impl<D: Database, F: PageFetcher> Iterator for PagedIterator<'_, D, F> {
    type Item = Result<F::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.status != IterStatus::Active {
                return None;
            }
            if let Err(e) = self.fill() {
                self.cursor = None;
                self.status = IterStatus::Failed;
                return Some(Err(e));
            }
        }
    }
}
