//! A pull-only oplog buffer feeding the applier from the oplog itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use vellum_core::{Error, OplogEntry, Result, Timestamp};

use crate::fatal::fatal;
use crate::oplog::{OplogCursor, OplogStore};

/// The oplog buffer capability set.
///
/// Live replication uses both sides: the fetcher pushes batches in and
/// the applier pulls them out. Recovery only ever uses the pull side;
/// its buffer is a one-way view of the oplog and fails loudly if any
/// push-side operation is invoked.
#[async_trait]
pub trait OplogBuffer: Send + Sync {
    /// Prepares the buffer for consumption.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing source cannot be opened.
    async fn startup(&self) -> Result<()>;

    /// Releases the backing source.
    ///
    /// # Errors
    ///
    /// Returns an error if release fails.
    async fn shutdown(&self) -> Result<()>;

    /// True when no more entries can be pulled.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing source fails.
    async fn is_empty(&self) -> Result<bool>;

    /// Returns the next entry without consuming it. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing source fails.
    async fn peek(&self) -> Result<Option<OplogEntry>>;

    /// Consumes and returns the next entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing source fails.
    async fn try_pop(&self) -> Result<Option<OplogEntry>>;

    /// Pushes entries into the buffer (push side).
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer rejects the entries.
    async fn push(&self, entries: Vec<OplogEntry>) -> Result<()>;

    /// Blocks until the buffer has room for `bytes` more (push side).
    async fn wait_for_space(&self, bytes: usize);

    /// Capacity of the buffer in bytes (push side).
    fn max_size_bytes(&self) -> usize;

    /// Current buffered size in bytes (push side).
    async fn size_bytes(&self) -> usize;

    /// Current number of buffered entries (push side).
    async fn count(&self) -> usize;

    /// Drops all buffered entries (push side).
    async fn clear(&self);

    /// Blocks until data arrives or the timeout lapses (push side).
    async fn wait_for_data(&self, timeout: Duration) -> bool;

    /// The most recently pushed entry (push side).
    async fn last_pushed(&self) -> Option<OplogEntry>;
}

/// Pull-only buffer presenting the oplog window `[start, end]` (or
/// `[start, ∞)` without an end) to the applier.
///
/// The caller promises the entry at `start` exists: it is the point
/// everything up to which is already applied. Startup verifies that
/// promise, consumes the `start` entry, and anything less is fatal,
/// because the oplog would no longer bridge to the checkpoint.
pub struct OplogReplayBuffer {
    oplog: Arc<dyn OplogStore>,
    start: Timestamp,
    end: Option<Timestamp>,
    state: Mutex<Option<BufferState>>,
}

struct BufferState {
    cursor: Box<dyn OplogCursor>,
    peeked: Option<OplogEntry>,
}

impl OplogReplayBuffer {
    /// Creates a buffer over `[start, end]`, or `[start, ∞)` when
    /// `end` is `None`.
    pub fn new(oplog: Arc<dyn OplogStore>, start: Timestamp, end: Option<Timestamp>) -> Self {
        Self { oplog, start, end, state: Mutex::new(None) }
    }

    async fn advance(state: &mut BufferState) -> Result<Option<OplogEntry>> {
        if state.peeked.is_none() {
            state.peeked = state.cursor.next().await?.map(|(_, entry)| entry);
        }
        Ok(state.peeked.clone())
    }
}

#[async_trait]
impl OplogBuffer for OplogReplayBuffer {
    async fn startup(&self) -> Result<()> {
        let mut cursor = self.oplog.scan_forward(self.start, self.end).await?;

        // The first entry must be the start point itself; it is
        // consumed here because it is by definition already applied.
        match cursor.next().await? {
            None => fatal!(
                7205,
                "no oplog entries found at or after {}{}, which should be impossible",
                self.start,
                self.end.map_or(String::new(), |end| format!(" and at or before {end}"))
            ),
            Some((_, entry)) if entry.ts != self.start => fatal!(
                7206,
                "oplog entry at {} is missing, the first entry found is at {}",
                self.start,
                entry.ts
            ),
            Some(_) => {}
        }

        *self.state.lock().await = Some(BufferState { cursor, peeked: None });
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        *self.state.lock().await = None;
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.peek().await?.is_none())
    }

    async fn peek(&self) -> Result<Option<OplogEntry>> {
        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| Error::storage("oplog replay buffer used before startup"))?;
        Self::advance(state).await
    }

    async fn try_pop(&self) -> Result<Option<OplogEntry>> {
        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| Error::storage("oplog replay buffer used before startup"))?;
        Self::advance(state).await?;
        Ok(state.peeked.take())
    }

    async fn push(&self, _entries: Vec<OplogEntry>) -> Result<()> {
        fatal!(7207, "push invoked on the pull-only recovery oplog buffer");
    }

    async fn wait_for_space(&self, _bytes: usize) {
        fatal!(7207, "wait_for_space invoked on the pull-only recovery oplog buffer");
    }

    fn max_size_bytes(&self) -> usize {
        fatal!(7207, "max_size_bytes invoked on the pull-only recovery oplog buffer");
    }

    async fn size_bytes(&self) -> usize {
        fatal!(7207, "size_bytes invoked on the pull-only recovery oplog buffer");
    }

    async fn count(&self) -> usize {
        fatal!(7207, "count invoked on the pull-only recovery oplog buffer");
    }

    async fn clear(&self) {
        fatal!(7207, "clear invoked on the pull-only recovery oplog buffer");
    }

    async fn wait_for_data(&self, _timeout: Duration) -> bool {
        fatal!(7207, "wait_for_data invoked on the pull-only recovery oplog buffer");
    }

    async fn last_pushed(&self) -> Option<OplogEntry> {
        fatal!(7207, "last_pushed invoked on the pull-only recovery oplog buffer");
    }
}
