//! The oplog as an ordered record store.
//!
//! Recovery needs four things from the oplog: the newest entry, a
//! forward scan over a timestamp window, a reverse scan with record
//! ids, and capped truncation after a record id. Everything else about
//! the oplog (its capped sizing, replication fan-out, write path) is
//! someone else's concern.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use vellum_core::{Error, OplogEntry, RecordId, Result, Timestamp};

/// Namespace of the replicated oplog.
pub const OPLOG_NS: &str = "local.oplog";

/// A cursor over oplog records.
#[async_trait]
pub trait OplogCursor: Send {
    /// Returns the next record, or `None` at the end of the scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails mid-scan.
    async fn next(&mut self) -> Result<Option<(RecordId, OplogEntry)>>;
}

/// The oplog record store contract.
#[async_trait]
pub trait OplogStore: Send + Sync {
    /// The newest durable oplog entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollectionEmpty`] when the oplog holds no
    /// records and [`Error::NamespaceNotFound`] when it does not
    /// exist; callers treat both as "nothing to apply". Any other
    /// error is a storage fault.
    async fn latest_entry(&self) -> Result<OplogEntry>;

    /// Opens a forward cursor over entries with `ts >= start`, bounded
    /// by `ts <= end` when an end is given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] when the oplog does not
    /// exist.
    async fn scan_forward(
        &self,
        start: Timestamp,
        end: Option<Timestamp>,
    ) -> Result<Box<dyn OplogCursor>>;

    /// Opens a reverse cursor over the whole oplog, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] when the oplog does not
    /// exist.
    async fn scan_reverse(&self) -> Result<Box<dyn OplogCursor>>;

    /// Deletes every record with id greater than `id`; with
    /// `inclusive`, the record at `id` as well.
    ///
    /// Implementations must serialize this against concurrent readers
    /// and writers of the oplog (the store owns its locking).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] when the oplog does not
    /// exist.
    async fn capped_truncate_after(&self, id: RecordId, inclusive: bool) -> Result<()>;

    /// Primes any cached handle to the oplog collection so later
    /// accesses need no catalog lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be acquired.
    async fn acquire_for_logging(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory oplog store for embedding and tests.
///
/// Appends enforce strictly increasing timestamps, matching the
/// invariant the real oplog provides to recovery.
#[derive(Debug)]
pub struct MemOplogStore {
    // None models a dropped (never created) oplog namespace.
    inner: RwLock<Option<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<RecordId, OplogEntry>,
    next_id: RecordId,
}

impl MemOplogStore {
    /// Creates an empty oplog.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: RwLock::new(Some(Inner::default())) }
    }

    /// Creates a store whose oplog namespace does not exist.
    #[must_use]
    pub fn missing() -> Self {
        Self { inner: RwLock::new(None) }
    }

    /// Appends an entry, returning its record id.
    ///
    /// # Errors
    ///
    /// Returns an error when the namespace is missing or the entry's
    /// timestamp is not strictly greater than the current tail.
    pub fn append(&self, entry: OplogEntry) -> Result<RecordId> {
        let mut guard = self.inner.write().unwrap();
        let inner = guard.as_mut().ok_or_else(|| Error::NamespaceNotFound(OPLOG_NS.into()))?;
        if let Some(last) = inner.records.values().next_back() {
            if entry.ts <= last.ts {
                return Err(Error::storage(format!(
                    "out-of-order oplog append: {} after {}",
                    entry.ts, last.ts
                )));
            }
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.records.insert(id, entry);
        Ok(id)
    }

    /// Number of entries currently in the oplog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().as_ref().map_or(0, |inner| inner.records.len())
    }

    /// Returns true when the oplog holds no entries (or is missing).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all entries in timestamp order.
    #[must_use]
    pub fn entries(&self) -> Vec<OplogEntry> {
        self.inner
            .read()
            .unwrap()
            .as_ref()
            .map_or_else(Vec::new, |inner| inner.records.values().cloned().collect())
    }
}

impl Default for MemOplogStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot cursor over the in-memory store.
struct MemCursor {
    items: std::vec::IntoIter<(RecordId, OplogEntry)>,
}

#[async_trait]
impl OplogCursor for MemCursor {
    async fn next(&mut self) -> Result<Option<(RecordId, OplogEntry)>> {
        Ok(self.items.next())
    }
}

#[async_trait]
impl OplogStore for MemOplogStore {
    async fn latest_entry(&self) -> Result<OplogEntry> {
        let guard = self.inner.read().unwrap();
        let inner = guard.as_ref().ok_or_else(|| Error::NamespaceNotFound(OPLOG_NS.into()))?;
        inner
            .records
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| Error::CollectionEmpty(OPLOG_NS.into()))
    }

    async fn scan_forward(
        &self,
        start: Timestamp,
        end: Option<Timestamp>,
    ) -> Result<Box<dyn OplogCursor>> {
        let guard = self.inner.read().unwrap();
        let inner = guard.as_ref().ok_or_else(|| Error::NamespaceNotFound(OPLOG_NS.into()))?;
        let items: Vec<_> = inner
            .records
            .iter()
            .filter(|(_, e)| e.ts >= start && end.map_or(true, |end| e.ts <= end))
            .map(|(id, e)| (*id, e.clone()))
            .collect();
        Ok(Box::new(MemCursor { items: items.into_iter() }))
    }

    async fn scan_reverse(&self) -> Result<Box<dyn OplogCursor>> {
        let guard = self.inner.read().unwrap();
        let inner = guard.as_ref().ok_or_else(|| Error::NamespaceNotFound(OPLOG_NS.into()))?;
        let mut items: Vec<_> = inner.records.iter().map(|(id, e)| (*id, e.clone())).collect();
        items.reverse();
        Ok(Box::new(MemCursor { items: items.into_iter() }))
    }

    async fn capped_truncate_after(&self, id: RecordId, inclusive: bool) -> Result<()> {
        let mut guard = self.inner.write().unwrap();
        let inner = guard.as_mut().ok_or_else(|| Error::NamespaceNotFound(OPLOG_NS.into()))?;
        if inclusive {
            inner.records.retain(|record_id, _| *record_id < id);
        } else {
            inner.records.retain(|record_id, _| *record_id <= id);
        }
        Ok(())
    }
}
