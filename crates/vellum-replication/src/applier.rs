//! Oplog application contracts and the recovery-mode applier.
//!
//! The full parallel oplog applier used by live replication is an
//! external collaborator; recovery only needs its batching face plus
//! idempotent per-entry application, which [`RecoveryOplogApplier`]
//! provides over the pull side of an oplog buffer.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use vellum_core::{Error, OpTime, OplogEntry, Result};

use crate::recovery::OplogBuffer;

/// The mode oplog operations are applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Applying entries fetched during an initial sync.
    InitialSync,
    /// Applying entries as a live secondary.
    Secondary,
    /// Replaying entries during startup or rollback recovery.
    ///
    /// Application must be idempotent: a batch may be replayed from
    /// any point after a crash.
    Recovering,
}

/// Limits cutting a replay batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    /// Maximum serialized size of a batch in bytes.
    pub bytes: usize,
    /// Maximum number of operations in a batch.
    pub ops: usize,
}

/// Per-entry mutation of the data files.
///
/// This is the seam between replication and the storage execution
/// layer: recovery hands entries over one at a time and never
/// interprets the operation document itself.
#[async_trait]
pub trait OplogApplication: Send + Sync {
    /// Applies a single operation to the data files.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation cannot be applied; during
    /// recovery that is fatal to the process.
    async fn apply_operation(&self, entry: &OplogEntry, mode: ApplyMode) -> Result<()>;
}

/// Reconstruction of prepared transactions, run after every successful
/// recovery entry point.
#[async_trait]
pub trait PreparedTransactions: Send + Sync {
    /// Rebuilds in-memory prepared-transaction state from durable
    /// records.
    ///
    /// # Errors
    ///
    /// Returns an error if the durable records cannot be read.
    async fn reconstruct(&self, mode: ApplyMode) -> Result<()>;
}

/// Prepared-transaction reconstruction for deployments that never
/// prepare transactions.
pub struct NoPreparedTransactions;

#[async_trait]
impl PreparedTransactions for NoPreparedTransactions {
    async fn reconstruct(&self, _mode: ApplyMode) -> Result<()> {
        Ok(())
    }
}

/// Hooks invoked by the applier around each batch.
pub trait ApplyObserver: Send + Sync {
    /// Called before a batch is handed to the writers.
    fn batch_begin(&self, batch: &[OplogEntry]);

    /// Called after a batch has been fully applied.
    fn batch_end(&self, _last_applied: &OpTime) {}
}

/// The batching face of an oplog applier.
#[async_trait]
pub trait OplogApplier: Send {
    /// Cuts the next batch from the buffer under the given limits.
    /// An empty batch means the buffer is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer fails; fatal in recovery.
    async fn next_batch(&mut self, limits: &BatchLimits) -> Result<Vec<OplogEntry>>;

    /// Applies a batch, returning the optime of its last entry.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry fails to apply.
    async fn apply_batch(&mut self, batch: Vec<OplogEntry>) -> Result<OpTime>;
}

/// Pool of writer tasks a batch is fanned out across.
#[derive(Debug, Clone, Copy)]
pub struct WriterPool {
    workers: usize,
}

impl WriterPool {
    /// Creates a pool with at least one worker.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1) }
    }

    /// Number of workers in the pool.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }
}

/// The applier used for recovery replay.
///
/// Pulls entries from the buffer's pull side only, cuts batches by
/// byte and operation limits, and fans each batch out across the
/// writer pool keyed by namespace so operations against the same
/// namespace keep their oplog order. Ordering across batches is
/// strictly serial.
pub struct RecoveryOplogApplier {
    buffer: Arc<dyn OplogBuffer>,
    application: Arc<dyn OplogApplication>,
    observer: Arc<dyn ApplyObserver>,
    pool: WriterPool,
    mode: ApplyMode,
}

impl RecoveryOplogApplier {
    /// Creates an applier over the given buffer.
    pub fn new(
        buffer: Arc<dyn OplogBuffer>,
        application: Arc<dyn OplogApplication>,
        observer: Arc<dyn ApplyObserver>,
        pool: WriterPool,
        mode: ApplyMode,
    ) -> Self {
        Self { buffer, application, observer, pool, mode }
    }
}

#[async_trait]
impl OplogApplier for RecoveryOplogApplier {
    async fn next_batch(&mut self, limits: &BatchLimits) -> Result<Vec<OplogEntry>> {
        let mut batch = Vec::new();
        let mut bytes = 0usize;
        while batch.len() < limits.ops {
            let Some(next) = self.buffer.peek().await? else {
                break;
            };
            // An oversized first entry still ships alone.
            if !batch.is_empty() && bytes + next.size_bytes() > limits.bytes {
                break;
            }
            let Some(entry) = self.buffer.try_pop().await? else {
                break;
            };
            bytes += entry.size_bytes();
            batch.push(entry);
        }
        Ok(batch)
    }

    async fn apply_batch(&mut self, batch: Vec<OplogEntry>) -> Result<OpTime> {
        let Some(last) = batch.last() else {
            return Err(Error::storage("cannot apply an empty oplog batch"));
        };
        let last_applied = last.op_time();
        self.observer.batch_begin(&batch);

        let workers = self.pool.workers().min(batch.len());
        let mut lanes: Vec<Vec<OplogEntry>> = (0..workers).map(|_| Vec::new()).collect();
        for entry in batch {
            let lane = namespace_lane(&entry.ns, workers);
            lanes[lane].push(entry);
        }

        let mut handles = Vec::with_capacity(workers);
        for lane in lanes.into_iter().filter(|lane| !lane.is_empty()) {
            let application = Arc::clone(&self.application);
            let mode = self.mode;
            handles.push(tokio::spawn(async move {
                for entry in &lane {
                    application.apply_operation(entry, mode).await?;
                }
                Ok::<(), Error>(())
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| Error::storage(format!("applier writer task failed: {e}")))??;
        }

        self.observer.batch_end(&last_applied);
        Ok(last_applied)
    }
}

fn namespace_lane(ns: &str, workers: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    ns.hash(&mut hasher);
    (hasher.finish() as usize) % workers
}
