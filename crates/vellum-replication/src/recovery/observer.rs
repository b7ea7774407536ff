//! Counters and logging for operations applied during recovery.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use vellum_core::{OpTime, OplogEntry};

use crate::applier::ApplyObserver;

/// Tracks and logs operations applied during recovery.
#[derive(Debug, Default)]
pub struct RecoveryObserver {
    batches: AtomicU64,
    ops: AtomicU64,
}

impl RecoveryObserver {
    /// Creates an observer with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches applied so far.
    #[must_use]
    pub fn batches_applied(&self) -> u64 {
        self.batches.load(Ordering::Acquire)
    }

    /// Number of operations applied so far.
    #[must_use]
    pub fn ops_applied(&self) -> u64 {
        self.ops.load(Ordering::Acquire)
    }

    /// Logs the terminal summary and records metrics.
    pub fn complete(&self, applied_through: OpTime) {
        let ops = self.ops_applied();
        let batches = self.batches_applied();
        tracing::info!(
            ops_applied = ops,
            batches = batches,
            applied_through = %applied_through,
            "Applied operations during replication recovery"
        );
        counter!("vellum_recovery_ops_applied_total").increment(ops);
        counter!("vellum_recovery_batches_applied_total").increment(batches);
        counter!("vellum_recovery_passes_total").increment(1);
    }
}

impl ApplyObserver for RecoveryObserver {
    fn batch_begin(&self, batch: &[OplogEntry]) {
        let batch_number = self.batches.fetch_add(1, Ordering::AcqRel) + 1;
        let applied_so_far = self.ops.fetch_add(batch.len() as u64, Ordering::AcqRel);
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return;
        };
        tracing::debug!(
            batch = batch_number,
            ops = batch.len(),
            first = %first.op_time(),
            last = %last.op_time(),
            applied_so_far,
            "Applying operations in batch"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            for (i, entry) in batch.iter().enumerate() {
                tracing::trace!(
                    op = i + 1,
                    of = batch.len(),
                    batch = batch_number,
                    ts = %entry.ts,
                    ns = %entry.ns,
                    "Applying operation during replication recovery"
                );
            }
        }
    }
}
