//! Replication recovery for the Vellum document database.
//!
//! At process start (or after a rollback), the data files on disk may
//! trail the operation log: the newest durable checkpoint is either
//! *stable* (tied to a known-consistent timestamp) or *unstable* (tied
//! to nothing), and the oplog may carry a ragged tail of writes that
//! were never durably ordered. This crate brings the two back into
//! agreement before the node accepts traffic, by truncating the ragged
//! tail and replaying a bounded suffix of the oplog onto the data
//! files.
//!
//! # Architecture
//!
//! ```text
//!  recover_from_oplog(stable_ts?)
//!       │
//!       ▼
//!  ┌─────────────────────┐    truncate ragged tail,
//!  │  Marker Reconciler  │──► clear truncate-after point,
//!  └─────────┬───────────┘    force durability
//!            ▼
//!  ┌─────────────────────┐
//!  │  Top-of-oplog probe │──► empty oplog? nothing to apply
//!  └─────────┬───────────┘
//!            ▼
//!    stable checkpoint?
//!     │yes           │no
//!     ▼              ▼
//!  replay         replay (applied_through, top],
//!  (stable, top]  then advance applied_through and
//!                 fence the marker update
//!            │
//!            ▼
//!  ┌─────────────────────┐    pull-only cursor buffer over
//!  │   Oplog applier     │◄── the oplog itself; batches cut
//!  └─────────────────────┘    by byte/op limits
//! ```
//!
//! The storage engine, the consistency marker store, the oplog record
//! store, and per-entry application are consumed through contracts
//! defined here; in-memory and file-backed implementations ship for
//! embedding and tests.
//!
//! Recovery precedes serving: invariant violations terminate the
//! process rather than leave partially recovered data files behind.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod config;
mod error;
mod fatal;
mod markers;
mod metrics;
mod oplog;
mod recovery;
mod state;
mod storage;

pub use applier::{
    ApplyMode, ApplyObserver, BatchLimits, NoPreparedTransactions, OplogApplication, OplogApplier,
    PreparedTransactions, RecoveryOplogApplier, WriterPool,
};
pub use config::{
    ConfigValidationError, RecoveryConfig, DEFAULT_BATCH_MAX_BYTES, DEFAULT_BATCH_MAX_OPS,
    DEFAULT_WRITER_THREADS,
};
pub use error::{RecoveryError, Result};
pub use markers::{ConsistencyMarkers, FileMarkerStore, MemMarkerStore};
pub use metrics::init_recovery_metrics;
pub use oplog::{MemOplogStore, OplogCursor, OplogStore, OPLOG_NS};
pub use recovery::{OplogBuffer, OplogReplayBuffer, RecoveryObserver, ReplicationRecovery};
pub use state::NodeState;
pub use storage::{MemStorageEngine, StorageEngine, StorageInterface};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports() {
        // Verify the public surface is wired up.
        let config = RecoveryConfig::default();
        assert_eq!(config.batch_max_ops, DEFAULT_BATCH_MAX_OPS);

        let state = NodeState::new();
        assert!(!state.is_in_recovery());
        assert!(!state.is_read_only());
    }
}
