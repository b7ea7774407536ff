//! Error types for recovery operations.

use thiserror::Error;
use vellum_core::Timestamp;

/// Result type for caller-facing recovery operations.
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Errors surfaced to callers of the recovery entry points.
///
/// These are the caller-error tier: conditions the embedding server can
/// act on. Invariant violations and unexpected storage faults never
/// appear here; they terminate the process instead.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Recovery was requested while the node is performing an initial
    /// sync.
    #[error("cannot recover from the oplog while the node is performing an initial sync")]
    InitialSyncActive,

    /// The replay start point lies beyond the requested end point.
    #[error("no oplog entries to apply: start point {start} is beyond the end point {end}")]
    StartBeyondEnd {
        /// The applied-through timestamp the replay would start from.
        start: Timestamp,
        /// The requested end of the replay window.
        end: Timestamp,
    },

    /// A storage-tier failure.
    #[error(transparent)]
    Storage(#[from] vellum_core::Error),
}
