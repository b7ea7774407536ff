//! Configuration for replication recovery.

use serde::{Deserialize, Serialize};

use crate::applier::BatchLimits;

/// Default upper bound on the serialized size of a replay batch.
pub const DEFAULT_BATCH_MAX_BYTES: usize = 100 * 1024 * 1024;

/// Default upper bound on the number of operations in a replay batch.
pub const DEFAULT_BATCH_MAX_OPS: usize = 5_000;

/// Default number of writer tasks applying a batch.
pub const DEFAULT_WRITER_THREADS: usize = 16;

/// Configuration for the recovery subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Whether the node takes an unstable checkpoint on clean shutdown.
    ///
    /// Standalone recovery without a stable checkpoint is only
    /// permitted when this is set.
    pub take_unstable_checkpoint_on_shutdown: bool,

    /// Upper bound on the serialized size of a replay batch, in bytes.
    pub batch_max_bytes: usize,

    /// Upper bound on the number of operations in a replay batch.
    pub batch_max_ops: usize,

    /// Number of writer tasks a batch is fanned out across.
    pub writer_threads: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            take_unstable_checkpoint_on_shutdown: false,
            batch_max_bytes: DEFAULT_BATCH_MAX_BYTES,
            batch_max_ops: DEFAULT_BATCH_MAX_OPS,
            writer_threads: DEFAULT_WRITER_THREADS,
        }
    }
}

impl RecoveryConfig {
    /// Creates a new recovery configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether an unstable checkpoint is taken on shutdown.
    pub fn take_unstable_checkpoint_on_shutdown(mut self, take: bool) -> Self {
        self.take_unstable_checkpoint_on_shutdown = take;
        self
    }

    /// Sets the batch byte limit.
    pub fn batch_max_bytes(mut self, bytes: usize) -> Self {
        self.batch_max_bytes = bytes;
        self
    }

    /// Sets the batch operation-count limit.
    pub fn batch_max_ops(mut self, ops: usize) -> Self {
        self.batch_max_ops = ops;
        self
    }

    /// Sets the writer task count.
    pub fn writer_threads(mut self, threads: usize) -> Self {
        self.writer_threads = threads;
        self
    }

    /// Returns the batch limits for a replay pass.
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits { bytes: self.batch_max_bytes, ops: self.batch_max_ops }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when any limit is zero.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.batch_max_bytes == 0 {
            return Err(ConfigValidationError::InvalidBatchBytes);
        }
        if self.batch_max_ops == 0 {
            return Err(ConfigValidationError::InvalidBatchOps);
        }
        if self.writer_threads == 0 {
            return Err(ConfigValidationError::InvalidWriterThreads);
        }
        Ok(())
    }
}

/// Errors from configuration validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    /// Batch byte limit must be at least 1.
    #[error("batch byte limit must be at least 1")]
    InvalidBatchBytes,

    /// Batch operation limit must be at least 1.
    #[error("batch operation limit must be at least 1")]
    InvalidBatchOps,

    /// Writer thread count must be at least 1.
    #[error("writer thread count must be at least 1")]
    InvalidWriterThreads,
}
