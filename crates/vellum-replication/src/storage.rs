//! Storage engine contracts consumed by recovery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use vellum_core::{Result, Timestamp};

/// Recovery's view of the storage interface.
///
/// The recovery timestamp is the timestamp of the latest stable
/// checkpoint. `None` means only an unstable checkpoint exists: the
/// on-disk state is not tied to any known-consistent point.
/// `Some(Timestamp::null())` is an illegal state and aborts recovery.
#[async_trait]
pub trait StorageInterface: Send + Sync {
    /// Whether the engine can recover to a stable timestamp at all.
    fn supports_recovery_timestamp(&self) -> bool;

    /// The timestamp of the latest stable checkpoint, if one exists.
    fn recovery_timestamp(&self) -> Option<Timestamp>;

    /// Records the timestamp at which the data files are known
    /// complete after startup recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamp cannot be persisted.
    async fn set_initial_data_timestamp(&self, ts: Timestamp) -> Result<()>;
}

/// Checkpoint and durability primitives of the storage engine.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Moves the engine's oldest timestamp.
    ///
    /// Recovery moves this *backwards* before unstable-checkpoint
    /// replay: ragged-tail truncation may have advanced it forward of
    /// operations that must now be rewritten. Rollback paths may want
    /// different behavior here; see the crate documentation.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the move.
    async fn set_oldest_timestamp(&self, ts: Timestamp) -> Result<()>;

    /// Blocks until all journaled writes are durable on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot complete the fence.
    async fn wait_until_durable(&self) -> Result<()>;

    /// Blocks until unjournaled writes are captured by a checkpoint.
    ///
    /// On an engine without a checkpoint timestamp this degrades into
    /// an unstable checkpoint; the fence still guarantees the marker
    /// updates recovery just made survive a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot complete the fence.
    async fn wait_until_unjournaled_writes_durable(&self) -> Result<()>;
}

/// In-memory storage engine stub for embedding and tests.
///
/// Implements both [`StorageInterface`] and [`StorageEngine`],
/// recording every timestamp move and durability fence so callers can
/// assert on them.
#[derive(Debug)]
pub struct MemStorageEngine {
    supports_recovery_timestamp: bool,
    recovery_timestamp: RwLock<Option<Timestamp>>,
    initial_data_timestamp: RwLock<Timestamp>,
    oldest_timestamp: RwLock<Timestamp>,
    durable_fences: AtomicU64,
    unjournaled_fences: AtomicU64,
}

impl MemStorageEngine {
    /// Creates an engine that supports recovery timestamps but has no
    /// stable checkpoint yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            supports_recovery_timestamp: true,
            recovery_timestamp: RwLock::new(None),
            initial_data_timestamp: RwLock::new(Timestamp::null()),
            oldest_timestamp: RwLock::new(Timestamp::null()),
            durable_fences: AtomicU64::new(0),
            unjournaled_fences: AtomicU64::new(0),
        }
    }

    /// Creates an engine that cannot recover to a stable timestamp.
    #[must_use]
    pub fn without_recovery_timestamps() -> Self {
        Self { supports_recovery_timestamp: false, ..Self::new() }
    }

    /// Sets the stable-checkpoint timestamp the engine reports.
    pub fn set_recovery_timestamp(&self, ts: Option<Timestamp>) {
        *self.recovery_timestamp.write().unwrap() = ts;
    }

    /// The last initial-data timestamp recorded.
    #[must_use]
    pub fn initial_data_timestamp(&self) -> Timestamp {
        *self.initial_data_timestamp.read().unwrap()
    }

    /// The last oldest-timestamp move recorded.
    #[must_use]
    pub fn oldest_timestamp(&self) -> Timestamp {
        *self.oldest_timestamp.read().unwrap()
    }

    /// Number of `wait_until_durable` fences issued.
    #[must_use]
    pub fn durable_fences(&self) -> u64 {
        self.durable_fences.load(Ordering::Acquire)
    }

    /// Number of `wait_until_unjournaled_writes_durable` fences issued.
    #[must_use]
    pub fn unjournaled_fences(&self) -> u64 {
        self.unjournaled_fences.load(Ordering::Acquire)
    }
}

impl Default for MemStorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageInterface for MemStorageEngine {
    fn supports_recovery_timestamp(&self) -> bool {
        self.supports_recovery_timestamp
    }

    fn recovery_timestamp(&self) -> Option<Timestamp> {
        *self.recovery_timestamp.read().unwrap()
    }

    async fn set_initial_data_timestamp(&self, ts: Timestamp) -> Result<()> {
        *self.initial_data_timestamp.write().unwrap() = ts;
        Ok(())
    }
}

#[async_trait]
impl StorageEngine for MemStorageEngine {
    async fn set_oldest_timestamp(&self, ts: Timestamp) -> Result<()> {
        *self.oldest_timestamp.write().unwrap() = ts;
        Ok(())
    }

    async fn wait_until_durable(&self) -> Result<()> {
        self.durable_fences.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn wait_until_unjournaled_writes_durable(&self) -> Result<()> {
        self.unjournaled_fences.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
