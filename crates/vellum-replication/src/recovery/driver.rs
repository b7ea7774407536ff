//! The recovery driver: mode selection, replay, and marker updates.

use std::sync::Arc;

use vellum_core::{OpTime, Result, Timestamp};

use crate::applier::{
    ApplyMode, ApplyObserver, OplogApplication, OplogApplier, PreparedTransactions,
    RecoveryOplogApplier, WriterPool,
};
use crate::config::RecoveryConfig;
use crate::error::RecoveryError;
use crate::fatal::fatal;
use crate::markers::ConsistencyMarkers;
use crate::oplog::OplogStore;
use crate::state::NodeState;
use crate::storage::{StorageEngine, StorageInterface};

use super::buffer::{OplogBuffer, OplogReplayBuffer};
use super::observer::RecoveryObserver;
use super::truncate::reconcile_truncate_point;

/// Replays or discards a bounded oplog suffix to bring the data files
/// into agreement with the oplog.
///
/// Runs on a single task before the node accepts traffic. The driver
/// must not be cancelled: it holds the node's in-recovery flag, and
/// cancellation would leave the consistency markers in a state no
/// later pass can interpret. There are no timeouts; recovery runs to
/// completion or terminates the process.
pub struct ReplicationRecovery {
    storage: Arc<dyn StorageInterface>,
    engine: Arc<dyn StorageEngine>,
    markers: Arc<dyn ConsistencyMarkers>,
    oplog: Arc<dyn OplogStore>,
    application: Arc<dyn OplogApplication>,
    prepared: Arc<dyn PreparedTransactions>,
    state: Arc<NodeState>,
    config: RecoveryConfig,
}

impl ReplicationRecovery {
    /// Wires the driver to its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn StorageInterface>,
        engine: Arc<dyn StorageEngine>,
        markers: Arc<dyn ConsistencyMarkers>,
        oplog: Arc<dyn OplogStore>,
        application: Arc<dyn OplogApplication>,
        prepared: Arc<dyn PreparedTransactions>,
        state: Arc<NodeState>,
        config: RecoveryConfig,
    ) -> Self {
        Self { storage, engine, markers, oplog, application, prepared, state, config }
    }

    /// Recovers the data files from the oplog at startup or, with a
    /// stable timestamp passed in, after a rollback.
    ///
    /// Every failure inside this entry point is unrecoverable: the
    /// process terminates rather than leave partial recovery state
    /// behind.
    pub async fn recover_from_oplog(&self, stable_timestamp: Option<Timestamp>) {
        if let Err(e) = self.recover_from_oplog_inner(stable_timestamp).await {
            fatal!(7213, "caught error during replication recovery: {e}");
        }
    }

    async fn recover_from_oplog_inner(
        &self,
        mut stable_timestamp: Option<Timestamp>,
    ) -> Result<()> {
        if self.markers.initial_sync_flag().await? {
            // An initial sync owns the node; it will redo everything.
            tracing::info!("No recovery needed, initial sync flag set");
            return Ok(());
        }

        let _guard = self.state.begin_recovery();

        // With a stable timestamp passed in we are in rollback
        // recovery. Otherwise ask the storage engine: a returned
        // timestamp selects stable recovery, none means the engine
        // only has an unstable checkpoint.
        let supports_recovery_timestamp = self.storage.supports_recovery_timestamp();
        if stable_timestamp.is_none() && supports_recovery_timestamp {
            stable_timestamp = self.storage.recovery_timestamp();
        }

        let applied_through = self.markers.applied_through().await?;
        if let Some(stable) = stable_timestamp {
            if !stable.is_null() && !applied_through.is_null() && stable != applied_through.ts {
                fatal!(
                    7203,
                    "stable timestamp {stable} does not equal applied-through {applied_through}"
                );
            }
        }

        reconcile_truncate_point(
            self.markers.as_ref(),
            self.engine.as_ref(),
            self.oplog.as_ref(),
            stable_timestamp,
        )
        .await?;

        let top_of_oplog = match self.top_of_oplog().await {
            Ok(top) => top,
            Err(e) if e.is_empty_oplog() => {
                // Nothing to apply; initial sync will populate the node.
                tracing::info!("No oplog entries to apply for recovery, the oplog is empty");
                self.prepared.reconstruct(ApplyMode::Recovering).await?;
                return Ok(());
            }
            Err(e) => fatal!(7204, "failed to read the top of the oplog: {e}"),
        };

        if let Some(stable) = stable_timestamp {
            if !supports_recovery_timestamp {
                fatal!(
                    7223,
                    "stable timestamp {stable} provided, but the storage engine does not \
                     support recovery timestamps"
                );
            }
            self.recover_from_stable_timestamp(stable, applied_through, top_of_oplog).await?;
        } else {
            self.recover_from_unstable_checkpoint(applied_through, top_of_oplog).await?;
        }

        self.prepared.reconstruct(ApplyMode::Recovering).await?;
        Ok(())
    }

    /// Replays the oplog onto a stable checkpoint up to `end`.
    ///
    /// Used after a rollback to bring the node to a specific point
    /// rather than the top of the oplog.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::InitialSyncActive`] while an initial
    /// sync owns the node, and [`RecoveryError::StartBeyondEnd`] when
    /// the applied-through point lies beyond `end`. Storage faults
    /// propagate; a missing stable checkpoint is fatal.
    pub async fn recover_from_oplog_up_to(
        &self,
        end: Timestamp,
    ) -> std::result::Result<(), RecoveryError> {
        if self.markers.initial_sync_flag().await? {
            return Err(RecoveryError::InitialSyncActive);
        }

        let Some(recovery_ts) = self.recovery_timestamp_precursor() else {
            fatal!(7215, "cannot replay the oplog to a timestamp without a stable checkpoint");
        };

        reconcile_truncate_point(
            self.markers.as_ref(),
            self.engine.as_ref(),
            self.oplog.as_ref(),
            Some(recovery_ts),
        )
        .await?;

        let start = self.markers.applied_through().await?.ts;
        if start.is_null() {
            tracing::info!("No stored oplog entries to apply for recovery");
            self.prepared.reconstruct(ApplyMode::Recovering).await?;
            return Ok(());
        }
        if end.is_null() {
            fatal!(7226, "cannot replay the oplog up to the null timestamp");
        }

        if start == end {
            tracing::info!(
                start = %start,
                end = %end,
                "No oplog entries to apply for recovery, start point is at the end point"
            );
            self.prepared.reconstruct(ApplyMode::Recovering).await?;
            return Ok(());
        }
        if start > end {
            return Err(RecoveryError::StartBeyondEnd { start, end });
        }

        let applied_up_to = self.apply_oplog_operations(start, end).await?;
        if applied_up_to.is_null() {
            tracing::info!(
                start = %start,
                end = %end,
                "No stored oplog entries to apply between the start point (inclusive) and \
                 the end point (inclusive)"
            );
        } else if applied_up_to > end {
            fatal!(7227, "applied through {applied_up_to}, beyond the requested end point {end}");
        }

        self.prepared.reconstruct(ApplyMode::Recovering).await?;
        Ok(())
    }

    /// Recovers a node started in maintenance mode, then sets it
    /// read-only.
    ///
    /// Without a stable checkpoint this is only permitted when the
    /// node takes an unstable checkpoint on shutdown, in which case no
    /// replay may be needed at all; anything else is fatal.
    ///
    /// # Errors
    ///
    /// Returns an error when a collaborator fails; invariant
    /// violations terminate the process.
    pub async fn recover_from_oplog_as_standalone(&self) -> Result<()> {
        let recovery_ts = self.recovery_timestamp_precursor();

        // Prime the cached oplog handle before recovery logs from it.
        self.oplog.acquire_for_logging().await?;

        if recovery_ts.is_some() {
            // Pass no stable timestamp so the storage engine is
            // re-consulted, exactly as on replica-set recovery.
            self.recover_from_oplog(None).await;
        } else if self.config.take_unstable_checkpoint_on_shutdown {
            tracing::info!(
                "Recovering from an unstable checkpoint with take-unstable-checkpoint-on-\
                 shutdown, confirming that no oplog recovery is needed"
            );
            self.assert_no_recovery_needed_on_unstable_checkpoint().await?;
            tracing::info!(
                "Not performing any oplog recovery, the unstable checkpoint is up to date"
            );
        } else {
            fatal!(7214, "cannot recover the oplog as a standalone without a stable checkpoint");
        }

        self.prepared.reconstruct(ApplyMode::Recovering).await?;

        tracing::warn!("Setting the node to read-only mode after standalone oplog recovery");
        self.state.set_read_only(true);
        Ok(())
    }

    /// Verifies that an unstable checkpoint needs no oplog recovery.
    ///
    /// Any surprise is fatal: a node configured to take an unstable
    /// checkpoint on clean shutdown must come back up with nothing to
    /// replay.
    ///
    /// # Errors
    ///
    /// Returns an error when a marker cannot be read.
    pub async fn assert_no_recovery_needed_on_unstable_checkpoint(&self) -> Result<()> {
        if !self.storage.supports_recovery_timestamp() || self.storage.recovery_timestamp().is_some()
        {
            fatal!(7228, "unstable-checkpoint assertion run with a stable checkpoint present");
        }

        if self.markers.initial_sync_flag().await? {
            fatal!(7216, "unexpected recovery needed, initial sync flag set");
        }

        let truncate_point = self.markers.oplog_truncate_after_point().await?;
        if !truncate_point.is_null() {
            fatal!(
                7217,
                "unexpected recovery needed, the oplog requires truncation after {truncate_point}"
            );
        }

        let top_of_oplog = match self.top_of_oplog().await {
            Ok(top) => top,
            Err(e) => fatal!(7218, "recovery not possible, no oplog found: {e}"),
        };

        let applied_through = self.markers.applied_through().await?;
        if !applied_through.is_null() && applied_through != top_of_oplog {
            fatal!(
                7219,
                "unexpected recovery needed, applied-through {applied_through} is not at the \
                 top of the oplog {top_of_oplog}, the oplog has not been fully applied"
            );
        }

        let min_valid = self.markers.min_valid().await?;
        if min_valid > top_of_oplog {
            fatal!(
                7220,
                "unexpected recovery needed, the top of the oplog {top_of_oplog} is behind \
                 min-valid {min_valid}"
            );
        }

        Ok(())
    }

    /// Demands recovery-timestamp support and rejects a null stable
    /// checkpoint, returning the optional recovery timestamp.
    fn recovery_timestamp_precursor(&self) -> Option<Timestamp> {
        if !self.storage.supports_recovery_timestamp() {
            fatal!(
                7201,
                "cannot recover from the oplog with a storage engine that does not support \
                 recovery timestamps"
            );
        }

        // A missing recovery timestamp means the checkpoint is
        // unstable. A present-but-null one would mean a stable
        // checkpoint taken at the null timestamp, which is impossible.
        let recovery_ts = self.storage.recovery_timestamp();
        if let Some(ts) = recovery_ts {
            if ts.is_null() {
                fatal!(
                    7202,
                    "cannot recover from the oplog with a stable checkpoint at the null timestamp"
                );
            }
        }
        recovery_ts
    }

    async fn recover_from_stable_timestamp(
        &self,
        stable_timestamp: Timestamp,
        applied_through: OpTime,
        top_of_oplog: OpTime,
    ) -> Result<()> {
        if stable_timestamp.is_null() {
            fatal!(7224, "cannot perform stable recovery at the null timestamp");
        }

        let truncate_after = self.markers.oplog_truncate_after_point().await?;
        tracing::info!(
            stable_timestamp = %stable_timestamp,
            top_of_oplog = %top_of_oplog,
            applied_through = %applied_through,
            truncate_after = %truncate_after,
            "Recovering from stable timestamp"
        );
        tracing::info!(
            stable_timestamp = %stable_timestamp,
            "Starting recovery oplog application at the stable timestamp"
        );
        self.apply_to_end_of_oplog(stable_timestamp, top_of_oplog.ts).await
    }

    async fn recover_from_unstable_checkpoint(
        &self,
        applied_through: OpTime,
        top_of_oplog: OpTime,
    ) -> Result<()> {
        tracing::info!(
            top_of_oplog = %top_of_oplog,
            applied_through = %applied_through,
            "Recovering from an unstable checkpoint"
        );

        if applied_through.is_null() {
            // A clean shutdown, or a crash as primary: the data files
            // are consistent at the top of the oplog.
            tracing::info!("No oplog entries to apply for recovery, applied-through is null");
            return Ok(());
        }

        // An unclean shutdown during secondary oplog application.
        // Ragged-tail truncation may have moved the engine's oldest
        // timestamp forward of operations the replay is about to
        // rewrite; move it back to the start point first.
        self.engine.set_oldest_timestamp(applied_through.ts).await?;

        tracing::info!(
            applied_through = %applied_through,
            top_of_oplog = %top_of_oplog,
            "Starting recovery oplog application at the applied-through point, through the \
             top of the oplog"
        );
        self.apply_to_end_of_oplog(applied_through.ts, top_of_oplog.ts).await?;

        self.storage.set_initial_data_timestamp(top_of_oplog.ts).await?;

        // Pin applied-through to the top so a crash before the first
        // stable checkpoint still knows where to replay from, and
        // fence the update into a checkpoint.
        self.markers.set_applied_through(top_of_oplog).await?;
        self.engine.wait_until_unjournaled_writes_durable().await?;
        Ok(())
    }

    async fn apply_to_end_of_oplog(
        &self,
        start: Timestamp,
        top_of_oplog: Timestamp,
    ) -> Result<()> {
        // Checked after the ragged tail is gone: the tail may have
        // been the only thing past the start point.
        if start == top_of_oplog {
            tracing::info!(
                "No oplog entries to apply for recovery, start point is at the top of the oplog"
            );
            return Ok(());
        }
        if start > top_of_oplog {
            fatal!(
                7209,
                "applied op {start} not found, top of oplog is {top_of_oplog}"
            );
        }

        let applied_up_to = self.apply_oplog_operations(start, top_of_oplog).await?;
        if applied_up_to.is_null() {
            fatal!(
                7210,
                "did not apply any operations between {start} and {top_of_oplog}"
            );
        }
        if applied_up_to != top_of_oplog {
            fatal!(
                7210,
                "did not apply to the top of the oplog, applied through {applied_up_to}, \
                 top of oplog {top_of_oplog}"
            );
        }
        Ok(())
    }

    /// Replays `(start, end]` through the applier; the entry at
    /// `start` is already applied and is skipped by the buffer.
    ///
    /// Returns the timestamp of the last applied operation, or the
    /// null timestamp when the window held nothing to apply.
    async fn apply_oplog_operations(&self, start: Timestamp, end: Timestamp) -> Result<Timestamp> {
        tracing::info!(
            start = %start,
            end = %end,
            "Replaying stored operations from the start point through the end point, both \
             inclusive"
        );

        let buffer = Arc::new(OplogReplayBuffer::new(Arc::clone(&self.oplog), start, Some(end)));
        buffer.startup().await?;

        let observer = Arc::new(RecoveryObserver::new());
        let pool = WriterPool::new(self.config.writer_threads);
        let buffer_handle: Arc<dyn OplogBuffer> = buffer.clone();
        let observer_handle: Arc<dyn ApplyObserver> = observer.clone();
        let mut applier = RecoveryOplogApplier::new(
            buffer_handle,
            Arc::clone(&self.application),
            observer_handle,
            pool,
            ApplyMode::Recovering,
        );
        let limits = self.config.batch_limits();

        let mut applied_through = OpTime::null();
        loop {
            let batch = match applier.next_batch(&limits).await {
                Ok(batch) => batch,
                Err(e) => fatal!(7212, "failed to fetch the next applier batch: {e}"),
            };
            if batch.is_empty() {
                break;
            }
            applied_through = applier.apply_batch(batch).await?;
        }
        observer.complete(applied_through);

        if !buffer.is_empty().await? {
            fatal!(
                7211,
                "oplog buffer not empty after applying operations, last applied {applied_through}"
            );
        }
        buffer.shutdown().await?;

        if applied_through.is_null() {
            return Ok(Timestamp::null());
        }

        // A crash before this write replays the same window again,
        // which is safe: a single batch is idempotent under the
        // recovery-mode applier.
        self.markers.set_applied_through(applied_through).await?;
        Ok(applied_through.ts)
    }

    async fn top_of_oplog(&self) -> Result<OpTime> {
        let entry = self.oplog.latest_entry().await?;
        Ok(entry.op_time())
    }
}
