// Copyright 2026 Vellum Dev
// SPDX-License-Identifier: Apache-2.0

//! End-to-end recovery scenarios against in-memory collaborators.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use vellum_core::{OpTime, OplogEntry, Timestamp};
use vellum_replication::{
    ApplyMode, ConsistencyMarkers, FileMarkerStore, MemMarkerStore, MemOplogStore,
    MemStorageEngine, NodeState, OplogApplication, OplogStore, PreparedTransactions,
    RecoveryConfig, RecoveryError, ReplicationRecovery, StorageEngine, StorageInterface,
};

fn ts(secs: u32, inc: u32) -> Timestamp {
    Timestamp::from_parts(secs, inc)
}

fn entry(secs: u32, inc: u32) -> OplogEntry {
    OplogEntry::new(ts(secs, inc), 1, "app.docs", json!({"i": [secs, inc]}))
}

/// Records every applied operation in order.
struct RecordingApplication {
    applied: Mutex<Vec<Timestamp>>,
}

impl RecordingApplication {
    fn new() -> Self {
        Self { applied: Mutex::new(Vec::new()) }
    }

    fn applied(&self) -> Vec<Timestamp> {
        self.applied.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.applied.lock().unwrap().clear();
    }
}

#[async_trait]
impl OplogApplication for RecordingApplication {
    async fn apply_operation(&self, entry: &OplogEntry, mode: ApplyMode) -> vellum_core::Result<()> {
        assert_eq!(mode, ApplyMode::Recovering);
        self.applied.lock().unwrap().push(entry.ts);
        Ok(())
    }
}

/// Counts prepared-transaction reconstruction passes.
struct RecordingPrepared {
    runs: AtomicU64,
}

impl RecordingPrepared {
    fn new() -> Self {
        Self { runs: AtomicU64::new(0) }
    }

    fn runs(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PreparedTransactions for RecordingPrepared {
    async fn reconstruct(&self, mode: ApplyMode) -> vellum_core::Result<()> {
        assert_eq!(mode, ApplyMode::Recovering);
        self.runs.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

struct Harness {
    oplog: Arc<MemOplogStore>,
    markers: Arc<MemMarkerStore>,
    engine: Arc<MemStorageEngine>,
    application: Arc<RecordingApplication>,
    prepared: Arc<RecordingPrepared>,
    state: Arc<NodeState>,
    recovery: ReplicationRecovery,
}

fn harness_with_config(config: RecoveryConfig) -> Harness {
    let oplog = Arc::new(MemOplogStore::new());
    let markers = Arc::new(MemMarkerStore::new());
    let engine = Arc::new(MemStorageEngine::new());
    let application = Arc::new(RecordingApplication::new());
    let prepared = Arc::new(RecordingPrepared::new());
    let state = Arc::new(NodeState::new());
    let recovery = ReplicationRecovery::new(
        Arc::clone(&engine) as Arc<dyn StorageInterface>,
        Arc::clone(&engine) as Arc<dyn StorageEngine>,
        Arc::clone(&markers) as Arc<dyn ConsistencyMarkers>,
        Arc::clone(&oplog) as Arc<dyn OplogStore>,
        Arc::clone(&application) as Arc<dyn OplogApplication>,
        Arc::clone(&prepared) as Arc<dyn PreparedTransactions>,
        Arc::clone(&state),
        config,
    );
    Harness { oplog, markers, engine, application, prepared, state, recovery }
}

fn harness() -> Harness {
    harness_with_config(RecoveryConfig::default())
}

// Scenario: clean shutdown with a stable checkpoint at the top of the
// oplog. Nothing is truncated, nothing is replayed, no marker moves.
#[tokio::test]
async fn test_clean_shutdown_with_stable_checkpoint() {
    let h = harness();
    for inc in 1..=5 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.engine.set_recovery_timestamp(Some(ts(10, 5)));

    h.recovery.recover_from_oplog(None).await;

    assert!(h.application.applied().is_empty());
    assert_eq!(h.oplog.len(), 5);
    assert!(h.markers.applied_through().await.unwrap().is_null());
    assert_eq!(h.oplog.latest_entry().await.unwrap().ts, ts(10, 5));
    assert!(!h.state.is_in_recovery());
}

// Scenario: crash as secondary with a stable checkpoint at the
// applied-through point. Replay covers everything after it.
#[tokio::test]
async fn test_crash_as_secondary_stable_recovery() {
    let h = harness();
    for inc in 1..=5 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.oplog.append(entry(11, 1)).unwrap();
    h.oplog.append(entry(12, 1)).unwrap();
    h.oplog.append(entry(12, 2)).unwrap();
    h.markers.set_applied_through(OpTime::new(ts(10, 4), 1)).await.unwrap();
    h.engine.set_recovery_timestamp(Some(ts(10, 4)));

    h.recovery.recover_from_oplog(None).await;

    assert_eq!(
        h.application.applied(),
        vec![ts(10, 5), ts(11, 1), ts(12, 1), ts(12, 2)]
    );
    assert_eq!(h.markers.applied_through().await.unwrap().ts, ts(12, 2));
    assert_eq!(h.prepared.runs(), 1);
}

// Scenario: crash as secondary with only an unstable checkpoint.
// Replay runs from applied-through to the top, the oldest timestamp
// moves back to the start point first, and the marker updates are
// fenced.
#[tokio::test]
async fn test_crash_as_secondary_unstable_recovery() {
    let h = harness();
    for inc in 1..=5 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.oplog.append(entry(11, 1)).unwrap();
    h.oplog.append(entry(12, 1)).unwrap();
    h.oplog.append(entry(12, 2)).unwrap();
    h.markers.set_applied_through(OpTime::new(ts(10, 4), 1)).await.unwrap();
    // No stable checkpoint.

    h.recovery.recover_from_oplog(None).await;

    assert_eq!(
        h.application.applied(),
        vec![ts(10, 5), ts(11, 1), ts(12, 1), ts(12, 2)]
    );
    assert_eq!(h.engine.oldest_timestamp(), ts(10, 4));
    assert_eq!(h.engine.initial_data_timestamp(), ts(12, 2));
    assert_eq!(h.markers.applied_through().await.unwrap(), OpTime::new(ts(12, 2), 1));
    assert_eq!(h.engine.unjournaled_fences(), 1);
}

// Property: recovery is a fixed point. Running it again with the same
// inputs applies nothing and leaves applied-through at the top.
#[tokio::test]
async fn test_recovery_is_a_fixed_point() {
    let h = harness();
    for inc in 1..=4 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.markers.set_applied_through(OpTime::new(ts(10, 2), 1)).await.unwrap();

    h.recovery.recover_from_oplog(None).await;
    let after_first = h.markers.applied_through().await.unwrap();
    assert_eq!(after_first.ts, ts(10, 4));

    h.application.clear();
    h.recovery.recover_from_oplog(None).await;

    assert!(h.application.applied().is_empty());
    let after_second = h.markers.applied_through().await.unwrap();
    assert_eq!(after_second, OpTime::new(ts(10, 4), 1));
    // Applied-through never decreases across successful recoveries.
    assert!(after_second >= after_first);
}

// Scenario: ragged tail. Entries past the truncate-after point are
// excised inclusively, the marker is cleared and fenced, and no
// replay is needed.
#[tokio::test]
async fn test_ragged_tail_truncation() {
    let h = harness();
    for inc in 1..=5 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.oplog.append(entry(11, 1)).unwrap();
    h.oplog.append(entry(11, 2)).unwrap();
    h.markers.set_oplog_truncate_after_point(ts(10, 5)).await.unwrap();
    h.engine.set_recovery_timestamp(Some(ts(10, 5)));

    h.recovery.recover_from_oplog(None).await;

    let entries = h.oplog.entries();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries.last().unwrap().ts, ts(10, 5));
    assert!(h.markers.oplog_truncate_after_point().await.unwrap().is_null());
    assert!(h.engine.durable_fences() >= 1);
    assert!(h.application.applied().is_empty());
}

// Property: no entry at or before the stable timestamp is truncated
// even when the recorded truncate point predates it.
#[tokio::test]
async fn test_truncate_point_clamped_to_stable_timestamp() {
    let h = harness();
    for inc in 1..=5 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.oplog.append(entry(11, 1)).unwrap();
    h.markers.set_oplog_truncate_after_point(ts(10, 2)).await.unwrap();
    h.markers.set_applied_through(OpTime::new(ts(10, 5), 1)).await.unwrap();
    h.engine.set_recovery_timestamp(Some(ts(10, 5)));

    h.recovery.recover_from_oplog(None).await;

    let entries = h.oplog.entries();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries.last().unwrap().ts, ts(10, 5));
}

// Scenario: bounded replay after a rollback stops at the end point.
#[tokio::test]
async fn test_recover_from_oplog_up_to() {
    let h = harness();
    for inc in 1..=5 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.oplog.append(entry(11, 1)).unwrap();
    h.oplog.append(entry(14, 5)).unwrap();
    h.oplog.append(entry(15, 0)).unwrap();
    h.oplog.append(entry(16, 1)).unwrap();
    h.oplog.append(entry(20, 1)).unwrap();
    h.markers.set_applied_through(OpTime::new(ts(10, 4), 1)).await.unwrap();
    h.engine.set_recovery_timestamp(Some(ts(10, 4)));

    h.recovery.recover_from_oplog_up_to(ts(15, 0)).await.unwrap();

    assert_eq!(
        h.application.applied(),
        vec![ts(10, 5), ts(11, 1), ts(14, 5), ts(15, 0)]
    );
    let applied_through = h.markers.applied_through().await.unwrap();
    assert!(applied_through.ts <= ts(15, 0));
    assert_eq!(applied_through.ts, ts(15, 0));
    assert_eq!(h.prepared.runs(), 1);
}

// Bounded replay where the end point falls between entries: replay
// stops at the last entry at or before it.
#[tokio::test]
async fn test_recover_from_oplog_up_to_between_entries() {
    let h = harness();
    for inc in 1..=5 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.oplog.append(entry(12, 1)).unwrap();
    h.markers.set_applied_through(OpTime::new(ts(10, 2), 1)).await.unwrap();
    h.engine.set_recovery_timestamp(Some(ts(10, 2)));

    h.recovery.recover_from_oplog_up_to(ts(11, 0)).await.unwrap();

    assert_eq!(h.application.applied(), vec![ts(10, 3), ts(10, 4), ts(10, 5)]);
    assert_eq!(h.markers.applied_through().await.unwrap().ts, ts(10, 5));
}

#[tokio::test]
async fn test_up_to_rejected_during_initial_sync() {
    let h = harness();
    h.markers.set_initial_sync_flag(true).await.unwrap();
    h.engine.set_recovery_timestamp(Some(ts(10, 1)));

    let err = h.recovery.recover_from_oplog_up_to(ts(15, 0)).await.unwrap_err();
    assert!(matches!(err, RecoveryError::InitialSyncActive));
    assert_eq!(h.prepared.runs(), 0);
}

#[tokio::test]
async fn test_up_to_start_beyond_end_is_a_caller_error() {
    let h = harness();
    for inc in 1..=3 {
        h.oplog.append(entry(20, inc)).unwrap();
    }
    h.markers.set_applied_through(OpTime::new(ts(20, 3), 1)).await.unwrap();
    h.engine.set_recovery_timestamp(Some(ts(20, 3)));

    let err = h.recovery.recover_from_oplog_up_to(ts(15, 0)).await.unwrap_err();
    assert!(matches!(err, RecoveryError::StartBeyondEnd { .. }));
    assert!(h.application.applied().is_empty());
}

#[tokio::test]
async fn test_up_to_start_at_end_is_a_noop() {
    let h = harness();
    for inc in 1..=3 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.markers.set_applied_through(OpTime::new(ts(10, 3), 1)).await.unwrap();
    h.engine.set_recovery_timestamp(Some(ts(10, 3)));

    h.recovery.recover_from_oplog_up_to(ts(10, 3)).await.unwrap();

    assert!(h.application.applied().is_empty());
    assert_eq!(h.prepared.runs(), 1);
}

#[tokio::test]
async fn test_up_to_with_null_applied_through_is_a_noop() {
    let h = harness();
    for inc in 1..=3 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.engine.set_recovery_timestamp(Some(ts(10, 3)));

    h.recovery.recover_from_oplog_up_to(ts(15, 0)).await.unwrap();

    assert!(h.application.applied().is_empty());
    assert_eq!(h.prepared.runs(), 1);
}

// Scenario: standalone start with an unstable checkpoint and the
// shutdown flag set. The assertion passes, nothing is replayed, and
// the node comes up read-only.
#[tokio::test]
async fn test_standalone_unstable_checkpoint_with_flag() {
    let h = harness_with_config(
        RecoveryConfig::new().take_unstable_checkpoint_on_shutdown(true),
    );
    for inc in 1..=3 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    // No stable checkpoint, no markers set.

    h.recovery.recover_from_oplog_as_standalone().await.unwrap();

    assert!(h.application.applied().is_empty());
    assert!(h.state.is_read_only());
    assert_eq!(h.prepared.runs(), 1);
}

// Scenario: standalone start without a stable checkpoint and without
// the shutdown flag is fatal.
#[tokio::test]
#[should_panic(expected = "fatal assertion 7214")]
async fn test_standalone_without_stable_checkpoint_or_flag_is_fatal() {
    let h = harness();
    for inc in 1..=3 {
        h.oplog.append(entry(10, inc)).unwrap();
    }

    let _ = h.recovery.recover_from_oplog_as_standalone().await;
}

// Standalone with a stable checkpoint runs full recovery and still
// sets the node read-only.
#[tokio::test]
async fn test_standalone_with_stable_checkpoint_recovers() {
    let h = harness();
    for inc in 1..=4 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.markers.set_applied_through(OpTime::new(ts(10, 2), 1)).await.unwrap();
    h.engine.set_recovery_timestamp(Some(ts(10, 2)));

    h.recovery.recover_from_oplog_as_standalone().await.unwrap();

    assert_eq!(h.application.applied(), vec![ts(10, 3), ts(10, 4)]);
    assert!(h.state.is_read_only());
}

#[tokio::test]
#[should_panic(expected = "fatal assertion 7217")]
async fn test_unstable_assertion_rejects_pending_truncation() {
    let h = harness_with_config(
        RecoveryConfig::new().take_unstable_checkpoint_on_shutdown(true),
    );
    for inc in 1..=3 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.markers.set_oplog_truncate_after_point(ts(10, 2)).await.unwrap();

    let _ = h.recovery.recover_from_oplog_as_standalone().await;
}

#[tokio::test]
#[should_panic(expected = "fatal assertion 7219")]
async fn test_unstable_assertion_rejects_lagging_applied_through() {
    let h = harness_with_config(
        RecoveryConfig::new().take_unstable_checkpoint_on_shutdown(true),
    );
    for inc in 1..=3 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.markers.set_applied_through(OpTime::new(ts(10, 1), 1)).await.unwrap();

    let _ = h.recovery.recover_from_oplog_as_standalone().await;
}

#[tokio::test]
#[should_panic(expected = "fatal assertion 7220")]
async fn test_unstable_assertion_rejects_min_valid_past_top() {
    let h = harness_with_config(
        RecoveryConfig::new().take_unstable_checkpoint_on_shutdown(true),
    );
    for inc in 1..=3 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.markers.set_min_valid(OpTime::new(ts(11, 1), 1)).await.unwrap();

    let _ = h.recovery.recover_from_oplog_as_standalone().await;
}

// Property: recovery with the initial sync flag set is a strict
// no-op; no marker moves and nothing is applied.
#[tokio::test]
async fn test_initial_sync_flag_is_a_strict_noop() {
    let h = harness();
    for inc in 1..=3 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.markers.set_initial_sync_flag(true).await.unwrap();
    h.markers.set_oplog_truncate_after_point(ts(10, 2)).await.unwrap();
    h.engine.set_recovery_timestamp(Some(ts(10, 3)));

    h.recovery.recover_from_oplog(None).await;

    assert!(h.application.applied().is_empty());
    assert_eq!(h.oplog.len(), 3);
    assert_eq!(h.markers.oplog_truncate_after_point().await.unwrap(), ts(10, 2));
    assert!(h.markers.applied_through().await.unwrap().is_null());
    assert_eq!(h.prepared.runs(), 0);
}

// A storage engine without recovery-timestamp support cannot serve
// the bounded entry point.
#[tokio::test]
#[should_panic(expected = "fatal assertion 7201")]
async fn test_up_to_requires_recovery_timestamp_support() {
    let oplog = Arc::new(MemOplogStore::new());
    let markers = Arc::new(MemMarkerStore::new());
    let engine = Arc::new(MemStorageEngine::without_recovery_timestamps());
    let recovery = ReplicationRecovery::new(
        Arc::clone(&engine) as Arc<dyn StorageInterface>,
        Arc::clone(&engine) as Arc<dyn StorageEngine>,
        Arc::clone(&markers) as Arc<dyn ConsistencyMarkers>,
        Arc::clone(&oplog) as Arc<dyn OplogStore>,
        Arc::new(RecordingApplication::new()),
        Arc::new(RecordingPrepared::new()),
        Arc::new(NodeState::new()),
        RecoveryConfig::default(),
    );

    let _ = recovery.recover_from_oplog_up_to(ts(15, 0)).await;
}

// A present-but-null recovery timestamp is an illegal state.
#[tokio::test]
#[should_panic(expected = "fatal assertion 7202")]
async fn test_null_recovery_timestamp_is_fatal() {
    let h = harness();
    h.oplog.append(entry(10, 1)).unwrap();
    h.engine.set_recovery_timestamp(Some(Timestamp::null()));

    let _ = h.recovery.recover_from_oplog_as_standalone().await;
}

// Batch limits split a long replay into multiple batches without
// losing exact coverage of the window.
#[tokio::test]
async fn test_replay_spanning_many_batches() {
    let h = harness_with_config(RecoveryConfig::new().batch_max_ops(3).writer_threads(2));
    for inc in 1..=20 {
        h.oplog.append(entry(10, inc)).unwrap();
    }
    h.markers.set_applied_through(OpTime::new(ts(10, 1), 1)).await.unwrap();

    h.recovery.recover_from_oplog(None).await;

    let applied = h.application.applied();
    assert_eq!(applied.len(), 19);
    assert_eq!(applied.first().copied(), Some(ts(10, 2)));
    assert_eq!(applied.last().copied(), Some(ts(10, 20)));
    assert_eq!(h.markers.applied_through().await.unwrap().ts, ts(10, 20));
}

// The driver works against the file-backed marker store as well; the
// advanced applied-through survives a reopen.
#[tokio::test]
async fn test_recovery_with_file_marker_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("markers.json");

    let oplog = Arc::new(MemOplogStore::new());
    for inc in 1..=4 {
        oplog.append(entry(10, inc)).unwrap();
    }
    let engine = Arc::new(MemStorageEngine::new());
    let application = Arc::new(RecordingApplication::new());

    {
        let markers = Arc::new(FileMarkerStore::open(&path).await.unwrap());
        markers.set_applied_through(OpTime::new(ts(10, 2), 1)).await.unwrap();
        let recovery = ReplicationRecovery::new(
            Arc::clone(&engine) as Arc<dyn StorageInterface>,
            Arc::clone(&engine) as Arc<dyn StorageEngine>,
            Arc::clone(&markers) as Arc<dyn ConsistencyMarkers>,
            Arc::clone(&oplog) as Arc<dyn OplogStore>,
            Arc::clone(&application) as Arc<dyn OplogApplication>,
            Arc::new(RecordingPrepared::new()),
            Arc::new(NodeState::new()),
            RecoveryConfig::default(),
        );
        recovery.recover_from_oplog(None).await;
    }

    assert_eq!(application.applied(), vec![ts(10, 3), ts(10, 4)]);
    let reopened = FileMarkerStore::open(&path).await.unwrap();
    assert_eq!(reopened.applied_through().await.unwrap(), OpTime::new(ts(10, 4), 1));
}
