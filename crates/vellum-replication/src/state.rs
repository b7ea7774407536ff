//! Process-wide replication state flags.

use std::sync::atomic::{AtomicBool, Ordering};

/// Node-level flags shared between recovery and the serving layers.
///
/// The in-recovery flag is the only cross-component signal recovery
/// exposes; it is set for the duration of `recover_from_oplog` and
/// cleared on every exit path. The read-only flag is set by standalone
/// recovery on success.
#[derive(Debug, Default)]
pub struct NodeState {
    in_recovery: AtomicBool,
    read_only: AtomicBool,
}

impl NodeState {
    /// Creates node state with both flags cleared.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while replication recovery is running.
    #[must_use]
    pub fn is_in_recovery(&self) -> bool {
        self.in_recovery.load(Ordering::Acquire)
    }

    /// Returns true when the node has been set read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Sets the read-only flag.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    /// Marks the node as in recovery, returning a guard that clears
    /// the flag when dropped.
    pub(crate) fn begin_recovery(&self) -> RecoveryGuard<'_> {
        let was_set = self.in_recovery.swap(true, Ordering::AcqRel);
        debug_assert!(!was_set, "replication recovery entered twice");
        RecoveryGuard { state: self }
    }
}

/// Scoped ownership of the in-recovery flag.
pub(crate) struct RecoveryGuard<'a> {
    state: &'a NodeState,
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        let was_set = self.state.in_recovery.swap(false, Ordering::AcqRel);
        debug_assert!(was_set, "replication recovery flag unexpectedly cleared");
    }
}
