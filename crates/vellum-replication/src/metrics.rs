// Copyright 2026 Vellum Dev
// SPDX-License-Identifier: Apache-2.0

//! Recovery metrics registration.
//!
//! Counters recorded during recovery:
//! - Operations and batches applied by replay
//! - Oplog entries removed by ragged-tail truncation
//! - Completed recovery passes

use metrics::describe_counter;

/// Initialize recovery metric descriptions (call once at startup).
pub fn init_recovery_metrics() {
    describe_counter!(
        "vellum_recovery_ops_applied_total",
        "Oplog operations applied during replication recovery"
    );
    describe_counter!(
        "vellum_recovery_batches_applied_total",
        "Oplog batches applied during replication recovery"
    );
    describe_counter!(
        "vellum_recovery_oplog_truncated_total",
        "Oplog entries removed by ragged-tail truncation"
    );
    describe_counter!(
        "vellum_recovery_passes_total",
        "Completed replication recovery replay passes"
    );
}
