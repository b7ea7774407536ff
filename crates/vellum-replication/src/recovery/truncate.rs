//! Ragged-tail excision: truncating the oplog after a known-good point.

use std::time::Instant;

use metrics::counter;
use vellum_core::{RecordId, Result, Timestamp};

use crate::fatal::fatal;
use crate::markers::ConsistencyMarkers;
use crate::oplog::OplogStore;
use crate::storage::StorageEngine;

/// Deletes every oplog entry with `ts > truncate_ts`.
///
/// Scans the oplog in reverse, newest to oldest, until it finds an
/// entry at or before the truncate point, then capped-truncates
/// inclusive of the previous (newer) record seen. The truncate point
/// does not have to match an entry exactly. Reaching the beginning of
/// the oplog without finding an entry at or before the point means the
/// log no longer bridges to the checkpoint, which is fatal.
pub(crate) async fn truncate_oplog_to(
    oplog: &dyn OplogStore,
    truncate_ts: Timestamp,
) -> Result<()> {
    let started = Instant::now();
    let mut cursor = match oplog.scan_reverse().await {
        Ok(cursor) => cursor,
        Err(e) if e.is_empty_oplog() => {
            fatal!(7221, "cannot truncate the oplog, it does not exist: {e}")
        }
        Err(e) => return Err(e),
    };

    let mut count = 0usize;
    let mut previous_id: Option<RecordId> = None;
    let mut top_of_oplog = Timestamp::null();

    while let Some((id, entry)) = cursor.next().await? {
        count += 1;
        if count == 1 {
            tracing::debug!(ts = %entry.ts, "Oplog tail entry");
            top_of_oplog = entry.ts;
        }

        if entry.ts <= truncate_ts {
            // count == 1 means everything in the oplog is already at
            // or before the truncate point.
            if count != 1 {
                let Some(previous_id) = previous_id else {
                    fatal!(7222, "no record id recorded for the first entry past {truncate_ts}");
                };
                tracing::info!(
                    first_removed = %entry.ts,
                    top_of_oplog = %top_of_oplog,
                    truncate_after = %truncate_ts,
                    "Truncating oplog entries past the truncate point"
                );
                oplog.capped_truncate_after(previous_id, true).await?;
                counter!("vellum_recovery_oplog_truncated_total").increment((count - 1) as u64);
            } else {
                tracing::info!(
                    truncate_after = %truncate_ts,
                    top_of_oplog = %top_of_oplog,
                    "No oplog entries after the truncate point"
                );
            }
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Replication recovery oplog truncation finished"
            );
            return Ok(());
        }

        previous_id = Some(id);
    }

    fatal!(
        7208,
        "reached the beginning of the oplog looking for an entry at or before {truncate_ts} \
         after scanning {count} entries"
    );
}

/// Truncates the ragged tail if one is known, then clears the
/// truncate-after point and fences durability.
///
/// When the recorded point is at or before the stable timestamp, the
/// effective point is clamped up to the stable timestamp: everything
/// at or before the stable checkpoint is already durable and
/// consistent, and the recorded point may be stale-earlier than
/// reality.
pub(crate) async fn reconcile_truncate_point(
    markers: &dyn ConsistencyMarkers,
    engine: &dyn StorageEngine,
    oplog: &dyn OplogStore,
    stable_timestamp: Option<Timestamp>,
) -> Result<()> {
    let mut truncate_point = markers.oplog_truncate_after_point().await?;
    if truncate_point.is_null() {
        // No holes in the oplog necessitate truncation.
        return Ok(());
    }

    if let Some(stable) = stable_timestamp {
        if !stable.is_null() && truncate_point <= stable {
            tracing::info!(
                truncate_point = %truncate_point,
                stable_timestamp = %stable,
                "Oplog truncate point is at or before the stable timestamp, truncating after \
                 the stable timestamp instead"
            );
            truncate_point = stable;
        }
    }

    tracing::info!(
        truncate_point = %truncate_point,
        "Removing unapplied oplog entries after the truncate point"
    );
    truncate_oplog_to(oplog, truncate_point).await?;

    // Clear the point so future entries are not truncated erroneously,
    // and make the cleared marker durable before replay begins.
    markers.set_oplog_truncate_after_point(Timestamp::null()).await?;
    engine.wait_until_durable().await?;
    Ok(())
}
