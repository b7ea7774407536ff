//! Oplog entry records.
//!
//! An entry is self-describing: it carries its own timestamp and term,
//! the namespace it targets, and an operation document that is opaque
//! to replication recovery (only the applier interprets it).

use serde::{Deserialize, Serialize};

use crate::optime::OpTime;
use crate::timestamp::Timestamp;

/// Opaque handle to a record's position in the oplog record store.
///
/// Only ordering relative to the store's own assignment matters; the
/// value has no meaning outside the store that produced it.
pub type RecordId = u64;

/// A single operation in the oplog.
///
/// Entries in the oplog form a strictly increasing sequence by `ts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OplogEntry {
    /// Timestamp of the operation; the oplog key.
    pub ts: Timestamp,
    /// Election term the operation was written in.
    #[serde(rename = "t")]
    pub term: i64,
    /// Namespace the operation targets.
    pub ns: String,
    /// The operation document. Opaque to recovery.
    pub op: serde_json::Value,
}

impl OplogEntry {
    /// Creates a new oplog entry.
    pub fn new(ts: Timestamp, term: i64, ns: impl Into<String>, op: serde_json::Value) -> Self {
        Self { ts, term, ns: ns.into(), op }
    }

    /// Returns the optime of this entry.
    #[must_use]
    pub const fn op_time(&self) -> OpTime {
        OpTime::new(self.ts, self.term)
    }

    /// Approximate serialized size of the entry in bytes.
    ///
    /// Used for batch byte limits; accuracy to the exact on-disk size
    /// is not required.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        let op_len = serde_json::to_vec(&self.op).map_or(0, |v| v.len());
        // ts + term fixed width, plus namespace and document.
        16 + self.ns.len() + op_len
    }
}
