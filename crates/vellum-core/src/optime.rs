//! Optimes: a timestamp qualified by the election term that produced it.

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Term value used before any election has happened.
pub const UNINITIALIZED_TERM: i64 = -1;

/// The position of an operation in the replicated oplog.
///
/// Two optimes compare by term first, then by timestamp: an operation
/// written in a later term supersedes one written in an earlier term
/// even when the earlier one carries a larger timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpTime {
    /// The timestamp of the operation.
    pub ts: Timestamp,
    /// The election term the operation was written in.
    pub term: i64,
}

impl OpTime {
    /// Creates an optime from a timestamp and term.
    #[must_use]
    pub const fn new(ts: Timestamp, term: i64) -> Self {
        Self { ts, term }
    }

    /// The null (unset) optime.
    #[must_use]
    pub const fn null() -> Self {
        Self { ts: Timestamp::null(), term: UNINITIALIZED_TERM }
    }

    /// Returns true if this is the null optime.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.ts.is_null() && self.term == UNINITIALIZED_TERM
    }

    /// Returns the timestamp component.
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.ts
    }
}

impl Default for OpTime {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialOrd for OpTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.term.cmp(&other.term).then_with(|| self.ts.cmp(&other.ts))
    }
}

impl std::fmt::Display for OpTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{ ts: {}, t: {} }}", self.ts, self.term)
    }
}
