//! Storage-tier error types.

use thiserror::Error;

/// A specialized `Result` type for storage-tier operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the storage layer to replication.
#[derive(Debug, Error)]
pub enum Error {
    /// The collection exists but holds no records.
    #[error("collection {0} is empty")]
    CollectionEmpty(String),

    /// The namespace does not exist.
    #[error("namespace {0} not found")]
    NamespaceNotFound(String),

    /// A storage-engine failure with no more specific classification.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted document could not be decoded.
    #[error("corrupt document: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl Error {
    /// Creates a generic storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Returns true for the two "expected empty" oplog signals:
    /// an empty collection or a missing namespace.
    ///
    /// Callers treat these as "nothing to do"; every other storage
    /// error is surfaced as-is.
    #[must_use]
    pub const fn is_empty_oplog(&self) -> bool {
        matches!(self, Self::CollectionEmpty(_) | Self::NamespaceNotFound(_))
    }
}
