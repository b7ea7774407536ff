//! Consistency markers: the persisted breadcrumbs recovery reasons from.
//!
//! Four small values describe what the previous incarnation of the
//! node knew at shutdown:
//!
//! - `initial_sync_flag`: an initial sync owns the node; recovery
//!   must be a no-op.
//! - `applied_through`: optime of the last operation known fully
//!   applied to the data files; null after a clean shutdown or a crash
//!   as primary.
//! - `oplog_truncate_after_point`: when non-null, the oplog may hold
//!   entries after this point that were never durably ordered (the
//!   ragged tail).
//! - `min_valid`: optime the data files must reach before they can be
//!   considered consistent.
//!
//! Null `Timestamp`/`OpTime` values mean "unset"; the store never uses
//! `Option` for them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use vellum_core::{OpTime, Result, Timestamp};

/// Persisted small-key-value face for the consistency markers.
///
/// The store handles its own locking; recovery reads each marker at
/// most once per pass and writes them only on successful completion.
#[async_trait]
pub trait ConsistencyMarkers: Send + Sync {
    /// Whether an initial sync owns the node.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be read.
    async fn initial_sync_flag(&self) -> Result<bool>;

    /// Sets the initial sync flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be persisted.
    async fn set_initial_sync_flag(&self, set: bool) -> Result<()>;

    /// The optime of the last operation known fully applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be read.
    async fn applied_through(&self) -> Result<OpTime>;

    /// Sets the applied-through optime.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be persisted.
    async fn set_applied_through(&self, op_time: OpTime) -> Result<()>;

    /// The oplog truncate-after point, null when no ragged tail is
    /// known.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be read.
    async fn oplog_truncate_after_point(&self) -> Result<Timestamp>;

    /// Sets (or, with a null timestamp, clears) the truncate-after
    /// point.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be persisted.
    async fn set_oplog_truncate_after_point(&self, ts: Timestamp) -> Result<()>;

    /// The min-valid optime.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be read.
    async fn min_valid(&self) -> Result<OpTime>;

    /// Sets the min-valid optime.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be persisted.
    async fn set_min_valid(&self, op_time: OpTime) -> Result<()>;
}

/// The marker document as persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct MarkerDocument {
    initial_sync_flag: bool,
    applied_through: OpTime,
    oplog_truncate_after_point: Timestamp,
    min_valid: OpTime,
}

/// In-memory marker store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemMarkerStore {
    doc: RwLock<MarkerDocument>,
}

impl MemMarkerStore {
    /// Creates a store with all markers unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsistencyMarkers for MemMarkerStore {
    async fn initial_sync_flag(&self) -> Result<bool> {
        Ok(self.doc.read().await.initial_sync_flag)
    }

    async fn set_initial_sync_flag(&self, set: bool) -> Result<()> {
        self.doc.write().await.initial_sync_flag = set;
        Ok(())
    }

    async fn applied_through(&self) -> Result<OpTime> {
        Ok(self.doc.read().await.applied_through)
    }

    async fn set_applied_through(&self, op_time: OpTime) -> Result<()> {
        self.doc.write().await.applied_through = op_time;
        Ok(())
    }

    async fn oplog_truncate_after_point(&self) -> Result<Timestamp> {
        Ok(self.doc.read().await.oplog_truncate_after_point)
    }

    async fn set_oplog_truncate_after_point(&self, ts: Timestamp) -> Result<()> {
        self.doc.write().await.oplog_truncate_after_point = ts;
        Ok(())
    }

    async fn min_valid(&self) -> Result<OpTime> {
        Ok(self.doc.read().await.min_valid)
    }

    async fn set_min_valid(&self, op_time: OpTime) -> Result<()> {
        self.doc.write().await.min_valid = op_time;
        Ok(())
    }
}

/// File-backed marker store.
///
/// Persists the marker document as a single JSON file. Every write
/// lands in a temp file, is fsynced, and is renamed over the previous
/// document, so a crash mid-write leaves the old markers intact.
#[derive(Debug)]
pub struct FileMarkerStore {
    path: PathBuf,
    doc: RwLock<MarkerDocument>,
}

impl FileMarkerStore {
    /// Opens the store at `path`, reading the existing document if one
    /// is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or
    /// decoded.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MarkerDocument::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, doc: RwLock::new(doc) })
    }

    async fn persist(&self, doc: &MarkerDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        let file = tokio::fs::File::open(&tmp).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConsistencyMarkers for FileMarkerStore {
    async fn initial_sync_flag(&self) -> Result<bool> {
        Ok(self.doc.read().await.initial_sync_flag)
    }

    async fn set_initial_sync_flag(&self, set: bool) -> Result<()> {
        let mut doc = self.doc.write().await;
        doc.initial_sync_flag = set;
        self.persist(&doc).await
    }

    async fn applied_through(&self) -> Result<OpTime> {
        Ok(self.doc.read().await.applied_through)
    }

    async fn set_applied_through(&self, op_time: OpTime) -> Result<()> {
        let mut doc = self.doc.write().await;
        doc.applied_through = op_time;
        self.persist(&doc).await
    }

    async fn oplog_truncate_after_point(&self) -> Result<Timestamp> {
        Ok(self.doc.read().await.oplog_truncate_after_point)
    }

    async fn set_oplog_truncate_after_point(&self, ts: Timestamp) -> Result<()> {
        let mut doc = self.doc.write().await;
        doc.oplog_truncate_after_point = ts;
        self.persist(&doc).await
    }

    async fn min_valid(&self) -> Result<OpTime> {
        Ok(self.doc.read().await.min_valid)
    }

    async fn set_min_valid(&self, op_time: OpTime) -> Result<()> {
        let mut doc = self.doc.write().await;
        doc.min_valid = op_time;
        self.persist(&doc).await
    }
}
