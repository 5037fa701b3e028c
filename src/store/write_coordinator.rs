//! Two-Phase Write
//!
//! Replaces the content at a path without a transactional backend.
//!
//! ```text
//! TRY_UPDATE ──ok──────────────────────────────────────────► DONE (InPlace)
//!     │ any error
//!     ▼
//! FALLBACK: upload temp ──err──► delete temp (best effort) ─► FAILED
//!     │ ok
//!     ▼
//! delete path (best effort, NotFound ignored)
//!     │
//!     ▼
//! move temp → path ──ok────────────────────────────────────► DONE (Replaced)
//!     │ err
//!     ▼
//! FAILED: temp orphaned, path may be absent
//! ```
//!
//! After DONE the path holds either the prior or the new content in full.
//! Between the delete and the move the path is absent; readers in that
//! window see an empty table. A failed move is not recovered: the temp
//! object is left for an operator, see [`WriteCoordinator::orphaned_temps`].
//! Nothing is retried here.

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::store::object_store::{file_name, parent_folder, ObjectStore, UploadMode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Marker between a path and its temp suffix
pub const TEMP_MARKER: &str = ".tmp.";

/// Produces unique temp paths for the fallback phase
pub trait TempNamer: Send + Sync + 'static {
    fn temp_path(&self, path: &str) -> String;
}

/// `<path>.tmp.<millis>-<nonce>-<seq>`
///
/// The nonce is drawn once per namer, so two handles sharing a clock tick
/// still name their temps apart.
#[derive(Debug)]
pub struct TimestampTempNamer<C: Clock> {
    clock: C,
    nonce: u64,
    seq: AtomicU64,
}

impl<C: Clock> TimestampTempNamer<C> {
    pub fn new(clock: C) -> Self {
        Self::with_nonce(clock, rand::random())
    }

    /// Fixed nonce, for replayable simulation runs
    pub fn with_nonce(clock: C, nonce: u64) -> Self {
        TimestampTempNamer {
            clock,
            nonce,
            seq: AtomicU64::new(0),
        }
    }
}

impl<C: Clock> TempNamer for TimestampTempNamer<C> {
    fn temp_path(&self, path: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}{}{}-{:016x}-{}",
            path,
            TEMP_MARKER,
            self.clock.now().as_millis(),
            self.nonce,
            seq
        )
    }
}

/// How a successful write reached its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePath {
    /// `UpdateExisting` upload succeeded
    InPlace,
    /// Temp upload, delete and move
    Replaced,
}

/// A write that did not complete
#[derive(Debug, thiserror::Error)]
pub enum WriteFailure {
    /// The temp object could not be uploaded; the path is untouched
    #[error("temp upload to {temp_path} failed: {source}")]
    TempUpload {
        temp_path: String,
        source: StoreError,
    },
    /// The temp object could not be moved into place. It is left behind and
    /// the path may be absent.
    #[error("move {temp_path} -> {path} failed, temp object orphaned: {source}")]
    Move {
        path: String,
        temp_path: String,
        source: StoreError,
    },
}

impl WriteFailure {
    /// Temp object left in the store by this failure, if any
    pub fn orphaned_temp(&self) -> Option<&str> {
        match self {
            WriteFailure::TempUpload { .. } => None,
            WriteFailure::Move { temp_path, .. } => Some(temp_path),
        }
    }
}

/// Runs the two-phase write against a store
pub struct WriteCoordinator<S: ObjectStore> {
    store: S,
    namer: Arc<dyn TempNamer>,
}

impl<S: ObjectStore> WriteCoordinator<S> {
    pub fn new(store: S, namer: Arc<dyn TempNamer>) -> Self {
        WriteCoordinator { store, namer }
    }

    /// Replace the temp namer
    pub fn with_namer(mut self, namer: Arc<dyn TempNamer>) -> Self {
        self.namer = namer;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replace the content at `path` with `bytes`
    pub async fn write(&self, path: &str, bytes: &[u8]) -> Result<WritePath, WriteFailure> {
        match self
            .store
            .upload_object(path, bytes, UploadMode::UpdateExisting)
            .await
        {
            Ok(meta) => {
                info!(
                    path,
                    revision = %meta.revision,
                    bytes = bytes.len(),
                    "table updated in place"
                );
                return Ok(WritePath::InPlace);
            }
            Err(e) => {
                warn!(path, error = %e, "in-place update failed, replacing via temp object");
            }
        }

        let temp_path = self.namer.temp_path(path);
        if let Err(source) = self
            .store
            .upload_object(&temp_path, bytes, UploadMode::Overwrite)
            .await
        {
            if let Err(e) = self.store.delete_object(&temp_path).await {
                debug!(temp_path = %temp_path, error = %e, "temp cleanup failed");
            }
            return Err(WriteFailure::TempUpload { temp_path, source });
        }

        match self.store.delete_object(path).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(path, error = %e, "delete before move failed, attempting move anyway"),
        }

        match self.store.move_object(&temp_path, path).await {
            Ok(()) => {
                info!(path, bytes = bytes.len(), "table replaced");
                Ok(WritePath::Replaced)
            }
            Err(source) => {
                error!(
                    path,
                    temp_path = %temp_path,
                    error = %source,
                    "move failed, temp object orphaned and needs manual reconciliation"
                );
                Err(WriteFailure::Move {
                    path: path.to_string(),
                    temp_path,
                    source,
                })
            }
        }
    }

    /// Temp objects sitting beside `path`, left by failed moves
    pub async fn orphaned_temps(&self, path: &str) -> StoreResult<Vec<String>> {
        let folder = parent_folder(path);
        let prefix = format!("{}{}", file_name(path), TEMP_MARKER);
        let entries = match self.store.list_folder(folder).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(entries
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .map(|name| {
                if folder == "/" {
                    format!("/{}", name)
                } else {
                    format!("{}/{}", folder, name)
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::object_store::InMemoryObjectStore;
    use crate::store::simulated_store::{SimulatedObjectStore, SimulatedStoreConfig};

    fn namer() -> Arc<dyn TempNamer> {
        Arc::new(TimestampTempNamer::new(ManualClock::new(1_700_000_000_000)))
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let n = namer();
        let a = n.temp_path("/audit/log.sheet");
        let b = n.temp_path("/audit/log.sheet");
        assert_ne!(a, b);
        assert!(a.starts_with("/audit/log.sheet.tmp.1700000000000-"));
    }

    #[test]
    fn test_handles_sharing_a_clock_name_temps_apart() {
        let clock = ManualClock::new(5_000);
        let a = TimestampTempNamer::new(clock.clone());
        let b = TimestampTempNamer::new(clock);
        assert_ne!(a.temp_path("/audit/t.sheet"), b.temp_path("/audit/t.sheet"));

        let fixed = TimestampTempNamer::with_nonce(ManualClock::new(5_000), 0xab);
        assert_eq!(
            fixed.temp_path("/audit/t.sheet"),
            "/audit/t.sheet.tmp.5000-00000000000000ab-0"
        );
    }

    #[tokio::test]
    async fn test_first_write_falls_back_then_updates_in_place() {
        let store = InMemoryObjectStore::new();
        let coord = WriteCoordinator::new(store.clone(), namer());

        assert_eq!(coord.write("/t", b"v1").await.unwrap(), WritePath::Replaced);
        assert_eq!(coord.write("/t", b"v2").await.unwrap(), WritePath::InPlace);
        assert_eq!(store.paths(), vec!["/t"]);
        assert_eq!(store.download_object("/t").await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_stale_writer_replaces() {
        let store = InMemoryObjectStore::new();
        let a = WriteCoordinator::new(store.clone(), namer());
        let b = WriteCoordinator::new(store.session(), namer());

        a.write("/t", b"a1").await.unwrap();
        assert_eq!(b.write("/t", b"b1").await.unwrap(), WritePath::Replaced);
        // a's revision is now stale
        assert_eq!(a.write("/t", b"a2").await.unwrap(), WritePath::Replaced);
        assert_eq!(store.download_object("/t").await.unwrap(), b"a2");
    }

    #[tokio::test]
    async fn test_temp_upload_failure_leaves_path_untouched() {
        let inner = InMemoryObjectStore::new();
        inner
            .upload_object("/t", b"old", UploadMode::Overwrite)
            .await
            .unwrap();
        let config = SimulatedStoreConfig {
            upload_fail_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        };
        let sim = SimulatedObjectStore::new(inner.clone(), 7, config);
        let coord = WriteCoordinator::new(sim, namer());

        let err = coord.write("/t", b"new").await.unwrap_err();
        assert!(matches!(err, WriteFailure::TempUpload { .. }));
        assert!(err.orphaned_temp().is_none());
        assert_eq!(inner.paths(), vec!["/t"]);
        assert_eq!(inner.download_object("/t").await.unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_move_failure_orphans_temp() {
        let inner = InMemoryObjectStore::new();
        inner.create_folder("/audit").await.unwrap();
        inner
            .upload_object("/audit/t.sheet", b"old", UploadMode::Overwrite)
            .await
            .unwrap();
        let sim =
            SimulatedObjectStore::new(inner.clone(), 7, SimulatedStoreConfig::forced_fallback());
        sim.set_force_move_failure(true);
        let coord = WriteCoordinator::new(sim, namer());

        let err = coord.write("/audit/t.sheet", b"new").await.unwrap_err();
        let temp = err.orphaned_temp().unwrap().to_string();

        // Unrecovered: original deleted, new content only in the temp object
        assert!(!inner.contains("/audit/t.sheet"));
        assert_eq!(inner.download_object(&temp).await.unwrap(), b"new");
        assert_eq!(coord.orphaned_temps("/audit/t.sheet").await.unwrap(), vec![temp]);
    }

    #[tokio::test]
    async fn test_orphaned_temps_on_missing_folder() {
        let coord = WriteCoordinator::new(InMemoryObjectStore::new(), namer());
        assert!(coord.orphaned_temps("/nowhere/t.sheet").await.unwrap().is_empty());
    }
}
