//! Object Store Abstraction
//!
//! Trait-based access to the remote store that holds table blobs.
//!
//! Implementations:
//! - `InMemoryObjectStore`: unit tests and deterministic simulation
//! - `LocalFsObjectStore`: development against a local directory
//! - `RemoteObjectStore`: production RPC client (feature `remote`)
//!
//! Every handle remembers the last revision it observed for each path.
//! `UploadMode::UpdateExisting` is checked against that revision, which is
//! the only concurrency control the store offers.

use crate::error::{StoreError, StoreResult};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Boxed future returned by object store operations
pub type StoreFuture<'a, T> = BoxFuture<'a, StoreResult<T>>;

/// How an upload treats existing content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Replace whatever is at the path, creating it if absent
    Overwrite,
    /// Replace the revision this handle last observed; `Conflict` if the
    /// remote revision has moved on, `NotFound` if nothing is there
    UpdateExisting,
}

/// Metadata for a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub path: String,
    pub size_bytes: u64,
    /// Opaque revision token
    pub revision: String,
}

/// Object store operations used by the table layer
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch an object's contents. `NotFound` if absent.
    fn download_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<u8>>;

    /// Store an object's contents
    fn upload_object<'a>(
        &'a self,
        path: &'a str,
        data: &'a [u8],
        mode: UploadMode,
    ) -> StoreFuture<'a, ObjectMeta>;

    /// Remove an object. Succeeds if it is already absent.
    fn delete_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()>;

    /// Rename an object. `NotFound` if `from` is absent, `Conflict` if `to`
    /// already exists.
    fn move_object<'a>(&'a self, from: &'a str, to: &'a str) -> StoreFuture<'a, ()>;

    /// Create a folder. Succeeds if it already exists.
    fn create_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()>;

    /// Names of the direct children of a folder, sorted
    fn list_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<String>>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn download_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<u8>> {
        (**self).download_object(path)
    }

    fn upload_object<'a>(
        &'a self,
        path: &'a str,
        data: &'a [u8],
        mode: UploadMode,
    ) -> StoreFuture<'a, ObjectMeta> {
        (**self).upload_object(path, data, mode)
    }

    fn delete_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        (**self).delete_object(path)
    }

    fn move_object<'a>(&'a self, from: &'a str, to: &'a str) -> StoreFuture<'a, ()> {
        (**self).move_object(from, to)
    }

    fn create_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        (**self).create_folder(path)
    }

    fn list_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<String>> {
        (**self).list_folder(path)
    }
}

/// Last revision a handle observed, per path
#[derive(Debug, Default)]
pub struct RevisionTracker {
    observed: Mutex<HashMap<String, String>>,
}

impl RevisionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, path: &str, revision: &str) {
        self.observed
            .lock()
            .insert(path.to_string(), revision.to_string());
    }

    pub fn observed(&self, path: &str) -> Option<String> {
        self.observed.lock().get(path).cloned()
    }

    pub fn forget(&self, path: &str) {
        self.observed.lock().remove(path);
    }

    /// Check an `UpdateExisting` upload against the current remote revision
    pub fn check_update(&self, path: &str, current: &str) -> StoreResult<()> {
        match self.observed(path) {
            Some(rev) if rev == current => Ok(()),
            Some(rev) => Err(StoreError::Conflict(format!(
                "{}: observed revision {}, remote is at {}",
                path, rev, current
            ))),
            None => Err(StoreError::Conflict(format!(
                "{}: no revision observed by this handle",
                path
            ))),
        }
    }
}

/// Parent folder of a logical path ("/" for top-level objects)
pub fn parent_folder(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Final component of a logical path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Name of the direct child of `folder` that leads to `key`, if any
fn child_of<'k>(folder: &str, key: &'k str) -> Option<&'k str> {
    let folder = folder.trim_end_matches('/');
    let rest = key.strip_prefix(folder)?.strip_prefix('/')?;
    rest.split('/').next().filter(|s| !s.is_empty())
}

// ============================================================================
// InMemoryObjectStore - For tests and DST
// ============================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    revision: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: HashMap<String, StoredObject>,
    folders: HashSet<String>,
}

/// In-memory object store.
///
/// Clones are the same handle. [`InMemoryObjectStore::session`] gives a new
/// handle over the same objects with its own revision observations, which is
/// how tests stand in for a second process.
#[derive(Debug, Clone)]
pub struct InMemoryObjectStore {
    state: Arc<RwLock<MemoryState>>,
    next_revision: Arc<AtomicU64>,
    revisions: Arc<RevisionTracker>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        InMemoryObjectStore {
            state: Arc::new(RwLock::new(MemoryState::default())),
            next_revision: Arc::new(AtomicU64::new(1)),
            revisions: Arc::new(RevisionTracker::new()),
        }
    }

    /// Another actor's handle over the same objects
    pub fn session(&self) -> Self {
        InMemoryObjectStore {
            state: Arc::clone(&self.state),
            next_revision: Arc::clone(&self.next_revision),
            revisions: Arc::new(RevisionTracker::new()),
        }
    }

    fn allocate_revision(&self) -> String {
        format!("{:016x}", self.next_revision.fetch_add(1, Ordering::SeqCst))
    }

    /// Number of stored objects (for testing)
    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().objects.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.read().objects.contains_key(path)
    }

    /// All object paths, sorted (for testing)
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state.read().objects.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Current revision of a path, bypassing this handle's observations
    pub fn current_revision(&self, path: &str) -> Option<String> {
        self.state
            .read()
            .objects
            .get(path)
            .map(|o| o.revision.clone())
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn download_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let obj = self
                .state
                .read()
                .objects
                .get(path)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
            self.revisions.observe(path, &obj.revision);
            Ok(obj.data)
        })
    }

    fn upload_object<'a>(
        &'a self,
        path: &'a str,
        data: &'a [u8],
        mode: UploadMode,
    ) -> StoreFuture<'a, ObjectMeta> {
        Box::pin(async move {
            let revision = self.allocate_revision();
            {
                let mut state = self.state.write();
                if mode == UploadMode::UpdateExisting {
                    let current = state
                        .objects
                        .get(path)
                        .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
                    self.revisions.check_update(path, &current.revision)?;
                }
                state.objects.insert(
                    path.to_string(),
                    StoredObject {
                        data: data.to_vec(),
                        revision: revision.clone(),
                    },
                );
            }
            self.revisions.observe(path, &revision);
            Ok(ObjectMeta {
                path: path.to_string(),
                size_bytes: data.len() as u64,
                revision,
            })
        })
    }

    fn delete_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.state.write().objects.remove(path);
            self.revisions.forget(path);
            Ok(())
        })
    }

    fn move_object<'a>(&'a self, from: &'a str, to: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let revision = {
                let mut state = self.state.write();
                if state.objects.contains_key(to) {
                    return Err(StoreError::Conflict(format!("destination exists: {}", to)));
                }
                let obj = state
                    .objects
                    .remove(from)
                    .ok_or_else(|| StoreError::NotFound(from.to_string()))?;
                let revision = obj.revision.clone();
                state.objects.insert(to.to_string(), obj);
                revision
            };
            self.revisions.forget(from);
            self.revisions.observe(to, &revision);
            Ok(())
        })
    }

    fn create_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = path.trim_end_matches('/');
            if !path.is_empty() {
                self.state.write().folders.insert(path.to_string());
            }
            Ok(())
        })
    }

    fn list_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let folder = path.trim_end_matches('/');
            let state = self.state.read();
            let names: BTreeSet<String> = state
                .objects
                .keys()
                .chain(state.folders.iter())
                .filter_map(|k| child_of(folder, k))
                .map(str::to_string)
                .collect();

            if names.is_empty() && !folder.is_empty() && !state.folders.contains(folder) {
                return Err(StoreError::NotFound(path.to_string()));
            }
            Ok(names.into_iter().collect())
        })
    }
}

// ============================================================================
// LocalFsObjectStore - For development
// ============================================================================

/// Object store rooted at a local directory.
///
/// Revisions are derived from content (crc32 and length), so two writes of
/// identical bytes share a revision.
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
    revisions: Arc<RevisionTracker>,
    staging_seq: Arc<AtomicU64>,
}

/// Marker in the names of files still being written
const STAGING_MARKER: &str = ".partial-";

impl LocalFsObjectStore {
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore {
            base_path,
            revisions: Arc::new(RevisionTracker::new()),
            staging_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path.trim_start_matches('/'))
    }

    fn content_revision(data: &[u8]) -> String {
        format!("{:08x}{:08x}", crc32fast::hash(data), data.len())
    }

    async fn ensure_parent(path: &std::path::Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write `data` beside `full` and rename it into place, so readers see
    /// the old file or the new one, never a truncated one.
    async fn write_atomic(&self, full: &std::path::Path, data: &[u8]) -> StoreResult<()> {
        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
        let staging = full.with_file_name(format!(
            ".{}{}{}-{}",
            name,
            STAGING_MARKER,
            std::process::id(),
            seq
        ));

        if let Err(e) = tokio::fs::write(&staging, data).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&staging, full).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn download_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let full = self.full_path(path);
            let data = tokio::fs::read(&full).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
                _ => e.into(),
            })?;
            self.revisions.observe(path, &Self::content_revision(&data));
            Ok(data)
        })
    }

    fn upload_object<'a>(
        &'a self,
        path: &'a str,
        data: &'a [u8],
        mode: UploadMode,
    ) -> StoreFuture<'a, ObjectMeta> {
        Box::pin(async move {
            let full = self.full_path(path);
            if mode == UploadMode::UpdateExisting {
                let current = tokio::fs::read(&full).await.map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
                    _ => e.into(),
                })?;
                self.revisions
                    .check_update(path, &Self::content_revision(&current))?;
            }
            Self::ensure_parent(&full).await?;
            self.write_atomic(&full, data).await?;

            let revision = Self::content_revision(data);
            self.revisions.observe(path, &revision);
            Ok(ObjectMeta {
                path: path.to_string(),
                size_bytes: data.len() as u64,
                revision,
            })
        })
    }

    fn delete_object<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.revisions.forget(path);
            match tokio::fs::remove_file(self.full_path(path)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn move_object<'a>(&'a self, from: &'a str, to: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let from_path = self.full_path(from);
            let to_path = self.full_path(to);
            if !tokio::fs::try_exists(&from_path).await? {
                return Err(StoreError::NotFound(from.to_string()));
            }
            if tokio::fs::try_exists(&to_path).await? {
                return Err(StoreError::Conflict(format!("destination exists: {}", to)));
            }
            Self::ensure_parent(&to_path).await?;
            tokio::fs::rename(&from_path, &to_path).await?;

            if let Some(rev) = self.revisions.observed(from) {
                self.revisions.observe(to, &rev);
            }
            self.revisions.forget(from);
            Ok(())
        })
    }

    fn create_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            tokio::fs::create_dir_all(self.full_path(path)).await?;
            Ok(())
        })
    }

    fn list_folder<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut dir = tokio::fs::read_dir(self.full_path(path))
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
                    _ => e.into(),
                })?;
            let mut names = Vec::new();
            while let Some(entry) = dir.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.contains(STAGING_MARKER) {
                    names.push(name);
                }
            }
            names.sort();
            Ok(names)
        })
    }
}
