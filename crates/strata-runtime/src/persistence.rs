//! Persistence of app snapshots
//!
//! A [`PersistenceStore`] keeps serialized [`AppSnapshot`]s by app name and
//! revision. [`PersistenceManager`] captures a snapshot through the app's
//! [`SnapshotService`], writes it as the next revision, prunes old
//! revisions and restores the latest one after a restart.
//!
//! # Example
//! ```ignore
//! use strata_runtime::persistence::{FileStore, PersistenceManager};
//!
//! let store = Arc::new(FileStore::open("/var/lib/strata")?);
//! let manager = PersistenceManager::new(store, "orders", 3);
//! manager.persist(app.snapshot_service(), app.clock().current_time())?;
//! ```

use crate::error::{EngineError, EngineResult};
use crate::snapshot::{AppSnapshot, SnapshotService};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Error type for persistence store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("revision {revision} of '{app}' not found")]
    NotFound { app: String, revision: u64 },
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e.to_string())
    }
}

/// Storage backend for serialized snapshots
pub trait PersistenceStore: Send + Sync {
    fn save(&self, app: &str, revision: u64, data: &[u8]) -> Result<(), StoreError>;

    fn load(&self, app: &str, revision: u64) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stored revisions of `app`, ascending.
    fn revisions(&self, app: &str) -> Result<Vec<u64>, StoreError>;

    fn delete(&self, app: &str, revision: u64) -> Result<(), StoreError>;

    fn last_revision(&self, app: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.revisions(app)?.last().copied())
    }

    /// Delete all but the newest `keep` revisions; returns how many were
    /// deleted.
    fn prune(&self, app: &str, keep: usize) -> Result<usize, StoreError> {
        let revisions = self.revisions(app)?;
        let to_delete = revisions.len().saturating_sub(keep);
        for revision in revisions.iter().take(to_delete) {
            self.delete(app, *revision)?;
        }
        Ok(to_delete)
    }
}

/// In-memory store, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<IndexMap<(String, u64), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceStore for MemoryStore {
    fn save(&self, app: &str, revision: u64, data: &[u8]) -> Result<(), StoreError> {
        self.data.write().insert((app.to_string(), revision), data.to_vec());
        Ok(())
    }

    fn load(&self, app: &str, revision: u64) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().get(&(app.to_string(), revision)).cloned())
    }

    fn revisions(&self, app: &str) -> Result<Vec<u64>, StoreError> {
        let mut revisions: Vec<u64> = self
            .data
            .read()
            .keys()
            .filter(|(name, _)| name == app)
            .map(|(_, revision)| *revision)
            .collect();
        revisions.sort_unstable();
        Ok(revisions)
    }

    fn delete(&self, app: &str, revision: u64) -> Result<(), StoreError> {
        self.data.write().shift_remove(&(app.to_string(), revision));
        Ok(())
    }
}

/// File-system store: one file per revision under `<dir>/<app>/`.
/// Writes are atomic via temp file + rename.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

const EXTENSION: &str = "snapshot";

impl FileStore {
    /// Open or create a store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::IoError(e.to_string()))?;
        Ok(Self { dir })
    }

    fn app_dir(&self, app: &str) -> PathBuf {
        self.dir.join(app)
    }

    fn revision_path(&self, app: &str, revision: u64) -> PathBuf {
        self.app_dir(app).join(format!("{revision:020}.{EXTENSION}"))
    }
}

impl PersistenceStore for FileStore {
    fn save(&self, app: &str, revision: u64, data: &[u8]) -> Result<(), StoreError> {
        let path = self.revision_path(app, revision);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, data).map_err(|e| StoreError::IoError(e.to_string()))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| StoreError::IoError(e.to_string()))?;
        Ok(())
    }

    fn load(&self, app: &str, revision: u64) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.revision_path(app, revision)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::IoError(e.to_string())),
        }
    }

    fn revisions(&self, app: &str) -> Result<Vec<u64>, StoreError> {
        let dir = self.app_dir(app);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut revisions = Vec::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::IoError(e.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|e| StoreError::IoError(e.to_string()))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(revision) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                revisions.push(revision);
            }
        }
        revisions.sort_unstable();
        Ok(revisions)
    }

    fn delete(&self, app: &str, revision: u64) -> Result<(), StoreError> {
        match std::fs::remove_file(self.revision_path(app, revision)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::IoError(e.to_string())),
        }
    }
}

/// Writes and restores revisions of one app
pub struct PersistenceManager {
    store: Arc<dyn PersistenceStore>,
    app: String,
    max_revisions: usize,
}

impl PersistenceManager {
    pub fn new(store: Arc<dyn PersistenceStore>, app: impl Into<String>, max_revisions: usize) -> Self {
        Self {
            store,
            app: app.into(),
            max_revisions: max_revisions.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn PersistenceStore> {
        &self.store
    }

    /// Capture every registered element and store it as the next revision.
    pub fn persist(&self, service: &SnapshotService, taken_at: i64) -> EngineResult<u64> {
        let snapshot = service.full_snapshot(taken_at)?;
        let revision = self.store.last_revision(&self.app)?.map_or(1, |r| r + 1);
        self.store.save(&self.app, revision, &snapshot.to_bytes()?)?;
        let pruned = self.store.prune(&self.app, self.max_revisions)?;
        info!(
            "Persisted revision {} of {} ({} elements, pruned {})",
            revision,
            self.app,
            snapshot.element_count(),
            pruned
        );
        Ok(revision)
    }

    pub fn last_revision(&self) -> EngineResult<Option<u64>> {
        Ok(self.store.last_revision(&self.app)?)
    }

    pub fn load_revision(&self, revision: u64) -> EngineResult<AppSnapshot> {
        let data = self.store.load(&self.app, revision)?.ok_or_else(|| StoreError::NotFound {
            app: self.app.clone(),
            revision,
        })?;
        AppSnapshot::from_bytes(&data)
    }

    pub fn restore_revision(&self, service: &SnapshotService, revision: u64) -> EngineResult<()> {
        let snapshot = self.load_revision(revision)?;
        debug!("Restoring revision {} of {}", revision, self.app);
        service.restore(&snapshot)
    }

    /// Restore the newest revision. Returns `None` when nothing was stored.
    pub fn restore_last_revision(&self, service: &SnapshotService) -> EngineResult<Option<u64>> {
        match self.store.last_revision(&self.app)? {
            Some(revision) => {
                self.restore_revision(service, revision)?;
                Ok(Some(revision))
            }
            None => {
                info!("No stored revision for {}", self.app);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_prunes_oldest() {
        let store = MemoryStore::new();
        for revision in 1..=5 {
            store.save("app", revision, b"x").unwrap();
        }
        store.save("other", 1, b"y").unwrap();
        assert_eq!(store.prune("app", 2).unwrap(), 3);
        assert_eq!(store.revisions("app").unwrap(), vec![4, 5]);
        assert_eq!(store.revisions("other").unwrap(), vec![1]);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save("app", 7, b"payload").unwrap();
        store.save("app", 12, b"later").unwrap();
        assert_eq!(store.revisions("app").unwrap(), vec![7, 12]);
        assert_eq!(store.load("app", 12).unwrap().unwrap(), b"later");
        assert!(store.load("app", 8).unwrap().is_none());
        store.delete("app", 7).unwrap();
        assert_eq!(store.last_revision("app").unwrap(), Some(12));
    }

    #[test]
    fn test_manager_numbers_revisions() {
        let manager = PersistenceManager::new(Arc::new(MemoryStore::new()), "app", 2);
        let service = SnapshotService::new();
        assert_eq!(manager.persist(&service, 10).unwrap(), 1);
        assert_eq!(manager.persist(&service, 20).unwrap(), 2);
        assert_eq!(manager.persist(&service, 30).unwrap(), 3);
        assert_eq!(manager.store().revisions("app").unwrap(), vec![2, 3]);
        assert_eq!(manager.load_revision(3).unwrap().taken_at, 30);
        assert!(manager.load_revision(1).is_err());
    }

    #[test]
    fn test_restore_without_revisions() {
        let manager = PersistenceManager::new(Arc::new(MemoryStore::new()), "app", 2);
        assert_eq!(manager.restore_last_revision(&SnapshotService::new()).unwrap(), None);
    }
}
