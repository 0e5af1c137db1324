//! Local file-based state storage backend.
//!
//! Stores the state document as pretty-printed JSON next to the model, with
//! a sibling lock file guarding concurrent runs on the same machine.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StateError, StratumError};

use super::lock::{holder_or_generated, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::StateDocument;

/// Default state directory name.
pub const STATE_DIR: &str = ".stratum";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Publish attempts before giving up on a lock file that keeps changing.
const ACQUIRE_ATTEMPTS: usize = 5;

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    base_dir: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store under `.stratum/` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| StratumError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store keeping its files in `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Creates a store from an explicit state file path.
    ///
    /// The lock file is placed next to the state file.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StateError::backend(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        Self::read_lock_at(&self.lock_path).await
    }

    async fn read_lock_at(path: &Path) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::corrupted(format!("Failed to read lock file: {e}")).into()),
        };

        let lock_info: LockInfo = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse lock file: {e}")))?;

        Ok(Some(lock_info))
    }

    /// Writes and syncs `content` to a fresh file at `path`.
    async fn write_synced(path: &Path, content: &str) -> Result<()> {
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| StateError::backend(format!("Failed to create {}: {e}", path.display())))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::backend(format!("Failed to write {}: {e}", path.display())))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::backend(format!("Failed to sync {}: {e}", path.display())))?;

        Ok(())
    }

    /// Writes `content` to `path` through a temporary file and a rename.
    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        self.ensure_dir().await?;

        let temp_path = scratch_path(path, "tmp");
        Self::write_synced(&temp_path, content).await?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StateError::backend(format!("Failed to rename {}: {e}", temp_path.display())))?;

        Ok(())
    }

    /// Publishes `content` as the lock file unless a lock file already exists.
    ///
    /// The content is written to a private file and hard-linked into place,
    /// so a reader never sees a partially written lock. Returns `false` when
    /// another lock file is present.
    async fn publish_lock(&self, content: &str) -> Result<bool> {
        let temp_path = scratch_path(&self.lock_path, "tmp");
        Self::write_synced(&temp_path, content)
            .await
            .map_err(|e| StateError::lock_failed(e.to_string()))?;

        let linked = fs::hard_link(&temp_path, &self.lock_path).await;
        if let Err(e) = fs::remove_file(&temp_path).await {
            debug!("Failed to remove {}: {e}", temp_path.display());
        }

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StateError::lock_failed(format!("Failed to create lock file: {e}")).into()),
        }
    }

    /// Moves the expired lock `expired` out of the way.
    ///
    /// Returns the live lock found instead when another holder replaced the
    /// expired one in the meantime; that lock is put back untouched.
    async fn evict_expired(&self, expired: &LockInfo) -> Result<Option<LockInfo>> {
        let stale_path = scratch_path(&self.lock_path, "stale");
        match fs::rename(&self.lock_path, &stale_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::lock_failed(format!("Failed to move expired lock: {e}")).into()),
        }

        let moved = Self::read_lock_at(&stale_path).await?;
        let replaced = moved.filter(|lock| lock != expired);
        if replaced.is_some()
            && let Err(e) = fs::hard_link(&stale_path, &self.lock_path).await
        {
            warn!("Failed to restore lock file moved during takeover: {e}");
        }

        if let Err(e) = fs::remove_file(&stale_path).await {
            debug!("Failed to remove {}: {e}", stale_path.display());
        }
        Ok(replaced)
    }

    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::lock_failed(format!("Failed to delete lock file: {e}")).into()),
        }
    }
}

/// Returns a unique sibling of `path` for scratch writes.
fn scratch_path(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = Uuid::new_v4().simple().to_string();
    path.with_file_name(format!("{name}.{}.{tag}", &suffix[..12]))
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StateDocument>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        debug!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read state file: {e}")))?;

        let document: StateDocument = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse state file: {e}")))?;

        Ok(Some(document))
    }

    async fn save(&self, document: &StateDocument) -> Result<()> {
        let content = serde_json::to_string_pretty(document)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        self.write_atomic(&self.state_path, &content).await?;

        debug!(
            "Saved state to {} ({} records)",
            self.state_path.display(),
            document.records.len()
        );
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path)
                .await
                .map_err(|e| StateError::backend(format!("Failed to delete state file: {e}")))?;
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        self.ensure_dir().await?;

        let lock_info = LockInfo::new(&holder_or_generated(holder));
        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        for _ in 0..ACQUIRE_ATTEMPTS {
            if self.publish_lock(&content).await? {
                info!(
                    "Acquired state lock: {} (expires in {}s)",
                    lock_info.lock_id, LOCK_EXPIRY_SECS
                );
                return Ok(lock_info);
            }

            let Some(existing) = self.read_lock_file().await? else {
                continue;
            };
            if !existing.is_expired() {
                return Err(StateError::locked_by(&existing).into());
            }

            debug!("Expired lock held by {} found, taking over", existing.holder);
            if let Some(live) = self.evict_expired(&existing).await? {
                return Err(StateError::locked_by(&live).into());
            }
        }

        Err(StateError::lock_failed("Lock file kept changing during acquisition").into())
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let current = self
            .read_lock_file()
            .await?
            .filter(|lock| lock.lock_id == lock_id)
            .ok_or_else(|| StateError::lock_failed(format!("Lock {lock_id} is no longer held")))?;

        let renewed = current.renewed();
        let content = serde_json::to_string_pretty(&renewed)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        self.write_atomic(&self.lock_path, &content)
            .await
            .map_err(|e| StateError::lock_failed(e.to_string()))?;

        debug!("Renewed state lock {lock_id} until {}", renewed.expires_at);
        Ok(renewed)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path().join(STATE_DIR));
        (store, temp_dir)
    }

    fn temp_dir_of(store: &LocalStateStore) -> PathBuf {
        store.state_path().parent().expect("parent").to_path_buf()
    }

    fn write_expired_lock(store: &LocalStateStore, holder: &str) -> LockInfo {
        let mut lock = LockInfo::new(holder);
        lock.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        std::fs::create_dir_all(temp_dir_of(store)).expect("mkdir");
        std::fs::write(&store.lock_path, serde_json::to_string(&lock).expect("json")).expect("write");
        lock
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let document = StateDocument::new("lake/dev");
        store.save(&document).await.expect("Failed to save state");

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded.stack, "lake/dev");
        let entries = std::fs::read_dir(temp_dir_of(&store)).expect("read dir").count();
        assert_eq!(entries, 1, "scratch files left behind");
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load().await.expect("Load should not fail");
        assert!(result.is_none());
        assert!(!store.exists().await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_corrupted_state_is_reported() {
        let (store, temp) = create_test_store();
        std::fs::create_dir_all(temp.path().join(STATE_DIR)).expect("mkdir");
        std::fs::write(store.state_path(), "{not json").expect("write");

        let err = store.load().await.expect_err("corrupted");
        assert!(matches!(err, StratumError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");

        let err = store.acquire_lock("holder-2").await.expect_err("conflict");
        assert!(matches!(
            err,
            StratumError::State(StateError::LockedByOther { holder, .. }) if holder == "holder-1"
        ));
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _temp) = create_test_store();

        let _lock = store.acquire_lock("holder-1").await.expect("lock");
        store.release_lock("someone-else").await.expect("release");

        assert!(store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_admits_one_holder() {
        for _ in 0..20 {
            let temp = TempDir::new().expect("temp dir");
            let dir = temp.path().join(STATE_DIR);
            let first = Arc::new(LocalStateStore::with_base_dir(dir.clone()));
            let second = Arc::new(LocalStateStore::with_base_dir(dir));

            let a = tokio::spawn({
                let store = Arc::clone(&first);
                async move { store.acquire_lock("holder-1").await }
            });
            let b = tokio::spawn({
                let store = Arc::clone(&second);
                async move { store.acquire_lock("holder-2").await }
            });
            let results = [a.await.expect("join"), b.await.expect("join")];

            let winners: Vec<&LockInfo> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(winners.len(), 1, "both or neither acquired the lock");
            assert!(results.iter().any(|r| matches!(
                r,
                Err(StratumError::State(StateError::LockedByOther { .. }))
            )));

            let stored = first.get_lock_info().await.expect("lock info").expect("locked");
            assert_eq!(&stored, winners[0]);
        }
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();
        let stale = write_expired_lock(&store, "crashed-run");

        let lock = store.acquire_lock("holder-2").await.expect("takeover");

        assert_ne!(lock.lock_id, stale.lock_id);
        let stored = store.get_lock_info().await.expect("lock info").expect("locked");
        assert_eq!(stored.holder, "holder-2");
        let entries = std::fs::read_dir(temp_dir_of(&store)).expect("read dir").count();
        assert_eq!(entries, 1, "scratch files left behind");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_takeover_admits_one_holder() {
        for _ in 0..20 {
            let (first, temp) = create_test_store();
            write_expired_lock(&first, "crashed-run");
            let first = Arc::new(first);
            let second = Arc::new(LocalStateStore::with_base_dir(temp.path().join(STATE_DIR)));

            let a = tokio::spawn({
                let store = Arc::clone(&first);
                async move { store.acquire_lock("holder-1").await }
            });
            let b = tokio::spawn({
                let store = Arc::clone(&second);
                async move { store.acquire_lock("holder-2").await }
            });
            let results = [a.await.expect("join"), b.await.expect("join")];

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            let stored = first.get_lock_info().await.expect("lock info").expect("locked");
            assert!(!stored.is_expired());
            assert_ne!(stored.holder, "crashed-run");
        }
    }

    #[tokio::test]
    async fn test_renew_extends_only_the_current_lock() {
        let (store, _temp) = create_test_store();
        let lock = store.acquire_lock("holder-1").await.expect("lock");

        let renewed = store.renew_lock(&lock.lock_id).await.expect("renew");
        assert_eq!(renewed.lock_id, lock.lock_id);
        assert!(renewed.expires_at >= lock.expires_at);
        assert_eq!(store.get_lock_info().await.expect("info"), Some(renewed));

        let err = store.renew_lock("someone-else").await.expect_err("foreign lock");
        assert!(matches!(err, StratumError::State(StateError::LockFailed { .. })));
    }
}
