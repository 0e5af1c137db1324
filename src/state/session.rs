//! Scoped exclusive access to a stack's state.
//!
//! A [`StateSession`] holds the stack lock for its whole lifetime, renewing
//! it in the background, and writes every record change straight through to
//! the backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{Result, StateError};

use super::lock::{LockInfo, LOCK_RENEW_SECS};
use super::store::StateStore;
use super::types::{RunHistoryEntry, StateDocument, StateRecord, STATE_VERSION};

/// An open, locked view of one stack's state.
pub struct StateSession {
    store: Arc<dyn StateStore>,
    lock: LockInfo,
    document: Mutex<StateDocument>,
    released: AtomicBool,
    heartbeat: AbortHandle,
}

impl std::fmt::Debug for StateSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSession")
            .field("backend", &self.store.backend_type())
            .field("lock", &self.lock)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl StateSession {
    /// Acquires the lock on `store` and loads the stack's document.
    ///
    /// A missing document starts empty. The lock is released again if the
    /// document cannot be loaded or belongs to another stack.
    ///
    /// # Errors
    ///
    /// Returns `LockedByOther` when another holder owns a live lock, or a
    /// state error when the document is unreadable or mismatched.
    pub async fn open(store: Arc<dyn StateStore>, stack: &str, holder: &str) -> Result<Self> {
        Self::open_renewing(store, stack, holder, Duration::from_secs(LOCK_RENEW_SECS)).await
    }

    /// Like [`StateSession::open`], renewing the lock every `renew_every`.
    ///
    /// # Errors
    ///
    /// Same as [`StateSession::open`].
    pub async fn open_renewing(
        store: Arc<dyn StateStore>,
        stack: &str,
        holder: &str,
        renew_every: Duration,
    ) -> Result<Self> {
        let lock = store.acquire_lock(holder).await?;

        let document = match Self::load_document(store.as_ref(), stack).await {
            Ok(document) => document,
            Err(e) => {
                if let Err(release_err) = store.release_lock(&lock.lock_id).await {
                    warn!("Failed to release state lock after load error: {release_err}");
                }
                return Err(e);
            }
        };

        debug!(
            "Opened state session for {stack} ({} records, {} backend)",
            document.records.len(),
            store.backend_type()
        );

        let heartbeat = spawn_heartbeat(Arc::clone(&store), lock.lock_id.clone(), renew_every);

        Ok(Self {
            store,
            lock,
            document: Mutex::new(document),
            released: AtomicBool::new(false),
            heartbeat,
        })
    }

    async fn load_document(store: &dyn StateStore, stack: &str) -> Result<StateDocument> {
        let Some(document) = store.load().await? else {
            return Ok(StateDocument::new(stack));
        };

        if document.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: document.version,
            }
            .into());
        }
        if document.stack != stack {
            return Err(StateError::StackMismatch {
                expected: stack.to_string(),
                found: document.stack,
            }
            .into());
        }
        Ok(document)
    }

    /// The lock held by this session, as first acquired.
    #[must_use]
    pub const fn lock_info(&self) -> &LockInfo {
        &self.lock
    }

    /// Returns a copy of every record keyed by logical id.
    pub async fn load(&self) -> BTreeMap<String, StateRecord> {
        self.document.lock().await.records.clone()
    }

    /// Returns a copy of a single record.
    pub async fn record(&self, id: &str) -> Option<StateRecord> {
        self.document.lock().await.get(id).cloned()
    }

    /// Stores `record` under `id` and persists the document.
    ///
    /// The in-memory view only changes once the backend write succeeded.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the document cannot be written.
    pub async fn save(&self, id: &str, mut record: StateRecord) -> Result<()> {
        record.logical_id = id.to_string();
        self.write(|doc| doc.set_record(record)).await
    }

    /// Removes the record for `id` and persists the document.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the document cannot be written.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.write(|doc| {
            doc.remove_record(id);
        })
        .await
    }

    /// Appends a run history entry and persists the document.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the document cannot be written.
    pub async fn add_history(&self, entry: RunHistoryEntry) -> Result<()> {
        self.write(|doc| doc.add_history(entry)).await
    }

    async fn write(&self, change: impl FnOnce(&mut StateDocument)) -> Result<()> {
        let mut guard = self.document.lock().await;
        let mut next = guard.clone();
        change(&mut next);
        self.store.save(&next).await?;
        *guard = next;
        Ok(())
    }

    /// Releases the lock. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the lock cannot be released.
    pub async fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.heartbeat.abort();
        self.store.release_lock(&self.lock.lock_id).await
    }
}

/// Renews `lock_id` on `store` every `every` until aborted.
fn spawn_heartbeat(store: Arc<dyn StateStore>, lock_id: String, every: Duration) -> AbortHandle {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.renew_lock(&lock_id).await {
                Ok(lock) => debug!("Renewed state lock {lock_id} until {}", lock.expires_at),
                Err(e) => warn!("Failed to renew state lock {lock_id}: {e}"),
            }
        }
    })
    .abort_handle()
}

impl Drop for StateSession {
    fn drop(&mut self) {
        self.heartbeat.abort();
        if *self.released.get_mut() {
            return;
        }

        let store = Arc::clone(&self.store);
        let lock_id = self.lock.lock_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("State session dropped without release, releasing lock {lock_id} in background");
                handle.spawn(async move {
                    if let Err(e) = store.release_lock(&lock_id).await {
                        warn!("Background lock release failed: {e}");
                    }
                });
            }
            Err(_) => warn!("State session dropped outside a runtime, lock {lock_id} left to expire"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Attributes;
    use crate::error::StratumError;
    use crate::state::MemoryStateStore;
    use std::collections::BTreeSet;

    fn record(id: &str, identity: &str) -> StateRecord {
        StateRecord::new(id, "k1", identity, Attributes::new(), Attributes::new(), BTreeSet::new())
    }

    #[tokio::test]
    async fn test_open_locks_and_release_unlocks() {
        let store = Arc::new(MemoryStateStore::new());
        let session = StateSession::open(store.clone(), "s/dev", "a").await.expect("open");

        let err = StateSession::open(store.clone(), "s/dev", "b").await.expect_err("locked");
        assert!(matches!(err, StratumError::State(StateError::LockedByOther { .. })));

        session.release().await.expect("release");
        assert!(!store.is_locked().await.expect("is_locked"));
    }

    #[tokio::test]
    async fn test_writes_go_through_to_backend() {
        let store = Arc::new(MemoryStateStore::new());
        let session = StateSession::open(store.clone(), "s/dev", "a").await.expect("open");

        session.save("x", record("x", "k1-0001")).await.expect("save");
        session.save("y", record("y", "k1-0002")).await.expect("save");
        session.remove("x").await.expect("remove");

        let stored = store.snapshot().await.expect("document");
        assert_eq!(stored.ids(), vec!["y"]);
        assert_eq!(session.load().await.len(), 1);
        assert_eq!(store.save_count(), 3);
        session.release().await.expect("release");
    }

    #[tokio::test]
    async fn test_stack_mismatch_releases_lock() {
        let store = Arc::new(MemoryStateStore::with_document(StateDocument::new("other/dev")));

        let err = StateSession::open(store.clone(), "s/dev", "a").await.expect_err("mismatch");
        assert!(matches!(err, StratumError::State(StateError::StackMismatch { .. })));
        assert!(!store.is_locked().await.expect("is_locked"));
    }

    #[tokio::test]
    async fn test_drop_without_release_frees_lock() {
        let store = Arc::new(MemoryStateStore::new());
        let session = StateSession::open(store.clone(), "s/dev", "a").await.expect("open");
        drop(session);

        for _ in 0..10 {
            if !store.is_locked().await.expect("is_locked") {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("lock was not released after drop");
    }

    #[tokio::test]
    async fn test_open_session_keeps_renewing_its_lock() {
        let store = Arc::new(MemoryStateStore::new());
        let session = StateSession::open_renewing(store.clone(), "s/dev", "a", Duration::from_millis(20))
            .await
            .expect("open");
        let acquired = session.lock_info().clone();

        tokio::time::sleep(Duration::from_millis(120)).await;

        let current = store.get_lock_info().await.expect("info").expect("locked");
        assert_eq!(current.lock_id, acquired.lock_id);
        assert!(current.expires_at > acquired.expires_at);

        session.release().await.expect("release");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get_lock_info().await.expect("info").is_none());
    }
}
