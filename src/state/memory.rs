//! In-memory state storage backend.
//!
//! Used by tests and dry runs; nothing survives the process.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::error::{Result, StateError};

use super::lock::{holder_or_generated, LockInfo};
use super::store::StateStore;
use super::types::StateDocument;

/// Process-local state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    document: Mutex<Option<StateDocument>>,
    lock: Mutex<Option<LockInfo>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with `document`.
    #[must_use]
    pub fn with_document(document: StateDocument) -> Self {
        Self {
            document: Mutex::new(Some(document)),
            ..Self::default()
        }
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Returns a copy of the stored document.
    pub async fn snapshot(&self) -> Option<StateDocument> {
        self.document.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<StateDocument>> {
        Ok(self.document.lock().await.clone())
    }

    async fn save(&self, document: &StateDocument) -> Result<()> {
        *self.document.lock().await = Some(document.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        *self.document.lock().await = None;
        *self.lock.lock().await = None;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.document.lock().await.is_some())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut slot = self.lock.lock().await;
        if let Some(existing) = slot.as_ref().filter(|l| !l.is_expired()) {
            return Err(StateError::locked_by(existing).into());
        }

        let lock_info = LockInfo::new(&holder_or_generated(holder));
        *slot = Some(lock_info.clone());
        Ok(lock_info)
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let mut slot = self.lock.lock().await;
        let Some(current) = slot.as_mut().filter(|l| l.lock_id == lock_id) else {
            return Err(StateError::lock_failed(format!("Lock {lock_id} is no longer held")).into());
        };
        *current = current.renewed();
        Ok(current.clone())
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut slot = self.lock.lock().await;
        if slot.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            *slot = None;
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().await.clone())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
