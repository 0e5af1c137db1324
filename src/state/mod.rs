//! State management module.
//!
//! This module persists the last-applied state of every resource in a stack,
//! guarded by a lock so that only one run mutates a stack at a time.

mod local;
mod lock;
mod memory;
mod s3;
mod session;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS, LOCK_RENEW_SECS};
pub use memory::MemoryStateStore;
pub use s3::S3StateStore;
pub use session::StateSession;
pub use store::StateStore;
pub use types::{RunHistoryEntry, StateDocument, StateRecord, STATE_VERSION};
