//! S3-based state storage backend.
//!
//! Keeps the state document and lock object under a per-stack key prefix so
//! several machines can share one stack's state.

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{Result, StateError};

use super::lock::{holder_or_generated, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::StateDocument;

/// State object key suffix.
const STATE_KEY: &str = "state.json";

/// Lock object key suffix.
const LOCK_KEY: &str = "state.lock";

/// Condition attached to a lock object write.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LockWrite {
    /// Only write when no lock object exists.
    Absent,
    /// Only write when the stored object still has this `ETag`.
    Matches(String),
}

/// An object body with its `ETag`.
struct StoredObject {
    content: String,
    e_tag: Option<String>,
}

/// Returns true when S3 rejected a write because its condition failed.
fn is_condition_failure(code: Option<&str>) -> bool {
    matches!(code, Some("PreconditionFailed" | "ConditionalRequestConflict"))
}

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    prefix: String,
}

/// Normalizes a key prefix to either empty or `segment/.../`.
fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .unwrap_or_default()
}

impl S3StateStore {
    /// Creates a store using credentials from the environment.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    async fn get_object(&self, key: &str) -> Result<Option<StoredObject>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let e_tag = response.e_tag().map(str::to_string);
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| StateError::s3(format!("Failed to read S3 object: {e}")))?;

                let content = String::from_utf8(bytes.to_vec())
                    .map_err(|e| StateError::corrupted(format!("Invalid UTF-8 in S3 object: {e}")))?;

                Ok(Some(StoredObject { content, e_tag }))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StateError::s3(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 put error: {e}")))?;

        Ok(())
    }

    /// Writes the lock object under `condition`.
    ///
    /// Returns `false` when the condition did not hold.
    async fn put_lock(&self, content: &str, condition: LockWrite) -> Result<bool> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(LOCK_KEY))
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json");

        let request = match condition {
            LockWrite::Absent => request.if_none_match("*"),
            LockWrite::Matches(e_tag) => request.if_match(e_tag),
        };

        match request.send().await {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if is_condition_failure(service_err.code()) {
                    Ok(false)
                } else {
                    Err(StateError::lock_failed(format!("S3 lock write error: {service_err}")).into())
                }
            }
        }
    }

    async fn read_lock(&self) -> Result<Option<(LockInfo, Option<String>)>> {
        let Some(object) = self.get_object(&self.key(LOCK_KEY)).await? else {
            return Ok(None);
        };

        let lock_info: LockInfo = serde_json::from_str(&object.content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse lock: {e}")))?;

        Ok(Some((lock_info, object.e_tag)))
    }

    async fn conflict(&self) -> Result<StateError> {
        Ok(match self.get_lock_info().await? {
            Some(lock) => StateError::locked_by(&lock),
            None => StateError::lock_failed("Lock object changed during acquisition"),
        })
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 delete error: {e}")))?;

        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StateError::s3(format!("S3 head error: {service_err}")).into())
                }
            }
        }
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<Option<StateDocument>> {
        let key = self.key(STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        let Some(object) = self.get_object(&key).await? else {
            debug!("No state found in S3");
            return Ok(None);
        };

        let document: StateDocument = serde_json::from_str(&object.content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse state: {e}")))?;

        debug!("Loaded state for stack {} ({} records)", document.stack, document.records.len());
        Ok(Some(document))
    }

    async fn save(&self, document: &StateDocument) -> Result<()> {
        let key = self.key(STATE_KEY);

        let content = serde_json::to_string_pretty(document)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        self.put_object(&key, &content).await?;

        debug!("Saved state to s3://{}/{key}", self.bucket);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let state_key = self.key(STATE_KEY);
        info!("Deleting state from s3://{}/{state_key}", self.bucket);

        self.delete_object(&state_key).await?;
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn exists(&self) -> Result<bool> {
        self.object_exists(&self.key(STATE_KEY)).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let lock_info = LockInfo::new(&holder_or_generated(holder));
        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut acquired = self.put_lock(&content, LockWrite::Absent).await?;
        if !acquired {
            let Some((existing, e_tag)) = self.read_lock().await? else {
                return Err(self.conflict().await?.into());
            };
            if !existing.is_expired() {
                return Err(StateError::locked_by(&existing).into());
            }
            let Some(e_tag) = e_tag else {
                return Err(StateError::lock_failed("Expired lock object has no ETag").into());
            };

            debug!("Expired lock held by {} found, taking over", existing.holder);
            acquired = self.put_lock(&content, LockWrite::Matches(e_tag)).await?;
        }

        if !acquired {
            return Err(self.conflict().await?.into());
        }

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let Some((current, Some(e_tag))) = self.read_lock().await?.filter(|(lock, _)| lock.lock_id == lock_id) else {
            return Err(StateError::lock_failed(format!("Lock {lock_id} is no longer held")).into());
        };

        let renewed = current.renewed();
        let content = serde_json::to_string_pretty(&renewed)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        if !self.put_lock(&content, LockWrite::Matches(e_tag)).await? {
            return Err(StateError::lock_failed(format!("Lock {lock_id} changed during renewal")).into());
        }

        debug!("Renewed state lock {lock_id} until {}", renewed.expires_at);
        Ok(renewed)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.get_lock_info().await? {
            if existing.lock_id == lock_id {
                self.delete_object(&self.key(LOCK_KEY)).await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
        }

        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.read_lock().await?.map(|(lock, _)| lock))
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("stacks/lake/")), "stacks/lake/");
        assert_eq!(normalize_prefix(Some("/stacks")), "stacks/");
    }

    #[test]
    fn test_condition_failures_are_recognized() {
        assert!(is_condition_failure(Some("PreconditionFailed")));
        assert!(is_condition_failure(Some("ConditionalRequestConflict")));
        assert!(!is_condition_failure(Some("AccessDenied")));
        assert!(!is_condition_failure(None));
    }
}
