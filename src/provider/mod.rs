//! Resource provider module.
//!
//! A provider performs the actual create, update, and delete calls for a
//! resource kind. The reconciler is handed an explicit provider instance;
//! there is no global registry.

mod http;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Attributes;
use crate::error::ProviderError;

pub use http::HttpProvider;
pub use memory::{CallKind, FailureMode, InMemoryProvider, ProviderCall};

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A resource as reported back by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResource {
    /// Provider-assigned identity.
    pub identity: String,
    /// Attributes the provider reports for the resource.
    #[serde(default)]
    pub outputs: Attributes,
}

/// Performs lifecycle operations on concrete resources.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Short provider name for logs and reports.
    fn name(&self) -> &'static str;

    /// Creates a resource of `kind` with fully resolved attributes.
    async fn create(&self, kind: &str, attributes: &Attributes) -> ProviderResult<ProviderResource>;

    /// Updates the resource `identity` in place.
    async fn update(
        &self,
        identity: &str,
        kind: &str,
        attributes: &Attributes,
    ) -> ProviderResult<ProviderResource>;

    /// Deletes the resource `identity`.
    async fn delete(&self, identity: &str, kind: &str) -> ProviderResult<()>;
}
