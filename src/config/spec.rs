//! Model specification types for the reconciler.
//!
//! This module defines the structs that map to a stack model file.
//! A model fully describes the desired state: which resources exist,
//! their kinds and attributes, and how they depend on each other.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::schema::KindSchema;
use super::value::Attributes;

/// Declared resources keyed by logical id.
pub type ResourceModel = BTreeMap<String, ResourceDecl>;

/// The root structure of a stack model file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Stack-level metadata.
    pub stack: StackMeta,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Resource provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Execution limits.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Schemas for the resource kinds used by this stack.
    #[serde(default)]
    pub kinds: BTreeMap<String, KindSchema>,
    /// Declared resources.
    #[serde(default)]
    pub resources: ResourceModel,
}

/// Stack-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackMeta {
    /// Unique name for the stack.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDecl {
    /// Resource kind; must be registered in `kinds`.
    pub kind: String,
    /// Desired attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Explicit dependencies, in addition to those implied by references.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Resource provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Provider implementation.
    #[serde(rename = "type", default)]
    pub provider_type: ProviderType,
    /// Base URL of the provisioning service (http provider).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the bearer token (http provider).
    #[serde(default)]
    pub token_env: Option<String>,
    /// Request timeout in seconds (http provider).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Provider implementations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// REST provisioning service.
    #[default]
    Http,
    /// In-process simulator, for rehearsing a model.
    Memory,
}

/// Execution limits for a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Maximum number of provider operations in flight.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Retry policy for transient provider errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry configuration for transient provider errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Whether to apply full jitter to backoff delays.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_environment() -> String {
    String::from("dev")
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    250
}

const fn default_max_delay_ms() -> u64 {
    10_000
}

const fn default_jitter() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::default(),
            endpoint: None,
            token_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl StackConfig {
    /// Returns the qualified stack name (`name/environment`).
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.stack.name, self.stack.environment)
    }

    /// Returns the number of declared resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

impl ResourceDecl {
    /// Creates a declaration with no attributes or dependencies.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Attributes::new(),
            depends_on: Vec::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<super::value::AttributeValue>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}
