//! Configuration module for the Stratum reconciler.
//!
//! This module handles everything about the declarative model:
//! - Parsing and deserializing stack model files
//! - Typed attribute values and cross-resource references
//! - Per-kind attribute schemas and replacement policies
//! - Validation of model settings
//! - Computing hashes for change detection

mod hash;
mod parser;
mod schema;
mod spec;
mod validator;
mod value;

pub use hash::AttributeHasher;
pub use parser::{DEFAULT_MODEL_FILES, ModelParser, find_model_file};
pub use schema::{AttributeSchema, AttributeType, KindSchema, SchemaRegistry};
pub use spec::{
    ExecutionConfig, ProviderConfig, ProviderType, ResourceDecl, ResourceModel, RetryConfig,
    StackConfig, StackMeta, StateBackend, StateConfig,
};
pub use validator::{ModelValidator, ValidationError, ValidationResult};
pub use value::{AttributeValue, Attributes, Reference};
