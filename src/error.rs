//! Error types for the Stratum reconciler.
//!
//! This module provides the error hierarchy for every stage of a run:
//! model loading, graph building, state management, provider calls,
//! scheduling, and reconciliation.

use std::path::PathBuf;
use thiserror::Error;

use crate::state::LockInfo;

/// The main error type for the Stratum reconciler.
#[derive(Debug, Error)]
pub enum StratumError {
    /// Declarative model errors.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Resource provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors in the declarative model: loading, validation, and graph building.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model file was not found.
    #[error("Model file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The model file could not be parsed.
    #[error("Failed to parse model: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Model validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A resource uses a kind with no registered schema.
    #[error("Resource '{node}' uses unknown kind '{kind}'")]
    UnknownKind {
        /// Logical id of the resource.
        node: String,
        /// The unregistered kind.
        kind: String,
    },

    /// A resource declares an attribute its kind does not define.
    #[error("Resource '{node}' sets unknown attribute '{attribute}' for kind '{kind}'")]
    UnknownAttribute {
        /// Logical id of the resource.
        node: String,
        /// Resource kind.
        kind: String,
        /// The undeclared attribute.
        attribute: String,
    },

    /// A required attribute is missing.
    #[error("Resource '{node}' is missing required attribute '{attribute}'")]
    MissingAttribute {
        /// Logical id of the resource.
        node: String,
        /// The missing attribute.
        attribute: String,
    },

    /// An attribute value does not match its declared type.
    #[error("Resource '{node}' attribute '{attribute}' expected {expected}, found {found}")]
    TypeMismatch {
        /// Logical id of the resource.
        node: String,
        /// The offending attribute.
        attribute: String,
        /// Expected type name.
        expected: String,
        /// Actual type name.
        found: String,
    },

    /// Dependency edges form a cycle.
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    CycleDetected {
        /// Node sequence of the cycle, first node repeated at the end.
        cycle: Vec<String>,
    },

    /// A dependency id is not present in the model.
    #[error("Resource '{node}' depends on '{missing}', which is not declared")]
    DanglingReference {
        /// Logical id of the resource holding the reference.
        node: String,
        /// The undeclared dependency id.
        missing: String,
    },

    /// A reference could not be resolved at execution time.
    #[error("Resource '{node}' references '{reference}', which has no recorded state")]
    UnresolvedReference {
        /// Logical id of the resource holding the reference.
        node: String,
        /// The reference expression.
        reference: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Storage backend IO error.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },

    /// The stored state belongs to a different stack.
    #[error("State belongs to stack '{found}', not '{expected}'")]
    StackMismatch {
        /// Stack being reconciled.
        expected: String,
        /// Stack recorded in state.
        found: String,
    },
}

/// Errors reported by a resource provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// A transient failure (throttling, timeouts, unavailability); retryable.
    #[error("Transient provider failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// Provider-suggested delay before retrying, in milliseconds.
        retry_after_ms: Option<u64>,
    },

    /// A permanent rejection; never retried.
    #[error("Provider rejected the request: {message}")]
    Permanent {
        /// Description of the rejection.
        message: String,
    },

    /// The resource does not exist on the provider.
    #[error("Resource not found: {identity}")]
    NotFound {
        /// Provider identity that was looked up.
        identity: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The scheduler found actions that can never become ready.
    #[error("Plan cannot be scheduled, unresolvable actions: {}", remaining.join(", "))]
    UnschedulableGraph {
        /// Logical ids of the actions left unscheduled.
        remaining: Vec<String>,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The run was cancelled before it could start.
    #[error("Reconciliation cancelled")]
    Cancelled,

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for Stratum operations.
pub type Result<T> = std::result::Result<T, StratumError>;

impl StratumError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError::Transient { .. })
                | Self::State(StateError::LockFailed { .. })
        )
    }
}

impl ModelError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error without a location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a lock failure with the given message.
    #[must_use]
    pub fn lock_failed(message: impl Into<String>) -> Self {
        Self::LockFailed {
            message: message.into(),
        }
    }

    /// Creates the conflict error for a lock owned by someone else.
    #[must_use]
    pub fn locked_by(lock: &LockInfo) -> Self {
        Self::LockedByOther {
            holder: lock.holder.clone(),
            since: lock.acquired_at.to_rfc3339(),
        }
    }
}

impl ProviderError {
    /// Creates a transient error without a retry hint.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Returns true if the provider classified this failure as transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the provider's suggested retry delay, if any.
    #[must_use]
    pub const fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Transient { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = ModelError::CycleDetected {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_retryable_classification() {
        let transient = StratumError::from(ProviderError::transient("throttled"));
        let permanent = StratumError::from(ProviderError::permanent("bad request"));

        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = ProviderError::Transient {
            message: String::from("slow down"),
            retry_after_ms: Some(1500),
        };
        assert_eq!(err.retry_after_ms(), Some(1500));
        assert_eq!(ProviderError::permanent("no").retry_after_ms(), None);
    }
}
