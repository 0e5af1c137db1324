//! Model validation.
//!
//! Checks naming rules and settings that the schema and graph builder do not
//! cover: stack metadata, state backend, provider, execution limits, and the
//! shape of declared dependencies.

use std::collections::HashSet;
use tracing::debug;

use crate::error::{ModelError, Result, StratumError};

use super::spec::{ExecutionConfig, ProviderConfig, ProviderType, StackConfig, StateBackend, StateConfig};

/// Validator for stack models.
#[derive(Debug, Default)]
pub struct ModelValidator;

/// Result of validating a model.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors.
    pub errors: Vec<ValidationError>,
    /// Validation warnings.
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ModelValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a stack model.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(StratumError::Model(ModelError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!("Model validation passed");
        Ok(result)
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_stack(config, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        Self::validate_execution(&config.execution, &mut result);
        Self::validate_kinds(config, &mut result);
        Self::validate_resources(config, &mut result);

        result
    }

    /// Validates stack metadata.
    fn validate_stack(config: &StackConfig, result: &mut ValidationResult) {
        if config.stack.name.is_empty() {
            result.error("stack.name", "Stack name cannot be empty");
        } else if !is_valid_name(&config.stack.name) {
            result.error(
                "stack.name",
                format!(
                    "Stack name '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                    config.stack.name
                ),
            );
        }

        if config.stack.environment.is_empty() {
            result.error("stack.environment", "Environment cannot be empty");
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_deref().is_none_or(str::is_empty) {
                    result.error("state.bucket", "S3 bucket name is required when using S3 backend");
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result.warn("state.bucket is ignored by the local backend");
                }
            }
        }
    }

    /// Validates provider configuration.
    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        match provider.provider_type {
            ProviderType::Http => match provider.endpoint.as_deref() {
                None | Some("") => {
                    result.error("provider.endpoint", "Endpoint is required for the http provider");
                }
                Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    result.error(
                        "provider.endpoint",
                        format!("Endpoint '{url}' must start with http:// or https://"),
                    );
                }
                Some(_) => {}
            },
            ProviderType::Memory => {
                result.warn("memory provider selected: resources exist only for the duration of the run");
            }
        }

        if provider.timeout_secs == 0 {
            result.error("provider.timeout_secs", "Timeout must be at least 1 second");
        }
    }

    /// Validates execution limits.
    fn validate_execution(execution: &ExecutionConfig, result: &mut ValidationResult) {
        if execution.max_concurrency == 0 {
            result.error("execution.max_concurrency", "Max concurrency must be at least 1");
        }

        if execution.retry.max_attempts == 0 {
            result.error("execution.retry.max_attempts", "Max attempts must be at least 1");
        }

        if execution.retry.base_delay_ms > execution.retry.max_delay_ms {
            result.error(
                "execution.retry.base_delay_ms",
                format!(
                    "Base delay ({}ms) exceeds max delay ({}ms)",
                    execution.retry.base_delay_ms, execution.retry.max_delay_ms
                ),
            );
        }
    }

    /// Validates kind names.
    fn validate_kinds(config: &StackConfig, result: &mut ValidationResult) {
        for kind in config.kinds.keys() {
            if !is_valid_name(kind) {
                result.error(format!("kinds.{kind}"), format!("Kind name '{kind}' is invalid"));
            }
        }

        let used: HashSet<&str> = config.resources.values().map(|r| r.kind.as_str()).collect();
        for kind in config.kinds.keys() {
            if !used.contains(kind.as_str()) {
                result.warn(format!("Kind '{kind}' is declared but not used"));
            }
        }
    }

    /// Validates resource ids and explicit dependencies.
    fn validate_resources(config: &StackConfig, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result.warn("No resources defined in model");
            return;
        }

        for (id, decl) in &config.resources {
            let field = format!("resources.{id}");

            if !is_valid_name(id) {
                result.error(
                    field.clone(),
                    format!(
                        "Resource id '{id}' is invalid. Must be lowercase alphanumeric with hyphens or underscores."
                    ),
                );
            }

            if decl.kind.is_empty() {
                result.error(format!("{field}.kind"), "Resource kind cannot be empty");
            }

            let mut seen = HashSet::new();
            for dep in &decl.depends_on {
                if !seen.insert(dep.as_str()) {
                    result.warn(format!("Resource '{id}' lists dependency '{dep}' more than once"));
                }
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens or underscores, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    // First character must be a letter
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    // Rest must be lowercase alphanumeric, hyphen or underscore
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') {
        return false;
    }

    !name.ends_with('-') && !name.ends_with('_') && !name.contains("--")
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelParser;

    fn parse(yaml: &str) -> StackConfig {
        ModelParser::new().parse_yaml(yaml, None).expect("parse")
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("glue-table"));
        assert!(is_valid_name("glue_table_2"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Glue")); // uppercase
        assert!(!is_valid_name("1table")); // starts with number
        assert!(!is_valid_name("glue.table")); // dot clashes with reference syntax
        assert!(!is_valid_name("table-")); // ends with hyphen
        assert!(!is_valid_name("glue--table")); // consecutive hyphens
    }

    #[test]
    fn test_http_provider_requires_endpoint() {
        let config = parse("stack:\n  name: lake\nresources:\n  a:\n    kind: k\n");
        let result = ModelValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.field == "provider.endpoint"));
        assert!(ModelValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_valid_memory_model() {
        let config = parse(
            "stack:\n  name: lake\nprovider:\n  type: memory\nkinds:\n  k: {}\nresources:\n  a:\n    kind: k\n",
        );
        let result = ModelValidator::new().validate(&config).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_execution_limits() {
        let config = parse(
            "stack:\n  name: lake\nprovider:\n  type: memory\nexecution:\n  max_concurrency: 0\n  retry:\n    max_attempts: 0\n",
        );
        let result = ModelValidator::new().check(&config);
        assert_eq!(result.error_count(), 2);
    }

    #[test]
    fn test_s3_requires_bucket() {
        let config = parse("stack:\n  name: lake\nstate:\n  backend: s3\nprovider:\n  type: memory\n");
        let result = ModelValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.field == "state.bucket"));
    }
}
