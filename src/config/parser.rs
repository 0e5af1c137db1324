//! Model parser for loading stack model files.
//!
//! This module handles loading models from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ModelError, Result, StratumError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::StackConfig;

/// Parser for loading stack models.
#[derive(Debug, Default)]
pub struct ModelParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ModelParser {
    /// Creates a new model parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving the `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a model from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading model from: {}", path.display());

        if !path.exists() {
            return Err(StratumError::Model(ModelError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StratumError::Model(ModelError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a model from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        debug!("Parsing YAML model");

        let config: StackConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            StratumError::Model(ModelError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed model for stack {} with {} resources",
            config.stack.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads a model with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `STRATUM_<SECTION>_<KEY>` (e.g., `STRATUM_STACK_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// override has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Applies environment variable overrides to the model.
    fn apply_env_overrides(config: &mut StackConfig) -> Result<()> {
        if let Ok(name) = std::env::var("STRATUM_STACK_NAME") {
            debug!("Overriding stack.name from environment");
            config.stack.name = name;
        }

        if let Ok(env) = std::env::var("STRATUM_STACK_ENVIRONMENT") {
            debug!("Overriding stack.environment from environment");
            config.stack.environment = env;
        }

        if let Ok(bucket) = std::env::var("STRATUM_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("STRATUM_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Ok(endpoint) = std::env::var("STRATUM_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            config.provider.endpoint = Some(endpoint);
        }

        if let Ok(raw) = std::env::var("STRATUM_MAX_CONCURRENCY") {
            debug!("Overriding execution.max_concurrency from environment");
            config.execution.max_concurrency = raw.parse().map_err(|_| {
                StratumError::Model(ModelError::validation(
                    format!("STRATUM_MAX_CONCURRENCY must be a positive integer, got '{raw}'"),
                    "execution.max_concurrency",
                ))
            })?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StratumError::Model(ModelError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Reads a provider token from the named environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is not set.
    pub fn provider_token(var: &str) -> Result<String> {
        std::env::var(var).map_err(|_| {
            StratumError::Model(ModelError::validation(
                format!("Missing environment variable: {var}"),
                "provider.token_env",
            ))
        })
    }
}

/// Default model file names to search for.
pub const DEFAULT_MODEL_FILES: &[&str] = &["stratum.yaml", "stratum.yml", "stack.yaml", "stack.yml"];

/// Finds the model file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no model file is found.
pub fn find_model_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_MODEL_FILES {
            let model_path = current.join(filename);
            if model_path.exists() {
                info!("Found model file: {}", model_path.display());
                return Ok(model_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(StratumError::Model(ModelError::FileNotFound {
        path: start.join(DEFAULT_MODEL_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeType, AttributeValue, ProviderType, StateBackend};

    #[test]
    fn test_parse_minimal_model() {
        let yaml = r"
stack:
  name: minimal
";
        let config = ModelParser::new().parse_yaml(yaml, None).expect("parse");

        assert_eq!(config.stack.name, "minimal");
        assert_eq!(config.stack.environment, "dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.provider.provider_type, ProviderType::Http);
        assert_eq!(config.execution.max_concurrency, 4);
        assert_eq!(config.execution.retry.max_attempts, 3);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_full_model() {
        let yaml = r#"
stack:
  name: security-lake
  environment: prod

state:
  backend: s3
  bucket: stratum-state
  prefix: security-lake/prod

provider:
  type: memory

execution:
  max_concurrency: 2
  retry:
    max_attempts: 5
    base_delay_ms: 100

kinds:
  log_group:
    attributes:
      name: { type: string, required: true, force_new: true }
      retention_days: { type: integer }
  delivery_stream:
    attributes:
      log_group: { type: string, required: true }

resources:
  firehose_logs:
    kind: log_group
    attributes:
      name: /firehose-appfabric-security-lake
      retention_days: 7
  stream:
    kind: delivery_stream
    depends_on: [firehose_logs]
    attributes:
      log_group: "${firehose_logs.name}"
"#;
        let config = ModelParser::new().parse_yaml(yaml, None).expect("parse");

        assert_eq!(config.qualified_name(), "security-lake/prod");
        assert_eq!(config.state.bucket.as_deref(), Some("stratum-state"));
        assert_eq!(config.provider.provider_type, ProviderType::Memory);
        assert_eq!(config.execution.retry.max_attempts, 5);
        assert_eq!(config.execution.retry.max_delay_ms, 10_000);
        assert_eq!(config.resource_count(), 2);

        let name = &config.kinds["log_group"].attributes["name"];
        assert_eq!(name.attr_type, AttributeType::String);
        assert!(name.required && name.force_new);

        let logs = &config.resources["firehose_logs"];
        assert_eq!(logs.attributes["retention_days"], AttributeValue::Integer(7));
        assert_eq!(config.resources["stream"].depends_on, vec!["firehose_logs"]);
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ModelParser::new()
            .parse_yaml("stack: [", Some(Path::new("bad.yaml")))
            .expect_err("invalid yaml");
        assert!(matches!(
            err,
            StratumError::Model(ModelError::ParseError { location: Some(ref l), .. }) if l == "bad.yaml"
        ));
    }

    #[test]
    fn test_find_model_file_in_parent() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join("stratum.yaml"), "stack:\n  name: x\n").expect("write");

        let found = find_model_file(&nested).expect("found");
        assert_eq!(found, dir.path().join("stratum.yaml"));
    }
}
