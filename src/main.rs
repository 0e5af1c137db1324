//! Stratum CLI entrypoint.
//!
//! This is the main entrypoint for the stratum command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use stratum::cancel::CancellationToken;
use stratum::cli::{Cli, Commands, OutputFormatter, StateCommands};
use stratum::config::{
    find_model_file, ModelParser, ModelValidator, ProviderType, SchemaRegistry, StackConfig, StateBackend,
    ValidationError,
};
use stratum::error::{Result, StratumError};
use stratum::graph::GraphBuilder;
use stratum::provider::{HttpProvider, InMemoryProvider, ResourceProvider};
use stratum::reconciler::Reconciler;
use stratum::state::{LocalStateStore, S3StateStore, StateStore, STATE_DIR};

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for errors outside a reconciliation run.
const EXIT_ERROR: u8 = 2;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(EXIT_ERROR);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Initializes the logging system on stderr.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli) -> Result<u8> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Reconcile { model } => cmd_reconcile(model.as_deref(), &formatter).await,
        Commands::Plan { model } => cmd_plan(model.as_deref(), &formatter).await,
        Commands::Validate { model, warnings } => cmd_validate(model.as_deref(), warnings, &formatter),
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::State { command } => cmd_state(command, &formatter).await,
    }
}

/// Reconcile the stack.
async fn cmd_reconcile(model_path: Option<&Path>, formatter: &OutputFormatter) -> Result<u8> {
    let (config, store) = load_model_and_state(model_path).await?;
    let provider = create_provider(&config)?;
    let reconciler = Reconciler::from_config(&config, store, provider);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; waiting for in-flight actions to finish");
            signal.cancel();
        }
    });

    let report = reconciler.reconcile(&config.resources, &cancel).await;
    print_stdout(&formatter.format_report(&report))?;

    Ok(report.status.exit_code())
}

/// Show the plan without applying it.
async fn cmd_plan(model_path: Option<&Path>, formatter: &OutputFormatter) -> Result<u8> {
    let (config, store) = load_model_and_state(model_path).await?;
    let provider = create_provider(&config)?;
    let reconciler = Reconciler::from_config(&config, store, provider);

    let (plan, schedule) = reconciler.plan(&config.resources).await?;
    debug!("Plan spans {} waves", schedule.waves.len());
    print_stdout(&formatter.format_plan(&plan))?;

    Ok(0)
}

/// Validate a model file.
fn cmd_validate(model_path: Option<&Path>, show_warnings: bool, formatter: &OutputFormatter) -> Result<u8> {
    let model_file = resolve_model_path(model_path)?;
    info!("Validating model: {}", model_file.display());

    let parser = ModelParser::new().with_base_path(model_dir(&model_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&model_file)?;

    let mut result = ModelValidator::new().check(&config);
    if result.is_valid() {
        let schemas = SchemaRegistry::from_kinds(&config.kinds);
        if let Err(e) = GraphBuilder::new(&schemas).build(&config.resources) {
            result.errors.push(ValidationError {
                field: String::from("resources"),
                message: e.to_string(),
            });
        }
    }

    print_stdout(&formatter.format_validation(&config, &result, show_warnings))?;
    Ok(if result.is_valid() { 0 } else { EXIT_ERROR })
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<u8> {
    info!("Initializing new Stratum project in: {}", path.display());

    let model_path = path.join("stratum.yaml");
    let gitignore_path = path.join(".gitignore");

    if !force && model_path.exists() {
        eprintln!("Model file already exists: {}", model_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(EXIT_ERROR);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let template = include_str!("../templates/stratum.yaml");
    std::fs::write(&model_path, template)?;
    eprintln!("Created: {}", model_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", state_entry.as_str()]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# Stratum")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized.");
    eprintln!("Next steps:");
    eprintln!("  1. Edit stratum.yaml with your kinds and resources");
    eprintln!("  2. Run 'stratum validate' to check the model");
    eprintln!("  3. Run 'stratum plan' to preview the changes");
    eprintln!("  4. Run 'stratum reconcile' to apply them");

    Ok(0)
}

/// State management commands.
async fn cmd_state(command: StateCommands, formatter: &OutputFormatter) -> Result<u8> {
    match command {
        StateCommands::Show { model } => {
            let (config, store) = load_model_and_state(model.as_deref()).await?;
            if let Some(state) = store.load().await? {
                let lock = store.get_lock_info().await?;
                print_stdout(&formatter.format_state(&state, lock.as_ref()))?;
            } else {
                eprintln!("No state recorded for {}.", config.qualified_name());
            }
        }
        StateCommands::Unlock { model, lock_id, force } => {
            let (_config, store) = load_model_and_state(model.as_deref()).await?;
            if force {
                if let Some(lock) = store.get_lock_info().await? {
                    warn!("Force-releasing lock {} held by {}", lock.lock_id, lock.holder);
                    store.release_lock(&lock.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                return Err(StratumError::internal("Provide --lock-id or use --force"));
            }
        }
    }

    Ok(0)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output to stdout.
fn print_stdout(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    Ok(())
}

/// Resolves the model file path.
fn resolve_model_path(model_path: Option<&Path>) -> Result<PathBuf> {
    model_path.map_or_else(|| find_model_file("."), |path| Ok(path.to_path_buf()))
}

fn model_dir(model_file: &Path) -> &Path {
    model_file.parent().unwrap_or_else(|| Path::new("."))
}

/// Loads and validates the model, and creates the configured state store.
async fn load_model_and_state(model_path: Option<&Path>) -> Result<(StackConfig, Arc<dyn StateStore>)> {
    let model_file = resolve_model_path(model_path)?;
    debug!("Loading model from: {}", model_file.display());

    let base_dir = model_dir(&model_file);
    let parser = ModelParser::new().with_base_path(base_dir);
    parser.load_dotenv()?;

    let config = parser.load_with_env(&model_file)?;
    let validation = ModelValidator::new().validate(&config)?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let store: Arc<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let dir = config
                .state
                .path
                .as_ref()
                .map_or_else(|| base_dir.join(STATE_DIR), |p| base_dir.join(p));
            Arc::new(LocalStateStore::with_base_dir(dir))
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| StratumError::internal("S3 bucket not configured"))?;
            let prefix = config.state.prefix.as_deref();
            let region = config.state.region.as_deref();
            Arc::new(S3StateStore::new(bucket, prefix, region).await)
        }
    };

    Ok((config, store))
}

/// Creates the configured resource provider.
fn create_provider(config: &StackConfig) -> Result<Arc<dyn ResourceProvider>> {
    match config.provider.provider_type {
        ProviderType::Http => {
            let endpoint = config
                .provider
                .endpoint
                .as_deref()
                .ok_or_else(|| StratumError::internal("Provider endpoint not configured"))?;
            let mut provider = HttpProvider::new(endpoint, config.provider.timeout_secs)?;
            if let Some(var) = &config.provider.token_env {
                provider = provider.with_token(ModelParser::provider_token(var)?);
            }
            Ok(Arc::new(provider))
        }
        ProviderType::Memory => {
            warn!("Using the in-memory provider; nothing outside this process is changed");
            Ok(Arc::new(InMemoryProvider::new()))
        }
    }
}
