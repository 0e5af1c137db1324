//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stratum - Dependency-aware declarative resource reconciler.
#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile the stack with its model file.
    Reconcile {
        /// Path to the model file (searched in the current directory if omitted).
        #[arg(env = "STRATUM_MODEL")]
        model: Option<PathBuf>,
    },

    /// Show the plan a reconcile would execute, without applying it.
    Plan {
        /// Path to the model file.
        #[arg(env = "STRATUM_MODEL")]
        model: Option<PathBuf>,
    },

    /// Validate a model file.
    Validate {
        /// Path to the model file.
        #[arg(env = "STRATUM_MODEL")]
        model: Option<PathBuf>,

        /// Show warnings as well as errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Write a starter model file.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Inspect or repair recorded state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show recorded state.
    Show {
        /// Path to the model file.
        #[arg(env = "STRATUM_MODEL")]
        model: Option<PathBuf>,
    },

    /// Release a stale state lock.
    Unlock {
        /// Path to the model file.
        #[arg(env = "STRATUM_MODEL")]
        model: Option<PathBuf>,

        /// Lock ID to release.
        #[arg(long)]
        lock_id: Option<String>,

        /// Release whatever lock is held (dangerous).
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
