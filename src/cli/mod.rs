//! CLI module for the Stratum reconciler.
//!
//! This module provides the command-line interface for reconciling
//! stacks and inspecting their recorded state.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
