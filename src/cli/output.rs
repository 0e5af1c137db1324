//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! plans, run reports, and recorded state in text or JSON.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{StackConfig, ValidationResult};
use crate::planner::{ActionKind, Plan};
use crate::report::{NodeStatus, RunReport, RunStatus};
use crate::state::{LockInfo, StateDocument};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Node outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Identity")]
    identity: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Identity")]
    identity: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Applied")]
    applied: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &Plan) -> String {
        if plan.is_empty() {
            return format!("{} No changes required - {} is up to date.\n", "✓".green(), plan.stack);
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nPlan for {}", plan.stack.bold());
        let _ = write!(output, "   Model hash: {}\n\n", short(&plan.model_hash));

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .filter(|a| a.action != ActionKind::NoOp)
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action(a.action),
                resource: a.id.clone(),
                kind: a.resource_kind.clone(),
                reason: Self::truncate(&a.reason, 48),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let summary = plan.summary();
        let _ = writeln!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.replace.to_string().magenta(),
            summary.delete.to_string().red(),
            summary.noop
        );

        output
    }

    /// Formats a run report.
    #[must_use]
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &RunReport) -> String {
        let headline = match report.status {
            RunStatus::Clean => format!("{} Reconciliation of {} is clean", "✓".green(), report.stack),
            RunStatus::Partial => format!("{} Reconciliation of {} is partial", "⚠".yellow(), report.stack),
            RunStatus::Failed => format!("{} Reconciliation of {} failed", "✗".red(), report.stack),
        };

        let mut output = format!("{headline}\n\n");
        let _ = writeln!(output, "   Run: {}", report.run_id);
        if let Some(hash) = &report.model_hash {
            let _ = writeln!(output, "   Model hash: {}", short(hash));
        }
        let _ = writeln!(output, "   Duration: {}ms", report.duration_ms);
        if let Some(plan) = &report.plan {
            let _ = writeln!(output, "   Plan: {plan}");
        }

        if let Some(error) = &report.error {
            let _ = write!(output, "\n{} {error}\n", "Error:".red());
            return output;
        }

        let changed: Vec<OutcomeRow> = report
            .outcomes
            .iter()
            .filter(|o| o.action != ActionKind::NoOp || o.status != NodeStatus::Succeeded)
            .map(|o| OutcomeRow {
                resource: o.id.clone(),
                action: Self::format_action(o.action),
                status: Self::format_node_status(o.status),
                attempts: o.attempts,
                identity: o.identity.clone().unwrap_or_default(),
                detail: Self::truncate(o.error.as_deref().unwrap_or(""), 48),
            })
            .collect();

        if !changed.is_empty() {
            output.push('\n');
            output.push_str(&Table::new(changed).to_string());
            output.push('\n');
        }

        let _ = write!(
            output,
            "\n{} succeeded, {} failed, {} skipped\n",
            report.count(NodeStatus::Succeeded).to_string().green(),
            report.count(NodeStatus::Failed).to_string().red(),
            report.count(NodeStatus::Skipped).to_string().yellow()
        );

        output
    }

    /// Formats recorded state and the current lock, if any.
    #[must_use]
    pub fn format_state(&self, state: &StateDocument, lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "state": state, "lock": lock });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}\n\n", state.stack.bold());
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.records.len());

                if let Some(lock) = lock {
                    let _ = writeln!(
                        output,
                        "   {} locked by {} ({}, {}s left)",
                        "⚠".yellow(),
                        lock.holder,
                        lock.lock_id,
                        lock.remaining_secs()
                    );
                }

                if !state.records.is_empty() {
                    let rows: Vec<RecordRow> = state
                        .records
                        .values()
                        .map(|r| RecordRow {
                            resource: r.logical_id.clone(),
                            kind: r.kind.clone(),
                            identity: Self::truncate(&r.identity, 40),
                            hash: short(&r.attributes_hash),
                            applied: r.applied_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent runs ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let _ = writeln!(
                            output,
                            "     {} {} {} ({} ok, {} failed, {} skipped)",
                            Self::format_run_status(entry.status),
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            short(&entry.model_hash),
                            entry.succeeded,
                            entry.failed,
                            entry.skipped
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, config: &StackConfig, result: &ValidationResult, warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "stack": config.qualified_name(),
                    "valid": result.is_valid(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Model is valid\n", "✓".green())
                } else {
                    let mut text = format!("{} Model has {} error(s):\n", "✗".red(), result.error_count());
                    for error in &result.errors {
                        let _ = writeln!(text, "   - {error}");
                    }
                    text
                };

                if warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = write!(output, "\nModel summary:\n");
                let _ = writeln!(output, "   Stack: {}", config.qualified_name());
                let _ = writeln!(output, "   Kinds: {}", config.kinds.len());
                let _ = writeln!(output, "   Resources: {}", config.resource_count());
                output
            }
        }
    }

    /// Formats an action kind with color.
    fn format_action(action: ActionKind) -> String {
        match action {
            ActionKind::Create => "+create".green().to_string(),
            ActionKind::Update => "~update".yellow().to_string(),
            ActionKind::Replace => "±replace".magenta().to_string(),
            ActionKind::Delete => "-delete".red().to_string(),
            ActionKind::NoOp => "noop".dimmed().to_string(),
        }
    }

    fn format_node_status(status: NodeStatus) -> String {
        match status {
            NodeStatus::Succeeded => "succeeded".green().to_string(),
            NodeStatus::Failed => "failed".red().to_string(),
            NodeStatus::Skipped => "skipped".yellow().to_string(),
        }
    }

    fn format_run_status(status: RunStatus) -> String {
        match status {
            RunStatus::Clean => "✓".green().to_string(),
            RunStatus::Partial => "⚠".yellow().to_string(),
            RunStatus::Failed => "✗".red().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn short(hash: &str) -> String {
    hash.chars().take(8).collect()
}
