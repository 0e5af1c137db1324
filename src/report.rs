//! Run reports.
//!
//! A [`RunReport`] is the single result of a reconciliation run. Every
//! failure, from an invalid model to a rejected provider call, ends up here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::planner::{ActionKind, PlanSummary};

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every node succeeded.
    Clean,
    /// Some changes were applied, others failed or were skipped.
    Partial,
    /// Nothing was applied successfully.
    Failed,
}

impl RunStatus {
    /// Process exit code for this status.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::Partial => 1,
            Self::Failed => 2,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Clean => "clean",
            Self::Partial => "partial",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Result of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// The action completed.
    Succeeded,
    /// The action was attempted and failed.
    Failed,
    /// The action never started.
    Skipped,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one planned action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOutcome {
    /// Logical id.
    pub id: String,
    /// Action that was planned.
    pub action: ActionKind,
    /// Resource kind.
    pub resource_kind: String,
    /// Result.
    pub status: NodeStatus,
    /// Provider attempts made (all calls of a replace combined).
    pub attempts: u32,
    /// Identity after the action, if any.
    pub identity: Option<String>,
    /// Failure or skip reason.
    pub error: Option<String>,
    /// Time spent on the node in milliseconds.
    pub duration_ms: u64,
}

impl NodeOutcome {
    /// Outcome for a node that never started.
    #[must_use]
    pub fn skipped(id: &str, action: ActionKind, resource_kind: &str, reason: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            action,
            resource_kind: resource_kind.to_string(),
            status: NodeStatus::Skipped,
            attempts: 0,
            identity: None,
            error: Some(reason.into()),
            duration_ms: 0,
        }
    }
}

/// Report of one reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,
    /// Qualified stack name.
    pub stack: String,
    /// Hash of the reconciled model.
    pub model_hash: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Overall status.
    pub status: RunStatus,
    /// Plan summary, when a plan was computed.
    pub plan: Option<PlanSummary>,
    /// Per-node outcomes, in completion order.
    pub outcomes: Vec<NodeOutcome>,
    /// Error that stopped the run before execution.
    pub error: Option<String>,
}

impl RunReport {
    /// Starts a report for `stack`.
    #[must_use]
    pub fn start(stack: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            stack: stack.to_string(),
            model_hash: None,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            status: RunStatus::Clean,
            plan: None,
            outcomes: Vec::new(),
            error: None,
        }
    }

    /// Records a fatal error; the run is failed.
    #[must_use]
    pub fn fail(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self.finish()
    }

    /// Stamps the finish time and derives the status.
    #[must_use]
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.duration_ms = u64::try_from((self.finished_at - self.started_at).num_milliseconds()).unwrap_or(0);
        self.status = if self.error.is_some() {
            RunStatus::Failed
        } else {
            status_of(&self.outcomes)
        };
        self
    }

    /// Gets the outcome for a logical id.
    #[must_use]
    pub fn outcome(&self, id: &str) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| o.id == id)
    }

    /// Number of nodes with `status`.
    #[must_use]
    pub fn count(&self, status: NodeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Clean if nothing failed or was skipped; partial if at least one change
/// was applied; failed otherwise.
fn status_of(outcomes: &[NodeOutcome]) -> RunStatus {
    let clean = outcomes.iter().all(|o| o.status == NodeStatus::Succeeded);
    if clean {
        return RunStatus::Clean;
    }

    let applied = outcomes
        .iter()
        .any(|o| o.status == NodeStatus::Succeeded && o.action != ActionKind::NoOp);
    if applied {
        RunStatus::Partial
    } else {
        RunStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, action: ActionKind, status: NodeStatus) -> NodeOutcome {
        NodeOutcome {
            id: id.to_string(),
            action,
            resource_kind: String::from("k1"),
            status,
            attempts: 1,
            identity: None,
            error: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_status_rules() {
        let ok = outcome("a", ActionKind::Create, NodeStatus::Succeeded);
        let noop = outcome("b", ActionKind::NoOp, NodeStatus::Succeeded);
        let failed = outcome("c", ActionKind::Create, NodeStatus::Failed);

        assert_eq!(status_of(&[]), RunStatus::Clean);
        assert_eq!(status_of(&[ok.clone(), noop.clone()]), RunStatus::Clean);
        assert_eq!(status_of(&[ok, failed.clone()]), RunStatus::Partial);
        assert_eq!(status_of(&[noop, failed]), RunStatus::Failed);
    }

    #[test]
    fn test_fatal_error_fails_run() {
        let report = RunReport::start("s/dev").fail("cycle");
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.status.exit_code(), 2);
        assert_eq!(report.error.as_deref(), Some("cycle"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&RunStatus::Partial).expect("serialize");
        assert_eq!(json, "\"partial\"");
    }
}
