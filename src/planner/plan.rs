//! Plan types.
//!
//! A [`Plan`] lists one action per resource (declared or recorded) together
//! with the actions that must finish before it may start.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::{AttributeValue, Attributes};

/// What the executor will do for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Create a resource that has no record.
    Create,
    /// Update a resource in place.
    Update,
    /// Delete the existing resource, then create a new one.
    Replace,
    /// Delete a recorded resource that is no longer declared.
    Delete,
    /// Nothing to do.
    #[serde(rename = "noop")]
    NoOp,
}

/// One attribute that differs between the record and the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub attribute: String,
    /// Recorded value, if any.
    pub old: Option<AttributeValue>,
    /// Declared value, if any.
    pub new: Option<AttributeValue>,
    /// Whether this change alone forces a replacement.
    pub forces_replacement: bool,
    /// Dependency whose pending change triggers this one, for cascaded changes.
    pub cause: Option<String>,
}

/// A single planned action.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// Logical id.
    pub id: String,
    /// Action to perform.
    pub action: ActionKind,
    /// Resource kind.
    pub resource_kind: String,
    /// Kind of the existing resource, if one is recorded.
    pub recorded_kind: Option<String>,
    /// Declared attributes (unresolved); empty for deletes.
    pub attributes: Attributes,
    /// Identity of the existing resource, if one is recorded.
    pub identity: Option<String>,
    /// Dependencies of the resource in the model.
    pub dependencies: BTreeSet<String>,
    /// Actions that must succeed before this one starts.
    pub prerequisites: BTreeSet<String>,
    /// Attribute-level changes.
    pub changes: Vec<AttributeChange>,
    /// Why this action was chosen.
    pub reason: String,
}

/// Counts of actions by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update in place.
    pub update: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Resources to delete.
    pub delete: usize,
    /// Unchanged resources.
    pub noop: usize,
}

/// An ordered set of actions bringing recorded state in line with a model.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Qualified stack name.
    pub stack: String,
    /// Hash of the model the plan was computed from.
    pub model_hash: String,
    /// Actions: forward actions in topological order, then deletes by id.
    pub actions: Vec<PlannedAction>,
}

impl Plan {
    /// Returns true if no action changes anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.iter().all(|a| a.action == ActionKind::NoOp)
    }

    /// Gets the action for a logical id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Returns `(id, action)` pairs in plan order.
    #[must_use]
    pub fn steps(&self) -> Vec<(&str, ActionKind)> {
        self.actions.iter().map(|a| (a.id.as_str(), a.action)).collect()
    }

    /// Counts actions by kind.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match action.action {
                ActionKind::Create => summary.create += 1,
                ActionKind::Update => summary.update += 1,
                ActionKind::Replace => summary.replace += 1,
                ActionKind::Delete => summary.delete += 1,
                ActionKind::NoOp => summary.noop += 1,
            }
        }
        summary
    }
}

impl PlanSummary {
    /// Number of actions that change something.
    #[must_use]
    pub const fn changes(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.action, self.id, self.resource_kind)?;
        if !self.reason.is_empty() {
            write!(f, ": {}", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.noop
        )
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan for {} ({}):", self.stack, self.summary())?;
        for (i, action) in self.actions.iter().filter(|a| a.action != ActionKind::NoOp).enumerate() {
            writeln!(f, "  {}. {action}", i + 1)?;
        }
        Ok(())
    }
}
