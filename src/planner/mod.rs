//! Planning module.
//!
//! This module compares the resource graph with recorded state, orders the
//! resulting actions, and executes them against a provider.

mod diff;
mod executor;
mod plan;
mod retry;
mod scheduler;

pub use diff::DiffEngine;
pub use executor::PlanExecutor;
pub use plan::{ActionKind, AttributeChange, Plan, PlanSummary, PlannedAction};
pub use retry::RetryPolicy;
pub use scheduler::{PlanScheduler, Schedule};
