//! Plan scheduling.
//!
//! Orders a plan's actions so that every action follows its prerequisites.
//! Ties are broken by ascending logical id, so equal plans always schedule
//! identically.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::PlanError;

use super::plan::Plan;

/// Execution order for a plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Schedule {
    /// Logical ids in a valid sequential order.
    pub order: Vec<String>,
    /// Groups of ids whose prerequisites are all in earlier groups.
    pub waves: Vec<Vec<String>>,
    /// Prerequisites of each action, restricted to actions in the plan.
    pub prerequisites: BTreeMap<String, BTreeSet<String>>,
    /// Actions waiting on each action.
    pub dependents: BTreeMap<String, BTreeSet<String>>,
}

impl Schedule {
    /// Actions waiting directly on `id`.
    pub fn dependents_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependents.get(id).into_iter().flatten().map(String::as_str)
    }

    /// Number of in-plan prerequisites of `id`.
    #[must_use]
    pub fn prerequisite_count(&self, id: &str) -> usize {
        self.prerequisites.get(id).map_or(0, BTreeSet::len)
    }
}

/// Kahn's-algorithm scheduler over action prerequisites.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanScheduler;

impl PlanScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Schedules `plan`.
    ///
    /// # Errors
    ///
    /// Returns `UnschedulableGraph` listing the actions that could never
    /// become ready.
    pub fn schedule(&self, plan: &Plan) -> Result<Schedule, PlanError> {
        let ids: BTreeSet<&str> = plan.actions.iter().map(|a| a.id.as_str()).collect();

        let mut prerequisites: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for action in &plan.actions {
            let prereqs: BTreeSet<String> = action
                .prerequisites
                .iter()
                .filter(|p| ids.contains(p.as_str()))
                .cloned()
                .collect();
            for prereq in &prereqs {
                dependents.entry(prereq.clone()).or_default().insert(action.id.clone());
            }
            prerequisites.insert(action.id.clone(), prereqs);
        }

        let mut remaining: HashMap<&str, usize> =
            prerequisites.iter().map(|(id, p)| (id.as_str(), p.len())).collect();
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order: Vec<String> = Vec::with_capacity(ids.len());
        let mut level: HashMap<&str, usize> = HashMap::new();

        while let Some(id) = ready.pop_first() {
            let wave = prerequisites
                .get(id)
                .into_iter()
                .flatten()
                .filter_map(|p| level.get(p.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(id, wave);
            order.push(id.to_string());

            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        if order.len() != ids.len() {
            let scheduled: BTreeSet<&str> = order.iter().map(String::as_str).collect();
            return Err(PlanError::UnschedulableGraph {
                remaining: ids
                    .difference(&scheduled)
                    .map(|id| (*id).to_string())
                    .collect(),
            });
        }

        let wave_count = level.values().max().map_or(0, |l| l + 1);
        let mut waves: Vec<Vec<String>> = vec![Vec::new(); wave_count];
        for id in &order {
            if let Some(l) = level.get(id.as_str()) {
                waves[*l].push(id.clone());
            }
        }
        for wave in &mut waves {
            wave.sort();
        }

        Ok(Schedule {
            order,
            waves,
            prerequisites,
            dependents,
        })
    }
}
