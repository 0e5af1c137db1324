//! Resource graph builder.
//!
//! Turns a declarative model into a validated [`ResourceGraph`]: every
//! resource is checked against its kind schema, explicit `depends_on` entries
//! and `${...}` references become edges, and the result is proven acyclic.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::{ResourceModel, SchemaRegistry};
use crate::error::ModelError;

use super::types::{ResourceGraph, ResourceNode};

/// Builds resource graphs from declarative models.
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    /// Kind schemas used for attribute validation.
    schemas: &'a SchemaRegistry,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first cycle search over dependency edges.
struct CycleFinder<'a> {
    nodes: &'a BTreeMap<String, ResourceNode>,
    marks: HashMap<&'a str, Mark>,
    path: Vec<&'a str>,
}

impl<'a> CycleFinder<'a> {
    fn new(nodes: &'a BTreeMap<String, ResourceNode>) -> Self {
        Self {
            nodes,
            marks: HashMap::new(),
            path: Vec::new(),
        }
    }

    /// Returns the first cycle found, visiting ids in ascending order.
    fn find(mut self) -> Option<Vec<String>> {
        let nodes = self.nodes;
        nodes.keys().find_map(|id| self.visit(id))
    }

    fn visit(&mut self, id: &'a str) -> Option<Vec<String>> {
        match self.marks.get(id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = self.path.iter().position(|p| *p == id)?;
                let mut cycle: Vec<String> =
                    self.path[start..].iter().map(|s| (*s).to_string()).collect();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            None => {}
        }

        self.marks.insert(id, Mark::Visiting);
        self.path.push(id);

        let nodes = self.nodes;
        if let Some(node) = nodes.get(id) {
            for dep in &node.dependencies {
                if let Some(cycle) = self.visit(dep) {
                    return Some(cycle);
                }
            }
        }

        self.path.pop();
        self.marks.insert(id, Mark::Done);
        None
    }
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder that validates against `schemas`.
    #[must_use]
    pub const fn new(schemas: &'a SchemaRegistry) -> Self {
        Self { schemas }
    }

    /// Builds a validated graph from a model.
    ///
    /// # Errors
    ///
    /// Returns a schema error for invalid attributes, `DanglingReference` for
    /// dependencies on undeclared ids, and `CycleDetected` with the cycle's
    /// node sequence when edges form a cycle.
    pub fn build(&self, model: &ResourceModel) -> Result<ResourceGraph, ModelError> {
        let mut nodes = BTreeMap::new();

        for (id, decl) in model {
            self.schemas.validate(id, decl)?;

            let mut dependencies: BTreeSet<String> = decl.depends_on.iter().cloned().collect();
            for value in decl.attributes.values() {
                dependencies.extend(value.references().into_iter().map(|r| r.target));
            }

            if let Some(missing) = dependencies.iter().find(|d| !model.contains_key(*d)) {
                return Err(ModelError::DanglingReference {
                    node: id.clone(),
                    missing: missing.clone(),
                });
            }

            nodes.insert(
                id.clone(),
                ResourceNode {
                    id: id.clone(),
                    kind: decl.kind.clone(),
                    attributes: decl.attributes.clone(),
                    dependencies,
                },
            );
        }

        if let Some(cycle) = CycleFinder::new(&nodes).find() {
            return Err(ModelError::CycleDetected { cycle });
        }

        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for node in nodes.values() {
            for dep in &node.dependencies {
                dependents.entry(dep.clone()).or_default().insert(node.id.clone());
            }
        }

        let order = topological_order(&nodes, &dependents);
        debug!(
            "Built resource graph: {} nodes, {} edges",
            nodes.len(),
            dependents.values().map(BTreeSet::len).sum::<usize>()
        );

        Ok(ResourceGraph::from_parts(nodes, dependents, order))
    }
}

/// Kahn's algorithm; the ready set is ordered so ties resolve by ascending id.
fn topological_order(
    nodes: &BTreeMap<String, ResourceNode>,
    dependents: &BTreeMap<String, BTreeSet<String>>,
) -> Vec<String> {
    let mut remaining: HashMap<&str, usize> = nodes
        .values()
        .map(|n| (n.id.as_str(), n.dependencies.len()))
        .collect();
    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop_first() {
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

    order
}
