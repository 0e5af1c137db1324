//! Resource graph types.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::Attributes;

/// A single resource in the desired graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceNode {
    /// Logical id, unique within the graph.
    pub id: String,
    /// Resource kind.
    pub kind: String,
    /// Desired attributes, references unresolved.
    pub attributes: Attributes,
    /// Ids this node depends on, explicit and implied by references.
    pub dependencies: BTreeSet<String>,
}

/// A validated, acyclic graph of resources.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// Nodes by logical id.
    nodes: BTreeMap<String, ResourceNode>,
    /// Reverse edges: id to the ids that depend on it.
    dependents: BTreeMap<String, BTreeSet<String>>,
    /// Dependencies-first order, ties broken by ascending id.
    order: Vec<String>,
}

impl ResourceGraph {
    /// Assembles a graph from nodes already checked by the builder.
    pub(crate) fn from_parts(
        nodes: BTreeMap<String, ResourceNode>,
        dependents: BTreeMap<String, BTreeSet<String>>,
        order: Vec<String>,
    ) -> Self {
        Self {
            nodes,
            dependents,
            order,
        }
    }

    /// Gets a node by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Returns true if the graph contains `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Iterates over nodes with dependencies before dependents.
    pub fn topological(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Returns the ids that directly depend on `id`.
    #[must_use]
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.dependents
            .get(id)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns every `(dependent, dependency)` edge, sorted.
    #[must_use]
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.nodes
            .values()
            .flat_map(|n| n.dependencies.iter().map(move |d| (n.id.as_str(), d.as_str())))
            .collect()
    }
}
