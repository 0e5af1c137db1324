//! Diff engine comparing a resource graph with recorded state.
//!
//! The recorded state is the only source of truth: live resources are never
//! read back from the provider.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::SchemaRegistry;
use crate::graph::{ResourceGraph, ResourceNode};
use crate::state::StateRecord;

use super::plan::{ActionKind, AttributeChange, Plan, PlannedAction};

/// What was planned for a node that later nodes may reference.
#[derive(Debug)]
struct Decision {
    action: ActionKind,
    changed: BTreeSet<String>,
}

impl Decision {
    /// Whether a reference to `attribute` of this node will see a new value.
    fn invalidates(&self, attribute: Option<&str>) -> bool {
        match self.action {
            ActionKind::Create | ActionKind::Replace => true,
            ActionKind::Update => attribute.is_some_and(|a| self.changed.contains(a)),
            ActionKind::Delete | ActionKind::NoOp => false,
        }
    }
}

/// Engine for computing plans from a graph and recorded state.
#[derive(Debug)]
pub struct DiffEngine<'a> {
    schemas: &'a SchemaRegistry,
}

impl<'a> DiffEngine<'a> {
    /// Creates a diff engine using the replacement policy in `schemas`.
    #[must_use]
    pub const fn new(schemas: &'a SchemaRegistry) -> Self {
        Self { schemas }
    }

    /// Computes the plan for `graph` against `records`.
    ///
    /// Output is deterministic for equal inputs.
    #[must_use]
    pub fn compute(
        &self,
        graph: &ResourceGraph,
        records: &BTreeMap<String, StateRecord>,
        stack: &str,
        model_hash: &str,
    ) -> Plan {
        let mut actions = Vec::with_capacity(graph.len() + records.len());
        let mut decided: HashMap<&str, Decision> = HashMap::new();

        for node in graph.topological() {
            let action = match records.get(&node.id) {
                None => Self::create(node),
                Some(record) => self.against_record(node, record, &decided),
            };
            debug!("Planned {} for {}", action.action, action.id);
            decided.insert(
                node.id.as_str(),
                Decision {
                    action: action.action,
                    changed: action.changes.iter().map(|c| c.attribute.clone()).collect(),
                },
            );
            actions.push(action);
        }

        for (id, record) in records {
            if graph.contains(id) {
                continue;
            }

            let prerequisites: BTreeSet<String> = records
                .values()
                .filter(|r| r.dependencies.contains(id))
                .map(|r| r.logical_id.clone())
                .collect();

            debug!("Planned delete for {id} (no longer declared)");
            actions.push(PlannedAction {
                id: id.clone(),
                action: ActionKind::Delete,
                resource_kind: record.kind.clone(),
                recorded_kind: Some(record.kind.clone()),
                attributes: BTreeMap::new(),
                identity: Some(record.identity.clone()),
                dependencies: BTreeSet::new(),
                prerequisites,
                changes: Vec::new(),
                reason: String::from("removed from model"),
            });
        }

        Plan {
            stack: stack.to_string(),
            model_hash: model_hash.to_string(),
            actions,
        }
    }

    fn create(node: &ResourceNode) -> PlannedAction {
        let changes = node
            .attributes
            .iter()
            .map(|(name, value)| AttributeChange {
                attribute: name.clone(),
                old: None,
                new: Some(value.clone()),
                forces_replacement: false,
                cause: None,
            })
            .collect();

        Self::action(node, ActionKind::Create, None, changes, String::from("not yet created"))
    }

    fn against_record(
        &self,
        node: &ResourceNode,
        record: &StateRecord,
        decided: &HashMap<&str, Decision>,
    ) -> PlannedAction {
        if record.kind != node.kind {
            let changes = self.attribute_changes(node, record);
            let reason = format!("kind changed from {} to {}", record.kind, node.kind);
            return Self::action(node, ActionKind::Replace, Some(record), changes, reason);
        }

        let changes = self.attribute_changes(node, record);
        if !changes.is_empty() {
            let (action, reason) = if changes.iter().any(|c| c.forces_replacement) {
                (ActionKind::Replace, String::from("replacement-only attributes changed"))
            } else {
                (ActionKind::Update, String::from("attributes changed"))
            };
            return Self::action(node, action, Some(record), changes, reason);
        }

        let cascaded = self.cascaded_changes(node, record, decided);
        if cascaded.is_empty() {
            return Self::action(node, ActionKind::NoOp, Some(record), Vec::new(), String::new());
        }

        let causes: BTreeSet<&str> = cascaded.iter().filter_map(|c| c.cause.as_deref()).collect();
        let reason = format!(
            "referenced {} will change",
            causes.into_iter().collect::<Vec<_>>().join(", ")
        );
        let action = if cascaded.iter().any(|c| c.forces_replacement) {
            ActionKind::Replace
        } else {
            ActionKind::Update
        };
        Self::action(node, action, Some(record), cascaded, reason)
    }

    /// Attributes added, removed, or changed relative to the record.
    fn attribute_changes(&self, node: &ResourceNode, record: &StateRecord) -> Vec<AttributeChange> {
        let names: BTreeSet<&String> = node.attributes.keys().chain(record.attributes.keys()).collect();

        names
            .into_iter()
            .filter_map(|name| {
                let old = record.attributes.get(name);
                let new = node.attributes.get(name);
                (old != new).then(|| AttributeChange {
                    attribute: name.clone(),
                    old: old.cloned(),
                    new: new.cloned(),
                    forces_replacement: self.schemas.forces_replacement(&node.kind, name),
                    cause: None,
                })
            })
            .collect()
    }

    /// Unchanged attributes whose references will resolve differently.
    ///
    /// A created or replaced dependency invalidates every reference to it.
    /// An updated one only invalidates references to the attributes it
    /// changes, including its own cascaded changes.
    fn cascaded_changes(
        &self,
        node: &ResourceNode,
        record: &StateRecord,
        decided: &HashMap<&str, Decision>,
    ) -> Vec<AttributeChange> {
        node.attributes
            .iter()
            .filter_map(|(name, value)| {
                let cause = value.references().into_iter().find(|r| {
                    decided
                        .get(r.target.as_str())
                        .is_some_and(|d| d.invalidates(r.attribute.as_deref()))
                })?;
                Some(AttributeChange {
                    attribute: name.clone(),
                    old: record.attributes.get(name).cloned(),
                    new: Some(value.clone()),
                    forces_replacement: self.schemas.forces_replacement(&node.kind, name),
                    cause: Some(cause.target),
                })
            })
            .collect()
    }

    fn action(
        node: &ResourceNode,
        action: ActionKind,
        record: Option<&StateRecord>,
        changes: Vec<AttributeChange>,
        reason: String,
    ) -> PlannedAction {
        PlannedAction {
            id: node.id.clone(),
            action,
            resource_kind: node.kind.clone(),
            recorded_kind: record.map(|r| r.kind.clone()),
            attributes: node.attributes.clone(),
            identity: record.map(|r| r.identity.clone()),
            dependencies: node.dependencies.clone(),
            prerequisites: node.dependencies.clone(),
            changes,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AttributeSchema, AttributeType, AttributeValue, Attributes, KindSchema, ResourceDecl,
        ResourceModel,
    };
    use crate::graph::GraphBuilder;

    fn schemas() -> SchemaRegistry {
        SchemaRegistry::new()
            .with_kind(
                "bucket",
                KindSchema::new()
                    .attribute("name", AttributeSchema::new(AttributeType::String).force_new())
                    .attribute("tags", AttributeSchema::new(AttributeType::Map)),
            )
            .with_kind(
                "policy",
                KindSchema::new()
                    .attribute("target", AttributeSchema::new(AttributeType::String))
                    .attribute("owner", AttributeSchema::new(AttributeType::String).force_new()),
            )
    }

    fn build(model: &ResourceModel, schemas: &SchemaRegistry) -> ResourceGraph {
        GraphBuilder::new(schemas).build(model).expect("graph")
    }

    fn record_for(id: &str, decl: &ResourceDecl) -> StateRecord {
        StateRecord::new(
            id,
            &decl.kind,
            &format!("{}-0001", decl.kind),
            decl.attributes.clone(),
            Attributes::new(),
            BTreeSet::new(),
        )
    }

    fn records_for(model: &ResourceModel) -> BTreeMap<String, StateRecord> {
        model.iter().map(|(id, d)| (id.clone(), record_for(id, d))).collect()
    }

    fn base_model() -> ResourceModel {
        ResourceModel::from([
            (
                String::from("data"),
                ResourceDecl::new("bucket").with_attribute("name", "lake-data"),
            ),
            (
                String::from("access"),
                ResourceDecl::new("policy").with_attribute("target", "${data.arn}"),
            ),
        ])
    }

    #[test]
    fn test_empty_state_creates_in_dependency_order() {
        let schemas = schemas();
        let model = base_model();
        let plan = DiffEngine::new(&schemas).compute(&build(&model, &schemas), &BTreeMap::new(), "s/dev", "h");

        assert_eq!(
            plan.steps(),
            vec![("data", ActionKind::Create), ("access", ActionKind::Create)]
        );
        assert_eq!(
            plan.get("access").map(|a| a.prerequisites.clone()),
            Some(BTreeSet::from([String::from("data")]))
        );
    }

    #[test]
    fn test_matching_records_are_noops() {
        let schemas = schemas();
        let model = base_model();
        let plan = DiffEngine::new(&schemas).compute(&build(&model, &schemas), &records_for(&model), "s/dev", "h");

        assert!(plan.is_empty());
        assert_eq!(plan.summary().noop, 2);
    }

    #[test]
    fn test_plain_change_updates() {
        let schemas = schemas();
        let model = base_model();
        let records = records_for(&model);

        let mut changed = model;
        if let Some(decl) = changed.get_mut("data") {
            decl.attributes.insert(
                String::from("tags"),
                AttributeValue::Map(BTreeMap::from([(String::from("team"), AttributeValue::from("sec"))])),
            );
        }

        let plan = DiffEngine::new(&schemas).compute(&build(&changed, &schemas), &records, "s/dev", "h");
        let action = plan.get("data").expect("action");
        assert_eq!(action.action, ActionKind::Update);
        assert_eq!(action.changes.len(), 1);
        assert_eq!(action.identity.as_deref(), Some("bucket-0001"));
        assert_eq!(plan.get("access").map(|a| a.action), Some(ActionKind::NoOp));
    }

    #[test]
    fn test_force_new_change_replaces_and_cascades() {
        let schemas = schemas();
        let model = base_model();
        let records = records_for(&model);

        let mut changed = model;
        if let Some(decl) = changed.get_mut("data") {
            decl.attributes.insert(String::from("name"), AttributeValue::from("lake-data-v2"));
        }

        let plan = DiffEngine::new(&schemas).compute(&build(&changed, &schemas), &records, "s/dev", "h");
        assert_eq!(plan.get("data").map(|a| a.action), Some(ActionKind::Replace));

        let access = plan.get("access").expect("access");
        assert_eq!(access.action, ActionKind::Update);
        assert_eq!(access.changes[0].cause.as_deref(), Some("data"));
    }

    #[test]
    fn test_updated_attribute_cascades_to_its_readers() {
        let schemas = schemas();
        let model = ResourceModel::from([
            (String::from("x"), ResourceDecl::new("policy").with_attribute("target", "alpha")),
            (String::from("y"), ResourceDecl::new("policy").with_attribute("target", "${x.target}")),
            (String::from("z"), ResourceDecl::new("policy").with_attribute("target", "${y.target}")),
            (String::from("w"), ResourceDecl::new("policy").with_attribute("target", "${x.arn}")),
        ]);
        let records = records_for(&model);

        let mut changed = model;
        if let Some(decl) = changed.get_mut("x") {
            decl.attributes.insert(String::from("target"), AttributeValue::from("beta"));
        }

        let plan = DiffEngine::new(&schemas).compute(&build(&changed, &schemas), &records, "s/dev", "h");
        assert_eq!(plan.get("x").map(|a| a.action), Some(ActionKind::Update));

        let y = plan.get("y").expect("y");
        assert_eq!(y.action, ActionKind::Update);
        assert_eq!(y.changes[0].cause.as_deref(), Some("x"));
        assert_eq!(y.reason, "referenced x will change");
        assert_eq!(plan.get("z").map(|a| a.action), Some(ActionKind::Update));
        assert_eq!(plan.get("w").map(|a| a.action), Some(ActionKind::NoOp));
    }

    #[test]
    fn test_identity_reference_ignores_updates() {
        let schemas = schemas();
        let model = ResourceModel::from([
            (String::from("x"), ResourceDecl::new("policy").with_attribute("target", "alpha")),
            (String::from("y"), ResourceDecl::new("policy").with_attribute("target", "${x}")),
        ]);
        let records = records_for(&model);

        let mut changed = model;
        if let Some(decl) = changed.get_mut("x") {
            decl.attributes.insert(String::from("target"), AttributeValue::from("beta"));
        }

        let plan = DiffEngine::new(&schemas).compute(&build(&changed, &schemas), &records, "s/dev", "h");
        assert_eq!(plan.get("y").map(|a| a.action), Some(ActionKind::NoOp));
    }

    #[test]
    fn test_kind_change_replaces() {
        let schemas = schemas();
        let model = base_model();
        let mut records = records_for(&model);
        if let Some(record) = records.get_mut("data") {
            record.kind = String::from("policy");
        }

        let plan = DiffEngine::new(&schemas).compute(&build(&model, &schemas), &records, "s/dev", "h");
        assert_eq!(plan.get("data").map(|a| a.action), Some(ActionKind::Replace));
    }

    #[test]
    fn test_removed_resources_delete_after_dependents() {
        let schemas = schemas();
        let model = base_model();
        let mut records = records_for(&model);
        if let Some(record) = records.get_mut("access") {
            record.dependencies.insert(String::from("data"));
        }

        let plan = DiffEngine::new(&schemas).compute(&build(&ResourceModel::new(), &schemas), &records, "s/dev", "h");

        assert_eq!(plan.summary().delete, 2);
        let data = plan.get("data").expect("delete data");
        assert_eq!(data.prerequisites, BTreeSet::from([String::from("access")]));
        assert!(plan.get("access").is_some_and(|a| a.prerequisites.is_empty()));
    }
}
