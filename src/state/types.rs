//! State types for tracking applied resources.
//!
//! These types represent the last-known state of every resource a stack has
//! applied, used by the diff engine and for idempotent runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{AttributeHasher, AttributeValue, Attributes, Reference};
use crate::report::RunStatus;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of run history entries kept in a document.
const MAX_HISTORY: usize = 100;

/// The complete persisted state of a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    /// State format version.
    pub version: String,
    /// Qualified stack name (`name/environment`).
    pub stack: String,
    /// When the document was last updated.
    pub last_updated: DateTime<Utc>,
    /// Applied resources keyed by logical id.
    #[serde(default)]
    pub records: BTreeMap<String, StateRecord>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// Last-applied state of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateRecord {
    /// Logical id from the model.
    pub logical_id: String,
    /// Resource kind.
    pub kind: String,
    /// Provider-assigned identity.
    pub identity: String,
    /// Last-applied attributes, in declared (unresolved) form.
    pub attributes: Attributes,
    /// Attributes reported back by the provider.
    #[serde(default)]
    pub outputs: Attributes,
    /// Attributes as sent to the provider, with references resolved.
    #[serde(default)]
    pub resolved: Attributes,
    /// Hash of `attributes`.
    pub attributes_hash: String,
    /// Ids this resource depended on when applied.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// When the resource was last applied.
    pub applied_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// Run identifier.
    pub run_id: String,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Hash of the model that was applied.
    pub model_hash: String,
    /// Overall run status.
    pub status: RunStatus,
    /// Number of nodes that succeeded.
    pub succeeded: usize,
    /// Number of nodes that failed.
    pub failed: usize,
    /// Number of nodes that were skipped.
    pub skipped: usize,
}

impl StateDocument {
    /// Creates a new empty state document.
    #[must_use]
    pub fn new(stack: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            stack: stack.to_string(),
            last_updated: Utc::now(),
            records: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Gets a record by logical id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StateRecord> {
        self.records.get(id)
    }

    /// Adds or replaces a record.
    pub fn set_record(&mut self, record: StateRecord) {
        self.records.insert(record.logical_id.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record by logical id.
    pub fn remove_record(&mut self, id: &str) -> Option<StateRecord> {
        let result = self.records.remove(id);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry, dropping the oldest beyond the retention limit.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.last_updated = Utc::now();
    }

    /// Returns all logical ids with records.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }
}

impl StateRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        logical_id: &str,
        kind: &str,
        identity: &str,
        attributes: Attributes,
        outputs: Attributes,
        dependencies: BTreeSet<String>,
    ) -> Self {
        let attributes_hash = AttributeHasher::new().hash_attributes(&attributes);
        Self {
            logical_id: logical_id.to_string(),
            kind: kind.to_string(),
            identity: identity.to_string(),
            attributes,
            outputs,
            resolved: Attributes::new(),
            attributes_hash,
            dependencies,
            applied_at: Utc::now(),
        }
    }

    /// Sets the attributes as they were sent to the provider.
    #[must_use]
    pub fn with_resolved(mut self, resolved: Attributes) -> Self {
        self.resolved = resolved;
        self
    }

    /// Value of `${id}` (no attribute) or `${id.attr}` for this record.
    ///
    /// Attribute lookups prefer provider outputs, then resolved attributes.
    /// A declared attribute is only used when it holds no references, so an
    /// unresolved expression never leaks into another resource.
    #[must_use]
    pub fn reference_value(&self, attribute: Option<&str>) -> Option<AttributeValue> {
        let Some(attribute) = attribute else {
            return Some(AttributeValue::String(self.identity.clone()));
        };

        if let Some(value) = self.outputs.get(attribute).or_else(|| self.resolved.get(attribute)) {
            return Some(value.clone());
        }
        self.attributes
            .get(attribute)?
            .resolve(&|_: &Reference| None)
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttributeValue;

    fn record(id: &str) -> StateRecord {
        let attrs = Attributes::from([(String::from("name"), AttributeValue::from(id))]);
        StateRecord::new(id, "log_group", "lg-0001", attrs, Attributes::new(), BTreeSet::new())
    }

    #[test]
    fn test_set_and_remove_record() {
        let mut doc = StateDocument::new("lake/dev");
        doc.set_record(record("logs"));

        assert_eq!(doc.ids(), vec!["logs"]);
        assert_eq!(doc.get("logs").map(|r| r.identity.as_str()), Some("lg-0001"));
        assert!(doc.remove_record("logs").is_some());
        assert!(doc.remove_record("logs").is_none());
    }

    #[test]
    fn test_record_hash_tracks_attributes() {
        assert_eq!(record("a").attributes_hash, record("a").attributes_hash);
        assert_ne!(record("a").attributes_hash, record("b").attributes_hash);
    }

    #[test]
    fn test_reference_value_prefers_outputs_then_resolved() {
        let declared = Attributes::from([
            (String::from("name"), AttributeValue::from("${base.name}-logs")),
            (String::from("region"), AttributeValue::from("eu-west-1")),
            (String::from("path"), AttributeValue::from("${base.path}")),
        ]);
        let outputs = Attributes::from([(String::from("arn"), AttributeValue::from("arn:lg-0001"))]);
        let record = StateRecord::new("logs", "log_group", "lg-0001", declared, outputs, BTreeSet::new())
            .with_resolved(Attributes::from([(
                String::from("name"),
                AttributeValue::from("lake-logs"),
            )]));

        assert_eq!(record.reference_value(None), Some(AttributeValue::from("lg-0001")));
        assert_eq!(record.reference_value(Some("arn")), Some(AttributeValue::from("arn:lg-0001")));
        assert_eq!(record.reference_value(Some("name")), Some(AttributeValue::from("lake-logs")));
        assert_eq!(record.reference_value(Some("region")), Some(AttributeValue::from("eu-west-1")));
        assert_eq!(record.reference_value(Some("path")), None);
        assert_eq!(record.reference_value(Some("missing")), None);
    }

    #[test]
    fn test_records_without_resolved_snapshot_still_load() {
        let json = r#"{
            "logical_id": "logs",
            "kind": "log_group",
            "identity": "lg-0001",
            "attributes": {"name": "lake-logs"},
            "attributes_hash": "h",
            "applied_at": "2026-01-01T00:00:00Z"
        }"#;
        let record: StateRecord = serde_json::from_str(json).expect("deserialize");
        assert!(record.resolved.is_empty());
        assert_eq!(record.reference_value(Some("name")), Some(AttributeValue::from("lake-logs")));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut doc = StateDocument::new("lake/dev");
        for i in 0..(MAX_HISTORY + 5) {
            doc.add_history(RunHistoryEntry {
                run_id: i.to_string(),
                timestamp: Utc::now(),
                model_hash: String::new(),
                status: RunStatus::Clean,
                succeeded: 0,
                failed: 0,
                skipped: 0,
            });
        }
        assert_eq!(doc.history.len(), MAX_HISTORY);
        assert_eq!(doc.history[0].run_id, "5");
    }

    #[test]
    fn test_document_roundtrips_through_json() {
        let mut doc = StateDocument::new("lake/dev");
        doc.set_record(record("logs"));
        let json = serde_json::to_string(&doc).expect("serialize");
        let back: StateDocument = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.records, doc.records);
    }
}
