//! Per-kind attribute schemas.
//!
//! Each resource kind declares its attributes, their types, whether they are
//! required, and whether changing them forces the resource to be replaced
//! instead of updated in place. The registry doubles as the diff engine's
//! replacement policy table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ModelError;

use super::spec::ResourceDecl;
use super::value::AttributeValue;

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// Text.
    String,
    /// Whole number.
    Integer,
    /// Number; integers are accepted.
    Float,
    /// True or false.
    Boolean,
    /// Ordered list.
    List,
    /// Nested mapping.
    Map,
    /// Any value.
    #[default]
    Any,
}

/// Schema for a single attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AttributeSchema {
    /// Declared type.
    #[serde(rename = "type", default)]
    pub attr_type: AttributeType,
    /// Whether the attribute must be set.
    #[serde(default)]
    pub required: bool,
    /// Whether a change forces replacement.
    #[serde(default)]
    pub force_new: bool,
}

/// Schema for a resource kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct KindSchema {
    /// Attribute schemas keyed by attribute name.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSchema>,
}

/// Registry of kind schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    kinds: BTreeMap<String, KindSchema>,
}

impl AttributeType {
    /// Returns true if `value` is acceptable for this type.
    #[must_use]
    pub const fn accepts(self, value: &AttributeValue) -> bool {
        match (self, value) {
            (Self::Any, _)
            | (Self::String, AttributeValue::String(_))
            | (Self::Integer, AttributeValue::Integer(_))
            | (Self::Float, AttributeValue::Float(_) | AttributeValue::Integer(_))
            | (Self::Boolean, AttributeValue::Bool(_))
            | (Self::List, AttributeValue::List(_))
            | (Self::Map, AttributeValue::Map(_)) => true,
            _ => false,
        }
    }

    /// Returns the type name used in schema errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        }
    }
}

impl AttributeSchema {
    /// Creates an optional, in-place updatable attribute of the given type.
    #[must_use]
    pub const fn new(attr_type: AttributeType) -> Self {
        Self {
            attr_type,
            required: false,
            force_new: false,
        }
    }

    /// Marks the attribute as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the attribute as forcing replacement when changed.
    #[must_use]
    pub const fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }
}

impl KindSchema {
    /// Creates an empty kind schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute schema.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, schema: AttributeSchema) -> Self {
        self.attributes.insert(name.into(), schema);
        self
    }
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from the `kinds` section of a model.
    #[must_use]
    pub fn from_kinds(kinds: &BTreeMap<String, KindSchema>) -> Self {
        Self {
            kinds: kinds.clone(),
        }
    }

    /// Registers (or replaces) a kind schema.
    pub fn register(&mut self, kind: impl Into<String>, schema: KindSchema) {
        self.kinds.insert(kind.into(), schema);
    }

    /// Adds a kind schema, builder style.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>, schema: KindSchema) -> Self {
        self.register(kind, schema);
        self
    }

    /// Gets the schema for a kind.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&KindSchema> {
        self.kinds.get(kind)
    }

    /// Returns the registered kind names.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.kinds.keys().map(String::as_str).collect()
    }

    /// Returns true if changing `attribute` on `kind` forces replacement.
    #[must_use]
    pub fn forces_replacement(&self, kind: &str, attribute: &str) -> bool {
        self.kinds
            .get(kind)
            .and_then(|k| k.attributes.get(attribute))
            .is_some_and(|a| a.force_new)
    }

    /// Validates a declared resource against its kind schema.
    ///
    /// # Errors
    ///
    /// Returns the first schema violation found, checking attributes in name order.
    pub fn validate(&self, id: &str, decl: &ResourceDecl) -> Result<(), ModelError> {
        let schema = self.kinds.get(&decl.kind).ok_or_else(|| ModelError::UnknownKind {
            node: id.to_string(),
            kind: decl.kind.clone(),
        })?;

        for (name, value) in &decl.attributes {
            let Some(attr) = schema.attributes.get(name) else {
                return Err(ModelError::UnknownAttribute {
                    node: id.to_string(),
                    kind: decl.kind.clone(),
                    attribute: name.clone(),
                });
            };

            if value.is_null() || value.as_whole_reference().is_some() {
                continue;
            }

            if !attr.attr_type.accepts(value) {
                return Err(ModelError::TypeMismatch {
                    node: id.to_string(),
                    attribute: name.clone(),
                    expected: attr.attr_type.name().to_string(),
                    found: value.type_name().to_string(),
                });
            }
        }

        for (name, attr) in &schema.attributes {
            let present = decl.attributes.get(name).is_some_and(|v| !v.is_null());
            if attr.required && !present {
                return Err(ModelError::MissingAttribute {
                    node: id.to_string(),
                    attribute: name.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().with_kind(
            "log_group",
            KindSchema::new()
                .attribute(
                    "name",
                    AttributeSchema::new(AttributeType::String).required().force_new(),
                )
                .attribute("retention_days", AttributeSchema::new(AttributeType::Integer)),
        )
    }

    #[test]
    fn test_valid_resource() {
        let decl = ResourceDecl::new("log_group")
            .with_attribute("name", "/firehose")
            .with_attribute("retention_days", 7_i64);
        assert!(registry().validate("logs", &decl).is_ok());
    }

    #[test]
    fn test_unknown_kind() {
        let decl = ResourceDecl::new("bucket");
        let err = registry().validate("b", &decl).expect_err("unknown kind");
        assert!(matches!(err, ModelError::UnknownKind { .. }));
    }

    #[test]
    fn test_missing_required_attribute() {
        let decl = ResourceDecl::new("log_group").with_attribute("retention_days", 7_i64);
        let err = registry().validate("logs", &decl).expect_err("missing name");
        assert!(matches!(err, ModelError::MissingAttribute { attribute, .. } if attribute == "name"));
    }

    #[test]
    fn test_type_mismatch() {
        let decl = ResourceDecl::new("log_group")
            .with_attribute("name", "/firehose")
            .with_attribute("retention_days", "seven");
        let err = registry().validate("logs", &decl).expect_err("wrong type");
        assert!(matches!(err, ModelError::TypeMismatch { expected, .. } if expected == "integer"));
    }

    #[test]
    fn test_whole_reference_accepted_for_any_type() {
        let decl = ResourceDecl::new("log_group")
            .with_attribute("name", "/firehose")
            .with_attribute("retention_days", "${policy.days}");
        assert!(registry().validate("logs", &decl).is_ok());
    }

    #[test]
    fn test_unknown_attribute() {
        let decl = ResourceDecl::new("log_group")
            .with_attribute("name", "/firehose")
            .with_attribute("colour", "blue");
        let err = registry().validate("logs", &decl).expect_err("unknown attribute");
        assert!(matches!(err, ModelError::UnknownAttribute { .. }));
    }

    #[test]
    fn test_replacement_policy() {
        let registry = registry();
        assert!(registry.forces_replacement("log_group", "name"));
        assert!(!registry.forces_replacement("log_group", "retention_days"));
        assert!(!registry.forces_replacement("bucket", "name"));
    }
}
