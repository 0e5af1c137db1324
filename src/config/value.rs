//! Typed attribute values and cross-resource references.
//!
//! Attribute strings may reference other resources with `${id}` (the provider
//! identity of `id`) or `${id.attr}` (an attribute of `id`). A string made of a
//! single reference resolves to the referenced value as-is; a reference embedded
//! in a longer string is interpolated as text. `$${` writes a literal `${`, for
//! values such as IAM policy variables that use the same syntax.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Mapping of attribute name to value, ordered by name.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Explicit null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// String value, possibly containing references.
    String(String),
    /// Ordered list of values.
    List(Vec<AttributeValue>),
    /// Nested mapping.
    Map(BTreeMap<String, AttributeValue>),
}

/// A reference to another resource, written `${target}` or `${target.attribute}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    /// Logical id of the referenced resource.
    pub target: String,
    /// Referenced attribute; `None` means the provider identity.
    pub attribute: Option<String>,
}

/// A piece of a string value: literal text or a reference.
enum Segment<'a> {
    Text(&'a str),
    Ref(Reference),
}

/// Splits a string into literal and reference segments.
fn scan(input: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        if start > 0 && rest.as_bytes()[start - 1] == b'$' {
            if start > 1 {
                segments.push(Segment::Text(&rest[..start - 1]));
            }
            segments.push(Segment::Text(&rest[start..start + 2]));
            rest = &rest[start + 2..];
            continue;
        }

        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };

        let inner = after[..end].trim();
        let (target, attribute) = match inner.split_once('.') {
            Some((t, a)) => (t.trim(), Some(a.trim().to_string())),
            None => (inner, None),
        };

        if target.is_empty() || attribute.as_deref() == Some("") {
            // Not a reference; keep the text through the closing brace.
            segments.push(Segment::Text(&rest[..start + 2 + end + 1]));
        } else {
            if start > 0 {
                segments.push(Segment::Text(&rest[..start]));
            }
            segments.push(Segment::Ref(Reference {
                target: target.to_string(),
                attribute,
            }));
        }
        rest = &after[end + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    segments
}

impl AttributeValue {
    /// Returns the type name used in schema errors.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Returns true for `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Collects every reference contained in this value, recursively.
    #[must_use]
    pub fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<Reference>) {
        match self {
            Self::String(s) => {
                for segment in scan(s) {
                    if let Segment::Ref(r) = segment {
                        refs.push(r);
                    }
                }
            }
            Self::List(items) => items.iter().for_each(|v| v.collect_references(refs)),
            Self::Map(map) => map.values().for_each(|v| v.collect_references(refs)),
            Self::Null | Self::Bool(_) | Self::Integer(_) | Self::Float(_) => {}
        }
    }

    /// Returns the reference if this value is a string consisting of exactly one reference.
    #[must_use]
    pub fn as_whole_reference(&self) -> Option<Reference> {
        let Self::String(s) = self else {
            return None;
        };
        let mut segments = scan(s);
        if segments.len() == 1
            && let Some(Segment::Ref(r)) = segments.pop()
        {
            return Some(r);
        }
        None
    }

    /// Resolves references with `lookup`, returning the first unresolvable one on failure.
    ///
    /// # Errors
    ///
    /// Returns the reference that `lookup` could not resolve.
    pub fn resolve<F>(&self, lookup: &F) -> std::result::Result<Self, Reference>
    where
        F: Fn(&Reference) -> Option<Self>,
    {
        match self {
            Self::String(s) => {
                let segments = scan(s);
                if segments.len() == 1
                    && let Some(Segment::Ref(r)) = segments.first()
                {
                    return lookup(r).ok_or_else(|| r.clone());
                }

                let mut out = String::with_capacity(s.len());
                for segment in segments {
                    match segment {
                        Segment::Text(t) => out.push_str(t),
                        Segment::Ref(r) => {
                            let value = lookup(&r).ok_or(r)?;
                            out.push_str(&value.render());
                        }
                    }
                }
                Ok(Self::String(out))
            }
            Self::List(items) => items
                .iter()
                .map(|v| v.resolve(lookup))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Self::List),
            Self::Map(map) => map
                .iter()
                .map(|(k, v)| v.resolve(lookup).map(|r| (k.clone(), r)))
                .collect::<std::result::Result<BTreeMap<_, _>, _>>()
                .map(Self::Map),
            other => Ok(other.clone()),
        }
    }

    /// Renders the value as text for string interpolation.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::List(_) | Self::Map(_) => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "\"{s}\""),
            Self::Null => write!(f, "null"),
            other => write!(f, "{}", other.render()),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attribute {
            Some(attr) => write!(f, "${{{}.{attr}}}", self.target),
            None => write!(f, "${{{}}}", self.target),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(r: &Reference) -> Option<AttributeValue> {
        match (r.target.as_str(), r.attribute.as_deref()) {
            ("bucket", None) => Some(AttributeValue::from("bucket-0001")),
            ("logs", Some("retention")) => Some(AttributeValue::Integer(7)),
            _ => None,
        }
    }

    #[test]
    fn test_untagged_yaml_parsing() {
        let yaml = "a: 1\nb: 1.5\nc: true\nd: text\ne: [1, two]\nf: {x: null}\n";
        let attrs: Attributes = serde_yaml::from_str(yaml).expect("parse");

        assert_eq!(attrs["a"], AttributeValue::Integer(1));
        assert_eq!(attrs["b"], AttributeValue::Float(1.5));
        assert_eq!(attrs["c"], AttributeValue::Bool(true));
        assert_eq!(attrs["d"], AttributeValue::from("text"));
        assert_eq!(attrs["e"].type_name(), "list");
        assert_eq!(attrs["f"].type_name(), "map");
    }

    #[test]
    fn test_references_found_recursively() {
        let value = AttributeValue::List(vec![
            AttributeValue::from("arn:${bucket}/path"),
            AttributeValue::Map(BTreeMap::from([(
                String::from("days"),
                AttributeValue::from("${logs.retention}"),
            )])),
        ]);

        let refs = value.references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].target, "bucket");
        assert_eq!(refs[1].attribute.as_deref(), Some("retention"));
    }

    #[test]
    fn test_whole_reference_keeps_type() {
        let value = AttributeValue::from("${logs.retention}");
        assert!(value.as_whole_reference().is_some());
        assert_eq!(value.resolve(&lookup), Ok(AttributeValue::Integer(7)));
    }

    #[test]
    fn test_embedded_reference_interpolates() {
        let value = AttributeValue::from("arn:aws:s3:::${bucket}/*");
        assert!(value.as_whole_reference().is_none());
        assert_eq!(
            value.resolve(&lookup),
            Ok(AttributeValue::from("arn:aws:s3:::bucket-0001/*"))
        );
    }

    #[test]
    fn test_unresolved_reference_reported() {
        let value = AttributeValue::from("${missing}");
        let err = value.resolve(&lookup).expect_err("should fail");
        assert_eq!(err.target, "missing");
        assert_eq!(err.to_string(), "${missing}");
    }

    #[test]
    fn test_malformed_reference_is_text() {
        let value = AttributeValue::from("cost: ${} and ${open");
        assert!(value.references().is_empty());
        assert_eq!(value.resolve(&lookup), Ok(value.clone()));
    }

    #[test]
    fn test_escaped_reference_is_literal() {
        let value = AttributeValue::from("home/$${aws:username}/${bucket}");
        assert_eq!(
            value.references(),
            vec![Reference {
                target: String::from("bucket"),
                attribute: None,
            }]
        );
        assert_eq!(
            value.resolve(&lookup),
            Ok(AttributeValue::from("home/${aws:username}/bucket-0001"))
        );

        let whole = AttributeValue::from("$${logs.retention}");
        assert!(whole.as_whole_reference().is_none());
        assert_eq!(whole.resolve(&lookup), Ok(AttributeValue::from("${logs.retention}")));
    }
}
