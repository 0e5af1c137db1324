//! Attribute and model hashing for change detection.
//!
//! Hashes are computed over canonical JSON. Attribute maps are `BTreeMap`s,
//! so serialization order is stable and equal inputs always hash equally.

use sha2::{Digest, Sha256};

use super::spec::ResourceModel;
use super::value::Attributes;

/// Hasher for computing attribute and model hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeHasher;

impl AttributeHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of an attribute mapping.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &Attributes) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(attributes).unwrap_or_default());
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of an entire resource model.
    ///
    /// This hash changes when any resource, kind, attribute, or dependency changes.
    #[must_use]
    pub fn hash_model(&self, model: &ResourceModel) -> String {
        let mut hasher = Sha256::new();

        for (id, decl) in model {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
            hasher.update(decl.kind.as_bytes());
            hasher.update([0u8]);
            hasher.update(self.hash_attributes(&decl.attributes).as_bytes());

            // Dependencies (sorted for determinism)
            let mut deps: Vec<&String> = decl.depends_on.iter().collect();
            deps.sort();
            deps.dedup();
            for dep in deps {
                hasher.update(dep.as_bytes());
                hasher.update([0u8]);
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::ResourceDecl;

    fn model(retention: i64) -> ResourceModel {
        ResourceModel::from([
            (
                String::from("logs"),
                ResourceDecl::new("log_group")
                    .with_attribute("name", "/firehose")
                    .with_attribute("retention_days", retention),
            ),
            (
                String::from("stream"),
                ResourceDecl::new("delivery_stream").depends_on("logs"),
            ),
        ])
    }

    #[test]
    fn test_model_hash_deterministic() {
        let hasher = AttributeHasher::new();
        assert_eq!(hasher.hash_model(&model(7)), hasher.hash_model(&model(7)));
    }

    #[test]
    fn test_attribute_change_changes_hash() {
        let hasher = AttributeHasher::new();
        assert_ne!(hasher.hash_model(&model(7)), hasher.hash_model(&model(14)));
    }

    #[test]
    fn test_dependency_order_ignored() {
        let hasher = AttributeHasher::new();
        let mut a = model(7);
        let mut b = model(7);
        if let Some(decl) = a.get_mut("stream") {
            decl.depends_on = vec![String::from("x"), String::from("logs")];
        }
        if let Some(decl) = b.get_mut("stream") {
            decl.depends_on = vec![String::from("logs"), String::from("x")];
        }
        assert_eq!(hasher.hash_model(&a), hasher.hash_model(&b));
    }

    #[test]
    fn test_short_hash() {
        let hasher = AttributeHasher::new();
        let short = hasher.short_hash("abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}
