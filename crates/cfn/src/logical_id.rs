//! Deterministic logical ids derived from construct paths.
//!
//! A logical id is the concatenation of the alphanumeric characters of every
//! path component followed by the first eight hex digits of a SHA-1 digest
//! of the full path. The same path always yields the same id, and two paths
//! that only differ in punctuation still get distinct ids.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::intrinsic;

/// Maximum length CloudFormation accepts for a logical id.
const MAX_LOGICAL_ID_LEN: usize = 255;

/// Number of hex digits of the path digest appended to every id.
const HASH_LEN: usize = 8;

/// Path component that is dropped from the human readable part.
const HIDDEN_COMPONENT: &str = "Default";

/// Identifier of a resource inside a template.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    /// Derive the logical id for a construct path.
    #[must_use]
    pub fn from_path(path: &[&str]) -> Self {
        let human: String = path
            .iter()
            .filter(|component| **component != HIDDEN_COMPONENT)
            .flat_map(|component| component.chars().filter(char::is_ascii_alphanumeric))
            .take(MAX_LOGICAL_ID_LEN - HASH_LEN)
            .collect();

        let mut hasher = Sha1::new();
        hasher.update(path.join("/").as_bytes());
        let digest = hex::encode_upper(hasher.finalize());

        Self(format!("{human}{}", &digest[..HASH_LEN]))
    }

    /// Use a literal id as-is (for ids that must be stable across renames).
    #[must_use]
    pub fn literal(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `{ "Ref": <id> }`
    #[must_use]
    pub fn reference(&self) -> Value {
        intrinsic::reference(&self.0)
    }

    /// `{ "Fn::GetAtt": [<id>, <attribute>] }`
    #[must_use]
    pub fn get_att(&self, attribute: &str) -> Value {
        intrinsic::get_att(&self.0, attribute)
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_path_same_id() {
        let a = LogicalId::from_path(&["sample-vpc", "PublicSubnet1"]);
        let b = LogicalId::from_path(&["sample-vpc", "PublicSubnet1"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_id_strips_punctuation_and_appends_hash() {
        let id = LogicalId::from_path(&["sample-DB-SG"]);
        assert!(id.as_str().starts_with("sampleDBSG"));
        assert_eq!(id.as_str().len(), "sampleDBSG".len() + HASH_LEN);
        assert!(id.as_str()[10..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_punctuation_only_difference_is_distinct() {
        let a = LogicalId::from_path(&["sample-app"]);
        let b = LogicalId::from_path(&["sampleapp"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_default_component_hidden() {
        let id = LogicalId::from_path(&["Repository", "Default"]);
        assert!(id.as_str().starts_with("Repository"));
        assert!(!id.as_str().contains("Default"));
    }

    #[test]
    fn test_reference_shapes() {
        let id = LogicalId::literal("Cluster");
        assert_eq!(id.reference(), serde_json::json!({ "Ref": "Cluster" }));
        assert_eq!(
            id.get_att("Arn"),
            serde_json::json!({ "Fn::GetAtt": ["Cluster", "Arn"] })
        );
    }
}
