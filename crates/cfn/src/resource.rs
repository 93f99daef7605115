//! Template resources.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::logical_id::LogicalId;

/// What happens to the physical resource when it leaves the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemovalPolicy {
    /// Delete the physical resource.
    #[serde(rename = "Delete")]
    Destroy,
    /// Keep the physical resource, orphaned.
    Retain,
    /// Take a final snapshot, then delete.
    Snapshot,
}

/// A single resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    /// Resource type (e.g. `AWS::EC2::VPC`).
    #[serde(rename = "Type")]
    pub resource_type: String,
    /// Resource properties.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    /// Explicit ordering dependencies inside the same stack.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<LogicalId>,
    /// Replacement behaviour for updates (auto-scaling groups).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<Value>,
    /// Policy applied when the resource is removed from the stack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<RemovalPolicy>,
    /// Policy applied when an update replaces the resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<RemovalPolicy>,
}

impl Resource {
    /// Create a resource of the given type with no properties.
    #[must_use]
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
            update_policy: None,
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Set a single property.
    #[must_use]
    pub fn property(mut self, name: &str, value: Value) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    /// Merge all keys of a JSON object into the properties.
    ///
    /// Non-object values are ignored.
    #[must_use]
    pub fn properties(mut self, properties: Value) -> Self {
        if let Value::Object(map) = properties {
            self.properties.extend(map);
        }
        self
    }

    /// Add tags, keeping the `Tags` list sorted by key.
    #[must_use]
    pub fn tags(mut self, tags: &BTreeMap<String, String>) -> Self {
        let mut merged: BTreeMap<String, Value> = self
            .properties
            .get("Tags")
            .and_then(Value::as_array)
            .map(|existing| {
                existing
                    .iter()
                    .filter_map(|tag| {
                        let key = tag.get("Key")?.as_str()?.to_string();
                        Some((key, tag.get("Value")?.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        for (key, value) in tags {
            merged.insert(key.clone(), json!(value));
        }

        let list: Vec<Value> = merged
            .into_iter()
            .map(|(key, value)| json!({ "Key": key, "Value": value }))
            .collect();
        self.properties.insert("Tags".to_string(), Value::Array(list));
        self
    }

    /// Add a single tag.
    #[must_use]
    pub fn tag(self, key: &str, value: &str) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(key.to_string(), value.to_string());
        self.tags(&tags)
    }

    /// Depend on another resource in the same stack.
    #[must_use]
    pub fn depends_on(mut self, logical_id: &LogicalId) -> Self {
        if !self.depends_on.contains(logical_id) {
            self.depends_on.push(logical_id.clone());
            self.depends_on.sort();
        }
        self
    }

    /// Set both the deletion and the update-replace policy.
    #[must_use]
    pub fn removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self.update_replace_policy = Some(policy);
        self
    }

    /// Set the update policy.
    #[must_use]
    pub fn update_policy(mut self, policy: Value) -> Self {
        self.update_policy = Some(policy);
        self
    }

    /// Look up a property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Value of a tag, if set.
    #[must_use]
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.properties
            .get("Tags")?
            .as_array()?
            .iter()
            .find(|tag| tag.get("Key").and_then(Value::as_str) == Some(key))?
            .get("Value")?
            .as_str()
    }
}
