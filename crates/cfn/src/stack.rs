//! Stacks: named, independently deployable sets of resources.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, TemplateError};
use crate::intrinsic;
use crate::logical_id::LogicalId;
use crate::resource::Resource;

/// Template format version emitted in every template.
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// A stack output, optionally exported for other stacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    /// Output value.
    pub value: Value,
    /// Human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Export declaration (`{ "Name": ... }`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<Value>,
}

/// Serialized template body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<LogicalId, Resource>,
    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    /// Render the template as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A stack under construction.
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    region: String,
    description: Option<String>,
    resources: BTreeMap<LogicalId, Resource>,
    outputs: BTreeMap<String, Output>,
    dependencies: BTreeSet<String>,
    tags: BTreeMap<String, String>,
}

impl Stack {
    /// Create an empty stack deployed to `region`.
    #[must_use]
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            description: None,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            dependencies: BTreeSet::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Set the template description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a stack-level tag, propagated by the provisioning tool to every
    /// taggable resource of the stack.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Stack-level tags.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Stack name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deployment region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Add a resource at the given construct path and return its logical id.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::DuplicateLogicalId`] if the path was already used.
    pub fn add(&mut self, path: &[&str], resource: Resource) -> Result<LogicalId> {
        let logical_id = LogicalId::from_path(path);
        self.insert(logical_id, resource)
    }

    /// Add a resource under a literal logical id.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::DuplicateLogicalId`] if the id was already used.
    pub fn add_with_id(&mut self, id: &str, resource: Resource) -> Result<LogicalId> {
        self.insert(LogicalId::literal(id), resource)
    }

    fn insert(&mut self, logical_id: LogicalId, resource: Resource) -> Result<LogicalId> {
        if self.resources.contains_key(&logical_id) {
            return Err(TemplateError::DuplicateLogicalId {
                stack: self.name.clone(),
                logical_id: logical_id.to_string(),
            });
        }
        debug!(
            stack = %self.name,
            logical_id = %logical_id,
            resource_type = %resource.resource_type,
            "Adding resource"
        );
        self.resources.insert(logical_id.clone(), resource);
        Ok(logical_id)
    }

    /// Look up a resource by logical id.
    #[must_use]
    pub fn resource(&self, logical_id: &LogicalId) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// All resources, ordered by logical id.
    pub fn resources(&self) -> impl Iterator<Item = (&LogicalId, &Resource)> {
        self.resources.iter()
    }

    /// Resources of a given type, ordered by logical id.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a LogicalId, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, resource)| resource.resource_type == resource_type)
    }

    /// Add a plain output.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::DuplicateOutput`] if the name was already used.
    pub fn output(&mut self, name: &str, value: Value, description: Option<&str>) -> Result<()> {
        self.insert_output(
            name,
            Output {
                value,
                description: description.map(str::to_string),
                export: None,
            },
        )
    }

    /// Export a value for other stacks and return the import token they use.
    ///
    /// The export name is `<stack>:<name>`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::DuplicateOutput`] if the name was already used.
    pub fn export(&mut self, name: &str, value: Value) -> Result<Value> {
        let export_name = self.export_name(name);
        self.insert_output(
            name,
            Output {
                value,
                description: None,
                export: Some(json!({ "Name": export_name })),
            },
        )?;
        Ok(intrinsic::import_value(&export_name))
    }

    /// Export name used for an output of this stack.
    #[must_use]
    pub fn export_name(&self, name: &str) -> String {
        format!("{}:{name}", self.name)
    }

    fn insert_output(&mut self, name: &str, output: Output) -> Result<()> {
        if self.outputs.contains_key(name) {
            return Err(TemplateError::DuplicateOutput {
                stack: self.name.clone(),
                output: name.to_string(),
            });
        }
        self.outputs.insert(name.to_string(), output);
        Ok(())
    }

    /// Outputs, ordered by name.
    #[must_use]
    pub fn outputs(&self) -> &BTreeMap<String, Output> {
        &self.outputs
    }

    /// Declare that this stack must be deployed after `other`.
    pub fn add_dependency(&mut self, other: &Stack) {
        self.dependencies.insert(other.name.clone());
    }

    /// Names of the stacks this stack depends on.
    #[must_use]
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Snapshot the template body.
    #[must_use]
    pub fn template(&self) -> Template {
        Template {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: self.description.clone(),
            resources: self.resources.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_path_rejected() {
        let mut stack = Stack::new("sample-vpc", "ap-northeast-1");
        stack
            .add(&["Vpc"], Resource::new("AWS::EC2::VPC"))
            .unwrap();
        let err = stack
            .add(&["Vpc"], Resource::new("AWS::EC2::VPC"))
            .unwrap_err();
        assert!(matches!(err, TemplateError::DuplicateLogicalId { .. }));
    }

    #[test]
    fn test_export_returns_import_token() {
        let mut stack = Stack::new("sample-rds", "ap-northeast-1");
        let token = stack.export("SecurityGroupId", json!("sg-123")).unwrap();
        assert_eq!(token, json!({ "Fn::ImportValue": "sample-rds:SecurityGroupId" }));

        let output = &stack.outputs()["SecurityGroupId"];
        assert_eq!(
            output.export,
            Some(json!({ "Name": "sample-rds:SecurityGroupId" }))
        );
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let mut stack = Stack::new("s", "r");
        stack.output("A", json!(1), None).unwrap();
        assert!(stack.output("A", json!(2), None).is_err());
    }

    #[test]
    fn test_template_shape() {
        let mut stack = Stack::new("s", "r").with_description("demo");
        stack
            .add_with_id("Gateway", Resource::new("AWS::EC2::InternetGateway"))
            .unwrap();

        let value = serde_json::to_value(stack.template()).unwrap();
        assert_eq!(
            value,
            json!({
                "AWSTemplateFormatVersion": "2010-09-09",
                "Description": "demo",
                "Resources": { "Gateway": { "Type": "AWS::EC2::InternetGateway" } }
            })
        );
    }

    #[test]
    fn test_stack_tags_stay_out_of_template() {
        let stack = Stack::new("s", "r").with_tag("Application", "sample");
        assert_eq!(stack.tags()["Application"], "sample");
        let value = serde_json::to_value(stack.template()).unwrap();
        assert!(value.get("Tags").is_none());
    }

    #[test]
    fn test_resources_of_type() {
        let mut stack = Stack::new("s", "r");
        stack.add(&["A"], Resource::new("AWS::EC2::Subnet")).unwrap();
        stack.add(&["B"], Resource::new("AWS::EC2::Subnet")).unwrap();
        stack.add(&["C"], Resource::new("AWS::EC2::VPC")).unwrap();
        assert_eq!(stack.resources_of_type("AWS::EC2::Subnet").count(), 2);
    }
}
