//! IAM policy documents and role resources.

use cfn_template::{intrinsic, LogicalId, Resource};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::Result;

const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// One policy statement.
///
/// Single actions and resources serialize as scalars, lists otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Value>,
    #[serde(serialize_with = "one_or_many")]
    pub action: Vec<String>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "one_or_many"
    )]
    pub resource: Vec<Value>,
}

impl Statement {
    /// Allow `actions`; add resources or a principal with the builders.
    #[must_use]
    pub fn allow<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            effect: Effect::Allow,
            principal: None,
            action: actions.into_iter().map(Into::into).collect(),
            resource: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource.push(resource);
        self
    }

    /// Shorthand for `with_resource("*")`.
    #[must_use]
    pub fn on_any_resource(self) -> Self {
        self.with_resource(json!("*"))
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Value) -> Self {
        self.principal = Some(principal);
        self
    }
}

fn one_or_many<T, S>(items: &[T], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    T: Serialize,
    S: Serializer,
{
    match items {
        [single] => single.serialize(serializer),
        _ => items.serialize(serializer),
    }
}

/// A policy document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: &'static str,
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    #[must_use]
    pub fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION,
            statement,
        }
    }

    /// Trust policy letting `principal` assume the role.
    #[must_use]
    pub fn trust(principal: Value) -> Self {
        Self::new(vec![
            Statement::allow(["sts:AssumeRole"]).with_principal(principal)
        ])
    }
}

/// `{ "Service": <service> }`
#[must_use]
pub fn service_principal(service: &str) -> Value {
    json!({ "Service": service })
}

/// Principal for every identity of the deploying account.
#[must_use]
pub fn account_root_principal() -> Value {
    json!({ "AWS": intrinsic::account_root_arn() })
}

/// A role trusted by `principal` with the given AWS managed policies attached.
///
/// # Errors
///
/// Returns an error if the trust policy does not serialize.
pub fn role(principal: Value, managed_policies: &[&str]) -> Result<Resource> {
    let mut resource = Resource::new("AWS::IAM::Role").property(
        "AssumeRolePolicyDocument",
        serde_json::to_value(PolicyDocument::trust(principal))?,
    );
    if !managed_policies.is_empty() {
        let arns: Vec<Value> = managed_policies
            .iter()
            .map(|name| intrinsic::managed_policy_arn(name))
            .collect();
        resource = resource.property("ManagedPolicyArns", Value::Array(arns));
    }
    Ok(resource)
}

/// Inline policy attached to `role`.
///
/// # Errors
///
/// Returns an error if the document does not serialize.
pub fn inline_policy(name: &str, role: &LogicalId, document: &PolicyDocument) -> Result<Resource> {
    Ok(Resource::new("AWS::IAM::Policy").properties(json!({
        "PolicyName": name,
        "PolicyDocument": serde_json::to_value(document)?,
        "Roles": [role.reference()],
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_action_is_scalar() {
        let statement = Statement::allow(["eks:DescribeCluster"]).on_any_resource();
        let value = serde_json::to_value(statement).unwrap();
        assert_eq!(
            value,
            json!({ "Effect": "Allow", "Action": "eks:DescribeCluster", "Resource": "*" })
        );
    }

    #[test]
    fn test_many_actions_are_list() {
        let statement = Statement::allow(["ec2:CreateSecurityGroup", "ec2:Describe*"])
            .with_resource(json!("a"))
            .with_resource(json!("b"));
        let value = serde_json::to_value(statement).unwrap();
        assert_eq!(value["Action"], json!(["ec2:CreateSecurityGroup", "ec2:Describe*"]));
        assert_eq!(value["Resource"], json!(["a", "b"]));
    }

    #[test]
    fn test_trust_policy() {
        let value =
            serde_json::to_value(PolicyDocument::trust(service_principal("eks.amazonaws.com")))
                .unwrap();
        assert_eq!(value["Version"], "2012-10-17");
        let statement = &value["Statement"][0];
        assert_eq!(statement["Action"], "sts:AssumeRole");
        assert_eq!(statement["Principal"]["Service"], "eks.amazonaws.com");
        assert!(statement.get("Resource").is_none());
    }

    #[test]
    fn test_role_without_managed_policies() {
        let role = role(account_root_principal(), &[]).unwrap();
        assert!(role.get("ManagedPolicyArns").is_none());
        assert!(role.get("AssumeRolePolicyDocument").is_some());
    }
}
