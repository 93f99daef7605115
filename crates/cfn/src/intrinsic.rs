//! CloudFormation intrinsic functions and pseudo parameters.
//!
//! Every helper returns the JSON shape the provisioning tool resolves at
//! apply time. Nothing here is evaluated locally.

use std::collections::BTreeMap;

use serde_json::{json, Value};

/// Pseudo parameters resolved by CloudFormation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pseudo {
    AccountId,
    Partition,
    Region,
    StackName,
    UrlSuffix,
}

impl Pseudo {
    /// The pseudo parameter name (e.g. `AWS::Region`).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::AccountId => "AWS::AccountId",
            Self::Partition => "AWS::Partition",
            Self::Region => "AWS::Region",
            Self::StackName => "AWS::StackName",
            Self::UrlSuffix => "AWS::URLSuffix",
        }
    }

    /// `{ "Ref": "AWS::..." }`
    #[must_use]
    pub fn reference(self) -> Value {
        reference(self.name())
    }
}

/// `{ "Ref": <name> }`
#[must_use]
pub fn reference(name: &str) -> Value {
    json!({ "Ref": name })
}

/// `{ "Fn::GetAtt": [<logical id>, <attribute>] }`
#[must_use]
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{ "Fn::Join": [<delimiter>, [parts...]] }`
#[must_use]
pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// `{ "Fn::Select": [<index>, <list>] }`
#[must_use]
pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

/// `{ "Fn::GetAZs": "" }`, the availability zones of the deployment region.
#[must_use]
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

/// `{ "Fn::ImportValue": <export name> }`
#[must_use]
pub fn import_value(export_name: &str) -> Value {
    json!({ "Fn::ImportValue": export_name })
}

/// `{ "Fn::Base64": <value> }`
#[must_use]
pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

/// ARN of an AWS managed IAM policy in the current partition.
#[must_use]
pub fn managed_policy_arn(policy_name: &str) -> Value {
    join(
        "",
        vec![
            json!("arn:"),
            Pseudo::Partition.reference(),
            json!(format!(":iam::aws:policy/{policy_name}")),
        ],
    )
}

/// ARN of the account root principal.
#[must_use]
pub fn account_root_arn() -> Value {
    join(
        "",
        vec![
            json!("arn:"),
            Pseudo::Partition.reference(),
            json!(":iam::"),
            Pseudo::AccountId.reference(),
            json!(":root"),
        ],
    )
}

/// Dynamic reference to a Secrets Manager secret string.
///
/// Resolved by CloudFormation when the resource is created, so the secret
/// value never appears in the template.
#[must_use]
pub fn secrets_manager(secret_id: &str) -> String {
    format!("{{{{resolve:secretsmanager:{secret_id}:SecretString:::}}}}")
}

/// Dynamic reference to an SSM parameter.
#[must_use]
pub fn ssm_parameter(name: &str) -> String {
    format!("{{{{resolve:ssm:{name}}}}}")
}

/// Escape literal text for a `substitute` template: `${` becomes `${!`.
///
/// Apply to every caller-supplied value before it is joined with
/// [`placeholder`]s, never to the assembled text.
#[must_use]
pub fn escape(text: &str) -> String {
    text.replace("${", "${!")
}

/// `Fn::Sub` over a template with named variables.
///
/// Literal `${` in `template` must already be escaped with [`escape`]; every
/// remaining `${Name}` is a placeholder and `template` is not rescanned.
/// A template without placeholders or escapes is returned as a plain string.
#[must_use]
pub fn substitute(template: &str, variables: &BTreeMap<String, Value>) -> Value {
    if !template.contains("${") {
        return Value::String(template.to_string());
    }
    if variables.is_empty() {
        return json!({ "Fn::Sub": template });
    }
    json!({ "Fn::Sub": [template, variables] })
}

/// Placeholder text for a `substitute` variable.
#[must_use]
pub fn placeholder(name: &str) -> String {
    format!("${{{name}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pseudo_reference() {
        assert_eq!(Pseudo::Region.reference(), json!({ "Ref": "AWS::Region" }));
        assert_eq!(Pseudo::UrlSuffix.name(), "AWS::URLSuffix");
    }

    #[test]
    fn test_managed_policy_arn() {
        let arn = managed_policy_arn("AmazonEKSClusterPolicy");
        assert_eq!(
            arn,
            json!({ "Fn::Join": ["", [
                "arn:",
                { "Ref": "AWS::Partition" },
                ":iam::aws:policy/AmazonEKSClusterPolicy"
            ]]})
        );
    }

    #[test]
    fn test_secrets_manager_reference() {
        assert_eq!(
            secrets_manager("GITHUB_TOKEN"),
            "{{resolve:secretsmanager:GITHUB_TOKEN:SecretString:::}}"
        );
    }

    #[test]
    fn test_substitute_keeps_escaped_literals() {
        let mut vars = BTreeMap::new();
        vars.insert("Host".to_string(), import_value("db:Endpoint"));

        let template = format!("url={} literal={}", placeholder("Host"), escape("${NOT_A_VAR}"));
        let value = substitute(&template, &vars);
        assert_eq!(
            value,
            json!({ "Fn::Sub": [
                "url=${Host} literal=${!NOT_A_VAR}",
                { "Host": { "Fn::ImportValue": "db:Endpoint" } }
            ]})
        );
    }

    #[test]
    fn test_escaped_variable_name_stays_literal() {
        let mut vars = BTreeMap::new();
        vars.insert("Host".to_string(), import_value("db:Endpoint"));

        let template = format!("{}@{}", escape("p${Host}"), placeholder("Host"));
        let value = substitute(&template, &vars);
        assert_eq!(value["Fn::Sub"][0], "p${!Host}@${Host}");
    }

    #[test]
    fn test_substitute_without_placeholders_is_literal() {
        let value = substitute("plain text", &BTreeMap::new());
        assert_eq!(value, json!("plain text"));
    }

    #[test]
    fn test_substitute_escapes_without_variables() {
        let value = substitute(&escape("plain ${text}"), &BTreeMap::new());
        assert_eq!(value, json!({ "Fn::Sub": "plain ${!text}" }));
    }

    #[test]
    fn test_placeholder() {
        assert_eq!(placeholder("RepositoryUri"), "${RepositoryUri}");
    }
}
