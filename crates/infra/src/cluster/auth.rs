//! The `aws-auth` ConfigMap mapping IAM identities to cluster groups.

use k8s_openapi::api::core::v1::ConfigMap;
use serde::Serialize;
use serde_json::json;

use crate::error::Result;

pub const AWS_AUTH_NAME: &str = "aws-auth";
pub const AWS_AUTH_NAMESPACE: &str = "kube-system";

/// Cluster administrators.
pub const MASTERS_GROUP: &str = "system:masters";

/// Groups every worker node role joins.
pub const NODE_GROUPS: [&str; 2] = ["system:bootstrappers", "system:nodes"];

/// Username template resolved by the authenticator per instance.
pub const NODE_USERNAME: &str = "system:node:{{EC2PrivateDNSName}}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleMapping {
    pub rolearn: String,
    pub username: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserMapping {
    pub userarn: String,
    pub username: String,
    pub groups: Vec<String>,
}

/// Identity mappings, in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsAuth {
    roles: Vec<RoleMapping>,
    users: Vec<UserMapping>,
}

impl AwsAuth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Let instances running under `role_arn` join the cluster as nodes.
    #[must_use]
    pub fn with_node_role(mut self, role_arn: impl Into<String>) -> Self {
        self.roles.push(RoleMapping {
            rolearn: role_arn.into(),
            username: NODE_USERNAME.to_string(),
            groups: NODE_GROUPS.iter().map(ToString::to_string).collect(),
        });
        self
    }

    /// Map `role_arn` to `system:masters`.
    #[must_use]
    pub fn with_masters_role(
        mut self,
        role_arn: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        self.roles.push(RoleMapping {
            rolearn: role_arn.into(),
            username: username.into(),
            groups: vec![MASTERS_GROUP.to_string()],
        });
        self
    }

    /// Map the IAM user `user_arn` to `system:masters` as `username`.
    #[must_use]
    pub fn with_masters_user(
        mut self,
        user_arn: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        self.users.push(UserMapping {
            userarn: user_arn.into(),
            username: username.into(),
            groups: vec![MASTERS_GROUP.to_string()],
        });
        self
    }

    #[must_use]
    pub fn roles(&self) -> &[RoleMapping] {
        &self.roles
    }

    #[must_use]
    pub fn users(&self) -> &[UserMapping] {
        &self.users
    }

    /// Render the ConfigMap. Mappings are stored as JSON strings, which the
    /// authenticator parses as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the mappings do not serialize.
    pub fn config_map(&self) -> Result<ConfigMap> {
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": AWS_AUTH_NAME,
                "namespace": AWS_AUTH_NAMESPACE,
            },
            "data": {
                "mapRoles": serde_json::to_string(&self.roles)?,
                "mapUsers": serde_json::to_string(&self.users)?,
                "mapAccounts": "[]",
            },
        });

        Ok(serde_json::from_value(manifest)?)
    }
}
