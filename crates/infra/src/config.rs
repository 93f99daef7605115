//! Plan configuration.
//!
//! All process inputs have literal fallback defaults, so a bare
//! `api-infra synth` produces a complete plan for the `sample` application.
//! The configuration is an immutable value threaded through every stack
//! constructor; nothing reads the environment after it has been loaded.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{InfraError, Result};
use crate::manifest::SecretData;

pub const DEFAULT_APP_NAME: &str = "sample";
pub const DEFAULT_DB_NAME: &str = "sample";
pub const DEFAULT_DB_USERNAME: &str = "admin";
pub const DEFAULT_DB_PASSWORD: &str = "password";
pub const DEFAULT_GITHUB_OWNER: &str = "something";
pub const DEFAULT_GITHUB_REPO: &str = "something";
pub const DEFAULT_GITHUB_BRANCH: &str = "master";
pub const DEFAULT_AWS_ACCESS_KEY_ID: &str = "HOGE";
pub const DEFAULT_AWS_SECRET_ACCESS_KEY: &str = "HOGE";
pub const DEFAULT_AWS_REGION: &str = "ap-northeast-1";
/// The certificate must live in the same region as the load balancer.
pub const DEFAULT_ACM_CERTIFICATE_ARN: &str =
    "arn:aws:acm:ap-northeast-1:960722127407:certificate/a32583f3-ec6e-420a-8dd4-9c5aa26a3215";
pub const DEFAULT_DEPLOY_REGION: &str = "ap-northeast-1";
pub const DEFAULT_INSTANCE_TYPE: &str = "m5.large";
pub const DEFAULT_MIN_CAPACITY: u32 = 1;
pub const DEFAULT_MAX_CAPACITY: u32 = 10;

/// Stack-level tag carrying the application name.
pub const APPLICATION_TAG: &str = "Application";

/// Environment variable names.
pub mod env {
    pub const APP_NAME: &str = "APP_NAME";
    pub const DB_NAME: &str = "RDS_DB_NAME";
    pub const DB_USERNAME: &str = "RDS_USERNAME";
    pub const DB_PASSWORD: &str = "RDS_PASSWORD";
    pub const GITHUB_OWNER: &str = "OWNER";
    pub const GITHUB_REPO: &str = "REPO";
    pub const GITHUB_BRANCH: &str = "BRANCH";
    pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
    pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
    pub const AWS_REGION: &str = "AWS_REGION";
    pub const ACM_CERTIFICATE_ARN: &str = "ACM_CERTIFICATE_ARN";
    pub const DEPLOY_REGION: &str = "DEPLOY_REGION";
    pub const MASTER_USERS: &str = "EKS_MASTER_USERS";
    pub const INSTANCE_TYPE: &str = "EKS_INSTANCE_TYPE";
    pub const MIN_CAPACITY: &str = "EKS_MIN_CAPACITY";
    pub const MAX_CAPACITY: &str = "EKS_MAX_CAPACITY";
}

/// Full plan configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    // Identity
    /// Application name; prefixes every stack and most resource names.
    pub app_name: String,
    /// Region every stack is deployed to.
    pub deploy_region: String,

    // Database
    /// Default schema created in the database cluster.
    pub db_name: String,
    /// Master username.
    pub db_username: String,
    /// Master password.
    pub db_password: String,

    // Source repository
    /// GitHub owner (user or organization).
    pub github_owner: String,
    /// GitHub repository name.
    pub github_repo: String,
    /// Branch the pipeline tracks.
    pub github_branch: String,

    // Runtime secret values
    /// Access key injected into the workload secret.
    pub aws_access_key_id: String,
    /// Secret key injected into the workload secret.
    pub aws_secret_access_key: String,
    /// Region injected into the workload secret.
    pub aws_region: String,

    // Load balancer
    /// ACM certificate terminating TLS on the service load balancer.
    pub acm_certificate_arn: String,

    // Cluster
    /// IAM user names mapped to `system:masters`.
    pub master_users: Vec<String>,
    /// Worker instance type.
    pub instance_type: String,
    /// Minimum worker count.
    pub min_capacity: u32,
    /// Maximum worker count.
    pub max_capacity: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.into(),
            deploy_region: DEFAULT_DEPLOY_REGION.into(),
            db_name: DEFAULT_DB_NAME.into(),
            db_username: DEFAULT_DB_USERNAME.into(),
            db_password: DEFAULT_DB_PASSWORD.into(),
            github_owner: DEFAULT_GITHUB_OWNER.into(),
            github_repo: DEFAULT_GITHUB_REPO.into(),
            github_branch: DEFAULT_GITHUB_BRANCH.into(),
            aws_access_key_id: DEFAULT_AWS_ACCESS_KEY_ID.into(),
            aws_secret_access_key: DEFAULT_AWS_SECRET_ACCESS_KEY.into(),
            aws_region: DEFAULT_AWS_REGION.into(),
            acm_certificate_arn: DEFAULT_ACM_CERTIFICATE_ARN.into(),
            master_users: Vec::new(),
            instance_type: DEFAULT_INSTANCE_TYPE.into(),
            min_capacity: DEFAULT_MIN_CAPACITY,
            max_capacity: DEFAULT_MAX_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required value is set but empty, or a numeric
    /// value does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a required value is set but empty, or a numeric
    /// value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: String| lookup(key).unwrap_or(default);

        let config = Self {
            app_name: text(env::APP_NAME, defaults.app_name),
            deploy_region: text(env::DEPLOY_REGION, defaults.deploy_region),
            db_name: text(env::DB_NAME, defaults.db_name),
            db_username: text(env::DB_USERNAME, defaults.db_username),
            db_password: text(env::DB_PASSWORD, defaults.db_password),
            github_owner: text(env::GITHUB_OWNER, defaults.github_owner),
            github_repo: text(env::GITHUB_REPO, defaults.github_repo),
            github_branch: text(env::GITHUB_BRANCH, defaults.github_branch),
            aws_access_key_id: text(env::AWS_ACCESS_KEY_ID, defaults.aws_access_key_id),
            aws_secret_access_key: text(
                env::AWS_SECRET_ACCESS_KEY,
                defaults.aws_secret_access_key,
            ),
            aws_region: text(env::AWS_REGION, defaults.aws_region),
            acm_certificate_arn: text(env::ACM_CERTIFICATE_ARN, defaults.acm_certificate_arn),
            master_users: lookup(env::MASTER_USERS)
                .map(|users| parse_list(&users))
                .unwrap_or(defaults.master_users),
            instance_type: text(env::INSTANCE_TYPE, defaults.instance_type),
            min_capacity: parse_number(&lookup, env::MIN_CAPACITY, defaults.min_capacity)?,
            max_capacity: parse_number(&lookup, env::MAX_CAPACITY, defaults.max_capacity)?,
        };

        config.validate()?;
        debug!(app_name = %config.app_name, region = %config.deploy_region, "Loaded configuration");
        Ok(config)
    }

    /// Check that the values every resource name is derived from are present.
    ///
    /// Credentials, ARNs and user lists are not inspected.
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::MissingConfig`] naming the first empty value.
    pub fn validate(&self) -> Result<()> {
        let required = [
            (env::APP_NAME, &self.app_name),
            (env::DEPLOY_REGION, &self.deploy_region),
            (env::DB_NAME, &self.db_name),
            (env::DB_USERNAME, &self.db_username),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(InfraError::MissingConfig(key));
            }
        }
        Ok(())
    }

    /// Name of the network stack.
    #[must_use]
    pub fn network_stack_name(&self) -> String {
        format!("{}-vpc", self.app_name)
    }

    /// Name of the database stack.
    #[must_use]
    pub fn database_stack_name(&self) -> String {
        format!("{}-rds", self.app_name)
    }

    /// Name of the cluster stack.
    #[must_use]
    pub fn cluster_stack_name(&self) -> String {
        format!("{}-eks", self.app_name)
    }

    /// Name of the EKS cluster.
    #[must_use]
    pub fn cluster_name(&self) -> String {
        format!("{}-cluster", self.app_name)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<F>(lookup: &F, key: &'static str, default: u32) -> Result<u32>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| InfraError::InvalidConfig { key, value: raw }),
    }
}

/// One static name/value pair from the secret store export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    pub name: String,
    pub value: String,
}

/// Static runtime configuration merged into the workload secret.
///
/// Read from a JSON document of the form
/// `{"Secrets": [{"name": "...", "value": "..."}]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSource {
    #[serde(rename = "Secrets", default)]
    secrets: Vec<SecretEntry>,
}

impl SecretSource {
    /// Build a source from name/value pairs.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            secrets: pairs
                .into_iter()
                .map(|(name, value)| SecretEntry {
                    name: name.into(),
                    value: value.into(),
                })
                .collect(),
        }
    }

    /// Load a source from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|source| InfraError::SecretSourceRead {
                path: path.to_path_buf(),
                source,
            })?;
        let source: Self =
            serde_json::from_str(&content).map_err(|source| InfraError::SecretSourceParse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), count = source.secrets.len(), "Loaded secret source");
        Ok(source)
    }

    /// Load a source if a path was given, otherwise return an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Entries in file order.
    #[must_use]
    pub fn entries(&self) -> &[SecretEntry] {
        &self.secrets
    }

    /// Flatten into a name/value map; later entries win on duplicate names.
    #[must_use]
    pub fn to_map(&self) -> SecretData {
        self.secrets
            .iter()
            .map(|entry| (entry.name.clone(), entry.value.clone()))
            .collect()
    }
}
