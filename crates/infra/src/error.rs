//! Errors raised while building the infrastructure plan.

use std::path::PathBuf;

use cfn_template::TemplateError;
use thiserror::Error;

/// Errors that can occur during plan construction.
///
/// Everything here is fatal: plan generation aborts and nothing is retried.
/// Bad values that are merely invalid for the cloud (malformed ARNs, unknown
/// users) are not detected locally; the provisioning tool reports them at
/// apply time.
#[derive(Error, Debug)]
pub enum InfraError {
    /// A required configuration value was set but empty.
    #[error("Missing required configuration value: {0}")]
    MissingConfig(&'static str),

    /// A configuration value could not be parsed.
    #[error("Invalid value '{value}' for {key}")]
    InvalidConfig { key: &'static str, value: String },

    /// The secret source file could not be read.
    #[error("Failed to read secret source {path}: {source}")]
    SecretSourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The secret source file is not valid JSON of the expected shape.
    #[error("Failed to parse secret source {path}: {source}")]
    SecretSourceParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A manifest or policy document could not be built or serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A Kubernetes manifest could not be rendered as YAML.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Template bookkeeping failed.
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Result alias for plan construction.
pub type Result<T> = std::result::Result<T, InfraError>;
