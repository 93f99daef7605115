//! Errors raised while assembling or writing templates.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or emitting a cloud assembly.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// Two resources in the same stack resolved to the same logical id.
    #[error("Duplicate logical id '{logical_id}' in stack '{stack}'")]
    DuplicateLogicalId { stack: String, logical_id: String },

    /// A stack depends on a stack that is not part of the assembly.
    #[error("Stack '{stack}' depends on unknown stack '{dependency}'")]
    UnknownDependency { stack: String, dependency: String },

    /// Two outputs with the same name were registered on one stack.
    #[error("Duplicate output '{output}' in stack '{stack}'")]
    DuplicateOutput { stack: String, output: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing the assembly to disk failed.
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;
