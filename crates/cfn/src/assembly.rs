//! Cloud assembly: the synthesized artifact handed to the provisioning tool.
//!
//! An assembly directory contains one `<stack>.template.json` per stack and a
//! `manifest.json` describing the stacks, their target environments and the
//! order in which they must be deployed.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::{Result, TemplateError};
use crate::stack::{Stack, Template};

/// Manifest schema version.
pub const MANIFEST_VERSION: &str = "9.0.0";

/// Artifact type used for every stack.
const STACK_ARTIFACT_TYPE: &str = "aws:cloudformation:stack";

/// Manifest file name inside the assembly directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// A synthesized stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackArtifact {
    /// Stack name.
    pub name: String,
    /// Target region.
    pub region: String,
    /// Template body.
    pub template: Template,
    /// Stacks that must be deployed first.
    pub dependencies: BTreeSet<String>,
    /// Stack-level tags.
    pub tags: BTreeMap<String, String>,
}

impl StackArtifact {
    /// File name of the template inside the assembly directory.
    #[must_use]
    pub fn template_file(&self) -> String {
        format!("{}.template.json", self.name)
    }
}

/// Manifest entry for one artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactEntry {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub environment: String,
    pub properties: ArtifactProperties,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// Properties of a stack artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactProperties {
    pub template_file: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<ArtifactTag>,
}

/// A stack tag as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactTag {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

/// Assembly manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub version: String,
    pub artifacts: BTreeMap<String, ArtifactEntry>,
}

/// The complete synthesized plan.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudAssembly {
    stacks: Vec<StackArtifact>,
}

impl CloudAssembly {
    /// Synthesize the given stacks, in deployment order.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::UnknownDependency`] if a stack depends on a
    /// stack that is not part of the assembly or is listed after it.
    pub fn synthesize(stacks: &[&Stack]) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let mut artifacts = Vec::with_capacity(stacks.len());

        for stack in stacks {
            for dependency in stack.dependencies() {
                if !seen.contains(dependency) {
                    return Err(TemplateError::UnknownDependency {
                        stack: stack.name().to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }
            seen.insert(stack.name().to_string());

            artifacts.push(StackArtifact {
                name: stack.name().to_string(),
                region: stack.region().to_string(),
                template: stack.template(),
                dependencies: stack.dependencies().clone(),
                tags: stack.tags().clone(),
            });
        }

        Ok(Self { stacks: artifacts })
    }

    /// Stacks in deployment order.
    #[must_use]
    pub fn stacks(&self) -> &[StackArtifact] {
        &self.stacks
    }

    /// Look up a stack by name.
    #[must_use]
    pub fn stack(&self, name: &str) -> Option<&StackArtifact> {
        self.stacks.iter().find(|stack| stack.name == name)
    }

    /// Build the assembly manifest.
    #[must_use]
    pub fn manifest(&self) -> Manifest {
        let artifacts = self
            .stacks
            .iter()
            .map(|stack| {
                (
                    stack.name.clone(),
                    ArtifactEntry {
                        artifact_type: STACK_ARTIFACT_TYPE.to_string(),
                        environment: format!("aws://unknown-account/{}", stack.region),
                        properties: ArtifactProperties {
                            template_file: stack.template_file(),
                            tags: stack
                                .tags
                                .iter()
                                .map(|(key, value)| ArtifactTag {
                                    key: key.clone(),
                                    value: value.clone(),
                                })
                                .collect(),
                        },
                        dependencies: stack.dependencies.iter().cloned().collect(),
                    },
                )
            })
            .collect();

        Manifest {
            version: MANIFEST_VERSION.to_string(),
            artifacts,
        }
    }

    /// Write the manifest and every template into `dir`.
    ///
    /// Returns the paths written, manifest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or a file cannot
    /// be written.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir).map_err(|source| TemplateError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::with_capacity(self.stacks.len() + 1);

        let manifest_path = dir.join(MANIFEST_FILE);
        write_file(
            &manifest_path,
            &serde_json::to_string_pretty(&self.manifest())?,
        )?;
        written.push(manifest_path);

        for stack in &self.stacks {
            let path = dir.join(stack.template_file());
            write_file(&path, &stack.template.to_json()?)?;
            info!(stack = %stack.name, path = %path.display(), "Wrote template");
            written.push(path);
        }

        Ok(written)
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, format!("{contents}\n")).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })
}
