//! CloudFormation template model for infrastructure plans.
//!
//! This crate provides the small object model the infrastructure stacks are
//! written against:
//!
//! - [`Resource`] - one typed resource declaration with properties, tags and
//!   lifecycle policies
//! - [`Stack`] - a named set of resources with outputs and cross-stack exports
//! - [`CloudAssembly`] - the synthesized plan written to disk for the
//!   provisioning tool
//!
//! Logical ids are derived deterministically from construct paths, so the
//! same inputs always produce byte-identical templates.
//!
//! # Example
//!
//! ```rust,ignore
//! use cfn_template::{CloudAssembly, Resource, Stack};
//!
//! let mut stack = Stack::new("sample-vpc", "ap-northeast-1");
//! let vpc = stack.add(&["sample-vpc"], Resource::new("AWS::EC2::VPC"))?;
//! stack.export("VpcId", vpc.reference())?;
//!
//! let assembly = CloudAssembly::synthesize(&[&stack])?;
//! assembly.write_to(std::path::Path::new("cdk.out"))?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assembly;
mod error;
pub mod intrinsic;
pub mod logical_id;
pub mod resource;
pub mod stack;

pub use assembly::{ArtifactTag, CloudAssembly, Manifest, StackArtifact};
pub use error::{Result, TemplateError};
pub use intrinsic::Pseudo;
pub use logical_id::LogicalId;
pub use resource::{RemovalPolicy, Resource};
pub use stack::{Output, Stack, Template};
