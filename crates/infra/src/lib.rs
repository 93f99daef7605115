//! Infrastructure plan for the `api` service on AWS.
//!
//! Builds three CloudFormation stacks and writes them out as a cloud
//! assembly for the provisioning tool to apply:
//!
//! - `<app>-vpc`: a VPC with public and isolated subnets
//! - `<app>-rds`: an Aurora MySQL cluster in the isolated subnets
//! - `<app>-eks`: an EKS cluster running the workload, plus its delivery
//!   pipeline
//!
//! # Example
//!
//! ```rust,ignore
//! use api_infra::{AppConfig, Plan, SecretSource};
//!
//! let config = AppConfig::from_env()?;
//! let plan = Plan::build(&config, &SecretSource::default())?;
//! plan.synth()?.write_to(Path::new("cdk.out"))?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cluster;
pub mod config;
pub mod database;
mod error;
pub mod manifest;
pub mod network;
pub mod plan;

pub use cluster::{runtime_secret, ClusterProps, ClusterStack};
pub use config::{AppConfig, SecretEntry, SecretSource};
pub use database::{DatabaseOutputs, DatabaseStack};
pub use error::{InfraError, Result};
pub use manifest::{SecretData, WorkloadManifests};
pub use network::{NetworkOutputs, NetworkStack};
pub use plan::Plan;
