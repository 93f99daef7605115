//! The composed three-stack plan.

use cfn_template::{CloudAssembly, Stack};
use tracing::info;

use crate::cluster::{ClusterProps, ClusterStack};
use crate::config::{AppConfig, SecretSource};
use crate::database::DatabaseStack;
use crate::error::Result;
use crate::network::NetworkStack;

/// Network, database and cluster stacks, built in that order.
#[derive(Debug, Clone)]
pub struct Plan {
    pub network: NetworkStack,
    pub database: DatabaseStack,
    pub cluster: ClusterStack,
}

impl Plan {
    /// Build all three stacks.
    ///
    /// Each stack only sees the outputs of the stacks before it. The same
    /// inputs always produce the same plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete or a stack fails
    /// to build.
    pub fn build(config: &AppConfig, secrets: &SecretSource) -> Result<Self> {
        config.validate()?;

        let network = NetworkStack::build(config)?;

        let mut database = DatabaseStack::build(config, &network.outputs)?;
        database.stack.add_dependency(&network.stack);

        let mut cluster = ClusterStack::build(&ClusterProps {
            config,
            secrets,
            network: &network.outputs,
            database: &database.outputs,
        })?;
        cluster.stack.add_dependency(&network.stack);
        cluster.stack.add_dependency(&database.stack);

        info!(
            app_name = %config.app_name,
            region = %config.deploy_region,
            "Built plan"
        );

        Ok(Self {
            network,
            database,
            cluster,
        })
    }

    /// Stacks in deployment order.
    #[must_use]
    pub fn stacks(&self) -> [&Stack; 3] {
        [&self.network.stack, &self.database.stack, &self.cluster.stack]
    }

    /// Synthesize the cloud assembly.
    ///
    /// # Errors
    ///
    /// Returns an error if a template does not serialize.
    pub fn synth(&self) -> Result<CloudAssembly> {
        Ok(CloudAssembly::synthesize(&self.stacks())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_order_and_dependencies() {
        let plan = Plan::build(&AppConfig::default(), &SecretSource::default()).unwrap();
        let names: Vec<&str> = plan.stacks().iter().map(|stack| stack.name()).collect();
        assert_eq!(names, ["sample-vpc", "sample-rds", "sample-eks"]);

        assert!(plan.network.stack.dependencies().is_empty());
        assert_eq!(
            plan.database.stack.dependencies().iter().collect::<Vec<_>>(),
            ["sample-vpc"]
        );
        assert_eq!(
            plan.cluster.stack.dependencies().iter().collect::<Vec<_>>(),
            ["sample-rds", "sample-vpc"]
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AppConfig {
            db_name: String::new(),
            ..AppConfig::default()
        };
        assert!(Plan::build(&config, &SecretSource::default()).is_err());
    }

    #[test]
    fn test_all_stacks_in_deploy_region() {
        let config = AppConfig {
            deploy_region: "us-west-2".to_string(),
            ..AppConfig::default()
        };
        let plan = Plan::build(&config, &SecretSource::default()).unwrap();
        assert!(plan.stacks().iter().all(|stack| stack.region() == "us-west-2"));
    }

    #[test]
    fn test_every_stack_tagged_with_application() {
        let plan = Plan::build(&AppConfig::default(), &SecretSource::default()).unwrap();
        for stack in plan.stacks() {
            assert_eq!(stack.tags()["Application"], "sample");
        }
    }
}
