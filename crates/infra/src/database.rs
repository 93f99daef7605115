//! Database stack: an Aurora MySQL cluster in the isolated subnets.
//!
//! The cluster is guarded by its own security group, which has no inbound
//! rules of its own. The cluster stack later adds the single ingress rule
//! that lets the EKS cluster in on the MySQL port.

use std::collections::BTreeMap;

use cfn_template::{LogicalId, RemovalPolicy, Resource, Stack};
use serde_json::{json, Value};
use tracing::info;

use crate::config::{AppConfig, APPLICATION_TAG};
use crate::error::Result;
use crate::network::NetworkOutputs;

/// Relational engine port.
pub const MYSQL_PORT: u16 = 3306;

/// Engine and version.
pub const ENGINE: &str = "aurora-mysql";
pub const ENGINE_VERSION: &str = "5.7.mysql_aurora.2.08.1";
const PARAMETER_FAMILY: &str = "aurora-mysql5.7";

/// Instances in the cluster (one writer, one reader).
pub const INSTANCE_COUNT: usize = 2;
pub const INSTANCE_CLASS: &str = "db.t3.medium";

/// CloudWatch log types exported by the cluster.
pub const LOG_EXPORTS: [&str; 2] = ["slowquery", "error"];

/// Engine tuning applied through the cluster parameter group.
#[must_use]
pub fn engine_parameters() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("character_set_server", "utf8mb4"),
        ("character_set_database", "utf8mb4"),
        ("character_set_client", "utf8mb4"),
        ("character_set_results", "utf8mb4"),
        ("collation_server", "utf8mb4_bin"),
        ("log_warnings", "1"),
        ("performance_schema", "1"),
        ("log_queries_not_using_indexes", "0"),
        ("net_write_timeout", "120"),
        ("max_allowed_packet", "67108864"),
        ("server_audit_logging", "1"),
        ("time_zone", "Asia/Tokyo"),
        ("slow_query_log", "1"),
        ("long_query_time", "1"),
        ("innodb_print_all_deadlocks", "1"),
    ])
}

/// Import tokens the cluster stack consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseOutputs {
    /// Id of the guarding security group.
    pub security_group_id: Value,
    /// Writer endpoint hostname.
    pub endpoint_hostname: Value,
}

/// The synthesized database stack.
#[derive(Debug, Clone)]
pub struct DatabaseStack {
    pub stack: Stack,
    pub security_group: LogicalId,
    pub parameter_group: LogicalId,
    pub cluster: LogicalId,
    pub instances: Vec<LogicalId>,
    pub outputs: DatabaseOutputs,
}

impl DatabaseStack {
    /// Build the database stack inside the network's isolated subnets.
    ///
    /// Credentials are written into the template as given; they are not
    /// checked here.
    ///
    /// # Errors
    ///
    /// Returns an error only on template bookkeeping failures.
    pub fn build(config: &AppConfig, network: &NetworkOutputs) -> Result<Self> {
        let stack_name = config.database_stack_name();
        let app = &config.app_name;
        let mut stack = Stack::new(&stack_name, &config.deploy_region)
            .with_description(format!("Aurora MySQL cluster for {app}"))
            .with_tag(APPLICATION_TAG, &config.app_name);

        let sg_name = format!("{app}-DB-SG");
        let security_group = stack.add(
            &[&sg_name, "Resource"],
            Resource::new("AWS::EC2::SecurityGroup").properties(json!({
                "GroupDescription": format!("{stack_name}/{sg_name}"),
                "GroupName": sg_name,
                "SecurityGroupEgress": [{
                    "CidrIp": "0.0.0.0/0",
                    "Description": "Allow all outbound traffic by default",
                    "IpProtocol": "-1",
                }],
                "VpcId": network.vpc_id,
            })),
        )?;

        let parameter_group = stack.add(
            &[&format!("{app}-PG"), "Resource"],
            Resource::new("AWS::RDS::DBClusterParameterGroup").properties(json!({
                "Description": format!("Cluster parameter group for {PARAMETER_FAMILY}"),
                "Family": PARAMETER_FAMILY,
                "Parameters": engine_parameters(),
            })),
        )?;

        let cluster_name = format!("{app}-DB-cluster");
        let subnet_group = stack.add(
            &[&cluster_name, "Subnets", "Default"],
            Resource::new("AWS::RDS::DBSubnetGroup")
                .properties(json!({
                    "DBSubnetGroupDescription": format!("Subnets for {cluster_name} database"),
                    "SubnetIds": network.isolated_subnet_ids,
                }))
                .removal_policy(RemovalPolicy::Destroy),
        )?;

        let cluster = stack.add(
            &[&cluster_name, "Resource"],
            Resource::new("AWS::RDS::DBCluster")
                .properties(json!({
                    "Engine": ENGINE,
                    "EngineVersion": ENGINE_VERSION,
                    "DBClusterParameterGroupName": parameter_group.reference(),
                    "DBSubnetGroupName": subnet_group.reference(),
                    "DatabaseName": config.db_name,
                    "MasterUsername": config.db_username,
                    "MasterUserPassword": config.db_password,
                    "EnableCloudwatchLogsExports": LOG_EXPORTS,
                    "VpcSecurityGroupIds": [security_group.get_att("GroupId")],
                }))
                .removal_policy(RemovalPolicy::Destroy),
        )?;

        let mut instances = Vec::with_capacity(INSTANCE_COUNT);
        for n in 1..=INSTANCE_COUNT {
            let instance = stack.add(
                &[&cluster_name, &format!("Instance{n}")],
                Resource::new("AWS::RDS::DBInstance")
                    .properties(json!({
                        "DBClusterIdentifier": cluster.reference(),
                        "DBInstanceClass": INSTANCE_CLASS,
                        "DBSubnetGroupName": subnet_group.reference(),
                        "Engine": ENGINE,
                        "EngineVersion": ENGINE_VERSION,
                        "AutoMinorVersionUpgrade": true,
                        "PubliclyAccessible": false,
                    }))
                    .removal_policy(RemovalPolicy::Destroy),
            )?;
            instances.push(instance);
        }

        let outputs = DatabaseOutputs {
            security_group_id: stack.export("SecurityGroupId", security_group.get_att("GroupId"))?,
            endpoint_hostname: stack.export("ClusterEndpoint", cluster.get_att("Endpoint.Address"))?,
        };

        info!(stack = %stack_name, engine = ENGINE, "Built database stack");

        Ok(Self {
            stack,
            security_group,
            parameter_group,
            cluster,
            instances,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkStack;

    fn build() -> DatabaseStack {
        let config = AppConfig::default();
        let network = NetworkStack::build(&config).unwrap();
        DatabaseStack::build(&config, &network.outputs).unwrap()
    }

    #[test]
    fn test_security_group_has_no_inbound_rules() {
        let db = build();
        let sg = db.stack.resource(&db.security_group).unwrap();
        assert!(sg.get("SecurityGroupIngress").is_none());
        assert_eq!(sg.get("GroupName"), Some(&json!("sample-DB-SG")));
        assert_eq!(sg.get("SecurityGroupEgress").unwrap()[0]["IpProtocol"], "-1");
    }

    #[test]
    fn test_cluster_uses_isolated_subnets_and_credentials() {
        let db = build();
        let cluster = db.stack.resource(&db.cluster).unwrap();
        assert_eq!(cluster.get("MasterUsername"), Some(&json!("admin")));
        assert_eq!(cluster.get("MasterUserPassword"), Some(&json!("password")));
        assert_eq!(cluster.get("DatabaseName"), Some(&json!("sample")));
        assert_eq!(cluster.deletion_policy, Some(RemovalPolicy::Destroy));

        let (_, subnet_group) = db
            .stack
            .resources_of_type("AWS::RDS::DBSubnetGroup")
            .next()
            .unwrap();
        let subnets = subnet_group.get("SubnetIds").unwrap().as_array().unwrap();
        assert!(subnets
            .iter()
            .all(|s| s["Fn::ImportValue"].as_str().unwrap().contains("IsolatedSubnet")));
    }

    #[test]
    fn test_parameter_group() {
        let db = build();
        let group = db.stack.resource(&db.parameter_group).unwrap();
        let params = group.get("Parameters").unwrap();
        assert_eq!(params["time_zone"], "Asia/Tokyo");
        assert_eq!(params["character_set_server"], "utf8mb4");
        assert_eq!(params["collation_server"], "utf8mb4_bin");
        assert_eq!(params.as_object().unwrap().len(), 15);
    }

    #[test]
    fn test_instances() {
        let db = build();
        assert_eq!(db.instances.len(), INSTANCE_COUNT);
        for id in &db.instances {
            let instance = db.stack.resource(id).unwrap();
            assert_eq!(instance.get("AutoMinorVersionUpgrade"), Some(&json!(true)));
        }
    }

    #[test]
    fn test_outputs_are_imports() {
        let db = build();
        assert_eq!(
            db.outputs.endpoint_hostname,
            json!({ "Fn::ImportValue": "sample-rds:ClusterEndpoint" })
        );
        assert_eq!(
            db.outputs.security_group_id,
            json!({ "Fn::ImportValue": "sample-rds:SecurityGroupId" })
        );
    }
}
