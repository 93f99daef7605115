//! Worker capacity: a managed node group and a self-managed auto-scaling
//! group, both in the public subnets.

use cfn_template::{intrinsic, LogicalId, Resource, Stack};
use serde_json::{json, Value};
use tracing::debug;

use super::{iam, ingress, KUBERNETES_VERSION};
use crate::config::AppConfig;
use crate::error::Result;

/// Policies every worker role carries.
const WORKER_POLICIES: [&str; 3] = [
    "AmazonEKSWorkerNodePolicy",
    "AmazonEKS_CNI_Policy",
    "AmazonEC2ContainerRegistryReadOnly",
];

/// Extra policies on the managed node group role (session manager access and
/// image pushes from the nodes).
const NODEGROUP_EXTRA_POLICIES: [&str; 2] = [
    "service-role/AmazonEC2RoleforSSM",
    "AmazonEC2ContainerRegistryPowerUser",
];

/// Processes suspended while the group is rolled.
const SUSPENDED_PROCESSES: [&str; 5] = [
    "HealthCheck",
    "ReplaceUnhealthy",
    "AZRebalance",
    "AlarmNotification",
    "ScheduledActions",
];

/// SSM parameter holding the EKS optimized AMI for the cluster version.
#[must_use]
pub fn eks_ami_parameter() -> String {
    format!("/aws/service/eks/optimized-ami/{KUBERNETES_VERSION}/amazon-linux-2/recommended/image_id")
}

/// What the capacity needs from the rest of the cluster stack.
pub struct CapacityProps<'a> {
    pub config: &'a AppConfig,
    pub cluster: &'a LogicalId,
    pub vpc_id: &'a Value,
    pub subnets: &'a [Value],
    pub cluster_security_group: &'a Value,
}

/// Resources making up the worker capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capacity {
    pub nodegroup: LogicalId,
    pub nodegroup_role: LogicalId,
    pub auto_scaling_group: LogicalId,
    pub instance_role: LogicalId,
    pub instance_profile: LogicalId,
    pub launch_configuration: LogicalId,
    pub security_group: LogicalId,
}

/// Add both kinds of worker capacity to `stack`.
///
/// # Errors
///
/// Returns an error on template bookkeeping or serialization failures.
pub fn add_capacity(stack: &mut Stack, props: &CapacityProps<'_>) -> Result<Capacity> {
    let config = props.config;
    let app = &config.app_name;
    let cluster_name = config.cluster_name();

    let nodegroup_name = format!("{app}-capacity");
    let policies: Vec<&str> = WORKER_POLICIES
        .iter()
        .chain(&NODEGROUP_EXTRA_POLICIES)
        .copied()
        .collect();
    let nodegroup_role = stack.add(
        &[&cluster_name, &nodegroup_name, "NodeGroupRole", "Resource"],
        iam::role(iam::service_principal("ec2.amazonaws.com"), &policies)?,
    )?;
    let nodegroup = stack.add(
        &[&cluster_name, &nodegroup_name, "Resource"],
        Resource::new("AWS::EKS::Nodegroup").properties(json!({
            "ClusterName": props.cluster.reference(),
            "NodegroupName": nodegroup_name,
            "NodeRole": nodegroup_role.get_att("Arn"),
            "Subnets": props.subnets,
            "InstanceTypes": [config.instance_type],
            "ScalingConfig": {
                "DesiredSize": config.min_capacity,
                "MinSize": config.min_capacity,
                "MaxSize": config.min_capacity,
            },
            "ForceUpdateEnabled": true,
        })),
    )?;

    let asg_construct = format!("{app}-nodes");
    let asg_label = format!("{}/{cluster_name}/{asg_construct}", stack.name());
    let owned_tag = format!("kubernetes.io/cluster/{cluster_name}");

    let security_group = stack.add(
        &[&cluster_name, &asg_construct, "InstanceSecurityGroup"],
        Resource::new("AWS::EC2::SecurityGroup")
            .properties(json!({
                "GroupDescription": asg_label,
                "SecurityGroupEgress": [{
                    "CidrIp": "0.0.0.0/0",
                    "Description": "Allow all outbound traffic by default",
                    "IpProtocol": "-1",
                }],
                "VpcId": props.vpc_id,
            }))
            .tag("Name", &asg_label)
            .tag(&owned_tag, "owned"),
    )?;
    let node_group_id = security_group.get_att("GroupId");
    stack.add(
        &[&cluster_name, &asg_construct, "InstanceSecurityGroup", "FromSelf"],
        ingress(&node_group_id, &node_group_id, "-1", None, "Node to node traffic"),
    )?;
    stack.add(
        &[&cluster_name, &asg_construct, "InstanceSecurityGroup", "FromClusterHttps"],
        ingress(
            &node_group_id,
            props.cluster_security_group,
            "tcp",
            Some((443, 443)),
            "Control plane to kubelet API",
        ),
    )?;
    stack.add(
        &[&cluster_name, &asg_construct, "InstanceSecurityGroup", "FromClusterHighPorts"],
        ingress(
            &node_group_id,
            props.cluster_security_group,
            "tcp",
            Some((1025, 65535)),
            "Control plane to node ports",
        ),
    )?;

    let instance_role = stack.add(
        &[&cluster_name, &asg_construct, "InstanceRole", "Resource"],
        iam::role(iam::service_principal("ec2.amazonaws.com"), &WORKER_POLICIES)?,
    )?;
    let instance_profile = stack.add(
        &[&cluster_name, &asg_construct, "InstanceProfile"],
        Resource::new("AWS::IAM::InstanceProfile")
            .property("Roles", json!([instance_role.reference()])),
    )?;

    let user_data = intrinsic::base64(intrinsic::join(
        "",
        vec![
            json!("#!/bin/bash\nset -o xtrace\n/etc/eks/bootstrap.sh "),
            props.cluster.reference(),
            json!(" --kubelet-extra-args \"--node-labels lifecycle=OnDemand\"\n"),
        ],
    ));
    let launch_configuration = stack.add(
        &[&cluster_name, &asg_construct, "LaunchConfig"],
        Resource::new("AWS::AutoScaling::LaunchConfiguration")
            .properties(json!({
                "ImageId": intrinsic::ssm_parameter(&eks_ami_parameter()),
                "InstanceType": config.instance_type,
                "IamInstanceProfile": instance_profile.reference(),
                "SecurityGroups": [node_group_id],
                "UserData": user_data,
            }))
            .depends_on(&instance_role),
    )?;

    let asg_name = format!("{app}-EKS-ASG");
    let auto_scaling_group = stack.add(
        &[&cluster_name, &asg_construct, "ASG"],
        Resource::new("AWS::AutoScaling::AutoScalingGroup")
            .properties(json!({
                "AutoScalingGroupName": asg_name,
                "MinSize": config.min_capacity.to_string(),
                "MaxSize": config.max_capacity.to_string(),
                "LaunchConfigurationName": launch_configuration.reference(),
                "VPCZoneIdentifier": props.subnets,
                "Tags": [
                    {
                        "Key": "Name",
                        "PropagateAtLaunch": true,
                        "Value": asg_label,
                    },
                    {
                        "Key": owned_tag,
                        "PropagateAtLaunch": true,
                        "Value": "owned",
                    },
                ],
            }))
            .update_policy(rolling_update()),
    )?;

    debug!(
        nodegroup = %nodegroup,
        auto_scaling_group = %auto_scaling_group,
        "Added worker capacity"
    );

    Ok(Capacity {
        nodegroup,
        nodegroup_role,
        auto_scaling_group,
        instance_role,
        instance_profile,
        launch_configuration,
        security_group,
    })
}

/// Replace instances in batches, without waiting for signals.
fn rolling_update() -> Value {
    json!({
        "AutoScalingRollingUpdate": {
            "WaitOnResourceSignals": false,
            "PauseTime": "PT0S",
            "SuspendProcesses": SUSPENDED_PROCESSES,
        },
        "AutoScalingScheduledAction": {
            "IgnoreUnmodifiedGroupSizeProperties": true,
        },
    })
}
