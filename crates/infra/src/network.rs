//! Network stack: an isolated VPC with one public and one isolated subnet
//! group.
//!
//! There is no NAT capacity. Public subnets route to an internet gateway and
//! carry the tags the EKS control plane uses to discover subnets for
//! internet-facing load balancers. Isolated subnets have no default route
//! and host the database.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use cfn_template::{intrinsic, LogicalId, Resource, Stack};
use serde_json::{json, Value};
use tracing::info;

use crate::config::{AppConfig, APPLICATION_TAG};
use crate::error::Result;

/// Address block of the VPC.
pub const VPC_CIDR: &str = "192.168.0.0/16";

/// Network address of [`VPC_CIDR`].
const VPC_BASE: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 0);

/// Mask of every subnet.
pub const SUBNET_MASK: u8 = 24;

/// Availability zones spanned by each subnet group.
pub const AVAILABILITY_ZONES: usize = 2;

/// NAT gateways provisioned (none: isolated subnets have no egress).
pub const NAT_GATEWAYS: u32 = 0;

/// Tag key that marks a subnet as usable for ELBs.
pub const ELB_ROLE_TAG: &str = "kubernetes.io/role/elb";

/// Subnet visibility class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetKind {
    /// Routed to the internet gateway.
    Public,
    /// No route out of the VPC.
    Isolated,
}

impl SubnetKind {
    /// Label used in subnet names and export names.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::Isolated => "Isolated",
        }
    }
}

/// One subnet of a group.
#[derive(Debug, Clone, PartialEq)]
pub struct Subnet {
    pub logical_id: LogicalId,
    pub cidr: String,
    /// Index into the region's availability zone list.
    pub zone_index: usize,
    pub tags: BTreeMap<String, String>,
}

/// A named collection of subnets sharing a visibility class.
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetGroup {
    pub name: String,
    pub kind: SubnetKind,
    pub cidr_mask: u8,
    pub subnets: Vec<Subnet>,
}

/// Import tokens downstream stacks use to reference the network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkOutputs {
    pub vpc_id: Value,
    pub public_subnet_ids: Vec<Value>,
    pub isolated_subnet_ids: Vec<Value>,
}

/// The synthesized network stack.
#[derive(Debug, Clone)]
pub struct NetworkStack {
    pub stack: Stack,
    pub cidr: String,
    pub nat_gateways: u32,
    pub vpc_id: LogicalId,
    pub public: SubnetGroup,
    pub isolated: SubnetGroup,
    pub outputs: NetworkOutputs,
}

/// Tags the orchestration layer requires on public subnets.
#[must_use]
pub fn cluster_discovery_tags(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            format!("kubernetes.io/cluster/{cluster_name}"),
            "shared".to_string(),
        ),
        (ELB_ROLE_TAG.to_string(), "1".to_string()),
    ])
}

/// The `index`-th subnet of size `/mask` carved out of `base`.
fn subnet_cidr(base: Ipv4Addr, mask: u8, index: u32) -> String {
    let size = 1u32 << (32 - u32::from(mask));
    let network = Ipv4Addr::from(u32::from(base) + index * size);
    format!("{network}/{mask}")
}

impl NetworkStack {
    /// Build the network stack for the configured application.
    ///
    /// # Errors
    ///
    /// Returns an error only on template bookkeeping failures.
    pub fn build(config: &AppConfig) -> Result<Self> {
        let stack_name = config.network_stack_name();
        let vpc_name = format!("{}-vpc", config.app_name);
        let mut stack = Stack::new(&stack_name, &config.deploy_region)
            .with_description(format!("Network for {}", config.app_name))
            .with_tag(APPLICATION_TAG, &config.app_name);

        let name_tag = format!("{stack_name}/{vpc_name}");
        let vpc_id = stack.add(
            &[&vpc_name],
            Resource::new("AWS::EC2::VPC")
                .properties(json!({
                    "CidrBlock": VPC_CIDR,
                    "EnableDnsHostnames": true,
                    "EnableDnsSupport": true,
                    "InstanceTenancy": "default",
                }))
                .tag("Name", &name_tag),
        )?;

        let gateway_id = stack.add(
            &[&vpc_name, "IGW"],
            Resource::new("AWS::EC2::InternetGateway").tag("Name", &name_tag),
        )?;
        let attachment_id = stack.add(
            &[&vpc_name, "VPCGW"],
            Resource::new("AWS::EC2::VPCGatewayAttachment").properties(json!({
                "VpcId": vpc_id.reference(),
                "InternetGatewayId": gateway_id.reference(),
            })),
        )?;

        let mut allocator = 0u32;
        let mut layout = GroupLayout {
            stack: &mut stack,
            stack_name: &stack_name,
            vpc_name: &vpc_name,
            vpc_id: &vpc_id,
            gateway: (&gateway_id, &attachment_id),
            next_index: &mut allocator,
        };

        let public = layout.add_group(
            &format!("{}-app", config.app_name),
            SubnetKind::Public,
            &cluster_discovery_tags(&config.cluster_name()),
        )?;
        let isolated = layout.add_group(
            &format!("{}-rds", config.app_name),
            SubnetKind::Isolated,
            &BTreeMap::new(),
        )?;

        let outputs = NetworkOutputs {
            vpc_id: stack.export("VpcId", vpc_id.reference())?,
            public_subnet_ids: export_subnets(&mut stack, &public)?,
            isolated_subnet_ids: export_subnets(&mut stack, &isolated)?,
        };

        info!(
            stack = %stack_name,
            public_subnets = public.subnets.len(),
            isolated_subnets = isolated.subnets.len(),
            "Built network stack"
        );

        Ok(Self {
            stack,
            cidr: VPC_CIDR.to_string(),
            nat_gateways: NAT_GATEWAYS,
            vpc_id,
            public,
            isolated,
            outputs,
        })
    }

    /// Both subnet groups, public first.
    #[must_use]
    pub fn groups(&self) -> [&SubnetGroup; 2] {
        [&self.public, &self.isolated]
    }
}

fn export_subnets(stack: &mut Stack, group: &SubnetGroup) -> Result<Vec<Value>> {
    group
        .subnets
        .iter()
        .enumerate()
        .map(|(n, subnet)| {
            let name = format!("{}Subnet{}Id", group.kind.label(), n + 1);
            Ok(stack.export(&name, subnet.logical_id.reference())?)
        })
        .collect()
}

/// Mutable state shared while laying out subnet groups.
struct GroupLayout<'a> {
    stack: &'a mut Stack,
    stack_name: &'a str,
    vpc_name: &'a str,
    vpc_id: &'a LogicalId,
    gateway: (&'a LogicalId, &'a LogicalId),
    next_index: &'a mut u32,
}

impl GroupLayout<'_> {
    fn add_group(
        &mut self,
        group_name: &str,
        kind: SubnetKind,
        extra_tags: &BTreeMap<String, String>,
    ) -> Result<SubnetGroup> {
        let mut subnets = Vec::with_capacity(AVAILABILITY_ZONES);

        for zone_index in 0..AVAILABILITY_ZONES {
            let construct = format!("{group_name}Subnet{}", zone_index + 1);
            let path = [self.vpc_name, construct.as_str()];
            let name_tag = format!("{}/{}/{construct}", self.stack_name, self.vpc_name);
            let cidr = subnet_cidr(VPC_BASE, SUBNET_MASK, *self.next_index);
            *self.next_index += 1;

            let mut tags = BTreeMap::from([
                ("Name".to_string(), name_tag.clone()),
                ("aws-cdk:subnet-name".to_string(), group_name.to_string()),
                ("aws-cdk:subnet-type".to_string(), kind.label().to_string()),
            ]);
            tags.extend(extra_tags.iter().map(|(k, v)| (k.clone(), v.clone())));

            let subnet_id = self.stack.add(
                &[path[0], path[1], "Subnet"],
                Resource::new("AWS::EC2::Subnet")
                    .properties(json!({
                        "CidrBlock": cidr,
                        "VpcId": self.vpc_id.reference(),
                        "AvailabilityZone": intrinsic::select(zone_index, intrinsic::get_azs()),
                        "MapPublicIpOnLaunch": kind == SubnetKind::Public,
                    }))
                    .tags(&tags),
            )?;

            let route_table_id = self.stack.add(
                &[path[0], path[1], "RouteTable"],
                Resource::new("AWS::EC2::RouteTable")
                    .property("VpcId", self.vpc_id.reference())
                    .tag("Name", &name_tag),
            )?;
            self.stack.add(
                &[path[0], path[1], "RouteTableAssociation"],
                Resource::new("AWS::EC2::SubnetRouteTableAssociation").properties(json!({
                    "RouteTableId": route_table_id.reference(),
                    "SubnetId": subnet_id.reference(),
                })),
            )?;

            if kind == SubnetKind::Public {
                let (gateway_id, attachment_id) = self.gateway;
                self.stack.add(
                    &[path[0], path[1], "DefaultRoute"],
                    Resource::new("AWS::EC2::Route")
                        .properties(json!({
                            "RouteTableId": route_table_id.reference(),
                            "DestinationCidrBlock": "0.0.0.0/0",
                            "GatewayId": gateway_id.reference(),
                        }))
                        .depends_on(attachment_id),
                )?;
            }

            subnets.push(Subnet {
                logical_id: subnet_id,
                cidr,
                zone_index,
                tags,
            });
        }

        Ok(SubnetGroup {
            name: group_name.to_string(),
            kind,
            cidr_mask: SUBNET_MASK,
            subnets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> NetworkStack {
        NetworkStack::build(&AppConfig::default()).unwrap()
    }

    #[test]
    fn test_subnet_cidr_allocation() {
        assert_eq!(subnet_cidr(VPC_BASE, 24, 0), "192.168.0.0/24");
        assert_eq!(subnet_cidr(VPC_BASE, 24, 3), "192.168.3.0/24");
        assert_eq!(subnet_cidr(VPC_BASE, 20, 1), "192.168.16.0/20");
    }

    #[test]
    fn test_one_public_one_isolated_group() {
        let network = build();
        let kinds: Vec<SubnetKind> = network.groups().iter().map(|g| g.kind).collect();
        assert_eq!(kinds, vec![SubnetKind::Public, SubnetKind::Isolated]);
        assert_eq!(network.public.name, "sample-app");
        assert_eq!(network.isolated.name, "sample-rds");
        assert!(network.groups().iter().all(|g| g.cidr_mask == 24));
        assert_eq!(network.nat_gateways, 0);
        assert_eq!(network.cidr, "192.168.0.0/16");
    }

    #[test]
    fn test_subnets_do_not_overlap() {
        let network = build();
        let cidrs: Vec<&str> = network
            .groups()
            .iter()
            .flat_map(|g| g.subnets.iter().map(|s| s.cidr.as_str()))
            .collect();
        assert_eq!(
            cidrs,
            vec![
                "192.168.0.0/24",
                "192.168.1.0/24",
                "192.168.2.0/24",
                "192.168.3.0/24"
            ]
        );
    }

    #[test]
    fn test_public_subnets_carry_discovery_tags() {
        let network = build();
        for subnet in &network.public.subnets {
            let resource = network.stack.resource(&subnet.logical_id).unwrap();
            assert_eq!(
                resource.tag_value("kubernetes.io/cluster/sample-cluster"),
                Some("shared")
            );
            assert_eq!(resource.tag_value(ELB_ROLE_TAG), Some("1"));
            assert_eq!(resource.get("MapPublicIpOnLaunch"), Some(&json!(true)));
        }
        for subnet in &network.isolated.subnets {
            let resource = network.stack.resource(&subnet.logical_id).unwrap();
            assert_eq!(resource.tag_value(ELB_ROLE_TAG), None);
        }
    }

    #[test]
    fn test_no_nat_and_only_public_routes() {
        let network = build();
        assert_eq!(
            network
                .stack
                .resources_of_type("AWS::EC2::NatGateway")
                .count(),
            0
        );
        assert_eq!(
            network.stack.resources_of_type("AWS::EC2::Route").count(),
            AVAILABILITY_ZONES
        );
        assert_eq!(network.stack.resources_of_type("AWS::EC2::VPC").count(), 1);
    }

    #[test]
    fn test_exports() {
        let network = build();
        assert_eq!(
            network.outputs.vpc_id,
            json!({ "Fn::ImportValue": "sample-vpc:VpcId" })
        );
        assert_eq!(
            network.outputs.isolated_subnet_ids[1],
            json!({ "Fn::ImportValue": "sample-vpc:IsolatedSubnet2Id" })
        );
        assert_eq!(network.outputs.public_subnet_ids.len(), AVAILABILITY_ZONES);
    }
}
