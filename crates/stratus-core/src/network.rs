//! Virtual network topology
//!
//! [`NetworkTopology`] owns the VPC and everything declared inside it:
//! subnets, the internet gateway, route tables and their associations, and
//! the optional NAT egress path. Only public subnets are associated with the
//! internet route table; without NAT egress, private subnets have no
//! default route at all.

use crate::addressing::{
    AddressPlanner, AvailabilityZoneSet, MIN_SUBNET_PREFIX, SubnetSpec, Tier, validate_plan,
};
use crate::error::{Result, TopologyError};
use crate::output::Output;
use crate::resource::{Declare, EntityRef, ResourceKind, Tags, named};
use crate::scope::Scope;
use ipnetwork::Ipv4Network;
use serde_json::{Value, json};
use std::net::Ipv4Addr;
use stratus_config::StackConfig;

/// Destination of every default route
pub const ANY_IPV4: &str = "0.0.0.0/0";

/// Declared shape of the VPC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub cidr_block: Ipv4Network,
    pub enable_dns_support: bool,
    pub enable_dns_hostnames: bool,
    pub tags: Tags,
}

impl NetworkSpec {
    /// Parse and check a VPC range: canonical IPv4 CIDR, no wider than it can be subnetted
    pub fn parse(cidr_block: &str) -> Result<Self> {
        let invalid = |reason: String| TopologyError::InvalidCidr {
            cidr: cidr_block.to_string(),
            reason,
        };
        let network: Ipv4Network = cidr_block
            .parse()
            .map_err(|e: ipnetwork::IpNetworkError| invalid(e.to_string()))?;
        if !cidr_block.contains('/') {
            return Err(invalid("prefix length is missing".to_string()));
        }
        if network.ip() != network.network() {
            return Err(invalid(format!(
                "host bits are set; did you mean {}/{}?",
                network.network(),
                network.prefix()
            )));
        }
        if network.prefix() > MIN_SUBNET_PREFIX {
            return Err(invalid(format!(
                "prefix /{} leaves no room for subnets (at most /{})",
                network.prefix(),
                MIN_SUBNET_PREFIX
            )));
        }
        Ok(Self {
            cidr_block: network,
            enable_dns_support: true,
            enable_dns_hostnames: true,
            tags: Tags::new(),
        })
    }

    pub fn from_config(config: &StackConfig) -> Result<Self> {
        let mut spec = Self::parse(&config.vpc_cidr)?;
        spec.enable_dns_support = config.enable_dns_support;
        spec.enable_dns_hostnames = config.enable_dns_hostnames;
        spec.tags = config.resource_tags();
        Ok(spec)
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

#[derive(Debug, Clone)]
pub struct NetworkHandle {
    pub entity: EntityRef,
    pub id: Output<String>,
    pub cidr_block: Ipv4Network,
}

#[derive(Debug, Clone)]
pub struct SubnetHandle {
    pub entity: EntityRef,
    pub id: Output<String>,
    pub spec: SubnetSpec,
}

impl SubnetHandle {
    pub fn tier(&self) -> Tier {
        self.spec.tier
    }
}

/// Subnets added by one call, split by tier
#[derive(Debug, Clone, Default)]
pub struct SubnetHandles {
    pub public: Vec<SubnetHandle>,
    pub private: Vec<SubnetHandle>,
}

#[derive(Debug, Clone)]
pub struct GatewayHandle {
    pub entity: EntityRef,
    pub id: Output<String>,
}

/// Where a route sends its traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    InternetGateway(Output<String>),
    NatGateway(Output<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub destination_cidr: Ipv4Network,
    pub target: RouteTarget,
}

impl RoutingRule {
    fn to_value(&self) -> Value {
        match &self.target {
            RouteTarget::InternetGateway(id) => json!({
                "cidrBlock": self.destination_cidr.to_string(),
                "gatewayId": id,
            }),
            RouteTarget::NatGateway(id) => json!({
                "cidrBlock": self.destination_cidr.to_string(),
                "natGatewayId": id,
            }),
        }
    }

    fn target_entity(&self) -> &EntityRef {
        match &self.target {
            RouteTarget::InternetGateway(id) | RouteTarget::NatGateway(id) => id.source(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteTableHandle {
    pub entity: EntityRef,
    pub id: Output<String>,
    /// Tier of the subnets this table may serve
    pub tier: Tier,
    pub routes: Vec<RoutingRule>,
}

/// A subnet bound to a route table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub entity: EntityRef,
    pub subnet: EntityRef,
    pub route_table: EntityRef,
}

struct Vpc<'a> {
    name: &'a str,
    spec: &'a NetworkSpec,
}

impl Declare for Vpc<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Vpc
    }

    fn name(&self) -> &str {
        self.name
    }

    fn properties(&self) -> Value {
        json!({
            "cidrBlock": self.spec.cidr_block.to_string(),
            "enableDnsSupport": self.spec.enable_dns_support,
            "enableDnsHostnames": self.spec.enable_dns_hostnames,
            "tags": named(&self.spec.tags, self.name),
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        Vec::new()
    }
}

struct Subnet<'a> {
    name: String,
    vpc: &'a NetworkHandle,
    spec: &'a SubnetSpec,
    tags: &'a Tags,
}

impl Declare for Subnet<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Subnet
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> Option<EntityRef> {
        Some(self.vpc.entity.clone())
    }

    fn properties(&self) -> Value {
        json!({
            "vpcId": self.vpc.id,
            "cidrBlock": self.spec.cidr_block.to_string(),
            "availabilityZone": self.spec.zone,
            "mapPublicIpOnLaunch": self.spec.auto_assign_public_ip,
            "tags": named(self.tags, &self.name),
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        vec![self.vpc.entity.clone()]
    }
}

struct InternetGateway<'a> {
    name: String,
    vpc: &'a NetworkHandle,
    tags: &'a Tags,
}

impl Declare for InternetGateway<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::InternetGateway
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> Option<EntityRef> {
        Some(self.vpc.entity.clone())
    }

    fn properties(&self) -> Value {
        json!({
            "vpcId": self.vpc.id,
            "tags": named(self.tags, &self.name),
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        vec![self.vpc.entity.clone()]
    }
}

struct RouteTable<'a> {
    name: String,
    vpc: &'a NetworkHandle,
    routes: &'a [RoutingRule],
    tags: &'a Tags,
}

impl Declare for RouteTable<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RouteTable
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> Option<EntityRef> {
        Some(self.vpc.entity.clone())
    }

    fn properties(&self) -> Value {
        let routes: Vec<Value> = self.routes.iter().map(RoutingRule::to_value).collect();
        json!({
            "vpcId": self.vpc.id,
            "routes": routes,
            "tags": named(self.tags, &self.name),
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        let mut dependencies = vec![self.vpc.entity.clone()];
        dependencies.extend(self.routes.iter().map(|r| r.target_entity().clone()));
        dependencies
    }
}

struct RouteTableAssociation<'a> {
    name: String,
    subnet: &'a SubnetHandle,
    table: &'a RouteTableHandle,
}

impl Declare for RouteTableAssociation<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RouteTableAssociation
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> Option<EntityRef> {
        Some(self.table.entity.clone())
    }

    fn properties(&self) -> Value {
        json!({
            "subnetId": self.subnet.id,
            "routeTableId": self.table.id,
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        vec![self.table.entity.clone(), self.subnet.entity.clone()]
    }
}

struct ElasticIp<'a> {
    name: String,
    vpc: &'a NetworkHandle,
    gateway: &'a GatewayHandle,
    tags: &'a Tags,
}

impl Declare for ElasticIp<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ElasticIp
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> Option<EntityRef> {
        Some(self.vpc.entity.clone())
    }

    fn properties(&self) -> Value {
        json!({
            "domain": "vpc",
            "tags": named(self.tags, &self.name),
        })
    }

    // An address in a VPC needs the gateway attached first.
    fn dependencies(&self) -> Vec<EntityRef> {
        vec![self.vpc.entity.clone(), self.gateway.entity.clone()]
    }
}

struct NatGateway<'a> {
    name: String,
    vpc: &'a NetworkHandle,
    subnet: &'a SubnetHandle,
    allocation_id: &'a Output<String>,
    tags: &'a Tags,
}

impl Declare for NatGateway<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::NatGateway
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> Option<EntityRef> {
        Some(self.vpc.entity.clone())
    }

    fn properties(&self) -> Value {
        json!({
            "subnetId": self.subnet.id,
            "allocationId": self.allocation_id,
            "tags": named(self.tags, &self.name),
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        vec![
            self.vpc.entity.clone(),
            self.subnet.entity.clone(),
            self.allocation_id.source().clone(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct NetworkTopology {
    name: String,
    tags: Tags,
    vpc: NetworkHandle,
    subnets: Vec<SubnetHandle>,
    internet_gateway: Option<GatewayHandle>,
    nat_gateway: Option<GatewayHandle>,
    public_route_table: Option<RouteTableHandle>,
    private_route_table: Option<RouteTableHandle>,
    associations: Vec<Association>,
}

impl NetworkTopology {
    /// Declare the VPC `<name>-vpc`
    pub fn create(scope: &mut Scope, name: &str, spec: NetworkSpec) -> Result<Self> {
        let vpc_name = format!("{}-vpc", name);
        let entity = scope.declare(&Vpc {
            name: &vpc_name,
            spec: &spec,
        })?;
        let vpc = NetworkHandle {
            id: scope.output(&entity, "id"),
            entity,
            cidr_block: spec.cidr_block,
        };
        Ok(Self {
            name: name.to_string(),
            tags: spec.tags,
            vpc,
            subnets: Vec::new(),
            internet_gateway: None,
            nat_gateway: None,
            public_route_table: None,
            private_route_table: None,
            associations: Vec::new(),
        })
    }

    pub fn vpc(&self) -> &NetworkHandle {
        &self.vpc
    }

    /// Plan one public and one private subnet per zone and declare them
    pub fn add_subnets(
        &mut self,
        scope: &mut Scope,
        zones: &AvailabilityZoneSet,
    ) -> Result<SubnetHandles> {
        let plan = AddressPlanner::new(self.vpc.cidr_block).allocate(zones, &Tier::ALL)?;
        self.add_subnet_plan(scope, plan)
    }

    /// Declare caller-planned subnets after checking them against every existing subnet
    pub fn add_subnet_plan(
        &mut self,
        scope: &mut Scope,
        plan: Vec<SubnetSpec>,
    ) -> Result<SubnetHandles> {
        let mut combined: Vec<SubnetSpec> = self.subnets.iter().map(|s| s.spec.clone()).collect();
        combined.extend(plan.iter().cloned());
        validate_plan(&self.vpc.cidr_block, &combined)?;

        let mut added = SubnetHandles::default();
        for spec in plan {
            let index = self.subnets.iter().filter(|s| s.tier() == spec.tier).count();
            let name = format!("{}-{}-subnet-{}", self.name, spec.tier, index);
            let entity = scope.declare(&Subnet {
                name,
                vpc: &self.vpc,
                spec: &spec,
                tags: &self.tags,
            })?;
            let handle = SubnetHandle {
                id: scope.output(&entity, "id"),
                entity,
                spec,
            };
            tracing::debug!(
                "Planned {} subnet {} in {}",
                handle.spec.tier,
                handle.spec.cidr_block,
                handle.spec.zone
            );
            match handle.tier() {
                Tier::Public => added.public.push(handle.clone()),
                Tier::Private => added.private.push(handle.clone()),
            }
            self.subnets.push(handle);
        }
        Ok(added)
    }

    pub fn attach_internet_gateway(&mut self, scope: &mut Scope) -> Result<GatewayHandle> {
        if self.internet_gateway.is_some() {
            return Err(TopologyError::InvalidTopology(format!(
                "{} already has an internet gateway",
                self.vpc.entity
            )));
        }
        let entity = scope.declare(&InternetGateway {
            name: format!("{}-igw", self.name),
            vpc: &self.vpc,
            tags: &self.tags,
        })?;
        let gateway = GatewayHandle {
            id: scope.output(&entity, "id"),
            entity,
        };
        self.internet_gateway = Some(gateway.clone());
        Ok(gateway)
    }

    /// Route table sending `0.0.0.0/0` to the internet gateway
    pub fn create_public_route_table(&mut self, scope: &mut Scope) -> Result<RouteTableHandle> {
        let Some(gateway) = &self.internet_gateway else {
            return Err(TopologyError::InvalidTopology(
                "the public route table needs an internet gateway".to_string(),
            ));
        };
        let route = RoutingRule {
            destination_cidr: any_ipv4()?,
            target: RouteTarget::InternetGateway(gateway.id.clone()),
        };
        let table = self.route_table(scope, Tier::Public, route)?;
        self.public_route_table = Some(table.clone());
        Ok(table)
    }

    fn route_table(
        &self,
        scope: &mut Scope,
        tier: Tier,
        route: RoutingRule,
    ) -> Result<RouteTableHandle> {
        let routes = vec![route];
        let entity = scope.declare(&RouteTable {
            name: format!("{}-{}-rt", self.name, tier),
            vpc: &self.vpc,
            routes: &routes,
            tags: &self.tags,
        })?;
        Ok(RouteTableHandle {
            id: scope.output(&entity, "id"),
            entity,
            tier,
            routes,
        })
    }

    /// Bind a subnet to a route table of its own tier
    pub fn associate(
        &mut self,
        scope: &mut Scope,
        subnet: &SubnetHandle,
        table: &RouteTableHandle,
    ) -> Result<Association> {
        if subnet.tier() != table.tier {
            return Err(TopologyError::InvalidTopology(format!(
                "{} subnet {} cannot use {} route table {}",
                subnet.tier(),
                subnet.entity,
                table.tier,
                table.entity
            )));
        }
        if self.associations.iter().any(|a| a.subnet == subnet.entity) {
            return Err(TopologyError::InvalidTopology(format!(
                "{} is already associated with a route table",
                subnet.entity
            )));
        }

        let index = self
            .associations
            .iter()
            .filter(|a| a.route_table == table.entity)
            .count();
        let entity = scope.declare(&RouteTableAssociation {
            name: format!("{}-{}-rt-assoc-{}", self.name, table.tier, index),
            subnet,
            table,
        })?;
        let association = Association {
            entity,
            subnet: subnet.entity.clone(),
            route_table: table.entity.clone(),
        };
        self.associations.push(association.clone());
        Ok(association)
    }

    /// Give private subnets outbound access through a NAT gateway in the first public subnet
    pub fn add_nat_egress(&mut self, scope: &mut Scope) -> Result<GatewayHandle> {
        let Some(igw) = self.internet_gateway.clone() else {
            return Err(TopologyError::InvalidTopology(
                "NAT egress needs an internet gateway".to_string(),
            ));
        };
        let Some(host) = self.subnets.iter().find(|s| s.tier() == Tier::Public).cloned() else {
            return Err(TopologyError::InvalidTopology(
                "NAT egress needs a public subnet".to_string(),
            ));
        };
        if self.nat_gateway.is_some() {
            return Err(TopologyError::InvalidTopology(format!(
                "{} already has NAT egress",
                self.vpc.entity
            )));
        }

        let eip = scope.declare(&ElasticIp {
            name: format!("{}-nat-eip", self.name),
            vpc: &self.vpc,
            gateway: &igw,
            tags: &self.tags,
        })?;
        let allocation_id = scope.output(&eip, "id");
        let entity = scope.declare(&NatGateway {
            name: format!("{}-nat", self.name),
            vpc: &self.vpc,
            subnet: &host,
            allocation_id: &allocation_id,
            tags: &self.tags,
        })?;
        let nat = GatewayHandle {
            id: scope.output(&entity, "id"),
            entity,
        };

        let route = RoutingRule {
            destination_cidr: any_ipv4()?,
            target: RouteTarget::NatGateway(nat.id.clone()),
        };
        let table = self.route_table(scope, Tier::Private, route)?;
        self.private_route_table = Some(table.clone());
        self.nat_gateway = Some(nat.clone());

        let private: Vec<SubnetHandle> = self.private_subnets().into_iter().cloned().collect();
        for subnet in &private {
            self.associate(scope, subnet, &table)?;
        }
        Ok(nat)
    }

    pub fn subnets(&self) -> &[SubnetHandle] {
        &self.subnets
    }

    pub fn public_subnets(&self) -> Vec<&SubnetHandle> {
        self.subnets.iter().filter(|s| s.tier() == Tier::Public).collect()
    }

    pub fn private_subnets(&self) -> Vec<&SubnetHandle> {
        self.subnets.iter().filter(|s| s.tier() == Tier::Private).collect()
    }

    pub fn internet_gateway(&self) -> Option<&GatewayHandle> {
        self.internet_gateway.as_ref()
    }

    pub fn nat_gateway(&self) -> Option<&GatewayHandle> {
        self.nat_gateway.as_ref()
    }

    pub fn public_route_table(&self) -> Option<&RouteTableHandle> {
        self.public_route_table.as_ref()
    }

    pub fn private_route_table(&self) -> Option<&RouteTableHandle> {
        self.private_route_table.as_ref()
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Route table a subnet is associated with, if any
    pub fn route_table_for(&self, subnet: &EntityRef) -> Option<&RouteTableHandle> {
        let association = self.associations.iter().find(|a| &a.subnet == subnet)?;
        [&self.public_route_table, &self.private_route_table]
            .into_iter()
            .flatten()
            .find(|t| t.entity == association.route_table)
    }
}

pub(crate) fn any_ipv4() -> Result<Ipv4Network> {
    Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).map_err(|e| TopologyError::InvalidCidr {
        cidr: ANY_IPV4.to_string(),
        reason: e.to_string(),
    })
}
