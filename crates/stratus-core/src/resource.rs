//! Resource kinds and the declaration capability

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use stratus_cloud::{REPLACE_ON_ANY, ResourceConfig};

/// Tag mapping attached to every taggable resource
pub type Tags = BTreeMap<String, String>;

/// Kinds of resource the core declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Vpc,
    Subnet,
    InternetGateway,
    ElasticIp,
    NatGateway,
    RouteTable,
    RouteTableAssociation,
    SecurityGroup,
    LoadBalancer,
    TargetGroup,
    Listener,
    Cluster,
    TaskDefinition,
    Service,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::InternetGateway => "internet-gateway",
            Self::ElasticIp => "elastic-ip",
            Self::NatGateway => "nat-gateway",
            Self::RouteTable => "route-table",
            Self::RouteTableAssociation => "route-table-association",
            Self::SecurityGroup => "security-group",
            Self::LoadBalancer => "load-balancer",
            Self::TargetGroup => "target-group",
            Self::Listener => "listener",
            Self::Cluster => "cluster",
            Self::TaskDefinition => "task-definition",
            Self::Service => "service",
        }
    }

    /// Properties that cannot change on a live resource
    pub fn immutable_properties(&self) -> &'static [&'static str] {
        match self {
            Self::Vpc => &["cidrBlock"],
            Self::Subnet => &["vpcId", "cidrBlock", "availabilityZone"],
            Self::InternetGateway => &["vpcId"],
            Self::ElasticIp => &["domain"],
            Self::NatGateway => &["subnetId", "allocationId"],
            Self::RouteTable => &["vpcId"],
            Self::RouteTableAssociation => &["subnetId"],
            Self::SecurityGroup => &["name", "description", "vpcId"],
            Self::LoadBalancer => &["name", "loadBalancerType", "internal"],
            Self::TargetGroup => &["name", "port", "protocol", "targetType", "vpcId"],
            Self::Listener => &["loadBalancerArn"],
            Self::Cluster => &["name"],
            // Task definitions are immutable revisions.
            Self::TaskDefinition => &[REPLACE_ON_ANY],
            Self::Service => &["name", "cluster", "launchType"],
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a declared entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl EntityRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Resource key used by the engine and the state file (kind:name)
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Everything the engine needs to know about one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub entity: EntityRef,
    pub owner: Option<EntityRef>,
    pub dependencies: Vec<EntityRef>,
    pub replace_on: Vec<String>,
    /// Property set; outputs of other entities appear as placeholders
    pub properties: Value,
}

impl Descriptor {
    pub fn to_resource_config(&self) -> ResourceConfig {
        let mut config = ResourceConfig::new(
            self.entity.kind.as_str(),
            self.entity.name.clone(),
            self.properties.clone(),
        );
        if let Some(owner) = &self.owner {
            config = config.with_parent(owner.key());
        }
        for dependency in &self.dependencies {
            config = config.with_dependency(dependency.key());
        }
        for key in &self.replace_on {
            config = config.with_replace_on(key.clone());
        }
        config
    }
}

/// Flat capability every entity implements instead of a lifecycle hierarchy
pub trait Declare {
    fn kind(&self) -> ResourceKind;

    fn name(&self) -> &str;

    /// Entity this one is destroyed together with
    fn owner(&self) -> Option<EntityRef> {
        None
    }

    fn properties(&self) -> Value;

    /// Every entity this one must be created after, the owner included
    fn dependencies(&self) -> Vec<EntityRef>;

    fn replace_on(&self) -> Vec<String> {
        self.kind()
            .immutable_properties()
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    fn entity(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.name())
    }

    fn declare(&self) -> Descriptor {
        Descriptor {
            entity: self.entity(),
            owner: self.owner(),
            dependencies: self.dependencies(),
            replace_on: self.replace_on(),
            properties: self.properties(),
        }
    }
}

/// Stack tags plus a `Name` tag for the resource
pub(crate) fn named(tags: &Tags, name: &str) -> Tags {
    let mut tags = tags.clone();
    tags.insert("Name".to_string(), name.to_string());
    tags
}
