//! Layered security groups
//!
//! Groups form a strict chain. The load balancer tier accepts traffic from
//! the internet; every later tier accepts traffic only from the group
//! directly before it, by group reference and never by CIDR.

use crate::error::{Result, TopologyError};
use crate::network::{NetworkHandle, any_ipv4};
use crate::output::Output;
use crate::resource::{Declare, EntityRef, ResourceKind, Tags, named};
use crate::scope::Scope;
use ipnetwork::Ipv4Network;
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    All,
}

impl Protocol {
    /// Name the provider expects; `-1` stands for every protocol
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::All => "-1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            from: port,
            to: port,
        }
    }

    /// Range used with [`Protocol::All`]
    pub fn any() -> Self {
        Self { from: 0, to: 0 }
    }
}

/// Where permitted traffic comes from (ingress) or goes to (egress)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSource {
    Cidr(Ipv4Network),
    Group(Output<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRule {
    pub direction: Direction,
    pub protocol: Protocol,
    pub ports: PortRange,
    pub source: RuleSource,
}

impl SecurityRule {
    pub fn new(
        direction: Direction,
        protocol: Protocol,
        ports: PortRange,
        source: RuleSource,
    ) -> Result<Self> {
        if ports.from > ports.to {
            return Err(TopologyError::InvalidSecurityRule(format!(
                "port range {}-{} is reversed",
                ports.from, ports.to
            )));
        }
        if protocol == Protocol::All && ports != PortRange::any() {
            return Err(TopologyError::InvalidSecurityRule(
                "rules for every protocol cannot name ports".to_string(),
            ));
        }
        if protocol != Protocol::All && ports.from == 0 {
            return Err(TopologyError::InvalidSecurityRule(format!(
                "{} rules need a port above 0",
                protocol.as_str()
            )));
        }
        Ok(Self {
            direction,
            protocol,
            ports,
            source,
        })
    }

    /// TCP on one port from `source`
    pub fn tcp_ingress(port: u16, source: RuleSource) -> Result<Self> {
        Self::new(
            Direction::Ingress,
            Protocol::Tcp,
            PortRange::single(port),
            source,
        )
    }

    /// Everything out to anywhere
    pub fn open_egress() -> Result<Self> {
        Self::new(
            Direction::Egress,
            Protocol::All,
            PortRange::any(),
            RuleSource::Cidr(any_ipv4()?),
        )
    }

    fn to_value(&self) -> Value {
        let mut rule = json!({
            "protocol": self.protocol.as_str(),
            "fromPort": self.ports.from,
            "toPort": self.ports.to,
        });
        match &self.source {
            RuleSource::Cidr(cidr) => rule["cidrBlocks"] = json!([cidr.to_string()]),
            RuleSource::Group(id) => rule["securityGroups"] = json!([id]),
        }
        rule
    }
}

/// Position of a group in the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityTier {
    LoadBalancer,
    Application,
    /// A tier added behind the application, e.g. a cache or database tier
    Downstream(String),
}

impl SecurityTier {
    pub fn label(&self) -> &str {
        match self {
            Self::LoadBalancer => "alb",
            Self::Application => "app",
            Self::Downstream(name) => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupHandle {
    pub entity: EntityRef,
    pub id: Output<String>,
    pub tier: SecurityTier,
    pub ingress: Vec<SecurityRule>,
    pub egress: Vec<SecurityRule>,
}

impl GroupHandle {
    /// Whether any ingress rule admits a CIDR range rather than a group
    pub fn admits_cidr(&self) -> bool {
        self.ingress
            .iter()
            .any(|r| matches!(r.source, RuleSource::Cidr(_)))
    }
}

struct SecurityGroup<'a> {
    name: String,
    description: String,
    vpc: &'a NetworkHandle,
    ingress: &'a [SecurityRule],
    egress: &'a [SecurityRule],
    tags: &'a Tags,
}

impl Declare for SecurityGroup<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::SecurityGroup
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn properties(&self) -> Value {
        let ingress: Vec<Value> = self.ingress.iter().map(SecurityRule::to_value).collect();
        let egress: Vec<Value> = self.egress.iter().map(SecurityRule::to_value).collect();
        json!({
            "name": self.name,
            "description": self.description,
            "vpcId": self.vpc.id,
            "ingress": ingress,
            "egress": egress,
            "tags": named(self.tags, &self.name),
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        let mut dependencies = vec![self.vpc.entity.clone()];
        for rule in self.ingress.iter().chain(self.egress) {
            if let RuleSource::Group(id) = &rule.source {
                if !dependencies.contains(id.source()) {
                    dependencies.push(id.source().clone());
                }
            }
        }
        dependencies
    }
}

#[derive(Debug, Clone)]
pub struct SecurityBoundary {
    name: String,
    vpc: NetworkHandle,
    tags: Tags,
    chain: Vec<GroupHandle>,
}

impl SecurityBoundary {
    pub fn new(name: &str, vpc: &NetworkHandle, tags: &Tags) -> Self {
        Self {
            name: name.to_string(),
            vpc: vpc.clone(),
            tags: tags.clone(),
            chain: Vec::new(),
        }
    }

    /// First link: `listener_port` over TCP from anywhere
    pub fn create_alb_group(&mut self, scope: &mut Scope, listener_port: u16) -> Result<GroupHandle> {
        if !self.chain.is_empty() {
            return Err(TopologyError::InvalidSecurityRule(
                "the load balancer group must be the first link of the chain".to_string(),
            ));
        }
        let ingress = vec![SecurityRule::tcp_ingress(
            listener_port,
            RuleSource::Cidr(any_ipv4()?),
        )?];
        self.declare_group(
            scope,
            SecurityTier::LoadBalancer,
            "Allow HTTP internet access",
            ingress,
        )
    }

    /// Second link: `target_port` over TCP from the load balancer group only
    pub fn create_app_group(
        &mut self,
        scope: &mut Scope,
        alb_group: &GroupHandle,
        target_port: u16,
    ) -> Result<GroupHandle> {
        if alb_group.tier != SecurityTier::LoadBalancer {
            return Err(TopologyError::InvalidSecurityRule(format!(
                "{} is not a load balancer group",
                alb_group.entity
            )));
        }
        self.link(
            scope,
            alb_group,
            SecurityTier::Application,
            target_port,
            "Allow traffic from the load balancer",
        )
    }

    /// Add a tier behind the current tail, admitting `port` from the tail only
    pub fn extend_chain(&mut self, scope: &mut Scope, tier: &str, port: u16) -> Result<GroupHandle> {
        let Some(tail) = self.chain.last().cloned() else {
            return Err(TopologyError::InvalidSecurityRule(
                "the chain has no load balancer group yet".to_string(),
            ));
        };
        let description = format!("Allow traffic from the {} tier", tail.tier.label());
        self.link(
            scope,
            &tail,
            SecurityTier::Downstream(tier.to_string()),
            port,
            &description,
        )
    }

    fn link(
        &mut self,
        scope: &mut Scope,
        upstream: &GroupHandle,
        tier: SecurityTier,
        port: u16,
        description: &str,
    ) -> Result<GroupHandle> {
        match self.chain.last() {
            Some(tail) if tail.entity == upstream.entity => {}
            _ => {
                return Err(TopologyError::InvalidSecurityRule(format!(
                    "{} tier must follow the last tier of the chain, not {}",
                    tier.label(),
                    upstream.entity
                )));
            }
        }
        if self.chain.iter().any(|g| g.tier == tier) {
            return Err(TopologyError::InvalidSecurityRule(format!(
                "{} tier already exists",
                tier.label()
            )));
        }
        let ingress = vec![SecurityRule::tcp_ingress(
            port,
            RuleSource::Group(upstream.id.clone()),
        )?];
        self.declare_group(scope, tier, description, ingress)
    }

    fn declare_group(
        &mut self,
        scope: &mut Scope,
        tier: SecurityTier,
        description: &str,
        ingress: Vec<SecurityRule>,
    ) -> Result<GroupHandle> {
        let egress = vec![SecurityRule::open_egress()?];
        let entity = scope.declare(&SecurityGroup {
            name: format!("{}-{}-sg", self.name, tier.label()),
            description: description.to_string(),
            vpc: &self.vpc,
            ingress: &ingress,
            egress: &egress,
            tags: &self.tags,
        })?;
        let group = GroupHandle {
            id: scope.output(&entity, "id"),
            entity,
            tier,
            ingress,
            egress,
        };
        self.chain.push(group.clone());
        Ok(group)
    }

    /// Groups from the internet-facing tier inwards
    pub fn chain(&self) -> &[GroupHandle] {
        &self.chain
    }

    /// Check every link admits only the group directly upstream of it
    pub fn verify_chain(&self) -> Result<()> {
        for pair in self.chain.windows(2) {
            let (upstream, group) = (&pair[0], &pair[1]);
            for rule in group.ingress.iter() {
                match &rule.source {
                    RuleSource::Group(id) if id.source() == &upstream.entity => {}
                    RuleSource::Group(id) => {
                        return Err(TopologyError::InvalidSecurityRule(format!(
                            "{} admits {}, which is not the adjacent upstream tier",
                            group.entity,
                            id.source()
                        )));
                    }
                    RuleSource::Cidr(cidr) => {
                        return Err(TopologyError::InvalidSecurityRule(format!(
                            "{} admits CIDR {}; only the upstream group may reach it",
                            group.entity, cidr
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetworkSpec, NetworkTopology};

    fn boundary(scope: &mut Scope) -> SecurityBoundary {
        let spec = NetworkSpec::parse("10.0.0.0/16").unwrap();
        let network = NetworkTopology::create(scope, "demo", spec).unwrap();
        SecurityBoundary::new("demo", network.vpc(), &Tags::new())
    }

    #[test]
    fn test_alb_and_app_groups() {
        let mut scope = Scope::new();
        let mut security = boundary(&mut scope);
        let alb = security.create_alb_group(&mut scope, 80).unwrap();
        let app = security.create_app_group(&mut scope, &alb, 8000).unwrap();

        assert!(alb.admits_cidr());
        assert_eq!(alb.ingress[0].ports, PortRange::single(80));
        assert!(!app.admits_cidr());
        assert_eq!(app.ingress[0].source, RuleSource::Group(alb.id.clone()));
        assert_eq!(app.ingress[0].ports, PortRange::single(8000));
        assert_eq!(app.egress[0].protocol, Protocol::All);
        security.verify_chain().unwrap();

        let declared = scope.get(&app.entity).unwrap();
        assert_eq!(declared.properties["ingress"][0]["securityGroups"][0], alb.id.placeholder());
        assert!(declared.properties["ingress"][0].get("cidrBlocks").is_none());
        assert!(declared.dependencies.contains(&alb.entity));
        assert_eq!(declared.properties["egress"][0]["protocol"], "-1");
    }

    #[test]
    fn test_chain_cannot_branch() {
        let mut scope = Scope::new();
        let mut security = boundary(&mut scope);
        let alb = security.create_alb_group(&mut scope, 80).unwrap();
        security.create_app_group(&mut scope, &alb, 8000).unwrap();

        // A second tier hanging off the load balancer would make a mesh.
        assert!(matches!(
            security.create_app_group(&mut scope, &alb, 9000),
            Err(TopologyError::InvalidSecurityRule(_))
        ));
        assert!(security.create_alb_group(&mut scope, 443).is_err());
    }

    #[test]
    fn test_extend_chain_admits_only_the_tail() {
        let mut scope = Scope::new();
        let mut security = boundary(&mut scope);
        assert!(security.extend_chain(&mut scope, "db", 27017).is_err());

        let alb = security.create_alb_group(&mut scope, 80).unwrap();
        let app = security.create_app_group(&mut scope, &alb, 8000).unwrap();
        let db = security.extend_chain(&mut scope, "db", 27017).unwrap();

        assert_eq!(db.entity.name, "demo-db-sg");
        assert_eq!(db.ingress[0].source, RuleSource::Group(app.id.clone()));
        assert_eq!(security.chain().len(), 3);
        security.verify_chain().unwrap();
    }

    #[test]
    fn test_invalid_rules() {
        let open = RuleSource::Cidr("0.0.0.0/0".parse().unwrap());
        assert!(SecurityRule::new(
            Direction::Ingress,
            Protocol::Tcp,
            PortRange { from: 90, to: 80 },
            open.clone()
        )
        .is_err());
        assert!(SecurityRule::new(
            Direction::Egress,
            Protocol::All,
            PortRange::single(80),
            open.clone()
        )
        .is_err());
        assert!(SecurityRule::tcp_ingress(0, open).is_err());
    }
}
