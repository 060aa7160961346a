//! Internet-facing load balancer, its target groups and listeners

use crate::addressing::Tier;
use crate::error::{Result, TopologyError};
use crate::network::{NetworkHandle, SubnetHandle};
use crate::output::Output;
use crate::resource::{Declare, EntityRef, ResourceKind, Tags, named};
use crate::scope::Scope;
use crate::security::{GroupHandle, SecurityTier};
use serde_json::{Value, json};

/// Path the target group probes, validated before anything is declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    path: String,
}

impl HealthCheck {
    pub fn new(path: &str) -> Result<Self> {
        let invalid = |reason: &str| TopologyError::InvalidHealthCheck {
            path: path.to_string(),
            reason: reason.to_string(),
        };
        if path.is_empty() {
            return Err(invalid("path is empty"));
        }
        if !path.starts_with('/') {
            return Err(invalid("path must start with '/'"));
        }
        if path.chars().any(char::is_whitespace) {
            return Err(invalid("path contains whitespace"));
        }
        Ok(Self {
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpProtocol {
    #[default]
    Http,
    Https,
}

impl HttpProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BalancerHandle {
    pub entity: EntityRef,
    pub arn: Output<String>,
    pub dns_name: Output<String>,
}

#[derive(Debug, Clone)]
pub struct TargetGroupHandle {
    pub entity: EntityRef,
    pub arn: Output<String>,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ListenerHandle {
    pub entity: EntityRef,
    pub arn: Output<String>,
    pub port: u16,
    pub target_group: EntityRef,
}

struct LoadBalancer<'a> {
    name: String,
    subnets: &'a [SubnetHandle],
    security_group: &'a GroupHandle,
    tags: &'a Tags,
}

impl Declare for LoadBalancer<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::LoadBalancer
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn properties(&self) -> Value {
        let subnets: Vec<&Output<String>> = self.subnets.iter().map(|s| &s.id).collect();
        json!({
            "name": self.name,
            "loadBalancerType": "application",
            "internal": false,
            "subnets": subnets,
            "securityGroups": [self.security_group.id],
            "tags": named(self.tags, &self.name),
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        self.subnets
            .iter()
            .map(|s| s.entity.clone())
            .chain(std::iter::once(self.security_group.entity.clone()))
            .collect()
    }
}

struct TargetGroup<'a> {
    name: String,
    balancer: &'a EntityRef,
    vpc: &'a NetworkHandle,
    port: u16,
    protocol: HttpProtocol,
    health_check: &'a HealthCheck,
    tags: &'a Tags,
}

impl Declare for TargetGroup<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::TargetGroup
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> Option<EntityRef> {
        Some(self.balancer.clone())
    }

    fn properties(&self) -> Value {
        json!({
            "name": self.name,
            "port": self.port,
            "protocol": self.protocol.as_str(),
            "targetType": "ip",
            "vpcId": self.vpc.id,
            "healthCheck": {
                "path": self.health_check.path(),
                "protocol": self.protocol.as_str(),
            },
            "tags": named(self.tags, &self.name),
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        vec![self.balancer.clone(), self.vpc.entity.clone()]
    }
}

struct Listener<'a> {
    name: String,
    balancer: &'a BalancerHandle,
    port: u16,
    protocol: HttpProtocol,
    target_group: &'a TargetGroupHandle,
}

impl Declare for Listener<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Listener
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> Option<EntityRef> {
        Some(self.balancer.entity.clone())
    }

    fn properties(&self) -> Value {
        json!({
            "loadBalancerArn": self.balancer.arn,
            "port": self.port,
            "protocol": self.protocol.as_str(),
            "defaultActions": [{
                "type": "forward",
                "targetGroupArn": self.target_group.arn,
            }],
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        vec![
            self.balancer.entity.clone(),
            self.target_group.entity.clone(),
        ]
    }
}

/// Application load balancer in the public subnets
#[derive(Debug, Clone)]
pub struct EdgeBalancer {
    name: String,
    tags: Tags,
    balancer: BalancerHandle,
    target_groups: Vec<TargetGroupHandle>,
    listeners: Vec<ListenerHandle>,
}

impl EdgeBalancer {
    /// Declare `<name>-alb`
    ///
    /// Every subnet must be public and the group must be the load balancer
    /// tier of the security chain.
    pub fn create(
        scope: &mut Scope,
        name: &str,
        subnets: &[SubnetHandle],
        security_group: &GroupHandle,
        tags: &Tags,
    ) -> Result<Self> {
        if subnets.is_empty() {
            return Err(TopologyError::InvalidTopology(
                "a load balancer needs at least one subnet".to_string(),
            ));
        }
        if let Some(private) = subnets.iter().find(|s| s.tier() != Tier::Public) {
            return Err(TopologyError::InvalidTopology(format!(
                "load balancer subnets must be public, {} is {}",
                private.entity,
                private.tier()
            )));
        }
        if security_group.tier != SecurityTier::LoadBalancer {
            return Err(TopologyError::InvalidSecurityRule(format!(
                "load balancer must use the load balancer group, not {}",
                security_group.entity
            )));
        }

        let entity = scope.declare(&LoadBalancer {
            name: format!("{}-alb", name),
            subnets,
            security_group,
            tags,
        })?;
        let balancer = BalancerHandle {
            arn: scope.output(&entity, "arn"),
            dns_name: scope.output(&entity, "dnsName"),
            entity,
        };
        Ok(Self {
            name: name.to_string(),
            tags: tags.clone(),
            balancer,
            target_groups: Vec::new(),
            listeners: Vec::new(),
        })
    }

    /// Declare `<name>-tg-<port>` with IP targets
    pub fn add_target_group(
        &mut self,
        scope: &mut Scope,
        vpc: &NetworkHandle,
        port: u16,
        protocol: HttpProtocol,
        health_check_path: &str,
    ) -> Result<TargetGroupHandle> {
        let health_check = HealthCheck::new(health_check_path)?;
        if port == 0 {
            return Err(TopologyError::InvalidTopology(
                "target port must be above 0".to_string(),
            ));
        }
        let entity = scope.declare(&TargetGroup {
            name: format!("{}-tg-{}", self.name, port),
            balancer: &self.balancer.entity,
            vpc,
            port,
            protocol,
            health_check: &health_check,
            tags: &self.tags,
        })?;
        let target_group = TargetGroupHandle {
            arn: scope.output(&entity, "arn"),
            entity,
            port,
        };
        self.target_groups.push(target_group.clone());
        Ok(target_group)
    }

    /// Declare `<name>-listener-<port>` forwarding to `target_group`
    pub fn add_listener(
        &mut self,
        scope: &mut Scope,
        port: u16,
        target_group: &TargetGroupHandle,
    ) -> Result<ListenerHandle> {
        if !self.target_groups.iter().any(|t| t.entity == target_group.entity) {
            return Err(TopologyError::InvalidTopology(format!(
                "{} does not belong to {}",
                target_group.entity, self.balancer.entity
            )));
        }
        let entity = scope.declare(&Listener {
            name: format!("{}-listener-{}", self.name, port),
            balancer: &self.balancer,
            port,
            protocol: HttpProtocol::Http,
            target_group,
        })?;
        let listener = ListenerHandle {
            arn: scope.output(&entity, "arn"),
            entity,
            port,
            target_group: target_group.entity.clone(),
        };
        self.listeners.push(listener.clone());
        Ok(listener)
    }

    pub fn balancer(&self) -> &BalancerHandle {
        &self.balancer
    }

    /// Public DNS name, the address operators reach the stack at
    pub fn dns_name(&self) -> &Output<String> {
        &self.balancer.dns_name
    }

    pub fn target_groups(&self) -> &[TargetGroupHandle] {
        &self.target_groups
    }

    pub fn listeners(&self) -> &[ListenerHandle] {
        &self.listeners
    }
}
