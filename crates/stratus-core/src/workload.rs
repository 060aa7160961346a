//! Task definitions and the services that run them
//!
//! A [`WorkloadSpec`] is validated in full before it is declared. A service
//! always lands in private subnets without public IPs and receives traffic
//! only through one pinned container port behind the load balancer.

use crate::addressing::Tier;
use crate::balancer::{ListenerHandle, TargetGroupHandle};
use crate::cluster::ClusterHandle;
use crate::error::{Result, TopologyError};
use crate::network::SubnetHandle;
use crate::output::Output;
use crate::resource::{Declare, EntityRef, ResourceKind, Tags, named};
use crate::scope::Scope;
use crate::security::{GroupHandle, SecurityTier};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use stratus_cloud::CloudError;

pub const DEFAULT_CPU: &str = "512";
pub const DEFAULT_MEMORY: &str = "1024";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub container_port: u16,
    pub host_port: u16,
    pub environment: BTreeMap<String, String>,
    pub essential: bool,
}

impl ContainerSpec {
    /// Essential container listening on `port`
    pub fn new(name: impl Into<String>, image: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            container_port: port,
            host_port: port,
            environment: BTreeMap::new(),
            essential: true,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_host_port(mut self, port: u16) -> Self {
        self.host_port = port;
        self
    }

    pub fn non_essential(mut self) -> Self {
        self.essential = false;
        self
    }
}

// Shape of one entry in `containerDefinitions`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerDefinition<'a> {
    name: &'a str,
    image: &'a str,
    essential: bool,
    port_mappings: [PortMapping; 1],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    environment: Vec<EnvironmentVariable<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PortMapping {
    container_port: u16,
    host_port: u16,
    protocol: &'static str,
}

#[derive(Serialize)]
struct EnvironmentVariable<'a> {
    name: &'a str,
    value: &'a str,
}

impl<'a> From<&'a ContainerSpec> for ContainerDefinition<'a> {
    fn from(spec: &'a ContainerSpec) -> Self {
        Self {
            name: &spec.name,
            image: &spec.image,
            essential: spec.essential,
            port_mappings: [PortMapping {
                container_port: spec.container_port,
                host_port: spec.host_port,
                protocol: "tcp",
            }],
            environment: spec
                .environment
                .iter()
                .map(|(name, value)| EnvironmentVariable { name, value })
                .collect(),
        }
    }
}

/// Co-located containers with their task-level limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub name: String,
    pub containers: Vec<ContainerSpec>,
    pub cpu: String,
    pub memory: String,
    /// IAM role managed outside the stack
    pub execution_role_arn: Option<String>,
    pub tags: Tags,
}

impl WorkloadSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            containers: Vec::new(),
            cpu: DEFAULT_CPU.to_string(),
            memory: DEFAULT_MEMORY.to_string(),
            execution_role_arn: None,
            tags: Tags::new(),
        }
    }

    pub fn with_container(mut self, container: ContainerSpec) -> Self {
        self.containers.push(container);
        self
    }

    pub fn with_limits(mut self, cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        self.cpu = cpu.into();
        self.memory = memory.into();
        self
    }

    pub fn with_execution_role(mut self, arn: Option<String>) -> Self {
        self.execution_role_arn = arn;
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(TopologyError::InvalidWorkload(message));

        if self.containers.is_empty() {
            return invalid(format!("{} declares no containers", self.name));
        }
        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for container in &self.containers {
            if !names.insert(container.name.as_str()) {
                return invalid(format!("container name {} is used twice", container.name));
            }
            if container.image.trim().is_empty() {
                return invalid(format!("container {} has no image", container.name));
            }
            // awsvpc networking maps every port one to one.
            if container.host_port != container.container_port {
                return invalid(format!(
                    "container {} maps host port {} to {}; they must match",
                    container.name, container.host_port, container.container_port
                ));
            }
            if !ports.insert(container.container_port) {
                return invalid(format!(
                    "port {} is claimed by more than one container",
                    container.container_port
                ));
            }
        }
        if !self.containers.iter().any(|c| c.essential) {
            return invalid(format!("{} has no essential container", self.name));
        }
        for (label, value) in [("cpu", &self.cpu), ("memory", &self.memory)] {
            match value.parse::<u32>() {
                Ok(units) if units > 0 => {}
                _ => return invalid(format!("{} must be a positive integer, got {:?}", label, value)),
            }
        }
        Ok(())
    }

    /// Provider descriptor: the container list as a JSON string
    pub fn container_definitions(&self) -> Result<String> {
        let definitions: Vec<ContainerDefinition<'_>> =
            self.containers.iter().map(ContainerDefinition::from).collect();
        Ok(serde_json::to_string(&definitions).map_err(CloudError::from)?)
    }

    /// Validate and declare `<name>-task`
    pub fn build(&self, scope: &mut Scope) -> Result<SpecHandle> {
        self.validate()?;
        let container_definitions = self.container_definitions()?;
        let entity = scope.declare(&TaskDefinition {
            name: format!("{}-task", self.name),
            family: format!("{}-family", self.name),
            spec: self,
            container_definitions,
        })?;
        tracing::debug!("{} runs {} containers", entity, self.containers.len());
        Ok(SpecHandle {
            arn: scope.output(&entity, "arn"),
            entity,
            containers: Arc::new(self.containers.clone()),
        })
    }
}

struct TaskDefinition<'a> {
    name: String,
    family: String,
    spec: &'a WorkloadSpec,
    container_definitions: String,
}

impl Declare for TaskDefinition<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::TaskDefinition
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn properties(&self) -> Value {
        let mut properties = json!({
            "family": self.family,
            "cpu": self.spec.cpu,
            "memory": self.spec.memory,
            "networkMode": "awsvpc",
            "requiresCompatibilities": ["FARGATE"],
            "containerDefinitions": self.container_definitions,
            "tags": named(&self.spec.tags, &self.name),
        });
        if let Some(role) = &self.spec.execution_role_arn {
            properties["executionRoleArn"] = json!(role);
        }
        properties
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct SpecHandle {
    pub entity: EntityRef,
    pub arn: Output<String>,
    pub containers: Arc<Vec<ContainerSpec>>,
}

impl SpecHandle {
    pub fn container(&self, name: &str, port: u16) -> Option<&ContainerSpec> {
        self.containers
            .iter()
            .find(|c| c.name == name && c.container_port == port)
    }
}

/// Which container port receives traffic from the load balancer
#[derive(Debug, Clone, Copy)]
pub struct LoadBalancerTarget<'a> {
    pub target_group: &'a TargetGroupHandle,
    pub listener: &'a ListenerHandle,
    pub container_name: &'a str,
    pub container_port: u16,
}

/// Everything a service is bound to
#[derive(Debug, Clone, Copy)]
pub struct ServiceBinding<'a> {
    pub spec: &'a SpecHandle,
    pub cluster: &'a ClusterHandle,
    pub subnets: &'a [SubnetHandle],
    pub security_group: &'a GroupHandle,
    pub target: LoadBalancerTarget<'a>,
    /// Target the scheduler converges on, not a guarantee of running tasks
    pub desired_count: u32,
}

#[derive(Debug, Clone)]
pub struct ServiceHandle {
    pub entity: EntityRef,
    pub arn: Output<String>,
    pub name: String,
    pub subnets: Vec<EntityRef>,
    pub desired_count: u32,
    pub assign_public_ip: bool,
}

struct Service<'a> {
    name: String,
    binding: &'a ServiceBinding<'a>,
    tags: &'a Tags,
}

impl Declare for Service<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn properties(&self) -> Value {
        let binding = self.binding;
        let subnets: Vec<&Output<String>> = binding.subnets.iter().map(|s| &s.id).collect();
        json!({
            "name": self.name,
            "cluster": binding.cluster.arn,
            "taskDefinition": binding.spec.arn,
            "desiredCount": binding.desired_count,
            "launchType": "FARGATE",
            "networkConfiguration": {
                "subnets": subnets,
                "securityGroups": [binding.security_group.id],
                "assignPublicIp": false,
            },
            "loadBalancers": [{
                "targetGroupArn": binding.target.target_group.arn,
                "containerName": binding.target.container_name,
                "containerPort": binding.target.container_port,
            }],
            "tags": named(self.tags, &self.name),
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        let binding = self.binding;
        let mut dependencies = vec![
            binding.cluster.entity.clone(),
            binding.spec.entity.clone(),
        ];
        dependencies.extend(binding.subnets.iter().map(|s| s.entity.clone()));
        dependencies.push(binding.security_group.entity.clone());
        dependencies.push(binding.target.target_group.entity.clone());
        // The target group must be attached to a listener before a service can register with it.
        dependencies.push(binding.target.listener.entity.clone());
        dependencies
    }
}

#[derive(Debug, Clone)]
pub struct WorkloadRunner {
    name: String,
    tags: Tags,
}

impl WorkloadRunner {
    pub fn new(name: &str, tags: &Tags) -> Self {
        Self {
            name: name.to_string(),
            tags: tags.clone(),
        }
    }

    /// Declare `<name>-service` after checking every binding
    pub fn run(&self, scope: &mut Scope, binding: &ServiceBinding<'_>) -> Result<ServiceHandle> {
        if binding.subnets.is_empty() {
            return Err(TopologyError::InvalidTopology(
                "a service needs at least one subnet".to_string(),
            ));
        }
        if let Some(public) = binding.subnets.iter().find(|s| s.tier() != Tier::Private) {
            return Err(TopologyError::InvalidTopology(format!(
                "services run in private subnets only, {} is {}",
                public.entity,
                public.tier()
            )));
        }

        let group = binding.security_group;
        if group.tier == SecurityTier::LoadBalancer || group.admits_cidr() {
            return Err(TopologyError::InvalidSecurityRule(format!(
                "{} is reachable from outside the trust chain",
                group.entity
            )));
        }

        let target = &binding.target;
        if binding
            .spec
            .container(target.container_name, target.container_port)
            .is_none()
        {
            return Err(TopologyError::ContainerNotFound {
                name: target.container_name.to_string(),
                port: target.container_port,
            });
        }
        if target.listener.target_group != target.target_group.entity {
            return Err(TopologyError::InvalidTopology(format!(
                "{} does not forward to {}",
                target.listener.entity, target.target_group.entity
            )));
        }

        let name = format!("{}-service", self.name);
        let entity = scope.declare(&Service {
            name: name.clone(),
            binding,
            tags: &self.tags,
        })?;
        tracing::debug!(
            "{} wants {} tasks behind {}:{}",
            entity,
            binding.desired_count,
            target.container_name,
            target.container_port
        );
        Ok(ServiceHandle {
            arn: scope.output(&entity, "arn"),
            entity,
            name,
            subnets: binding.subnets.iter().map(|s| s.entity.clone()).collect(),
            desired_count: binding.desired_count,
            assign_public_ip: false,
        })
    }
}
