//! Full stack composition
//!
//! ```text
//! VPC ── public subnets ── IGW route ── ALB ── listener ── target group
//!    └── private subnets ─────────────────────── service ── task definition
//! ```
//!
//! [`Stack::compose`] declares every entity from one [`StackConfig`]. It
//! performs no I/O; the result is handed to the engine as a resource set.

use crate::addressing::AvailabilityZoneSet;
use crate::balancer::{EdgeBalancer, HttpProtocol};
use crate::cluster::{ClusterHandle, ComputeCluster};
use crate::error::Result;
use crate::network::{NetworkSpec, NetworkTopology, SubnetHandle};
use crate::output::Output;
use crate::resource::{EntityRef, ResourceKind};
use crate::scope::Scope;
use crate::security::SecurityBoundary;
use crate::workload::{
    ContainerSpec, LoadBalancerTarget, ServiceBinding, ServiceHandle, SpecHandle, WorkloadRunner,
    WorkloadSpec,
};
use std::collections::BTreeMap;
use stratus_cloud::{DependencyGraph, GlobalState, ResourceSet};
use stratus_config::{PrivateEgress, StackConfig};

pub const FRONTEND_CONTAINER: &str = "frontend";
pub const BACKEND_CONTAINER: &str = "backend";
pub const FRONTEND_PORT: u16 = 80;

/// Name of the one output surfaced to operators
pub const URL_EXPORT: &str = "url";

#[derive(Debug)]
pub struct Stack {
    name: String,
    scope: Scope,
    zones: AvailabilityZoneSet,
    network: NetworkTopology,
    security: SecurityBoundary,
    edge: EdgeBalancer,
    cluster: ClusterHandle,
    workload: SpecHandle,
    service: ServiceHandle,
}

impl Stack {
    pub fn compose(config: &StackConfig) -> Result<Self> {
        config.validate()?;
        let name = config.project_name.as_str();
        let tags = config.resource_tags();
        let mut scope = Scope::new();

        let zones = AvailabilityZoneSet::from_config(config)?;
        let mut network =
            NetworkTopology::create(&mut scope, name, NetworkSpec::from_config(config)?)?;
        network.add_subnets(&mut scope, &zones)?;
        network.attach_internet_gateway(&mut scope)?;
        let public_route_table = network.create_public_route_table(&mut scope)?;
        let public: Vec<SubnetHandle> = network.public_subnets().into_iter().cloned().collect();
        for subnet in &public {
            network.associate(&mut scope, subnet, &public_route_table)?;
        }
        if config.private_egress == PrivateEgress::NatGateway {
            network.add_nat_egress(&mut scope)?;
        }

        let mut security = SecurityBoundary::new(name, network.vpc(), &tags);
        let alb_group = security.create_alb_group(&mut scope, config.listener_port)?;
        let app_group = security.create_app_group(&mut scope, &alb_group, config.target_port)?;
        security.verify_chain()?;

        let mut edge = EdgeBalancer::create(&mut scope, name, &public, &alb_group, &tags)?;
        let target_group = edge.add_target_group(
            &mut scope,
            network.vpc(),
            config.target_port,
            HttpProtocol::Http,
            &config.health_check_path,
        )?;
        let listener = edge.add_listener(&mut scope, config.listener_port, &target_group)?;

        let cluster = ComputeCluster::create(&mut scope, name, &tags)?;

        let mut backend =
            ContainerSpec::new(BACKEND_CONTAINER, &config.backend_image, config.target_port);
        if let Some(uri) = config.mongo_endpoint() {
            backend = backend.with_env("MONGO_URI", uri);
        }
        let workload = WorkloadSpec::new(name)
            .with_container(ContainerSpec::new(
                FRONTEND_CONTAINER,
                &config.frontend_image,
                FRONTEND_PORT,
            ))
            .with_container(backend)
            .with_limits(&config.cpu, &config.memory)
            .with_execution_role(config.execution_role_arn.clone())
            .with_tags(tags.clone())
            .build(&mut scope)?;

        let private: Vec<SubnetHandle> = network.private_subnets().into_iter().cloned().collect();
        let service = WorkloadRunner::new(name, &tags).run(
            &mut scope,
            &ServiceBinding {
                spec: &workload,
                cluster: &cluster,
                subnets: &private,
                security_group: &app_group,
                target: LoadBalancerTarget {
                    target_group: &target_group,
                    listener: &listener,
                    container_name: BACKEND_CONTAINER,
                    container_port: config.target_port,
                },
                desired_count: config.desired_count,
            },
        )?;

        tracing::info!(
            "Composed stack '{}': {} resources across {} zones",
            name,
            scope.len(),
            zones.len()
        );
        Ok(Self {
            name: name.to_string(),
            scope,
            zones,
            network,
            security,
            edge,
            cluster,
            workload,
            service,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn zones(&self) -> &AvailabilityZoneSet {
        &self.zones
    }

    pub fn network(&self) -> &NetworkTopology {
        &self.network
    }

    pub fn security(&self) -> &SecurityBoundary {
        &self.security
    }

    pub fn edge(&self) -> &EdgeBalancer {
        &self.edge
    }

    pub fn cluster(&self) -> &ClusterHandle {
        &self.cluster
    }

    pub fn workload(&self) -> &SpecHandle {
        &self.workload
    }

    pub fn service(&self) -> &ServiceHandle {
        &self.service
    }

    pub fn to_resource_set(&self) -> ResourceSet {
        self.scope.to_resource_set()
    }

    /// Number of declared entities per kind
    pub fn kind_counts(&self) -> BTreeMap<ResourceKind, usize> {
        let mut counts = BTreeMap::new();
        for descriptor in self.scope.descriptors() {
            *counts.entry(descriptor.entity.kind).or_insert(0) += 1;
        }
        counts
    }

    fn graph(&self) -> Result<DependencyGraph> {
        Ok(DependencyGraph::from_resources(&self.to_resource_set())?)
    }

    pub fn build_order(&self) -> Result<Vec<String>> {
        Ok(self.graph()?.build_order())
    }

    pub fn teardown_order(&self) -> Result<Vec<String>> {
        Ok(self.graph()?.teardown_order())
    }

    /// `entity` and everything depending on it, dependents first
    pub fn teardown_order_for(&self, entity: &EntityRef) -> Result<Vec<String>> {
        Ok(self.graph()?.subtree_teardown_order(&entity.key()))
    }

    /// Fill the stack's outputs from applied state
    pub fn resolve(&self, state: &GlobalState) -> Result<usize> {
        self.scope.resolve(state)
    }

    /// Public address of the load balancer, once known
    pub fn url(&self) -> Option<&str> {
        self.edge.dns_name().get().map(String::as_str)
    }

    pub fn exports(&self) -> Vec<(&'static str, &Output<String>)> {
        vec![(URL_EXPORT, self.edge.dns_name())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::Tier;
    use crate::error::TopologyError;
    use crate::network::RouteTarget;
    use crate::security::RuleSource;
    use stratus_cloud::{ActionType, Engine, LocalProvider};

    fn config() -> StackConfig {
        let mut config = StackConfig::new(
            "demo",
            "registry.example.com/frontend:1.0",
            "registry.example.com/backend:1.0",
        );
        config.mongo_uri = Some("db.example.com".to_string());
        config
    }

    #[test]
    fn test_compose_default_stack() {
        let stack = Stack::compose(&config()).unwrap();
        let counts = stack.kind_counts();

        assert_eq!(counts[&ResourceKind::Vpc], 1);
        assert_eq!(counts[&ResourceKind::Subnet], 4);
        assert_eq!(counts[&ResourceKind::RouteTable], 1);
        assert_eq!(counts[&ResourceKind::RouteTableAssociation], 2);
        assert_eq!(counts[&ResourceKind::SecurityGroup], 2);
        assert!(!counts.contains_key(&ResourceKind::NatGateway));
        assert_eq!(stack.scope().len(), 17);

        let build = stack.build_order().unwrap();
        assert_eq!(build.first().map(String::as_str), Some("vpc:demo-vpc"));
        assert_eq!(build.last().map(String::as_str), Some("service:demo-service"));
    }

    #[test]
    fn test_end_to_end_subnet_layout() {
        let stack = Stack::compose(&config()).unwrap();
        let network = stack.network();

        let cidrs = |tier: Tier| -> Vec<String> {
            network
                .subnets()
                .iter()
                .filter(|s| s.tier() == tier)
                .map(|s| s.spec.cidr_block.to_string())
                .collect()
        };
        assert_eq!(cidrs(Tier::Public), vec!["10.0.0.0/24", "10.0.1.0/24"]);
        assert_eq!(cidrs(Tier::Private), vec!["10.0.10.0/24", "10.0.11.0/24"]);

        let igw = network.internet_gateway().unwrap();
        for subnet in network.public_subnets() {
            let table = network.route_table_for(&subnet.entity).unwrap();
            assert_eq!(table.routes[0].destination_cidr.to_string(), "0.0.0.0/0");
            assert_eq!(table.routes[0].target, RouteTarget::InternetGateway(igw.id.clone()));
        }
        for subnet in network.private_subnets() {
            assert!(network.route_table_for(&subnet.entity).is_none());
        }
    }

    #[test]
    fn test_compose_is_idempotent() {
        let first = Stack::compose(&config()).unwrap();
        let second = Stack::compose(&config()).unwrap();

        let a: Vec<_> = first.scope().descriptors().cloned().collect();
        let b: Vec<_> = second.scope().descriptors().cloned().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_health_check_fails_before_declaring() {
        let mut config = config();
        config.health_check_path = String::new();
        assert!(matches!(
            Stack::compose(&config),
            Err(TopologyError::InvalidHealthCheck { .. })
        ));
    }

    #[test]
    fn test_backend_wiring() {
        let stack = Stack::compose(&config()).unwrap();

        let backend = stack.workload().container(BACKEND_CONTAINER, 8000).unwrap();
        assert_eq!(backend.environment["MONGO_URI"], "https://db.example.com");
        assert!(stack.workload().container(FRONTEND_CONTAINER, FRONTEND_PORT).is_some());

        let app = &stack.security().chain()[1];
        assert!(app.ingress.iter().all(|r| matches!(r.source, RuleSource::Group(_))));

        let private: Vec<EntityRef> =
            stack.network().private_subnets().iter().map(|s| s.entity.clone()).collect();
        assert_eq!(stack.service().subnets, private);
    }

    #[test]
    fn test_nat_egress_is_opt_in() {
        let mut config = config();
        config.private_egress = PrivateEgress::NatGateway;
        let stack = Stack::compose(&config).unwrap();
        let counts = stack.kind_counts();

        assert_eq!(counts[&ResourceKind::ElasticIp], 1);
        assert_eq!(counts[&ResourceKind::NatGateway], 1);
        assert_eq!(counts[&ResourceKind::RouteTable], 2);
        assert_eq!(counts[&ResourceKind::RouteTableAssociation], 4);
        for subnet in stack.network().private_subnets() {
            let table = stack.network().route_table_for(&subnet.entity).unwrap();
            assert!(matches!(table.routes[0].target, RouteTarget::NatGateway(_)));
        }
    }

    #[test]
    fn test_teardown_order_for_vpc() {
        let stack = Stack::compose(&config()).unwrap();
        let order = stack.teardown_order_for(&stack.network().vpc().entity).unwrap();

        assert_eq!(order.last().map(String::as_str), Some("vpc:demo-vpc"));
        let position = |key: &str| order.iter().position(|k| k == key).unwrap();
        assert!(position("service:demo-service") < position("subnet:demo-private-subnet-0"));
        // The cluster does not depend on the network.
        assert!(!order.contains(&"cluster:demo-cluster".to_string()));
    }

    #[tokio::test]
    async fn test_apply_then_rerun() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let stack = Stack::compose(&config()).unwrap();
        let desired = stack.to_resource_set();
        let mut state = GlobalState::new();

        let plan = engine.plan(&desired, &state).unwrap();
        assert_eq!(plan.summary().create, 17);
        let result = engine.apply(&plan, &desired, &mut state).await.unwrap();
        assert!(result.is_success());

        assert!(stack.resolve(&state).unwrap() > 0);
        assert!(stack.exports().iter().all(|(_, output)| output.is_resolved()));
        let url = stack.url().unwrap();
        assert!(url.starts_with("demo-alb-"));
        assert!(url.ends_with(".us-east-1.elb.amazonaws.com"));

        // Same inputs, fresh composition: nothing to do.
        let again = Stack::compose(&config()).unwrap();
        let plan = engine.plan(&again.to_resource_set(), &state).unwrap();
        assert!(!plan.has_changes);
    }

    #[tokio::test]
    async fn test_scaling_updates_only_the_service() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let stack = Stack::compose(&config()).unwrap();
        let desired = stack.to_resource_set();
        let mut state = GlobalState::new();
        let plan = engine.plan(&desired, &state).unwrap();
        engine.apply(&plan, &desired, &mut state).await.unwrap();

        let scaled = Stack::compose(&config().with_desired_count(3)).unwrap();
        let plan = engine.plan(&scaled.to_resource_set(), &state).unwrap();
        let changed: Vec<_> = plan
            .actions
            .iter()
            .filter(|a| a.action_type != ActionType::NoOp)
            .collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].action_type, ActionType::Update);
        assert_eq!(changed[0].resource_key(), "service:demo-service");
    }

    #[tokio::test]
    async fn test_listener_port_change_converges() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let desired = Stack::compose(&config()).unwrap().to_resource_set();
        let mut state = GlobalState::new();
        let plan = engine.plan(&desired, &state).unwrap();
        engine.apply(&plan, &desired, &mut state).await.unwrap();

        let mut moved = config();
        moved.listener_port = 8080;
        let desired = Stack::compose(&moved).unwrap().to_resource_set();
        let plan = engine.plan(&desired, &state).unwrap();
        let service = plan.action_for("service:demo-service").unwrap();
        assert_eq!(service.action_type, ActionType::Update);
        assert_eq!(
            plan.action_for("listener:demo-listener-80").unwrap().action_type,
            ActionType::Delete
        );

        let result = engine.apply(&plan, &desired, &mut state).await.unwrap();
        assert!(result.is_success(), "{:?} {:?}", result.failed, result.skipped);
        assert!(state.get_resource("listener:demo-listener-80").is_none());
        assert!(!engine.provider().is_live("listener:demo-listener-80"));
        assert!(engine.provider().is_live("listener:demo-listener-8080"));

        let rerun = engine.plan(&desired, &state).unwrap();
        assert!(!rerun.has_changes, "{}", rerun.summary());
    }
}
