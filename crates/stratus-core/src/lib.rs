//! Stratus Core
//!
//! Declares a two-tier web stack as a graph of typed entities: a network
//! split into public and private subnets, a chained pair of security groups,
//! an internet-facing load balancer and a containerized service behind it.
//!
//! Every rule is checked while the graph is declared. Nothing here talks to a
//! provider; [`Stack::to_resource_set`] hands the finished graph to the
//! `stratus-cloud` engine.
//!
//! ```no_run
//! use stratus_config::StackConfig;
//! use stratus_core::Stack;
//!
//! let config = StackConfig::new("demo", "nginx:latest", "api:latest");
//! let stack = Stack::compose(&config)?;
//! println!("{} resources", stack.scope().len());
//! # Ok::<(), stratus_core::TopologyError>(())
//! ```

pub mod addressing;
pub mod balancer;
pub mod cluster;
pub mod error;
pub mod network;
pub mod output;
pub mod resource;
pub mod scope;
pub mod security;
pub mod stack;
pub mod workload;

pub use addressing::{AddressPlanner, AvailabilityZoneSet, SubnetSpec, Tier, validate_plan};
pub use balancer::{
    BalancerHandle, EdgeBalancer, HealthCheck, HttpProtocol, ListenerHandle, TargetGroupHandle,
};
pub use cluster::{ClusterHandle, ComputeCluster};
pub use error::{Result, TopologyError};
pub use network::{
    Association, GatewayHandle, NetworkHandle, NetworkSpec, NetworkTopology, RouteTableHandle,
    RouteTarget, RoutingRule, SubnetHandle, SubnetHandles,
};
pub use output::Output;
pub use resource::{Declare, Descriptor, EntityRef, ResourceKind, Tags};
pub use scope::Scope;
pub use security::{
    Direction, GroupHandle, PortRange, Protocol, RuleSource, SecurityBoundary, SecurityRule,
    SecurityTier,
};
pub use stack::Stack;
pub use workload::{
    ContainerSpec, LoadBalancerTarget, ServiceBinding, ServiceHandle, SpecHandle, WorkloadRunner,
    WorkloadSpec,
};
