//! Property-based tests for topology composition
//!
//! These hold for every valid input, not only the default stack.

use ipnetwork::Ipv4Network;
use proptest::prelude::*;
use std::net::Ipv4Addr;
use stratus_config::StackConfig;
use stratus_core::{
    AddressPlanner, AvailabilityZoneSet, NetworkSpec, NetworkTopology, RuleSource, Scope,
    SecurityBoundary, Stack, Tags, Tier, TopologyError,
};

/// Network address with `prefix` host bits cleared
fn network(raw: u32, prefix: u8) -> Ipv4Network {
    let mask = u32::MAX << (32 - prefix as u32);
    Ipv4Network::new(Ipv4Addr::from(raw & mask), prefix).unwrap()
}

fn zones(count: usize) -> AvailabilityZoneSet {
    AvailabilityZoneSet::new((0..count).map(|i| format!("zone-{}", i)).collect()).unwrap()
}

fn overlaps(a: &Ipv4Network, b: &Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

proptest! {
    #[test]
    fn planned_subnets_are_disjoint_and_contained(
        raw in any::<u32>(),
        prefix in 8u8..=20,
        zone_count in 1usize..=6,
    ) {
        let vpc = network(raw, prefix);
        let plan = AddressPlanner::new(vpc).allocate(&zones(zone_count), &Tier::ALL).unwrap();

        prop_assert_eq!(plan.len(), zone_count * 2);
        for (i, a) in plan.iter().enumerate() {
            prop_assert!(vpc.contains(a.cidr_block.network()));
            prop_assert!(vpc.contains(a.cidr_block.broadcast()));
            prop_assert_eq!(a.auto_assign_public_ip, a.tier == Tier::Public);
            for b in plan.iter().skip(i + 1) {
                prop_assert!(!overlaps(&a.cidr_block, &b.cidr_block));
            }
        }
    }

    #[test]
    fn small_networks_plan_or_report_exhaustion(
        raw in any::<u32>(),
        prefix in 16u8..=28,
        zone_count in 1usize..=12,
    ) {
        let vpc = network(raw, prefix);
        match AddressPlanner::new(vpc).allocate(&zones(zone_count), &Tier::ALL) {
            Ok(plan) => {
                prop_assert_eq!(plan.len(), zone_count * 2);
                for (i, a) in plan.iter().enumerate() {
                    for b in plan.iter().skip(i + 1) {
                        prop_assert!(!overlaps(&a.cidr_block, &b.cidr_block));
                    }
                }
            }
            Err(TopologyError::AddressSpaceExhausted(_)) => {}
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    #[test]
    fn every_inner_tier_admits_only_its_upstream_group(
        listener_port in 1u16..,
        ports in proptest::collection::vec(1u16.., 1..4),
    ) {
        let mut scope = Scope::new();
        let spec = NetworkSpec::parse("10.0.0.0/16").unwrap();
        let topology = NetworkTopology::create(&mut scope, "demo", spec).unwrap();
        let mut security = SecurityBoundary::new("demo", topology.vpc(), &Tags::new());

        let alb = security.create_alb_group(&mut scope, listener_port).unwrap();
        security.create_app_group(&mut scope, &alb, ports[0]).unwrap();
        for (i, port) in ports.iter().enumerate().skip(1) {
            security.extend_chain(&mut scope, &format!("tier{}", i), *port).unwrap();
        }

        security.verify_chain().unwrap();
        for pair in security.chain().windows(2) {
            for rule in &pair[1].ingress {
                match &rule.source {
                    RuleSource::Group(id) => prop_assert_eq!(id.source(), &pair[0].entity),
                    RuleSource::Cidr(cidr) => prop_assert!(false, "CIDR source {}", cidr),
                }
            }
        }
    }

    #[test]
    fn services_never_land_in_public_subnets(
        zone_count in 1usize..=3,
        second_octet in 0u8..=255,
        prefix in 16u8..=20,
        desired_count in 0u32..10,
    ) {
        let mut config = StackConfig::new("demo", "nginx:latest", "api:latest")
            .with_desired_count(desired_count);
        config.zone_count = zone_count;
        config.vpc_cidr = network(u32::from(Ipv4Addr::new(10, second_octet, 0, 0)), prefix).to_string();

        let stack = Stack::compose(&config).unwrap();
        let public: Vec<_> = stack.network().public_subnets().iter().map(|s| s.entity.clone()).collect();

        prop_assert_eq!(stack.service().subnets.len(), zone_count);
        prop_assert!(!stack.service().assign_public_ip);
        prop_assert!(stack.service().subnets.iter().all(|s| !public.contains(s)));
        prop_assert_eq!(stack.service().desired_count, desired_count);
    }

    #[test]
    fn composition_is_deterministic(zone_count in 1usize..=3, nat in any::<bool>()) {
        let mut config = StackConfig::new("demo", "nginx:latest", "api:latest");
        config.zone_count = zone_count;
        if nat {
            config.private_egress = stratus_config::PrivateEgress::NatGateway;
        }

        let first = Stack::compose(&config).unwrap();
        let second = Stack::compose(&config).unwrap();
        let a: Vec<_> = first.scope().descriptors().cloned().collect();
        let b: Vec<_> = second.scope().descriptors().cloned().collect();
        prop_assert_eq!(a, b);
    }
}
