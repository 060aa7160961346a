//! Subnet address planning
//!
//! Every (tier, zone) pair gets one block carved from the VPC range at a
//! fixed offset: `zoneIndex` for the first tier, `zoneIndex + stride` for
//! the second and so on. A VPC of /22 or wider is cut into /24 blocks with a
//! stride of 10, so a /16 yields `10.0.0.0/24`, `10.0.1.0/24` for public and
//! `10.0.10.0/24`, `10.0.11.0/24` for private subnets across two zones.

use crate::error::{Result, TopologyError};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use stratus_config::StackConfig;

/// Smallest subnet the provider accepts
pub const MIN_SUBNET_PREFIX: u8 = 28;

const DEFAULT_SUBNET_PREFIX: u8 = 24;
const MAX_TIER_STRIDE: u32 = 10;

/// Internet reachability class of a subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Public,
    Private,
}

impl Tier {
    /// Both tiers in allocation order
    pub const ALL: [Tier; 2] = [Tier::Public, Tier::Private];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, duplicate-free set of availability zones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityZoneSet {
    zones: Vec<String>,
}

impl AvailabilityZoneSet {
    pub const DEFAULT_COUNT: usize = 2;

    pub fn new(zones: Vec<String>) -> Result<Self> {
        if zones.is_empty() {
            return Err(TopologyError::InvalidTopology(
                "at least one availability zone is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = zones.iter().find(|z| !seen.insert(z.as_str())) {
            return Err(TopologyError::InvalidTopology(format!(
                "availability zone {} listed twice",
                duplicate
            )));
        }
        Ok(Self { zones })
    }

    /// The first `count` of the available zones, or all of them if fewer exist
    pub fn select(available: &[String], count: usize) -> Result<Self> {
        Self::new(available.iter().take(count).cloned().collect())
    }

    pub fn from_config(config: &StackConfig) -> Result<Self> {
        Self::select(&config.available_zones(), config.zone_count)
    }

    pub fn zones(&self) -> &[String] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

/// One planned subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetSpec {
    pub tier: Tier,
    pub zone: String,
    pub cidr_block: Ipv4Network,
    pub auto_assign_public_ip: bool,
}

impl SubnetSpec {
    /// Public subnets auto-assign public IPs, private ones never do
    pub fn new(tier: Tier, zone: impl Into<String>, cidr_block: Ipv4Network) -> Self {
        Self {
            tier,
            zone: zone.into(),
            cidr_block,
            auto_assign_public_ip: tier == Tier::Public,
        }
    }
}

fn last_address(network: &Ipv4Network) -> u32 {
    u32::from(network.broadcast())
}

fn first_address(network: &Ipv4Network) -> u32 {
    u32::from(network.network())
}

fn contains(outer: &Ipv4Network, inner: &Ipv4Network) -> bool {
    first_address(outer) <= first_address(inner) && last_address(inner) <= last_address(outer)
}

fn overlaps(a: &Ipv4Network, b: &Ipv4Network) -> bool {
    first_address(a) <= last_address(b) && first_address(b) <= last_address(a)
}

/// Check a subnet plan against its VPC
///
/// Every block must lie inside the VPC, no two blocks may overlap, each
/// (tier, zone) pair may appear once and only public subnets may assign
/// public IPs.
pub fn validate_plan(vpc: &Ipv4Network, subnets: &[SubnetSpec]) -> Result<()> {
    let mut pairs = HashSet::new();
    for (i, subnet) in subnets.iter().enumerate() {
        if subnet.cidr_block.prefix() > MIN_SUBNET_PREFIX {
            return Err(TopologyError::InvalidTopology(format!(
                "subnet {} is smaller than /{}",
                subnet.cidr_block, MIN_SUBNET_PREFIX
            )));
        }
        if !contains(vpc, &subnet.cidr_block) {
            return Err(TopologyError::InvalidTopology(format!(
                "subnet {} lies outside VPC {}",
                subnet.cidr_block, vpc
            )));
        }
        if !pairs.insert((subnet.tier, subnet.zone.as_str())) {
            return Err(TopologyError::InvalidTopology(format!(
                "more than one {} subnet in {}",
                subnet.tier, subnet.zone
            )));
        }
        if subnet.auto_assign_public_ip && subnet.tier == Tier::Private {
            return Err(TopologyError::InvalidTopology(format!(
                "private subnet {} must not assign public IPs",
                subnet.cidr_block
            )));
        }
        if let Some(other) = subnets[..i]
            .iter()
            .find(|o| overlaps(&o.cidr_block, &subnet.cidr_block))
        {
            return Err(TopologyError::InvalidTopology(format!(
                "subnet {} overlaps {}",
                subnet.cidr_block, other.cidr_block
            )));
        }
    }
    Ok(())
}

/// Deterministic subnet allocator for one VPC range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPlanner {
    vpc: Ipv4Network,
}

impl AddressPlanner {
    pub fn new(vpc: Ipv4Network) -> Self {
        Self { vpc }
    }

    pub fn vpc(&self) -> Ipv4Network {
        self.vpc
    }

    /// Prefix length of every allocated block
    pub fn subnet_prefix(&self) -> u8 {
        let vpc_prefix = self.vpc.prefix();
        if vpc_prefix + 2 <= DEFAULT_SUBNET_PREFIX {
            DEFAULT_SUBNET_PREFIX
        } else {
            (vpc_prefix + 2).min(MIN_SUBNET_PREFIX)
        }
    }

    /// Number of blocks the VPC divides into
    pub fn block_count(&self) -> u32 {
        let bits = u32::from(self.subnet_prefix().saturating_sub(self.vpc.prefix()));
        1u32.checked_shl(bits).unwrap_or(u32::MAX)
    }

    /// Distance between the first blocks of consecutive tiers
    pub fn stride(&self, tier_count: usize) -> u32 {
        let per_tier = self.block_count() / (tier_count.max(1) as u32);
        per_tier.min(MAX_TIER_STRIDE)
    }

    /// Block at `index`, counting from the start of the VPC range
    pub fn block(&self, index: u32) -> Result<Ipv4Network> {
        if index >= self.block_count() {
            return Err(TopologyError::AddressSpaceExhausted(format!(
                "block {} is beyond the {} blocks of {}",
                index,
                self.block_count(),
                self.vpc
            )));
        }
        let size = 1u32 << (32 - u32::from(self.subnet_prefix()));
        let start = first_address(&self.vpc) + index * size;
        Ipv4Network::new(Ipv4Addr::from(start), self.subnet_prefix()).map_err(|e| {
            TopologyError::InvalidCidr {
                cidr: format!("{}/{}", Ipv4Addr::from(start), self.subnet_prefix()),
                reason: e.to_string(),
            }
        })
    }

    /// One subnet per (tier, zone), tiers outermost
    pub fn allocate(&self, zones: &AvailabilityZoneSet, tiers: &[Tier]) -> Result<Vec<SubnetSpec>> {
        if tiers.is_empty() {
            return Err(TopologyError::InvalidTopology(
                "no subnet tier requested".to_string(),
            ));
        }
        let distinct: HashSet<&Tier> = tiers.iter().collect();
        if distinct.len() != tiers.len() {
            return Err(TopologyError::InvalidTopology(
                "subnet tier requested twice".to_string(),
            ));
        }

        let requested = tiers.len() * zones.len();
        let blocks = self.block_count() as usize;
        if requested > blocks {
            return Err(TopologyError::AddressSpaceExhausted(format!(
                "{} subnets requested but {} only holds {} /{} blocks",
                requested,
                self.vpc,
                blocks,
                self.subnet_prefix()
            )));
        }
        let stride = self.stride(tiers.len());
        if zones.len() > stride as usize {
            return Err(TopologyError::AddressSpaceExhausted(format!(
                "{} zones exceed the {} blocks reserved per tier in {}",
                zones.len(),
                stride,
                self.vpc
            )));
        }

        let mut plan = Vec::with_capacity(requested);
        for (tier_index, tier) in tiers.iter().enumerate() {
            for (zone_index, zone) in zones.zones().iter().enumerate() {
                let offset = tier_index as u32 * stride + zone_index as u32;
                plan.push(SubnetSpec::new(*tier, zone.clone(), self.block(offset)?));
            }
        }
        validate_plan(&self.vpc, &plan)?;
        Ok(plan)
    }
}
