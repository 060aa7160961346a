//! In-process provider
//!
//! `LocalProvider` behaves like a strict cloud API without talking to one:
//! it issues AWS-shaped identifiers, refuses references to identifiers that
//! are not live, and refuses to delete a resource another live resource
//! still references. The CLI uses it for local stacks and the tests use it
//! to observe call order.

use crate::error::{CloudError, Result};
use crate::output;
use crate::provider::{CloudProvider, ResourceConfig};
use crate::state::{GlobalState, ResourceState, ResourceStatus};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const DEFAULT_ACCOUNT_ID: &str = "000000000000";

/// Operation recorded by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// One provider call, in the order it was received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub operation: Operation,
    /// Resource key (type:id)
    pub resource: String,
}

struct LiveResource {
    key: String,
    state: ResourceState,
    /// Resolved config the resource was last written with
    config: Value,
}

impl LiveResource {
    /// Every identifier this resource answers to
    fn identifiers(&self) -> HashSet<String> {
        std::iter::once(self.state.id.clone())
            .chain(
                self.state
                    .attributes
                    .values()
                    .filter_map(|v| v.as_str().map(str::to_string)),
            )
            .collect()
    }
}

#[derive(Default)]
struct Inventory {
    /// Live resources by provider ID; a key may briefly have two during replacement
    live: HashMap<String, LiveResource>,
    /// Every identifier ever handed out
    issued: HashSet<String>,
    /// Latest task definition revision per family
    revisions: HashMap<String, u32>,
    calls: Vec<ProviderCall>,
    failures: HashSet<String>,
}

impl Inventory {
    fn record(&mut self, operation: Operation, resource: &str) {
        self.calls.push(ProviderCall {
            operation,
            resource: resource.to_string(),
        });
    }
}

/// Provider that keeps resources in memory
pub struct LocalProvider {
    region: String,
    account_id: String,
    inventory: Mutex<Inventory>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn short_hex(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

// Documentation range 203.0.113.0/24; only needs to look plausible.
fn rand_octet() -> u8 {
    Uuid::new_v4().as_bytes()[0] % 250 + 1
}

fn strings(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::String(s) => found.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| strings(v, found)),
        Value::Object(map) => map.values().for_each(|v| strings(v, found)),
        _ => {}
    }
}

impl LocalProvider {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
            inventory: Mutex::new(Inventory::default()),
        }
    }

    /// Make every create or update of `resource_key` fail
    pub fn fail_on(&self, resource_key: impl Into<String>) {
        lock(&self.inventory).failures.insert(resource_key.into());
    }

    /// Calls received so far
    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.inventory).calls.clone()
    }

    /// Number of live resources
    pub fn live_count(&self) -> usize {
        lock(&self.inventory).live.len()
    }

    pub fn is_live(&self, resource_key: &str) -> bool {
        lock(&self.inventory)
            .live
            .values()
            .any(|r| r.key == resource_key)
    }

    /// Seed every resource recorded in a state file, as if this provider had
    /// created them
    pub fn adopt_state(&self, state: &GlobalState) {
        let mut inventory = lock(&self.inventory);
        let lookup = |r: &output::OutputReference| {
            state.attribute(&r.resource, &r.attribute).cloned()
        };

        for (key, resource) in &state.resources {
            let config = output::resolve(&resource.declared, &lookup)
                .unwrap_or_else(|_| resource.declared.clone());
            let adopted = LiveResource {
                key: key.clone(),
                state: resource.clone(),
                config,
            };
            inventory.issued.extend(adopted.identifiers());

            if resource.resource_type == "task-definition" {
                if let Some((family, revision)) = resource
                    .id
                    .rsplit_once('/')
                    .and_then(|(_, tail)| tail.rsplit_once(':'))
                {
                    let revision = revision.parse::<u32>().unwrap_or(1);
                    let latest = inventory.revisions.entry(family.to_string()).or_insert(0);
                    *latest = (*latest).max(revision);
                }
            }
            inventory.live.insert(resource.id.clone(), adopted);
        }
        tracing::debug!("Adopted {} recorded resources", state.resources.len());
    }

    fn identifiers(
        &self,
        inventory: &mut Inventory,
        resource: &ResourceConfig,
    ) -> (String, Vec<(&'static str, Value)>) {
        let name = resource
            .get_config::<String>("name")
            .unwrap_or_else(|| resource.id.clone());
        let region = &self.region;
        let account = &self.account_id;

        let prefixed = |prefix: &str| format!("{}-{}", prefix, short_hex(17));
        match resource.resource_type.as_str() {
            "vpc" => (prefixed("vpc"), Vec::new()),
            "subnet" => (prefixed("subnet"), Vec::new()),
            "internet-gateway" => (prefixed("igw"), Vec::new()),
            "nat-gateway" => (prefixed("nat"), Vec::new()),
            "elastic-ip" => (
                prefixed("eipalloc"),
                vec![("publicIp", json!(format!("203.0.113.{}", rand_octet())))],
            ),
            "route-table" => (prefixed("rtb"), Vec::new()),
            "route-table-association" => (prefixed("rtbassoc"), Vec::new()),
            "security-group" => (prefixed("sg"), Vec::new()),
            "load-balancer" => {
                let suffix = short_hex(16);
                let arn = format!(
                    "arn:aws:elasticloadbalancing:{}:{}:loadbalancer/app/{}/{}",
                    region, account, name, suffix
                );
                let dns = format!("{}-{}.{}.elb.amazonaws.com", name, &suffix[..10], region);
                (arn.clone(), vec![("arn", json!(arn)), ("dnsName", json!(dns))])
            }
            "target-group" => {
                let arn = format!(
                    "arn:aws:elasticloadbalancing:{}:{}:targetgroup/{}/{}",
                    region,
                    account,
                    name,
                    short_hex(16)
                );
                (arn.clone(), vec![("arn", json!(arn))])
            }
            "listener" => {
                let arn = format!(
                    "arn:aws:elasticloadbalancing:{}:{}:listener/app/{}/{}",
                    region,
                    account,
                    name,
                    short_hex(16)
                );
                (arn.clone(), vec![("arn", json!(arn))])
            }
            "cluster" => {
                let arn = format!("arn:aws:ecs:{}:{}:cluster/{}", region, account, name);
                (arn.clone(), vec![("arn", json!(arn)), ("name", json!(name))])
            }
            "task-definition" => {
                let family = resource
                    .get_config::<String>("family")
                    .unwrap_or_else(|| name.clone());
                let revision = inventory.revisions.entry(family.clone()).or_insert(0);
                *revision += 1;
                let arn = format!(
                    "arn:aws:ecs:{}:{}:task-definition/{}:{}",
                    region, account, family, revision
                );
                (arn.clone(), vec![("arn", json!(arn))])
            }
            "service" => {
                let arn = format!(
                    "arn:aws:ecs:{}:{}:service/{}/{}",
                    region,
                    account,
                    short_hex(8),
                    name
                );
                (arn.clone(), vec![("arn", json!(arn)), ("name", json!(name))])
            }
            other => (prefixed(other), Vec::new()),
        }
    }

    fn check_references(inventory: &Inventory, resource: &ResourceConfig) -> Result<()> {
        if let Some(reference) = output::references(&resource.config).into_iter().next() {
            return Err(CloudError::InvalidConfig(format!(
                "{} still holds unresolved output {}",
                resource.key(),
                reference
            )));
        }

        let live_ids: HashSet<String> = inventory
            .live
            .values()
            .flat_map(LiveResource::identifiers)
            .collect();

        let mut values = Vec::new();
        strings(&resource.config, &mut values);
        for value in values {
            if inventory.issued.contains(&value) && !live_ids.contains(&value) {
                return Err(CloudError::ApiError(format!(
                    "InvalidParameterValue: {} referenced by {} does not exist",
                    value,
                    resource.key()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn create(&self, resource: &ResourceConfig) -> Result<ResourceState> {
        let key = resource.key();
        let mut inventory = lock(&self.inventory);
        inventory.record(Operation::Create, &key);

        if inventory.failures.contains(&key) {
            return Err(CloudError::ApiError(format!(
                "simulated failure creating {}",
                key
            )));
        }
        Self::check_references(&inventory, resource)?;

        let (id, attributes) = self.identifiers(&mut inventory, resource);
        let mut state = ResourceState::new(id.clone(), resource.resource_type.clone())
            .with_status(ResourceStatus::Running)
            .with_attribute("id", json!(id));
        for (name, value) in attributes {
            state.set_attribute(name, value);
        }

        let created = LiveResource {
            key: key.clone(),
            state: state.clone(),
            config: resource.config.clone(),
        };
        inventory.issued.extend(created.identifiers());
        inventory.live.insert(id, created);

        tracing::debug!("Local provider created {} ({})", key, state.id);
        Ok(state)
    }

    async fn update(
        &self,
        current: &ResourceState,
        resource: &ResourceConfig,
    ) -> Result<ResourceState> {
        let key = resource.key();
        let mut inventory = lock(&self.inventory);
        inventory.record(Operation::Update, &key);

        if inventory.failures.contains(&key) {
            return Err(CloudError::ApiError(format!(
                "simulated failure updating {}",
                key
            )));
        }
        if !inventory.live.contains_key(&current.id) {
            return Err(CloudError::ResourceNotFound(format!(
                "{} ({})",
                key, current.id
            )));
        }
        Self::check_references(&inventory, resource)?;

        let mut updated = current.clone().with_status(ResourceStatus::Running);
        updated.updated_at = chrono::Utc::now();
        if let Some(live) = inventory.live.get_mut(&current.id) {
            live.state = updated.clone();
            live.config = resource.config.clone();
        }
        Ok(updated)
    }

    async fn delete(&self, current: &ResourceState) -> Result<()> {
        let mut inventory = lock(&self.inventory);
        let Some(target) = inventory.live.get(&current.id) else {
            return Err(CloudError::ResourceNotFound(current.id.clone()));
        };
        let key = target.key.clone();
        let own_ids = target.identifiers();
        inventory.record(Operation::Delete, &key);

        for (id, other) in &inventory.live {
            if *id == current.id {
                continue;
            }
            let mut values = Vec::new();
            strings(&other.config, &mut values);
            if values.iter().any(|v| own_ids.contains(v)) {
                return Err(CloudError::ApiError(format!(
                    "DependencyViolation: {} is still referenced by {}",
                    key, other.key
                )));
            }
        }

        inventory.live.remove(&current.id);
        tracing::debug!("Local provider deleted {} ({})", key, current.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vpc() -> ResourceConfig {
        ResourceConfig::new("vpc", "demo-vpc", json!({"cidrBlock": "10.0.0.0/16"}))
    }

    #[tokio::test]
    async fn test_create_issues_aws_shaped_ids() {
        let provider = LocalProvider::new("us-east-1");
        let state = provider.create(&vpc()).await.unwrap();

        assert!(state.id.starts_with("vpc-"));
        assert_eq!(state.id.len(), "vpc-".len() + 17);
        assert_eq!(state.get_attribute::<String>("id").unwrap(), state.id);
        assert!(provider.is_live("vpc:demo-vpc"));
    }

    #[tokio::test]
    async fn test_load_balancer_gets_dns_name() {
        let provider = LocalProvider::new("eu-west-1");
        let lb = ResourceConfig::new("load-balancer", "demo-alb", json!({"name": "demo-alb"}));
        let state = provider.create(&lb).await.unwrap();

        let dns: String = state.get_attribute("dnsName").unwrap();
        assert!(dns.starts_with("demo-alb-"));
        assert!(dns.ends_with(".eu-west-1.elb.amazonaws.com"));
        assert!(state.id.starts_with("arn:aws:elasticloadbalancing:eu-west-1:"));
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_rejected() {
        let provider = LocalProvider::new("us-east-1");
        let subnet = ResourceConfig::new(
            "subnet",
            "demo-public-0",
            json!({"vpcId": output::placeholder("vpc:demo-vpc", "id")}),
        );

        assert!(matches!(
            provider.create(&subnet).await,
            Err(CloudError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_reference_to_deleted_resource_rejected() {
        let provider = LocalProvider::new("us-east-1");
        let vpc = provider.create(&vpc()).await.unwrap();
        provider.delete(&vpc).await.unwrap();

        let subnet = ResourceConfig::new("subnet", "demo-public-0", json!({"vpcId": vpc.id}));
        match provider.create(&subnet).await {
            Err(CloudError::ApiError(message)) => {
                assert!(message.starts_with("InvalidParameterValue"))
            }
            other => panic!("Expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_refused_while_referenced() {
        let provider = LocalProvider::new("us-east-1");
        let vpc = provider.create(&vpc()).await.unwrap();
        let subnet = ResourceConfig::new("subnet", "demo-public-0", json!({"vpcId": vpc.id}));
        let subnet = provider.create(&subnet).await.unwrap();

        match provider.delete(&vpc).await {
            Err(CloudError::ApiError(message)) => {
                assert!(message.starts_with("DependencyViolation"))
            }
            other => panic!("Expected DependencyViolation, got {:?}", other),
        }

        provider.delete(&subnet).await.unwrap();
        provider.delete(&vpc).await.unwrap();
        assert_eq!(provider.live_count(), 0);
    }

    #[tokio::test]
    async fn test_task_definition_revisions_increase() {
        let provider = LocalProvider::new("us-east-1");
        let task = ResourceConfig::new(
            "task-definition",
            "demo-task",
            json!({"family": "demo-family"}),
        );

        let first = provider.create(&task).await.unwrap();
        let second = provider.create(&task).await.unwrap();
        assert!(first.id.ends_with("task-definition/demo-family:1"));
        assert!(second.id.ends_with("task-definition/demo-family:2"));

        // Both revisions are live until the old one is deregistered.
        assert_eq!(provider.live_count(), 2);
        provider.delete(&first).await.unwrap();
        assert!(provider.is_live("task-definition:demo-task"));
    }

    #[tokio::test]
    async fn test_simulated_failure_and_call_log() {
        let provider = LocalProvider::new("us-east-1");
        provider.fail_on("vpc:demo-vpc");

        assert!(matches!(
            provider.create(&vpc()).await,
            Err(CloudError::ApiError(_))
        ));
        assert_eq!(
            provider.calls(),
            vec![ProviderCall {
                operation: Operation::Create,
                resource: "vpc:demo-vpc".to_string(),
            }]
        );
        assert_eq!(provider.live_count(), 0);
    }

    #[tokio::test]
    async fn test_adopted_state_counts_as_live() {
        let mut state = GlobalState::new();
        state.set_resource(
            "vpc:demo-vpc".to_string(),
            ResourceState::new("vpc-0123456789abcdef0", "vpc")
                .with_attribute("id", json!("vpc-0123456789abcdef0")),
        );
        state.set_resource(
            "subnet:demo-public-0".to_string(),
            ResourceState::new("subnet-0123456789abcdef0", "subnet")
                .with_attribute("id", json!("subnet-0123456789abcdef0"))
                .with_declaration(
                    json!({"vpcId": output::placeholder("vpc:demo-vpc", "id")}),
                    vec!["vpc:demo-vpc".to_string()],
                    Some("vpc:demo-vpc".to_string()),
                ),
        );

        let provider = LocalProvider::new("us-east-1");
        provider.adopt_state(&state);
        assert_eq!(provider.live_count(), 2);

        // The adopted subnet still references the adopted VPC.
        let vpc = state.get_resource("vpc:demo-vpc").unwrap();
        assert!(matches!(
            provider.delete(vpc).await,
            Err(CloudError::ApiError(_))
        ));
    }
}
