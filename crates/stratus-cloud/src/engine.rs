//! Plan/apply engine
//!
//! The engine diffs a declared `ResourceSet` against recorded state and then
//! walks the dependency graph, resolving output placeholders from state just
//! before each provider call. It never retries and never rolls back: a
//! failed resource keeps whatever was created before it, and everything that
//! depends on it is skipped.

use crate::action::{Action, ActionType, ApplyResult, Plan};
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::output::{self, OutputReference};
use crate::provider::{CloudProvider, ResourceConfig, ResourceSet};
use crate::state::{GlobalState, ResourceState, ResourceStatus};
use futures_util::future::join_all;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

pub struct Engine<P> {
    provider: P,
}

/// Top-level keys of `resource` whose value embeds an output of a resource
/// that is being created or replaced in this plan
fn upstream_changes(resource: &ResourceConfig, recreated: &HashSet<String>) -> Vec<String> {
    let Some(config) = resource.config.as_object() else {
        return Vec::new();
    };
    config
        .iter()
        .filter(|(_, value)| {
            output::references(value)
                .iter()
                .any(|r| recreated.contains(&r.resource))
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// Detail set on an update that only re-records dependency edges
const REFRESH_ONLY: &str = "refreshOnly";

/// Edge fields whose declared value differs from the recorded one
fn edge_changes(resource: &ResourceConfig, current: &ResourceState) -> Vec<String> {
    let mut declared: Vec<&String> = resource.depends_on.iter().collect();
    let mut recorded: Vec<&String> = current.depends_on.iter().collect();
    declared.sort();
    recorded.sort();

    let mut changed = Vec::new();
    if declared != recorded {
        changed.push("dependsOn".to_string());
    }
    if resource.parent != current.parent {
        changed.push("parent".to_string());
    }
    changed
}

/// Recorded resources that still depend on `key`
fn blocking_dependents(state: &GlobalState, key: &str) -> Vec<String> {
    state
        .resources
        .iter()
        .filter(|(other, r)| {
            other.as_str() != key
                && (r.depends_on.iter().any(|d| d == key) || r.parent.as_deref() == Some(key))
        })
        .map(|(other, _)| other.clone())
        .collect()
}

fn resource_id(key: &str) -> &str {
    key.split_once(':').map_or(key, |(_, id)| id)
}

impl<P: CloudProvider> Engine<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Diff the declared resources against recorded state
    pub fn plan(&self, desired: &ResourceSet, state: &GlobalState) -> Result<Plan> {
        let graph = DependencyGraph::from_resources(desired)?;
        let mut recreated: HashSet<String> = HashSet::new();
        let mut actions = Vec::new();

        for key in graph.build_order() {
            let Some(resource) = desired.get_by_key(&key) else {
                continue;
            };

            let action = match state.get_resource(&key) {
                None => {
                    recreated.insert(key.clone());
                    Action::new(
                        ActionType::Create,
                        &resource.resource_type,
                        &resource.id,
                        format!("create {}", key),
                    )
                }
                Some(current) => {
                    let mut changed = resource.changed_keys(&current.declared);
                    for upstream in upstream_changes(resource, &recreated) {
                        if !changed.contains(&upstream) {
                            changed.push(upstream);
                        }
                    }
                    changed.sort();

                    if resource.forces_replacement(&changed) {
                        recreated.insert(key.clone());
                        Action::new(
                            ActionType::Replace,
                            &resource.resource_type,
                            &resource.id,
                            format!("replace {} ({})", key, changed.join(", ")),
                        )
                        .with_detail("changed", json!(changed))
                        .with_detail("providerId", json!(current.id))
                    } else if !changed.is_empty() {
                        Action::new(
                            ActionType::Update,
                            &resource.resource_type,
                            &resource.id,
                            format!("update {} ({})", key, changed.join(", ")),
                        )
                        .with_detail("changed", json!(changed))
                        .with_detail("providerId", json!(current.id))
                    } else if !edge_changes(resource, current).is_empty() {
                        // Nothing the provider sees changed, but the recorded
                        // edges decide what may be deleted later.
                        let edges = edge_changes(resource, current);
                        Action::new(
                            ActionType::Update,
                            &resource.resource_type,
                            &resource.id,
                            format!("update {} ({})", key, edges.join(", ")),
                        )
                        .with_detail("changed", json!(edges))
                        .with_detail("providerId", json!(current.id))
                        .with_detail(REFRESH_ONLY, json!(true))
                    } else {
                        Action::new(
                            ActionType::NoOp,
                            &resource.resource_type,
                            &resource.id,
                            format!("{} is up to date", key),
                        )
                    }
                }
            };
            actions.push(action);
        }

        let recorded = DependencyGraph::from_state(state)?;
        for key in recorded.teardown_order() {
            if desired.contains_key(&key) {
                continue;
            }
            if let Some(current) = state.get_resource(&key) {
                actions.push(
                    Action::new(
                        ActionType::Delete,
                        &current.resource_type,
                        resource_id(&key),
                        format!("delete {}", key),
                    )
                    .with_detail("providerId", json!(current.id)),
                );
            }
        }

        let plan = Plan::new(actions);
        tracing::debug!("Planned: {}", plan.summary());
        Ok(plan)
    }

    /// Execute a plan produced by [`Engine::plan`] for the same `desired` set
    ///
    /// Creates, updates and replacement creates run wave by wave, every wave
    /// submitted concurrently. A replaced resource is created before its old
    /// instance is deleted, so in-place dependents can be repointed first.
    /// Old instances and removed resources are then deleted, dependents first.
    pub async fn apply(
        &self,
        plan: &Plan,
        desired: &ResourceSet,
        state: &mut GlobalState,
    ) -> Result<ApplyResult> {
        let start = Instant::now();
        let mut result = ApplyResult::new();
        let graph = DependencyGraph::from_resources(desired)?;
        let recorded = DependencyGraph::from_state(state)?;
        let mut failed: HashSet<String> = HashSet::new();

        let retired: HashMap<String, ResourceState> = plan
            .actions_by_type(ActionType::Replace)
            .into_iter()
            .filter_map(|a| {
                let key = a.resource_key();
                state.get_resource(&key).cloned().map(|r| (key, r))
            })
            .collect();

        for wave in graph.waves() {
            let mut pending = Vec::new();

            for key in wave {
                let Some(action) = plan.action_for(&key) else {
                    continue;
                };
                if !matches!(
                    action.action_type,
                    ActionType::Create | ActionType::Update | ActionType::Replace
                ) {
                    continue;
                }
                let Some(resource) = desired.get_by_key(&key) else {
                    continue;
                };
                if let Some(upstream) = graph
                    .dependencies(&key)
                    .into_iter()
                    .find(|d| failed.contains(d))
                {
                    tracing::warn!("Skipping {}: {} failed", key, upstream);
                    failed.insert(key.clone());
                    result.add_skipped(action.id.clone(), format!("{} failed", upstream));
                    continue;
                }

                if action.details.get(REFRESH_ONLY) == Some(&json!(true)) {
                    if let Some(current) = state.get_resource(&key).cloned() {
                        let refreshed = current.with_declaration(
                            resource.config.clone(),
                            resource.depends_on.clone(),
                            resource.parent.clone(),
                        );
                        state.set_resource(key.clone(), refreshed);
                        tracing::debug!("Re-recorded dependency edges of {}", key);
                        result.add_success(action.id.clone(), format!("refresh {}", key));
                    }
                    continue;
                }

                let lookup = |r: &OutputReference| {
                    state.attribute(&r.resource, &r.attribute).cloned()
                };
                let resolved = match output::resolve(&resource.config, &lookup) {
                    Ok(config) => ResourceConfig {
                        config,
                        ..resource.clone()
                    },
                    Err(e) => {
                        failed.insert(key.clone());
                        result.add_failure(action.id.clone(), e.to_string());
                        continue;
                    }
                };
                let current = match action.action_type {
                    ActionType::Update => state.get_resource(&key).cloned(),
                    _ => None,
                };
                pending.push((action, resource, resolved, current));
            }

            let outcomes = join_all(pending.iter().map(
                |(action, _, resolved, current)| async move {
                    tracing::info!(
                        provider = self.provider.name(),
                        "{} {}",
                        action.action_type,
                        resolved.key()
                    );
                    match current {
                        Some(current) => self.provider.update(current, resolved).await,
                        None => self.provider.create(resolved).await,
                    }
                },
            ))
            .await;

            for ((action, resource, _, current), outcome) in pending.into_iter().zip(outcomes) {
                let key = resource.key();
                match outcome {
                    Ok(live) => {
                        let recorded = Self::record(resource, live, current.as_ref());
                        result.add_success(
                            action.id.clone(),
                            format!("{} {} ({})", action.action_type, key, recorded.id),
                        );
                        state.set_resource(key, recorded);
                    }
                    Err(e) => {
                        tracing::warn!("{} {} failed: {}", action.action_type, key, e);
                        failed.insert(key);
                        result.add_failure(action.id.clone(), e.to_string());
                    }
                }
            }
        }

        // Teardown order of the state as it was before this apply.
        for key in recorded.teardown_order() {
            if let Some(old) = retired.get(&key) {
                if failed.contains(&key) {
                    continue;
                }
                let action_id = format!("{}-{}", ActionType::Replace, key);
                tracing::info!(
                    provider = self.provider.name(),
                    "delete replaced {} ({})",
                    key,
                    old.id
                );
                if let Err(e) = self.provider.delete(old).await {
                    tracing::warn!("delete replaced {} failed: {}", key, e);
                    result.add_failure(action_id, format!("old instance {}: {}", old.id, e));
                }
            } else if let Some(action) = plan
                .action_for(&key)
                .filter(|a| a.action_type == ActionType::Delete)
            {
                self.delete_recorded(&key, &action.id, state, &mut result)
                    .await;
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Delete every recorded resource, dependents first
    pub async fn destroy(&self, state: &mut GlobalState) -> Result<ApplyResult> {
        let order = DependencyGraph::from_state(state)?.teardown_order();
        self.teardown(order, state).await
    }

    /// Delete one recorded resource together with everything that depends on it
    pub async fn destroy_subtree(
        &self,
        key: &str,
        state: &mut GlobalState,
    ) -> Result<ApplyResult> {
        let order = DependencyGraph::from_state(state)?.subtree_teardown_order(key);
        self.teardown(order, state).await
    }

    async fn teardown(&self, order: Vec<String>, state: &mut GlobalState) -> Result<ApplyResult> {
        let start = Instant::now();
        let mut result = ApplyResult::new();
        for key in order {
            let action_id = format!("{}-{}", ActionType::Delete, key);
            self.delete_recorded(&key, &action_id, state, &mut result)
                .await;
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn delete_recorded(
        &self,
        key: &str,
        action_id: &str,
        state: &mut GlobalState,
        result: &mut ApplyResult,
    ) {
        let Some(current) = state.get_resource(key).cloned() else {
            return;
        };

        let blockers = blocking_dependents(state, key);
        if !blockers.is_empty() {
            tracing::warn!("Not deleting {}: still needed by {}", key, blockers.join(", "));
            result.add_skipped(
                action_id.to_string(),
                format!("still needed by {}", blockers.join(", ")),
            );
            return;
        }

        tracing::info!(provider = self.provider.name(), "delete {}", key);
        match self.provider.delete(&current).await {
            Ok(()) => {
                state.remove_resource(key);
                result.add_success(action_id.to_string(), format!("delete {}", key));
            }
            Err(e) => {
                tracing::warn!("delete {} failed: {}", key, e);
                result.add_failure(action_id.to_string(), e.to_string());
            }
        }
    }

    fn record(
        resource: &ResourceConfig,
        live: ResourceState,
        previous: Option<&ResourceState>,
    ) -> ResourceState {
        let mut recorded = live.with_status(ResourceStatus::Running).with_declaration(
            resource.config.clone(),
            resource.depends_on.clone(),
            resource.parent.clone(),
        );
        recorded.resource_type = resource.resource_type.clone();
        if !recorded.attributes.contains_key("id") {
            let id = json!(recorded.id);
            recorded.attributes.insert("id".to_string(), id);
        }
        if let Some(previous) = previous {
            recorded.created_at = previous.created_at;
        }
        recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalProvider, Operation};
    use crate::output::placeholder;
    use crate::provider::REPLACE_ON_ANY;

    fn network(cidr: &str) -> ResourceSet {
        let mut set = ResourceSet::new();
        set.add(
            ResourceConfig::new("vpc", "demo-vpc", json!({"cidrBlock": cidr}))
                .with_replace_on("cidrBlock"),
        );
        set.add(
            ResourceConfig::new(
                "subnet",
                "demo-public-0",
                json!({
                    "vpcId": placeholder("vpc:demo-vpc", "id"),
                    "cidrBlock": "10.0.0.0/24",
                }),
            )
            .with_parent("vpc:demo-vpc")
            .with_dependency("vpc:demo-vpc")
            .with_replace_on("vpcId")
            .with_replace_on("cidrBlock"),
        );
        set.add(
            ResourceConfig::new(
                "internet-gateway",
                "demo-igw",
                json!({"vpcId": placeholder("vpc:demo-vpc", "id"), "tags": {"env": "dev"}}),
            )
            .with_parent("vpc:demo-vpc")
            .with_dependency("vpc:demo-vpc")
            .with_replace_on("vpcId"),
        );
        set
    }

    async fn applied(engine: &Engine<LocalProvider>, desired: &ResourceSet) -> GlobalState {
        let mut state = GlobalState::new();
        let plan = engine.plan(desired, &state).unwrap();
        let result = engine.apply(&plan, desired, &mut state).await.unwrap();
        assert!(result.is_success(), "{:?}", result.failed);
        state
    }

    #[tokio::test]
    async fn test_first_plan_creates_everything() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let plan = engine
            .plan(&network("10.0.0.0/16"), &GlobalState::new())
            .unwrap();
        assert_eq!(plan.summary().create, 3);
        assert_eq!(plan.actions[0].resource_key(), "vpc:demo-vpc");
    }

    #[tokio::test]
    async fn test_apply_resolves_outputs_in_order() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let desired = network("10.0.0.0/16");
        let state = applied(&engine, &desired).await;

        let vpc_id = state.attribute("vpc:demo-vpc", "id").unwrap().clone();
        let subnet = state.get_resource("subnet:demo-public-0").unwrap();
        // Declared config keeps the placeholder; the provider saw the id.
        assert_eq!(
            subnet.declared["vpcId"],
            placeholder("vpc:demo-vpc", "id")
        );
        assert!(vpc_id.as_str().unwrap().starts_with("vpc-"));
        assert_eq!(subnet.parent.as_deref(), Some("vpc:demo-vpc"));

        let calls = engine.provider().calls();
        assert_eq!(calls[0].resource, "vpc:demo-vpc");
        assert_eq!(calls.len(), 3);
    }

    #[tokio::test]
    async fn test_identical_rerun_is_noop() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let desired = network("10.0.0.0/16");
        let mut state = applied(&engine, &desired).await;

        let plan = engine.plan(&desired, &state).unwrap();
        assert!(!plan.has_changes);
        assert_eq!(plan.summary().no_change, 3);

        let calls_before = engine.provider().calls().len();
        engine.apply(&plan, &desired, &mut state).await.unwrap();
        assert_eq!(engine.provider().calls().len(), calls_before);
    }

    #[tokio::test]
    async fn test_mutable_change_updates_in_place() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let desired = network("10.0.0.0/16");
        let mut state = applied(&engine, &desired).await;
        let igw_id = state.get_resource("internet-gateway:demo-igw").unwrap().id.clone();

        let mut changed = desired.clone();
        let igw = changed.resources.get_mut("internet-gateway:demo-igw").unwrap();
        igw.config["tags"] = json!({"env": "prod"});

        let plan = engine.plan(&changed, &state).unwrap();
        let action = plan.action_for("internet-gateway:demo-igw").unwrap();
        assert_eq!(action.action_type, ActionType::Update);
        assert_eq!(action.details["changed"], json!(["tags"]));

        engine.apply(&plan, &changed, &mut state).await.unwrap();
        let igw = state.get_resource("internet-gateway:demo-igw").unwrap();
        assert_eq!(igw.id, igw_id);
        assert_eq!(igw.declared["tags"]["env"], "prod");
    }

    #[tokio::test]
    async fn test_immutable_change_replaces_dependents() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let desired = network("10.0.0.0/16");
        let mut state = applied(&engine, &desired).await;
        let old_vpc = state.get_resource("vpc:demo-vpc").unwrap().id.clone();

        let changed = network("10.1.0.0/16");
        let plan = engine.plan(&changed, &state).unwrap();
        assert_eq!(plan.summary().replace, 3);
        assert_eq!(
            plan.action_for("subnet:demo-public-0").unwrap().details["changed"],
            json!(["vpcId"])
        );

        let result = engine.apply(&plan, &changed, &mut state).await.unwrap();
        assert!(result.is_success(), "{:?}", result.failed);

        let new_vpc = state.attribute("vpc:demo-vpc", "id").unwrap().clone();
        assert_ne!(new_vpc, json!(old_vpc));
        assert_eq!(
            state.get_resource("vpc:demo-vpc").unwrap().declared["cidrBlock"],
            "10.1.0.0/16"
        );
        assert!(engine.provider().is_live("subnet:demo-public-0"));
        assert_eq!(engine.provider().live_count(), 3);
    }

    #[tokio::test]
    async fn test_replace_repoints_in_place_dependents() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let mut desired = network("10.0.0.0/16");
        desired.add(
            ResourceConfig::new(
                "security-group",
                "demo-app",
                json!({"vpcId": placeholder("vpc:demo-vpc", "id")}),
            )
            .with_dependency("vpc:demo-vpc"),
        );
        let mut state = applied(&engine, &desired).await;
        let group_id = state.get_resource("security-group:demo-app").unwrap().id.clone();

        let mut changed = desired.clone();
        let vpc = changed.resources.get_mut("vpc:demo-vpc").unwrap();
        vpc.config = json!({"cidrBlock": "10.1.0.0/16"});
        let plan = engine.plan(&changed, &state).unwrap();
        let action = plan.action_for("security-group:demo-app").unwrap();
        assert_eq!(action.action_type, ActionType::Update);
        assert_eq!(action.details["changed"], json!(["vpcId"]));

        // The group moves to the new VPC before the old one is deleted.
        let result = engine.apply(&plan, &changed, &mut state).await.unwrap();
        assert!(result.is_success(), "{:?}", result.failed);
        assert_eq!(
            state.get_resource("security-group:demo-app").unwrap().id,
            group_id
        );
        assert_eq!(engine.provider().live_count(), 4);

        let rerun = engine.plan(&changed, &state).unwrap();
        assert!(!rerun.has_changes);
    }

    #[tokio::test]
    async fn test_replace_on_any_change() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let mut desired = ResourceSet::new();
        desired.add(
            ResourceConfig::new("task-definition", "app", json!({"cpu": "512"}))
                .with_replace_on(REPLACE_ON_ANY),
        );
        let mut state = applied(&engine, &desired).await;

        let mut changed = ResourceSet::new();
        changed.add(
            ResourceConfig::new("task-definition", "app", json!({"cpu": "1024"}))
                .with_replace_on(REPLACE_ON_ANY),
        );
        let plan = engine.plan(&changed, &state).unwrap();
        assert_eq!(plan.summary().replace, 1);

        let result = engine.apply(&plan, &changed, &mut state).await.unwrap();
        assert!(result.is_success());
        assert_eq!(state.resources_of_type("task-definition").count(), 1);

        let ops: Vec<Operation> = engine.provider().calls().iter().map(|c| c.operation).collect();
        assert_eq!(
            ops,
            vec![Operation::Create, Operation::Create, Operation::Delete]
        );
        let recorded = state.get_resource("task-definition:app").unwrap();
        assert_eq!(recorded.declared["cpu"], "1024");
        assert!(recorded.id.ends_with("task-definition/app:2"));
    }

    #[tokio::test]
    async fn test_removed_resources_are_deleted() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let desired = network("10.0.0.0/16");
        let mut state = applied(&engine, &desired).await;

        let mut smaller = desired.clone();
        smaller.resources.shift_remove("internet-gateway:demo-igw");

        let plan = engine.plan(&smaller, &state).unwrap();
        let deletes = plan.actions_by_type(ActionType::Delete);
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].resource_key(), "internet-gateway:demo-igw");

        let result = engine.apply(&plan, &smaller, &mut state).await.unwrap();
        assert!(result.is_success());
        assert!(state.get_resource("internet-gateway:demo-igw").is_none());
        assert!(!engine.provider().is_live("internet-gateway:demo-igw"));
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_without_rollback() {
        let provider = LocalProvider::new("us-east-1");
        provider.fail_on("subnet:demo-public-0");
        let engine = Engine::new(provider);

        let mut desired = network("10.0.0.0/16");
        desired.add(
            ResourceConfig::new(
                "route-table-association",
                "demo-public-0",
                json!({"subnetId": placeholder("subnet:demo-public-0", "id")}),
            )
            .with_dependency("subnet:demo-public-0"),
        );

        let mut state = GlobalState::new();
        let plan = engine.plan(&desired, &state).unwrap();
        let result = engine.apply(&plan, &desired, &mut state).await.unwrap();

        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(
            result.skipped[0].action_id,
            "create-route-table-association:demo-public-0"
        );
        // Already-created resources stay.
        assert!(state.get_resource("vpc:demo-vpc").is_some());
        assert!(state.get_resource("internet-gateway:demo-igw").is_some());
        assert!(state.get_resource("subnet:demo-public-0").is_none());
    }

    #[tokio::test]
    async fn test_dependency_only_change_unblocks_delete() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let mut desired = network("10.0.0.0/16");
        desired.add(
            ResourceConfig::new(
                "flow-log",
                "demo-flow-log",
                json!({"vpcId": placeholder("vpc:demo-vpc", "id")}),
            )
            .with_dependency("vpc:demo-vpc")
            .with_dependency("internet-gateway:demo-igw"),
        );
        let mut state = applied(&engine, &desired).await;

        let mut changed = desired.clone();
        changed.resources.shift_remove("internet-gateway:demo-igw");
        changed
            .resources
            .get_mut("flow-log:demo-flow-log")
            .unwrap()
            .depends_on = vec!["vpc:demo-vpc".to_string()];

        let plan = engine.plan(&changed, &state).unwrap();
        let action = plan.action_for("flow-log:demo-flow-log").unwrap();
        assert_eq!(action.action_type, ActionType::Update);
        assert_eq!(action.details["changed"], json!(["dependsOn"]));

        let calls_before = engine.provider().calls().len();
        let result = engine.apply(&plan, &changed, &mut state).await.unwrap();
        assert!(result.is_success(), "{:?} {:?}", result.failed, result.skipped);

        // Only the gateway delete reached the provider.
        let calls = engine.provider().calls();
        assert_eq!(calls.len(), calls_before + 1);
        assert_eq!(calls[calls_before].resource, "internet-gateway:demo-igw");
        assert!(state.get_resource("internet-gateway:demo-igw").is_none());
        assert_eq!(
            state.get_resource("flow-log:demo-flow-log").unwrap().depends_on,
            vec!["vpc:demo-vpc"]
        );

        assert!(!engine.plan(&changed, &state).unwrap().has_changes);
    }

    #[tokio::test]
    async fn test_destroy_walks_reverse_dependency_order() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let desired = network("10.0.0.0/16");
        let mut state = applied(&engine, &desired).await;

        let result = engine.destroy(&mut state).await.unwrap();
        assert!(result.is_success(), "{:?}", result.failed);
        assert!(state.is_empty());

        let deletes: Vec<String> = engine
            .provider()
            .calls()
            .into_iter()
            .filter(|c| c.operation == Operation::Delete)
            .map(|c| c.resource)
            .collect();
        assert_eq!(deletes.len(), 3);
        assert_eq!(deletes.last().unwrap(), "vpc:demo-vpc");
    }

    #[tokio::test]
    async fn test_destroy_subtree_keeps_the_rest() {
        let engine = Engine::new(LocalProvider::new("us-east-1"));
        let desired = network("10.0.0.0/16");
        let mut state = applied(&engine, &desired).await;

        engine
            .destroy_subtree("subnet:demo-public-0", &mut state)
            .await
            .unwrap();
        assert!(state.get_resource("subnet:demo-public-0").is_none());
        assert!(state.get_resource("vpc:demo-vpc").is_some());
        assert!(state.get_resource("internet-gateway:demo-igw").is_some());
    }
}
