//! Planned changes and their outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One step of a plan, aimed at a single `kind:name` resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// `<verb>-<kind>:<name>`, stable across runs
    pub id: String,
    pub action_type: ActionType,
    pub resource_type: String,
    pub resource_id: String,
    pub description: String,
    /// Extra facts for display (`changed`, `providerId`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

impl Action {
    pub fn new(
        action_type: ActionType,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let resource_type = resource_type.into();
        let resource_id = resource_id.into();
        let id = format!("{}-{}:{}", action_type, resource_type, resource_id);
        Self {
            id,
            action_type,
            resource_type,
            resource_id,
            description: description.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn resource_key(&self) -> String {
        format!("{}:{}", self.resource_type, self.resource_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    /// Change in place; the provider id survives
    Update,
    /// New instance first, old one deleted after dependents moved over
    Replace,
    Delete,
    NoOp,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one action during apply or destroy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: String,
    /// Summary on success, provider error on failure, reason when skipped
    pub message: String,
}

/// Outcome of an apply or destroy run
///
/// Nothing is rolled back: whatever succeeded stays recorded in state even
/// when other actions failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    pub succeeded: Vec<ActionResult>,
    pub failed: Vec<ActionResult>,
    /// Not attempted because something upstream failed
    pub skipped: Vec<ActionResult>,
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn add_success(&mut self, action_id: String, message: String) {
        self.succeeded.push(ActionResult { action_id, message });
    }

    pub fn add_failure(&mut self, action_id: String, error: String) {
        self.failed.push(ActionResult {
            action_id,
            message: error,
        });
    }

    pub fn add_skipped(&mut self, action_id: String, reason: String) {
        self.skipped.push(ActionResult {
            action_id,
            message: reason,
        });
    }
}

/// Ordered actions produced by `Engine::plan`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Creates, updates and replaces in dependency order, then deletes in
    /// reverse dependency order
    pub actions: Vec<Action>,
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    pub fn action_for(&self, resource_key: &str) -> Option<&Action> {
        self.actions
            .iter()
            .find(|a| a.resource_key() == resource_key)
    }

    pub fn summary(&self) -> PlanSummary {
        self.actions
            .iter()
            .fold(PlanSummary::default(), |mut summary, action| {
                match action.action_type {
                    ActionType::Create => summary.create += 1,
                    ActionType::Update => summary.update += 1,
                    ActionType::Replace => summary.replace += 1,
                    ActionType::Delete => summary.delete += 1,
                    ActionType::NoOp => summary.no_change += 1,
                }
                summary
            })
    }
}

/// Per-verb action counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.no_change
        )
    }
}
