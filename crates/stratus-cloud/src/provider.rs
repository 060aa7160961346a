//! Provider contract and the declared resource graph it consumes

use crate::error::Result;
use crate::state::ResourceState;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Marker in `replace_on` meaning every change forces replacement
pub const REPLACE_ON_ANY: &str = "*";

/// Creates, updates and deletes one resource kind-agnostically
///
/// The engine hands a provider one fully resolved resource at a time and
/// records whatever identifiers it returns. Providers never see unresolved
/// output placeholders.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Short name used in logs ("local", "aws")
    fn name(&self) -> &str;

    /// Create a resource and report its generated identifiers
    async fn create(&self, resource: &ResourceConfig) -> Result<ResourceState>;

    /// Update a live resource in place
    async fn update(
        &self,
        current: &ResourceState,
        resource: &ResourceConfig,
    ) -> Result<ResourceState>;

    /// Delete a live resource
    async fn delete(&self, current: &ResourceState) -> Result<()>;
}

/// Set of resources to be managed, in declaration order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSet {
    /// Resources indexed by `type:id`
    pub resources: IndexMap<String, ResourceConfig>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, resource: ResourceConfig) {
        self.resources.insert(resource.key(), resource);
    }

    pub fn get(&self, resource_type: &str, id: &str) -> Option<&ResourceConfig> {
        let key = format!("{}:{}", resource_type, id);
        self.resources.get(&key)
    }

    pub fn get_by_key(&self, key: &str) -> Option<&ResourceConfig> {
        self.resources.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.resources.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceConfig> {
        self.resources.values()
    }

    pub fn by_type(&self, resource_type: &str) -> Vec<&ResourceConfig> {
        self.resources
            .values()
            .filter(|r| r.resource_type == resource_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Declared configuration for a cloud resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource type (e.g., "vpc", "subnet")
    pub resource_type: String,

    /// Logical resource name, unique per type
    pub id: String,

    /// Key of the owning resource, torn down together with it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Keys of every resource this one must be created after
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Top-level config keys that cannot change on a live resource
    #[serde(default)]
    pub replace_on: Vec<String>,

    /// Resource-specific configuration, possibly holding output placeholders
    pub config: serde_json::Value,
}

impl ResourceConfig {
    pub fn new(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            parent: None,
            depends_on: Vec::new(),
            replace_on: Vec::new(),
            config,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        let dependency = dependency.into();
        if !self.depends_on.contains(&dependency) {
            self.depends_on.push(dependency);
        }
        self
    }

    pub fn with_replace_on(mut self, key: impl Into<String>) -> Self {
        self.replace_on.push(key.into());
        self
    }

    /// Get the full resource key (type:id)
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource_type, self.id)
    }

    /// Get a configuration value as a specific type
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Top-level config keys whose values differ from `previous`
    pub fn changed_keys(&self, previous: &serde_json::Value) -> Vec<String> {
        let empty = serde_json::Map::new();
        let current = self.config.as_object().unwrap_or(&empty);
        let previous = previous.as_object().unwrap_or(&empty);

        let mut changed: Vec<String> = current
            .iter()
            .filter(|(k, v)| previous.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.extend(
            previous
                .keys()
                .filter(|k| !current.contains_key(*k))
                .cloned(),
        );
        changed.sort();
        changed
    }

    /// Whether any of `changed` requires destroying and recreating the resource
    pub fn forces_replacement(&self, changed: &[String]) -> bool {
        !changed.is_empty()
            && self
                .replace_on
                .iter()
                .any(|k| k == REPLACE_ON_ANY || changed.contains(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_set_preserves_declaration_order() {
        let mut set = ResourceSet::new();
        set.add(ResourceConfig::new("vpc", "main", json!({})));
        set.add(ResourceConfig::new("subnet", "public-0", json!({})));
        set.add(ResourceConfig::new("subnet", "private-0", json!({})));

        let keys: Vec<String> = set.iter().map(|r| r.key()).collect();
        assert_eq!(
            keys,
            vec!["vpc:main", "subnet:public-0", "subnet:private-0"]
        );
        assert_eq!(set.by_type("subnet").len(), 2);
        assert!(set.get("vpc", "main").is_some());
    }

    #[test]
    fn test_changed_keys() {
        let resource = ResourceConfig::new(
            "subnet",
            "public-0",
            json!({"cidrBlock": "10.0.1.0/24", "tags": {"a": "b"}}),
        );
        let previous = json!({"cidrBlock": "10.0.0.0/24", "tags": {"a": "b"}, "old": 1});
        assert_eq!(resource.changed_keys(&previous), vec!["cidrBlock", "old"]);
        assert!(resource.changed_keys(&resource.config).is_empty());
    }

    #[test]
    fn test_forces_replacement() {
        let resource = ResourceConfig::new("subnet", "public-0", json!({}))
            .with_replace_on("cidrBlock");
        assert!(resource.forces_replacement(&["cidrBlock".to_string()]));
        assert!(!resource.forces_replacement(&["tags".to_string()]));
        assert!(!resource.forces_replacement(&[]));

        let immutable =
            ResourceConfig::new("task-definition", "app", json!({})).with_replace_on(REPLACE_ON_ANY);
        assert!(immutable.forces_replacement(&["cpu".to_string()]));
    }

    #[test]
    fn test_with_dependency_deduplicates() {
        let resource = ResourceConfig::new("subnet", "public-0", json!({}))
            .with_dependency("vpc:main")
            .with_dependency("vpc:main");
        assert_eq!(resource.depends_on, vec!["vpc:main"]);
    }
}
