//! Declaration scope
//!
//! A [`Scope`] collects descriptors in declaration order. It only accepts an
//! entity whose dependencies are already declared and whose property set
//! references no entity it failed to list, so the graph it hands to the
//! engine is complete and acyclic by construction.

use crate::error::{Result, TopologyError};
use crate::output::{Output, OutputSlot};
use crate::resource::{Declare, Descriptor, EntityRef};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use stratus_cloud::output::references;
use stratus_cloud::{GlobalState, ResourceSet};

#[derive(Default)]
pub struct Scope {
    declared: IndexMap<String, Descriptor>,
    outputs: Vec<Box<dyn OutputSlot>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity, checking identity and dependency completeness
    pub fn declare<D: Declare + ?Sized>(&mut self, entity: &D) -> Result<EntityRef> {
        let descriptor = entity.declare();
        let key = descriptor.entity.key();

        if self.declared.contains_key(&key) {
            return Err(TopologyError::DuplicateEntity(key));
        }

        let listed: Vec<String> = descriptor.dependencies.iter().map(EntityRef::key).collect();
        let undeclared = |dependency: String| TopologyError::UndeclaredDependency {
            entity: key.clone(),
            dependency,
        };

        if let Some(owner) = &descriptor.owner {
            if !listed.contains(&owner.key()) {
                return Err(undeclared(owner.key()));
            }
        }
        for reference in references(&descriptor.properties) {
            if !listed.contains(&reference.resource) {
                return Err(undeclared(reference.resource));
            }
        }
        if let Some(missing) = listed.iter().find(|d| !self.declared.contains_key(*d)) {
            return Err(undeclared(missing.clone()));
        }

        tracing::debug!("Declared {} ({} dependencies)", key, listed.len());
        let entity = descriptor.entity.clone();
        self.declared.insert(key, descriptor);
        Ok(entity)
    }

    /// Hand out an output of a declared entity and remember it for [`Scope::resolve`]
    pub fn output<T>(&mut self, entity: &EntityRef, attribute: &'static str) -> Output<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let output = Output::new(entity.clone(), attribute);
        self.outputs.push(Box::new(output.clone()));
        output
    }

    pub fn get(&self, entity: &EntityRef) -> Option<&Descriptor> {
        self.declared.get(&entity.key())
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.declared.contains_key(&entity.key())
    }

    /// Descriptors in declaration order
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.declared.values()
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    pub fn to_resource_set(&self) -> ResourceSet {
        let mut set = ResourceSet::new();
        for descriptor in self.declared.values() {
            set.add(descriptor.to_resource_config());
        }
        set
    }

    /// Fill every issued output whose value is recorded in `state`
    ///
    /// Returns how many outputs were filled by this call. Outputs resolved
    /// earlier are left alone; outputs with no recorded value stay pending.
    pub fn resolve(&self, state: &GlobalState) -> Result<usize> {
        let mut filled = 0;
        for slot in self.outputs.iter().filter(|s| !s.is_resolved()) {
            let reference = slot.reference();
            if let Some(value) = state.attribute(&reference.resource, &reference.attribute) {
                slot.fill(value)?;
                filled += 1;
            }
        }
        tracing::debug!("Resolved {} outputs", filled);
        Ok(filled)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("declared", &self.declared.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use serde_json::{Value, json};
    use stratus_cloud::ResourceState;

    struct Network;

    impl Declare for Network {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Vpc
        }

        fn name(&self) -> &str {
            "demo-vpc"
        }

        fn properties(&self) -> Value {
            json!({"cidrBlock": "10.0.0.0/16"})
        }

        fn dependencies(&self) -> Vec<EntityRef> {
            Vec::new()
        }
    }

    struct Child {
        vpc_id: Output<String>,
        listed: bool,
        owned: bool,
    }

    impl Declare for Child {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Subnet
        }

        fn name(&self) -> &str {
            "demo-public-subnet-0"
        }

        fn owner(&self) -> Option<EntityRef> {
            self.owned.then(|| self.vpc_id.source().clone())
        }

        fn properties(&self) -> Value {
            json!({"vpcId": self.vpc_id})
        }

        fn dependencies(&self) -> Vec<EntityRef> {
            if self.listed {
                vec![self.vpc_id.source().clone()]
            } else {
                Vec::new()
            }
        }
    }

    fn child(scope: &mut Scope, listed: bool, owned: bool) -> Child {
        let vpc = EntityRef::new(ResourceKind::Vpc, "demo-vpc");
        Child {
            vpc_id: scope.output(&vpc, "id"),
            listed,
            owned,
        }
    }

    #[test]
    fn test_declares_in_order() {
        let mut scope = Scope::new();
        scope.declare(&Network).unwrap();
        let subnet = child(&mut scope, true, true);
        scope.declare(&subnet).unwrap();

        let set = scope.to_resource_set();
        let keys: Vec<String> = set.iter().map(|r| r.key()).collect();
        assert_eq!(keys, vec!["vpc:demo-vpc", "subnet:demo-public-subnet-0"]);

        let config = set.get_by_key("subnet:demo-public-subnet-0").unwrap();
        assert_eq!(config.parent.as_deref(), Some("vpc:demo-vpc"));
        assert_eq!(config.depends_on, vec!["vpc:demo-vpc"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut scope = Scope::new();
        scope.declare(&Network).unwrap();
        match scope.declare(&Network) {
            Err(TopologyError::DuplicateEntity(key)) => assert_eq!(key, "vpc:demo-vpc"),
            other => panic!("Expected DuplicateEntity, got {:?}", other),
        }
    }

    #[test]
    fn test_unlisted_reference_rejected() {
        let mut scope = Scope::new();
        scope.declare(&Network).unwrap();
        let subnet = child(&mut scope, false, false);

        match scope.declare(&subnet) {
            Err(TopologyError::UndeclaredDependency { entity, dependency }) => {
                assert_eq!(entity, "subnet:demo-public-subnet-0");
                assert_eq!(dependency, "vpc:demo-vpc");
            }
            other => panic!("Expected UndeclaredDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_dependency_must_be_declared_first() {
        let mut scope = Scope::new();
        let subnet = child(&mut scope, true, true);
        assert!(matches!(
            scope.declare(&subnet),
            Err(TopologyError::UndeclaredDependency { .. })
        ));
        assert!(scope.is_empty());
    }

    #[test]
    fn test_resolve_fills_issued_outputs() {
        let mut scope = Scope::new();
        let vpc = scope.declare(&Network).unwrap();
        let id: Output<String> = scope.output(&vpc, "id");

        let mut state = GlobalState::new();
        assert_eq!(scope.resolve(&state).unwrap(), 0);

        state.set_resource(
            vpc.key(),
            ResourceState::new("vpc-0abc", "vpc").with_attribute("id", json!("vpc-0abc")),
        );
        assert_eq!(scope.resolve(&state).unwrap(), 1);
        assert_eq!(id.get().map(String::as_str), Some("vpc-0abc"));

        // Already resolved outputs are skipped on later calls.
        assert_eq!(scope.resolve(&state).unwrap(), 0);
    }
}
