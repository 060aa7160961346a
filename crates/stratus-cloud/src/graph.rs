//! Resource dependency graph
//!
//! Edges point from a dependency to its dependent, so a topological walk is
//! a valid creation order and its reverse a valid teardown order.

use crate::error::{CloudError, Result};
use crate::provider::ResourceSet;
use crate::state::GlobalState;
use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index: IndexMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Graph of declared resources; every dependency must be declared too
    pub fn from_resources(resources: &ResourceSet) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = IndexMap::new();
        for resource in resources.iter() {
            let key = resource.key();
            let node = graph.add_node(key.clone());
            index.insert(key, node);
        }

        for resource in resources.iter() {
            let key = resource.key();
            let node = index[&key];
            let owners = resource.parent.iter();
            for dependency in resource.depends_on.iter().chain(owners) {
                let Some(&from) = index.get(dependency) else {
                    return Err(CloudError::UnknownDependency {
                        resource: key,
                        dependency: dependency.clone(),
                    });
                };
                graph.update_edge(from, node, ());
            }
        }

        let built = Self { graph, index };
        built.check_acyclic()?;
        Ok(built)
    }

    /// Graph of recorded resources; edges to resources no longer recorded are dropped
    pub fn from_state(state: &GlobalState) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = IndexMap::new();
        for key in state.resources.keys() {
            let node = graph.add_node(key.clone());
            index.insert(key.clone(), node);
        }

        for (key, resource) in &state.resources {
            let node = index[key];
            for dependency in resource.depends_on.iter().chain(resource.parent.iter()) {
                match index.get(dependency) {
                    Some(&from) => {
                        graph.update_edge(from, node, ());
                    }
                    None => tracing::debug!(
                        "Ignoring edge {} -> {}: dependency no longer recorded",
                        dependency,
                        key
                    ),
                }
            }
        }

        let built = Self { graph, index };
        built.check_acyclic()?;
        Ok(built)
    }

    fn check_acyclic(&self) -> Result<()> {
        toposort(&self.graph, None)
            .map(|_| ())
            .map_err(|cycle| CloudError::DependencyCycle(self.graph[cycle.node_id()].clone()))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Resources grouped by depth: every resource in a wave only depends on
    /// earlier waves, so a wave can be processed concurrently
    pub fn waves(&self) -> Vec<Vec<String>> {
        let mut depth: IndexMap<NodeIndex, usize> = IndexMap::new();
        let mut remaining: Vec<NodeIndex> = self.index.values().copied().collect();

        // Declaration order is kept inside each wave.
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|&node| {
                let mut level = 0;
                for dep in self.graph.neighbors_directed(node, Direction::Incoming) {
                    match depth.get(&dep) {
                        Some(d) => level = level.max(d + 1),
                        None => return true,
                    }
                }
                depth.insert(node, level);
                false
            });
            // The graph was checked acyclic on construction.
            debug_assert!(remaining.len() < before);
            if remaining.len() == before {
                break;
            }
        }

        let max_depth = depth.values().copied().max().map_or(0, |d| d + 1);
        let mut waves = vec![Vec::new(); max_depth];
        for key in self.index.keys() {
            let node = self.index[key];
            if let Some(&level) = depth.get(&node) {
                waves[level].push(key.clone());
            }
        }
        waves
    }

    /// Creation order
    pub fn build_order(&self) -> Vec<String> {
        self.waves().into_iter().flatten().collect()
    }

    /// Deletion order: every dependent before what it depends on
    pub fn teardown_order(&self) -> Vec<String> {
        let mut order = self.build_order();
        order.reverse();
        order
    }

    /// Direct dependencies of a resource
    pub fn dependencies(&self, key: &str) -> Vec<String> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Direct dependents of a resource
    pub fn dependents(&self, key: &str) -> Vec<String> {
        self.neighbors(key, Direction::Outgoing)
    }

    fn neighbors(&self, key: &str, direction: Direction) -> Vec<String> {
        let Some(&node) = self.index.get(key) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        keys.sort();
        keys
    }

    /// A resource and everything that transitively depends on it
    pub fn with_transitive_dependents(&self, key: &str) -> Vec<String> {
        let Some(&start) = self.index.get(key) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            found.push(self.graph[node].clone());
        }
        found
    }

    /// Teardown order restricted to `key` and its transitive dependents
    pub fn subtree_teardown_order(&self, key: &str) -> Vec<String> {
        let members = self.with_transitive_dependents(key);
        self.teardown_order()
            .into_iter()
            .filter(|k| members.contains(k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ResourceConfig;
    use crate::state::ResourceState;
    use serde_json::json;

    fn network() -> ResourceSet {
        let mut set = ResourceSet::new();
        set.add(ResourceConfig::new("vpc", "main", json!({})));
        set.add(ResourceConfig::new("subnet", "public-0", json!({})).with_parent("vpc:main"));
        set.add(ResourceConfig::new("internet-gateway", "igw", json!({})).with_parent("vpc:main"));
        set.add(
            ResourceConfig::new("route-table", "public", json!({}))
                .with_parent("vpc:main")
                .with_dependency("internet-gateway:igw"),
        );
        set.add(
            ResourceConfig::new("route-table-association", "public-0", json!({}))
                .with_parent("route-table:public")
                .with_dependency("subnet:public-0"),
        );
        set
    }

    fn position(order: &[String], key: &str) -> usize {
        order.iter().position(|k| k == key).unwrap()
    }

    #[test]
    fn test_build_order_respects_dependencies() {
        let graph = DependencyGraph::from_resources(&network()).unwrap();
        let order = graph.build_order();

        assert_eq!(order.len(), 5);
        assert_eq!(order[0], "vpc:main");
        assert!(position(&order, "internet-gateway:igw") < position(&order, "route-table:public"));
        assert!(
            position(&order, "subnet:public-0")
                < position(&order, "route-table-association:public-0")
        );
    }

    #[test]
    fn test_waves_group_independent_resources() {
        let graph = DependencyGraph::from_resources(&network()).unwrap();
        let waves = graph.waves();

        assert_eq!(waves[0], vec!["vpc:main"]);
        assert_eq!(waves[1], vec!["subnet:public-0", "internet-gateway:igw"]);
        assert_eq!(waves[2], vec!["route-table:public"]);
        assert_eq!(waves[3], vec!["route-table-association:public-0"]);
    }

    #[test]
    fn test_teardown_is_reverse_of_build() {
        let graph = DependencyGraph::from_resources(&network()).unwrap();
        let mut teardown = graph.teardown_order();
        teardown.reverse();
        assert_eq!(teardown, graph.build_order());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut set = ResourceSet::new();
        set.add(ResourceConfig::new("subnet", "a", json!({})).with_dependency("vpc:missing"));

        match DependencyGraph::from_resources(&set) {
            Err(CloudError::UnknownDependency {
                resource,
                dependency,
            }) => {
                assert_eq!(resource, "subnet:a");
                assert_eq!(dependency, "vpc:missing");
            }
            other => panic!("Expected UnknownDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_rejected() {
        let mut set = ResourceSet::new();
        set.add(ResourceConfig::new("a", "x", json!({})).with_dependency("b:x"));
        set.add(ResourceConfig::new("b", "x", json!({})).with_dependency("a:x"));

        assert!(matches!(
            DependencyGraph::from_resources(&set),
            Err(CloudError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_subtree_teardown() {
        let graph = DependencyGraph::from_resources(&network()).unwrap();

        let subtree = graph.subtree_teardown_order("route-table:public");
        assert_eq!(
            subtree,
            vec!["route-table-association:public-0", "route-table:public"]
        );

        let everything = graph.subtree_teardown_order("vpc:main");
        assert_eq!(everything.len(), 5);
        assert_eq!(everything.last().unwrap(), "vpc:main");
    }

    #[test]
    fn test_direct_neighbors() {
        let graph = DependencyGraph::from_resources(&network()).unwrap();
        assert_eq!(
            graph.dependencies("route-table:public"),
            vec!["internet-gateway:igw", "vpc:main"]
        );
        assert_eq!(
            graph.dependents("subnet:public-0"),
            vec!["route-table-association:public-0"]
        );
    }

    #[test]
    fn test_state_graph_drops_dangling_edges() {
        let mut state = GlobalState::new();
        state.set_resource(
            "subnet:a".to_string(),
            ResourceState::new("subnet-1", "subnet").with_declaration(
                json!({}),
                vec!["vpc:gone".to_string()],
                None,
            ),
        );

        let graph = DependencyGraph::from_state(&state).unwrap();
        assert_eq!(graph.teardown_order(), vec!["subnet:a"]);
    }
}
