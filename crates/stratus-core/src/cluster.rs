//! Compute cluster, the scheduling boundary services run in

use crate::error::Result;
use crate::output::Output;
use crate::resource::{Declare, EntityRef, ResourceKind, Tags, named};
use crate::scope::Scope;
use serde_json::{Value, json};

#[derive(Debug, Clone)]
pub struct ClusterHandle {
    pub entity: EntityRef,
    pub arn: Output<String>,
    pub name: String,
}

struct Cluster<'a> {
    name: String,
    tags: &'a Tags,
}

impl Declare for Cluster<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Cluster
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn properties(&self) -> Value {
        json!({
            "name": self.name,
            "tags": named(self.tags, &self.name),
        })
    }

    fn dependencies(&self) -> Vec<EntityRef> {
        Vec::new()
    }
}

pub struct ComputeCluster;

impl ComputeCluster {
    /// Declare `<name>-cluster`
    pub fn create(scope: &mut Scope, name: &str, tags: &Tags) -> Result<ClusterHandle> {
        let name = format!("{}-cluster", name);
        let entity = scope.declare(&Cluster {
            name: name.clone(),
            tags,
        })?;
        Ok(ClusterHandle {
            arn: scope.output(&entity, "arn"),
            entity,
            name,
        })
    }
}
