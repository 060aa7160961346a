//! Typed deferred outputs
//!
//! An [`Output`] stands for a value a provider generates when the entity is
//! created: an ID, an ARN, a DNS name. It can be placed into another
//! entity's properties long before it is known; serialized, it is always the
//! engine's placeholder object, so the declared graph never changes once
//! the value arrives.

use crate::error::{Result, TopologyError};
use crate::resource::EntityRef;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use stratus_cloud::{CloudError, OutputReference, output};

#[derive(Debug)]
pub struct Output<T> {
    source: EntityRef,
    attribute: &'static str,
    cell: Arc<OnceLock<T>>,
}

// Clones share the cell.
impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            attribute: self.attribute,
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> PartialEq for Output<T> {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.attribute == other.attribute
    }
}

impl<T> Eq for Output<T> {}

impl<T> Output<T> {
    pub(crate) fn new(source: EntityRef, attribute: &'static str) -> Self {
        Self {
            source,
            attribute,
            cell: Arc::new(OnceLock::new()),
        }
    }

    /// Entity that produces the value
    pub fn source(&self) -> &EntityRef {
        &self.source
    }

    pub fn attribute(&self) -> &'static str {
        self.attribute
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Set the value; a second call fails and leaves the first value in place
    pub fn resolve(&self, value: T) -> Result<()> {
        self.cell
            .set(value)
            .map_err(|_| TopologyError::OutputAlreadyResolved(self.to_string()))
    }

    pub fn reference(&self) -> OutputReference {
        OutputReference {
            resource: self.source.key(),
            attribute: self.attribute.to_string(),
        }
    }

    pub fn placeholder(&self) -> Value {
        output::placeholder(&self.source.key(), self.attribute)
    }
}

impl<T> std::fmt::Display for Output<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.source, self.attribute)
    }
}

impl<T> Serialize for Output<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.placeholder().serialize(serializer)
    }
}

/// Type-erased view of an output so a scope can fill every output it issued
pub(crate) trait OutputSlot: Send + Sync {
    fn reference(&self) -> OutputReference;

    fn is_resolved(&self) -> bool;

    fn fill(&self, value: &Value) -> Result<()>;
}

impl<T> OutputSlot for Output<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn reference(&self) -> OutputReference {
        Output::reference(self)
    }

    fn is_resolved(&self) -> bool {
        Output::is_resolved(self)
    }

    fn fill(&self, value: &Value) -> Result<()> {
        let typed: T = serde_json::from_value(value.clone()).map_err(CloudError::from)?;
        self.resolve(typed)
    }
}
