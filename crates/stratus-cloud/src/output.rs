//! Deferred output placeholders
//!
//! A declared configuration may reference an attribute another resource
//! only receives once it exists (an id, an ARN, a DNS name). The reference
//! is written into the configuration as
//!
//! ```json
//! {"$output": {"resource": "vpc:demo-vpc", "attribute": "id"}}
//! ```
//!
//! and swapped for the concrete value right before the provider call.

use crate::error::{CloudError, Result};
use serde_json::{Map, Value, json};

/// Key marking a placeholder object
pub const OUTPUT_MARKER: &str = "$output";

/// One reference to another resource's generated attribute
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputReference {
    /// Key of the producing resource (type:id)
    pub resource: String,
    /// Attribute name (e.g. "id", "arn", "dnsName")
    pub attribute: String,
}

impl std::fmt::Display for OutputReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// Build a placeholder value
pub fn placeholder(resource: &str, attribute: &str) -> Value {
    json!({ OUTPUT_MARKER: { "resource": resource, "attribute": attribute } })
}

/// Decode a placeholder, or `None` if the value is ordinary data
pub fn as_placeholder(value: &Value) -> Option<OutputReference> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    let inner = object.get(OUTPUT_MARKER)?.as_object()?;
    Some(OutputReference {
        resource: inner.get("resource")?.as_str()?.to_string(),
        attribute: inner.get("attribute")?.as_str()?.to_string(),
    })
}

/// Every placeholder in `value`, depth first, duplicates removed
pub fn references(value: &Value) -> Vec<OutputReference> {
    let mut found = Vec::new();
    collect(value, &mut found);
    found.sort();
    found.dedup();
    found
}

fn collect(value: &Value, found: &mut Vec<OutputReference>) {
    if let Some(reference) = as_placeholder(value) {
        found.push(reference);
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect(v, found)),
        _ => {}
    }
}

/// Replace every placeholder using `lookup`
///
/// Placeholders inside JSON-encoded strings are not touched; callers that
/// embed documents as strings resolve before encoding.
pub fn resolve<F>(value: &Value, lookup: &F) -> Result<Value>
where
    F: Fn(&OutputReference) -> Option<Value>,
{
    if let Some(reference) = as_placeholder(value) {
        return lookup(&reference).ok_or(CloudError::UnresolvedOutput {
            resource: reference.resource,
            attribute: reference.attribute,
        });
    }
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| resolve(v, lookup))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve(v, lookup)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}
