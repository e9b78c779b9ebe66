//! Fully-evaluated expansion output.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Span;
use crate::name::Name;
use crate::value::Value;

/// One node of an expanded tree: every expression replaced by its
/// value, foreach loops unrolled and conditional collections resolved.
///
/// Instances are plain data. Re-evaluating the template that produced
/// one never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceNode {
    /// Name copied from the source node.
    pub name: String,
    /// Span of the originating source node.
    #[serde(default)]
    pub span: Span,
    /// Whether this node's condition held. Always true when pruning is
    /// on; with pruning off, false marks a node the consumer should
    /// treat as disabled.
    pub condition: bool,
    /// Markers copied verbatim from the source node.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Evaluated property values, constants first.
    #[serde(default)]
    pub properties: IndexMap<Name, Value>,
    /// Realized list entries.
    #[serde(default)]
    pub entries: Vec<String>,
    /// Expanded positional children.
    #[serde(default)]
    pub children: Vec<InstanceNode>,
    /// Expanded named children, one winner per name.
    #[serde(default)]
    pub named_children: IndexMap<Name, InstanceNode>,
}

impl InstanceNode {
    /// Looks up an evaluated property, case-insensitively.
    pub fn property(&self, name: &str) -> Option<&Value> {
        let key = Name::new(name).ok()?;
        self.properties.get(&key)
    }

    /// Child instance count, ignoring named children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_lookup_ignores_case() {
        let mut properties = IndexMap::new();
        properties.insert(Name::new("Width").unwrap(), Value::UInt(10));
        let node = InstanceNode {
            name: "panel".to_string(),
            span: Span::default(),
            condition: true,
            flags: Vec::new(),
            properties,
            entries: Vec::new(),
            children: Vec::new(),
            named_children: IndexMap::new(),
        };
        assert_eq!(node.property("width"), Some(&Value::UInt(10)));
        assert_eq!(node.property("WIDTH"), Some(&Value::UInt(10)));
        assert_eq!(node.property("height"), None);
    }
}
