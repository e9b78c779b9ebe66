//! The consumed document-tree contract.
//!
//! A [`SourceNode`] is what an external config-file reader hands the
//! engine: raw property text, list entries, definitions and children,
//! each node tagged with its source span. The engine never reads files
//! itself; it only walks this structure.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Span;

/// One node of the external document tree, with raw (unparsed) text in
/// every value position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceNode {
    /// Node name as written in the document.
    pub name: String,
    /// Location of the node in its source file.
    #[serde(default)]
    pub span: Span,
    /// Raw property text keyed by property name. The keys `foreach` and
    /// `condition` are reserved and interpreted by the engine.
    #[serde(default)]
    pub properties: IndexMap<String, String>,
    /// Pass-through markers copied verbatim onto every instance.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Raw list entries.
    #[serde(default)]
    pub entries: Vec<String>,
    /// Named expression templates, added to the compile scope for this
    /// node's subtree in order.
    #[serde(default)]
    pub definitions: Vec<(String, String)>,
    /// Positionally-indexed children.
    #[serde(default)]
    pub children: Vec<SourceNode>,
    /// Named children; repeats of one name form a conditional
    /// collection evaluated first-true-wins.
    #[serde(default)]
    pub named_children: Vec<(String, SourceNode)>,
}

impl SourceNode {
    /// A bare node with a name, for building trees in code.
    pub fn new(name: impl Into<String>) -> SourceNode {
        SourceNode {
            name: name.into(),
            ..SourceNode::default()
        }
    }
}
