//! The server-bound submission document.
//!
//! A prompt maps expanded node identifiers to `{class_type, inputs}`
//! entries: serialisable property values merged with the slot-named link
//! references and literals produced by the subgraph expander. The
//! original, non-expanded workflow rides along as `extra_pnginfo` so the
//! server can persist it next to produced images.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::graph::Graph;
use crate::subgraph::Expander;

/// One node of the flattened prompt.
#[derive(Debug, Clone, Serialize)]
pub struct PromptNode {
    pub class_type: String,
    pub inputs: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PngInfo {
    pub workflow: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtraData {
    pub extra_pnginfo: PngInfo,
}

/// The full `POST /prompt` payload.
#[derive(Debug, Clone, Serialize)]
pub struct Prompt {
    pub client_id: String,
    #[serde(rename = "prompt")]
    pub nodes: BTreeMap<String, PromptNode>,
    pub extra_data: ExtraData,
}

impl Prompt {
    pub fn node(&self, expanded_id: &str) -> Option<&PromptNode> {
        self.nodes.get(expanded_id)
    }
}

/// Flatten the graph and emit the submission document.
pub fn graph_to_prompt(graph: &Graph, client_id: &str) -> Result<Prompt> {
    let mut expander = Expander::new(graph);
    expander.expand_all()?;

    let mut nodes = BTreeMap::new();
    for entry in expander.entries() {
        let mut inputs = serde_json::Map::new();
        for prop in entry.node.properties() {
            if !prop.serializable() {
                continue;
            }
            if let Some(value) = entry.node.local_property_value(prop) {
                inputs.insert(prop.name().to_string(), value);
            }
        }
        // connected slots win over widget values of the same name
        for (slot_name, input) in &entry.inputs {
            inputs.insert(slot_name.clone(), input.to_value());
        }
        nodes.insert(
            entry.expanded_id.clone(),
            PromptNode {
                class_type: entry.node.kind.clone(),
                inputs,
            },
        );
    }

    Ok(Prompt {
        client_id: client_id.to_string(),
        nodes,
        extra_data: ExtraData {
            extra_pnginfo: PngInfo {
                workflow: serde_json::to_value(graph)?,
            },
        },
    })
}

impl Graph {
    /// Build the submission document for this workflow.
    pub fn to_prompt(&self, client_id: &str) -> Result<Prompt> {
        graph_to_prompt(self, client_id)
    }
}
