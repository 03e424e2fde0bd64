//! Reusable subgraph definitions and the flattening pass that rewrites
//! subgraph instances into the flat node/edge form the server executes.
//!
//! Expanded node identifiers are strings: a top-level node keeps its
//! integer id stringified, while a node `n` inside instance `I` becomes
//! the colon-delimited compound `"I:n"` (outer-to-inner for nested
//! instances). The compound scheme is part of the wire contract; the
//! delimiter and ordering must not change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ComfyError, Result};
use crate::graph::{Graph, Group, Node};
use crate::wire::{Link, WidgetKey, WidgetValues};

/// One of the two synthetic pseudo-nodes whose identity anchors links
/// crossing the subgraph boundary: the input node is the origin of links
/// leaving the input boundary, the output node the target of links
/// entering the output boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryNode {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bounding: Vec<f64>,
}

/// A declared input or output port of a subgraph definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphPort {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "linkIds", default, skip_serializing_if = "Vec::is_empty")]
    pub link_ids: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localized_name: Option<String>,
}

/// A reusable fragment identified by UUID, with its own nodes, links,
/// groups, and ordered input/output ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphDefinition {
    pub id: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default)]
    pub revision: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "inputNode")]
    pub input_node: BoundaryNode,
    #[serde(rename = "outputNode")]
    pub output_node: BoundaryNode,
    #[serde(default)]
    pub inputs: Vec<SubgraphPort>,
    #[serde(default)]
    pub outputs: Vec<SubgraphPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub widgets: Vec<Value>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    #[serde(skip)]
    node_index: HashMap<i64, usize>,
    #[serde(skip)]
    link_index: HashMap<i64, usize>,
}

impl SubgraphDefinition {
    pub(crate) fn build_indices(&mut self) {
        self.node_index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, i))
            .collect();
        self.link_index = self
            .links
            .iter()
            .enumerate()
            .map(|(i, l)| (l.id, i))
            .collect();
    }

    pub fn node(&self, id: i64) -> Option<&Node> {
        self.node_index.get(&id).and_then(|&i| self.nodes.get(i))
    }

    pub fn link(&self, id: i64) -> Option<&Link> {
        self.link_index.get(&id).and_then(|&i| self.links.get(i))
    }

    pub fn input_by_slot(&self, slot: i64) -> Option<&SubgraphPort> {
        usize::try_from(slot).ok().and_then(|i| self.inputs.get(i))
    }

    pub fn output_by_slot(&self, slot: i64) -> Option<&SubgraphPort> {
        usize::try_from(slot).ok().and_then(|i| self.outputs.get(i))
    }

    /// The internal link that leaves input port `slot`.
    pub fn link_from_input(&self, slot: i64) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.origin_id == self.input_node.id && l.origin_slot == slot)
    }

    /// The internal link that feeds output port `slot`.
    pub fn link_to_output(&self, slot: i64) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.target_id == self.output_node.id && l.target_slot == slot)
    }

    /// Every internal link must connect the definition's own nodes or one
    /// of the two boundary pseudo-nodes.
    pub fn links_are_internal(&self) -> bool {
        self.links.iter().all(|l| {
            let origin_ok =
                l.origin_id == self.input_node.id || self.node_index.contains_key(&l.origin_id);
            let target_ok =
                l.target_id == self.output_node.id || self.node_index.contains_key(&l.target_id);
            origin_ok && target_ok
        })
    }
}

/// The `definitions` section of a workflow document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Definitions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subgraphs: Vec<SubgraphDefinition>,
}

/// A resolved input for an expanded node: either a reference to another
/// expanded node's output or a literal value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PromptInput {
    Link { node: String, slot: i64 },
    Literal(Value),
}

impl PromptInput {
    pub(crate) fn to_value(&self) -> Value {
        match self {
            PromptInput::Link { node, slot } => serde_json::json!([node, slot]),
            PromptInput::Literal(v) => v.clone(),
        }
    }
}

/// One node of the flattened prompt.
pub(crate) struct ExpandedEntry<'g> {
    pub expanded_id: String,
    pub node: &'g Node,
    /// Slot-named link references and literals resolved during expansion.
    pub inputs: Vec<(String, PromptInput)>,
}

struct ParentCtx<'g, 'a> {
    def: &'g SubgraphDefinition,
    prefix: &'a str,
    mapping: &'a HashMap<i64, PromptInput>,
}

/// Recursive flattening pass over a graph containing subgraph instances.
pub(crate) struct Expander<'g> {
    graph: &'g Graph,
    entries: Vec<ExpandedEntry<'g>>,
    output_resolution: HashMap<String, PromptInput>,
}

impl<'g> Expander<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            entries: Vec::new(),
            output_resolution: HashMap::new(),
        }
    }

    pub fn entries(&self) -> &[ExpandedEntry<'g>] {
        &self.entries
    }

    /// Walk top-level nodes in execution order, skipping virtual and
    /// muted nodes, registering plain nodes and recursing into subgraph
    /// instances.
    pub fn expand_all(&mut self) -> Result<()> {
        let graph = self.graph;
        let nodes: Vec<&'g Node> = graph.nodes_in_execution_order().collect();
        for node in nodes {
            if node.is_virtual() || node.mode == 2 {
                continue;
            }
            if node.is_subgraph {
                let path = node.id.to_string();
                self.expand_instance(node, None, &path)?;
            } else {
                let inputs = self.resolve_top_inputs(node);
                self.entries.push(ExpandedEntry {
                    expanded_id: node.id.to_string(),
                    node,
                    inputs,
                });
            }
        }
        Ok(())
    }

    fn resolve_top_inputs(&self, node: &'g Node) -> Vec<(String, PromptInput)> {
        let mut out = Vec::new();
        for slot in &node.inputs {
            let Some(lid) = slot.link else { continue };
            let Some(link) = self.graph.link(lid) else {
                continue;
            };
            if let Some(input) = self.resolve_top_link(link) {
                out.push((slot.name.clone(), input));
            }
        }
        out
    }

    /// Resolve a top-level link to its expanded origin, following through
    /// virtual nodes and replacing subgraph-instance origins with their
    /// registered output resolution.
    fn resolve_top_link(&self, link: &Link) -> Option<PromptInput> {
        let graph = self.graph;
        let mut link = link;
        loop {
            let origin = graph.node(link.origin_id)?;
            if origin.is_subgraph {
                let key = format!("{}:{}", origin.id, link.origin_slot);
                return self.output_resolution.get(&key).cloned();
            }
            if origin.is_virtual() {
                let slot = origin.inputs.get(link.origin_slot as usize)?;
                let lid = slot.link?;
                link = graph.link(lid)?;
                continue;
            }
            return Some(PromptInput::Link {
                node: origin.id.to_string(),
                slot: link.origin_slot,
            });
        }
    }

    fn expand_instance(
        &mut self,
        instance: &'g Node,
        parent: Option<&ParentCtx<'g, '_>>,
        path: &str,
    ) -> Result<()> {
        let graph = self.graph;
        let def = graph.subgraph(&instance.kind).ok_or_else(|| {
            ComfyError::Malformed(format!(
                "node {} references unknown subgraph {}",
                instance.id, instance.kind
            ))
        })?;

        // Input mapping: for each input port, the external link resolved
        // into the enclosing scope, or a literal from the instance's
        // widget values when the port is unconnected.
        let mut mapping: HashMap<i64, PromptInput> = HashMap::new();
        for (i, port) in def.inputs.iter().enumerate() {
            let slot_idx = i as i64;
            let external = instance
                .inputs
                .iter()
                .filter_map(|s| s.link)
                .filter_map(|lid| match parent {
                    Some(p) => p.def.link(lid),
                    None => graph.link(lid),
                })
                .find(|l| l.target_slot == slot_idx);
            match external {
                Some(link) => {
                    let resolved = match parent {
                        Some(p) => self.resolve_in_definition(p.def, p.prefix, p.mapping, link),
                        None => self.resolve_top_link(link),
                    };
                    if let Some(v) = resolved {
                        mapping.insert(slot_idx, v);
                    }
                }
                None => {
                    if let Some(value) = instance_port_literal(instance, port, i) {
                        mapping.insert(slot_idx, PromptInput::Literal(value));
                    }
                }
            }
        }

        // Internal nodes walk in execution order so a nested instance's
        // outputs are registered before a sibling consumes them.
        let mut order: Vec<&'g Node> = def.nodes.iter().collect();
        order.sort_by_key(|n| (n.order, n.id));
        for inner in order {
            if inner.is_virtual() || inner.mode == 2 {
                continue;
            }
            if inner.is_subgraph {
                let child_path = format!("{path}:{}", inner.id);
                let ctx = ParentCtx {
                    def,
                    prefix: path,
                    mapping: &mapping,
                };
                self.expand_instance(inner, Some(&ctx), &child_path)?;
                continue;
            }
            let mut inputs = Vec::new();
            for slot in &inner.inputs {
                let Some(lid) = slot.link else { continue };
                let Some(link) = def.link(lid) else { continue };
                if let Some(v) = self.resolve_in_definition(def, path, &mapping, link) {
                    inputs.push((slot.name.clone(), v));
                }
            }
            self.entries.push(ExpandedEntry {
                expanded_id: format!("{path}:{}", inner.id),
                node: inner,
                inputs,
            });
        }

        // Output resolutions: "path:slot" -> the internal origin feeding
        // that output port, chased through nested instances.
        for o in 0..def.outputs.len() as i64 {
            if let Some(link) = def.link_to_output(o) {
                if let Some(v) = self.resolve_in_definition(def, path, &mapping, link) {
                    self.output_resolution.insert(format!("{path}:{o}"), v);
                }
            }
        }
        Ok(())
    }

    /// Resolve a link inside a definition: boundary-input origins cascade
    /// from the instance's input mapping, nested-instance origins use
    /// their registered output resolution, virtual origins are followed
    /// through, and plain origins become compound-id references.
    fn resolve_in_definition(
        &self,
        def: &'g SubgraphDefinition,
        prefix: &str,
        mapping: &HashMap<i64, PromptInput>,
        link: &Link,
    ) -> Option<PromptInput> {
        let mut link = link;
        loop {
            if link.origin_id == def.input_node.id {
                return mapping.get(&link.origin_slot).cloned();
            }
            let origin = def.node(link.origin_id)?;
            if origin.is_subgraph {
                let key = format!("{prefix}:{}:{}", origin.id, link.origin_slot);
                return self.output_resolution.get(&key).cloned();
            }
            if origin.is_virtual() {
                let slot = origin.inputs.get(link.origin_slot as usize)?;
                let lid = slot.link?;
                link = def.link(lid)?;
                continue;
            }
            return Some(PromptInput::Link {
                node: format!("{prefix}:{}", origin.id),
                slot: link.origin_slot,
            });
        }
    }
}

/// A literal input for an unconnected port: the instance's bound
/// property value when present, else the raw widget value by name (map
/// payloads) or port position (array payloads).
fn instance_port_literal(instance: &Node, port: &SubgraphPort, index: usize) -> Option<Value> {
    if let Some(prop) = instance.property(&port.name) {
        if let Some(v) = instance.local_property_value(prop) {
            return Some(v);
        }
    }
    let payload = instance.widgets_values.as_ref()?;
    match payload {
        WidgetValues::Map(map) => map.get(&port.name).cloned(),
        WidgetValues::Array(_) => payload.get(&WidgetKey::Index(index)).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// SaveImage (id 9) consumes output 0 of subgraph instance 57; the
    /// definition decodes latents with an internal VAEDecode (id 8) fed
    /// from input port 0 and wired to the output boundary.
    fn subgraph_workflow() -> String {
        json!({
            "nodes": [
                {
                    "id": 3,
                    "type": "KSampler",
                    "order": 0,
                    "outputs": [{"name": "LATENT", "type": "LATENT", "links": [20]}],
                    "widgets_values": [42, "fixed", 20, 8.0, "euler"]
                },
                {
                    "id": 57,
                    "type": "ab1b44f1-2fd5-4em8-a6d3-ab767fa69cd5",
                    "order": 1,
                    "inputs": [{"name": "samples", "type": "LATENT", "link": 20}],
                    "outputs": [{"name": "IMAGE", "type": "IMAGE", "links": [21]}]
                },
                {
                    "id": 9,
                    "type": "SaveImage",
                    "order": 2,
                    "inputs": [{"name": "images", "type": "IMAGE", "link": 21}],
                    "widgets_values": ["ComfyUI"]
                }
            ],
            "links": [
                [20, 3, 0, 57, 0, "LATENT"],
                [21, 57, 0, 9, 0, "IMAGE"]
            ],
            "last_node_id": 57,
            "last_link_id": 21,
            "version": 0.4,
            "definitions": {
                "subgraphs": [{
                    "id": "ab1b44f1-2fd5-4em8-a6d3-ab767fa69cd5",
                    "name": "Decode",
                    "version": 1,
                    "inputNode": {"id": -10},
                    "outputNode": {"id": -20},
                    "inputs": [{"id": "p0", "name": "samples", "type": "LATENT"}],
                    "outputs": [{"id": "p1", "name": "IMAGE", "type": "IMAGE"}],
                    "nodes": [
                        {
                            "id": 8,
                            "type": "VAEDecode",
                            "order": 0,
                            "inputs": [
                                {"name": "samples", "type": "LATENT", "link": 1},
                                {"name": "vae", "type": "VAE", "link": null}
                            ],
                            "outputs": [{"name": "IMAGE", "type": "IMAGE", "links": [2]}]
                        }
                    ],
                    "links": [
                        {"id": 1, "origin_id": -10, "origin_slot": 0, "target_id": 8, "target_slot": 0, "type": "LATENT"},
                        {"id": 2, "origin_id": 8, "origin_slot": 0, "target_id": -20, "target_slot": 0, "type": "IMAGE"}
                    ]
                }]
            }
        })
        .to_string()
    }

    #[test]
    fn definition_decodes_with_object_links() {
        let graph = Graph::from_json(&subgraph_workflow()).unwrap();
        let def = graph.subgraph("ab1b44f1-2fd5-4em8-a6d3-ab767fa69cd5").unwrap();
        assert_eq!(def.nodes.len(), 1);
        assert_eq!(def.links.len(), 2);
        assert!(def.links_are_internal());
        assert_eq!(
            def.link_to_output(0).map(|l| l.origin_id),
            Some(8)
        );
        assert_eq!(def.link_from_input(0).map(|l| l.target_id), Some(8));
        assert!(graph.node(57).unwrap().is_subgraph);
    }

    #[test]
    fn expansion_rewrites_instance_into_compound_ids() {
        let graph = Graph::from_json(&subgraph_workflow()).unwrap();
        let mut expander = Expander::new(&graph);
        expander.expand_all().unwrap();

        let ids: Vec<&str> = expander
            .entries()
            .iter()
            .map(|e| e.expanded_id.as_str())
            .collect();
        assert!(ids.contains(&"3"));
        assert!(ids.contains(&"9"));
        assert!(ids.contains(&"57:8"));
        assert!(!ids.contains(&"57"));

        // the internal decoder receives the instance's external link
        let inner = expander
            .entries()
            .iter()
            .find(|e| e.expanded_id == "57:8")
            .unwrap();
        assert_eq!(
            inner.inputs,
            vec![(
                "samples".to_string(),
                PromptInput::Link {
                    node: "3".to_string(),
                    slot: 0
                }
            )]
        );

        // the top-level consumer resolves through the instance's output
        let saver = expander
            .entries()
            .iter()
            .find(|e| e.expanded_id == "9")
            .unwrap();
        assert_eq!(
            saver.inputs,
            vec![(
                "images".to_string(),
                PromptInput::Link {
                    node: "57:8".to_string(),
                    slot: 0
                }
            )]
        );
    }

    #[test]
    fn unconnected_port_pulls_widget_literal() {
        let text = json!({
            "nodes": [
                {
                    "id": 5,
                    "type": "c0ffee00-0000-4000-8000-000000000001",
                    "order": 0,
                    "inputs": [{"name": "text", "type": "STRING", "link": null}],
                    "outputs": [{"name": "CONDITIONING", "type": "CONDITIONING", "links": []}],
                    "widgets_values": ["a castle at dusk"]
                }
            ],
            "links": [],
            "last_node_id": 5,
            "last_link_id": 0,
            "version": 0.4,
            "definitions": {
                "subgraphs": [{
                    "id": "c0ffee00-0000-4000-8000-000000000001",
                    "name": "Encode",
                    "inputNode": {"id": -10},
                    "outputNode": {"id": -20},
                    "inputs": [{"id": "p0", "name": "text", "type": "STRING"}],
                    "outputs": [{"id": "p1", "name": "CONDITIONING", "type": "CONDITIONING"}],
                    "nodes": [{
                        "id": 2,
                        "type": "CLIPTextEncode",
                        "order": 0,
                        "inputs": [
                            {"name": "text", "type": "STRING", "link": 1, "widget": {"name": "text"}},
                            {"name": "clip", "type": "CLIP", "link": null}
                        ],
                        "outputs": [{"name": "CONDITIONING", "type": "CONDITIONING", "links": [2]}]
                    }],
                    "links": [
                        {"id": 1, "origin_id": -10, "origin_slot": 0, "target_id": 2, "target_slot": 0, "type": "STRING"},
                        {"id": 2, "origin_id": 2, "origin_slot": 0, "target_id": -20, "target_slot": 0, "type": "CONDITIONING"}
                    ]
                }]
            }
        })
        .to_string();

        let graph = Graph::from_json(&text).unwrap();
        let mut expander = Expander::new(&graph);
        expander.expand_all().unwrap();

        let encode = expander
            .entries()
            .iter()
            .find(|e| e.expanded_id == "5:2")
            .unwrap();
        assert_eq!(
            encode.inputs,
            vec![(
                "text".to_string(),
                PromptInput::Literal(json!("a castle at dusk"))
            )]
        );
    }

    #[test]
    fn nested_instances_compound_left_to_right() {
        // instance 30 (outer) contains instance 4 (inner); the inner
        // definition holds the decoder (id 6); a top-level SaveImage
        // consumes the outer instance's output.
        let text = json!({
            "nodes": [
                {
                    "id": 3,
                    "type": "KSampler",
                    "order": 0,
                    "outputs": [{"name": "LATENT", "type": "LATENT", "links": [20]}],
                    "widgets_values": [42, "fixed", 20, 8.0, "euler"]
                },
                {
                    "id": 30,
                    "type": "outer000-0000-4000-8000-000000000001",
                    "order": 1,
                    "inputs": [{"name": "samples", "type": "LATENT", "link": 20}],
                    "outputs": [{"name": "IMAGE", "type": "IMAGE", "links": [21]}]
                },
                {
                    "id": 9,
                    "type": "SaveImage",
                    "order": 2,
                    "inputs": [{"name": "images", "type": "IMAGE", "link": 21}],
                    "widgets_values": ["ComfyUI"]
                }
            ],
            "links": [
                [20, 3, 0, 30, 0, "LATENT"],
                [21, 30, 0, 9, 0, "IMAGE"]
            ],
            "last_node_id": 30,
            "last_link_id": 21,
            "version": 0.4,
            "definitions": {
                "subgraphs": [
                    {
                        "id": "outer000-0000-4000-8000-000000000001",
                        "name": "Outer",
                        "inputNode": {"id": -10},
                        "outputNode": {"id": -20},
                        "inputs": [{"id": "o0", "name": "samples", "type": "LATENT"}],
                        "outputs": [{"id": "o1", "name": "IMAGE", "type": "IMAGE"}],
                        "nodes": [{
                            "id": 4,
                            "type": "inner000-0000-4000-8000-000000000002",
                            "order": 0,
                            "inputs": [{"name": "samples", "type": "LATENT", "link": 1}],
                            "outputs": [{"name": "IMAGE", "type": "IMAGE", "links": [2]}]
                        }],
                        "links": [
                            {"id": 1, "origin_id": -10, "origin_slot": 0, "target_id": 4, "target_slot": 0, "type": "LATENT"},
                            {"id": 2, "origin_id": 4, "origin_slot": 0, "target_id": -20, "target_slot": 0, "type": "IMAGE"}
                        ]
                    },
                    {
                        "id": "inner000-0000-4000-8000-000000000002",
                        "name": "Inner",
                        "inputNode": {"id": -11},
                        "outputNode": {"id": -21},
                        "inputs": [{"id": "i0", "name": "samples", "type": "LATENT"}],
                        "outputs": [{"id": "i1", "name": "IMAGE", "type": "IMAGE"}],
                        "nodes": [{
                            "id": 6,
                            "type": "VAEDecode",
                            "order": 0,
                            "inputs": [
                                {"name": "samples", "type": "LATENT", "link": 1},
                                {"name": "vae", "type": "VAE", "link": null}
                            ],
                            "outputs": [{"name": "IMAGE", "type": "IMAGE", "links": [2]}]
                        }],
                        "links": [
                            {"id": 1, "origin_id": -11, "origin_slot": 0, "target_id": 6, "target_slot": 0, "type": "LATENT"},
                            {"id": 2, "origin_id": 6, "origin_slot": 0, "target_id": -21, "target_slot": 0, "type": "IMAGE"}
                        ]
                    }
                ]
            }
        })
        .to_string();

        let graph = Graph::from_json(&text).unwrap();
        let mut expander = Expander::new(&graph);
        expander.expand_all().unwrap();

        let ids: Vec<&str> = expander
            .entries()
            .iter()
            .map(|e| e.expanded_id.as_str())
            .collect();
        assert!(ids.contains(&"30:4:6"));
        assert!(!ids.contains(&"30"));
        assert!(!ids.contains(&"30:4"));

        // the innermost decoder cascades to the top-level sampler
        let inner = expander
            .entries()
            .iter()
            .find(|e| e.expanded_id == "30:4:6")
            .unwrap();
        assert_eq!(
            inner.inputs,
            vec![(
                "samples".to_string(),
                PromptInput::Link {
                    node: "3".to_string(),
                    slot: 0
                }
            )]
        );

        // the top-level consumer chases through both output boundaries
        let saver = expander
            .entries()
            .iter()
            .find(|e| e.expanded_id == "9")
            .unwrap();
        assert_eq!(
            saver.inputs,
            vec![(
                "images".to_string(),
                PromptInput::Link {
                    node: "30:4:6".to_string(),
                    slot: 0
                }
            )]
        );
    }

    #[test]
    fn expanded_ids_never_collide_with_instance_ids() {
        let graph = Graph::from_json(&subgraph_workflow()).unwrap();
        let mut expander = Expander::new(&graph);
        expander.expand_all().unwrap();
        let instance_ids: Vec<String> = graph
            .nodes
            .iter()
            .filter(|n| n.is_subgraph)
            .map(|n| n.id.to_string())
            .collect();
        for entry in expander.entries() {
            assert!(!instance_ids.contains(&entry.expanded_id));
        }
    }
}
