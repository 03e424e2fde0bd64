//! The workflow model: nodes, links, groups, and the load-time property
//! binding that turns a server-advertised schema into typed, settable
//! inputs on each node.
//!
//! Value reads and writes are routed through the [`Graph`] so that a
//! primitive node's fan-out (one user-visible control driving several
//! target nodes' widget values) can write across nodes without shared
//! mutable aliasing.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalogue::{NodeCatalogue, NodeObject};
use crate::error::{ComfyError, Result};
use crate::properties::{
    value_to_string, BoolSpec, ComboSpec, FloatSpec, ImageUploadSpec, IntSpec, Property,
    PropertyKind, PropertyTarget, StringSpec, UnknownSpec,
};
use crate::subgraph::{Definitions, SubgraphPort};
use crate::wire::{Link, Vec2, WidgetKey, WidgetValues};

/// A connection point on a node. Input slots hold at most one link id;
/// output slots hold a set of link ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Value::is_null")]
    pub kind: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_index: Option<i64>,
    /// Name of the property driving this slot when it is unconnected.
    #[serde(skip)]
    pub property: Option<String>,
}

/// Reference from an input slot to the widget whose value feeds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// A named axis-aligned rectangle used to group nodes in the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub bounding: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Group {
    /// Rectangle-overlap test against the node's position and size.
    pub fn intersects_or_contains(&self, node: &Node) -> bool {
        if self.bounding.len() != 4 {
            tracing::warn!(group = %self.title, "group bounding box does not have 4 elements");
            return false;
        }
        let (rx, ry, rw, rh) = (
            self.bounding[0],
            self.bounding[1],
            self.bounding[2],
            self.bounding[3],
        );
        let Some(pos) = node.pos else {
            return false;
        };
        let (nw, nh) = node.size.map(|s| (s.x, s.y)).unwrap_or((0.0, 0.0));
        !(rx > pos.x + nw || rx + rw < pos.x || ry > pos.y + nh || ry + rh < pos.y)
    }
}

/// One unit of the workflow: a server-side operation (or an editor-only
/// virtual node), its slots, widget values, and bound properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<Value>,
    #[serde(default)]
    pub order: i64,
    /// Visual mode: `0` normal, `2` muted; other values are ignored.
    #[serde(default)]
    pub mode: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Editor-side node properties, not the settable input properties.
    #[serde(rename = "properties", default, skip_serializing_if = "Option::is_none")]
    pub internal_properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widgets_values: Option<WidgetValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgcolor: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Slot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Slot>,
    #[serde(skip)]
    pub(crate) properties: Vec<Property>,
    #[serde(skip)]
    pub display_name: String,
    #[serde(skip)]
    pub description: String,
    #[serde(skip)]
    pub is_output: bool,
    #[serde(skip)]
    pub is_subgraph: bool,
}

impl Node {
    /// Editor-only nodes that never reach the server.
    pub fn is_virtual(&self) -> bool {
        matches!(self.kind.as_str(), "PrimitiveNode" | "Reroute" | "Note")
    }

    /// The user-visible title, falling back to the catalogue display name.
    pub fn title_or_display(&self) -> &str {
        match &self.title {
            Some(t) if !t.is_empty() => t,
            _ => &self.display_name,
        }
    }

    /// All bound properties in declaration order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Look up a property by primary name first, then by alias.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.matches_name(name))
            .or_else(|| self.properties.iter().find(|p| p.matches_alias(name)))
    }

    pub(crate) fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        if let Some(pos) = self.properties.iter().position(|p| p.matches_name(name)) {
            return self.properties.get_mut(pos);
        }
        let pos = self.properties.iter().position(|p| p.matches_alias(name))?;
        self.properties.get_mut(pos)
    }

    /// Number of widget values carried by this node.
    pub fn widget_value_count(&self) -> usize {
        self.widgets_values.as_ref().map_or(0, WidgetValues::len)
    }

    /// The input slot with the given name.
    pub fn input_with_name(&self, name: &str) -> Option<&Slot> {
        self.inputs.iter().find(|s| s.name == name)
    }

    /// Resolve a property's value using only this node's state. Cross-node
    /// targets (primitive fan-outs) resolve through [`Graph::property_value`].
    pub fn local_property_value(&self, prop: &Property) -> Option<Value> {
        if let Some(v) = prop.override_value() {
            return Some(v.clone());
        }
        if let Some(target_name) = prop.upload_target() {
            let target = self.property(target_name)?;
            return self.local_property_value(target);
        }
        match prop.target() {
            PropertyTarget::Direct(v) => Some(v.clone()),
            PropertyTarget::Widget { node, key } if *node == self.id => {
                self.widgets_values.as_ref()?.get(key).cloned()
            }
            _ => None,
        }
    }

    /// How a widget for the named input is addressed in this node's payload.
    fn widget_key_for(&self, name: &str, position: usize) -> WidgetKey {
        match &self.widgets_values {
            Some(WidgetValues::Map(_)) => WidgetKey::Name(name.to_string()),
            _ => WidgetKey::Index(position),
        }
    }

    /// Bind target for a widget key: the payload slot when it exists, a
    /// free cell holding `default` when the payload has no such slot.
    fn widget_target(&self, key: WidgetKey, default: Value) -> PropertyTarget {
        let bindable = match (&self.widgets_values, &key) {
            (Some(WidgetValues::Map(_)), WidgetKey::Name(_)) => true,
            (Some(WidgetValues::Array(items)), WidgetKey::Index(i)) => *i < items.len(),
            _ => false,
        };
        if bindable {
            PropertyTarget::Widget {
                node: self.id,
                key,
            }
        } else {
            PropertyTarget::Direct(default)
        }
    }

    pub(crate) fn write_widget(&mut self, key: &WidgetKey, value: Value) {
        let payload = self.widgets_values.get_or_insert_with(|| match key {
            WidgetKey::Index(_) => WidgetValues::Array(Vec::new()),
            WidgetKey::Name(_) => WidgetValues::Map(serde_json::Map::new()),
        });
        if !payload.set(key, value) {
            tracing::warn!(
                node = self.id,
                "widget payload shape does not match property target"
            );
        }
    }

    fn attach_property_to_slot(&mut self, name: &str) {
        if let Some(slot) = self.inputs.iter_mut().find(|s| s.name == name) {
            slot.property = Some(name.to_string());
        }
    }
}

/// Handle naming one settable property on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyHandle {
    pub node: i64,
    pub property: String,
}

/// A condensed view over the nodes geometrically contained in a titled
/// group: one property handle per node (preferring image uploaders) plus
/// the group's output nodes.
#[derive(Debug, Clone, Default)]
pub struct SimpleApi {
    pub properties: HashMap<String, PropertyHandle>,
    pub output_nodes: Vec<i64>,
}

/// A workflow graph as persisted by the visual editor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub last_node_id: i64,
    #[serde(default)]
    pub last_link_id: i64,
    #[serde(default)]
    pub version: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions: Option<Definitions>,
    #[serde(skip)]
    node_index: HashMap<i64, usize>,
    #[serde(skip)]
    link_index: HashMap<i64, usize>,
    #[serde(skip)]
    execution_order: Vec<i64>,
}

impl Graph {
    /// Decode a workflow from its JSON document and build the lookup
    /// indices. Property binding is a separate step; see
    /// [`Graph::create_node_properties`].
    pub fn from_json(text: &str) -> Result<Self> {
        let mut graph: Graph = serde_json::from_str(text)?;
        graph.rebuild_indices();
        Ok(graph)
    }

    /// Re-serialise the workflow, preserving link and widget-value shapes.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Write the re-serialised workflow to a file.
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub(crate) fn rebuild_indices(&mut self) {
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
        let mut order: Vec<(i64, i64)> = self.nodes.iter().map(|n| (n.order, n.id)).collect();
        order.sort_unstable();
        self.execution_order = order.into_iter().map(|(_, id)| id).collect();

        if let Some(defs) = &mut self.definitions {
            let ids: HashSet<String> = defs.subgraphs.iter().map(|s| s.id.clone()).collect();
            for def in &mut defs.subgraphs {
                def.build_indices();
                for node in &mut def.nodes {
                    node.is_subgraph = ids.contains(&node.kind);
                }
            }
            for node in &mut self.nodes {
                node.is_subgraph = ids.contains(&node.kind);
            }
        }
    }

    pub fn node(&self, id: i64) -> Option<&Node> {
        self.node_index.get(&id).and_then(|&i| self.nodes.get(i))
    }

    pub fn node_mut(&mut self, id: i64) -> Option<&mut Node> {
        let idx = *self.node_index.get(&id)?;
        self.nodes.get_mut(idx)
    }

    pub fn link(&self, id: i64) -> Option<&Link> {
        self.link_index.get(&id).and_then(|&i| self.links.get(i))
    }

    /// Nodes ordered by their execution ordinal.
    pub fn nodes_in_execution_order(&self) -> impl Iterator<Item = &Node> {
        self.execution_order.iter().filter_map(|id| self.node(*id))
    }

    /// The subgraph definition with the given UUID.
    pub fn subgraph(&self, id: &str) -> Option<&crate::subgraph::SubgraphDefinition> {
        self.definitions
            .as_ref()?
            .subgraphs
            .iter()
            .find(|s| s.id == id)
    }

    /// The first group with the given title.
    pub fn group_with_title(&self, title: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.title == title)
    }

    /// Nodes geometrically contained in (or overlapping) the group.
    pub fn nodes_in_group(&self, group: &Group) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| group.intersects_or_contains(n))
            .collect()
    }

    /// Nodes whose title matches; untitled nodes match on display name.
    pub fn nodes_with_title(&self, title: &str) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| {
                let t = n.title.as_deref().unwrap_or("");
                (t.is_empty() && n.display_name == title) || t == title
            })
            .collect()
    }

    pub fn first_node_with_title(&self, title: &str) -> Option<&Node> {
        self.nodes_with_title(title).into_iter().next()
    }

    pub fn nodes_with_type(&self, kind: &str) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.kind == kind).collect()
    }

    /// Read a property value, resolving cross-node targets.
    pub fn property_value(&self, node_id: i64, name: &str) -> Option<Value> {
        let node = self.node(node_id)?;
        let prop = node.property(name)?;
        self.resolve_property_value(node, prop)
    }

    fn resolve_property_value(&self, node: &Node, prop: &Property) -> Option<Value> {
        if let Some(v) = prop.override_value() {
            return Some(v.clone());
        }
        if let Some(target_name) = prop.upload_target() {
            let target = node.property(target_name)?;
            return self.resolve_property_value(node, target);
        }
        match prop.target() {
            PropertyTarget::Direct(v) => Some(v.clone()),
            PropertyTarget::Widget { node: owner, key } => {
                let owner_node = if *owner == node.id {
                    node
                } else {
                    self.node(*owner)?
                };
                owner_node.widgets_values.as_ref()?.get(key).cloned()
            }
            PropertyTarget::Unbound => None,
        }
    }

    /// Coerce, validate, and write a property value, then propagate it to
    /// every secondary property in order.
    pub fn set_property_value(
        &mut self,
        node_id: i64,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        let ops = {
            let node = self
                .node(node_id)
                .ok_or(ComfyError::NodeNotFound(node_id))?;
            let prop = node
                .property(name)
                .ok_or_else(|| ComfyError::PropertyNotFound {
                    node: node_id,
                    name: name.to_string(),
                })?;
            if !prop.settable() {
                return Err(ComfyError::NotSettable(prop.name().to_string()));
            }
            let mut ops = Vec::new();
            collect_write_ops(prop, &value, &mut ops)?;
            ops
        };
        for op in ops {
            match op {
                WriteOp::Widget { node, key, value } => {
                    let target = self
                        .node_mut(node)
                        .ok_or(ComfyError::NodeNotFound(node))?;
                    target.write_widget(&key, value);
                }
                WriteOp::Direct { value } => {
                    if let Some(prop) = self
                        .node_mut(node_id)
                        .and_then(|n| n.property_mut(name))
                    {
                        prop.set_direct(value);
                    }
                }
            }
        }
        Ok(())
    }

    /// Grow a combo's allowed set with `value` (if new) and select it.
    pub fn combo_append(&mut self, node_id: i64, name: &str, value: &str) -> Result<()> {
        {
            let node = self
                .node_mut(node_id)
                .ok_or(ComfyError::NodeNotFound(node_id))?;
            let prop = node
                .property_mut(name)
                .ok_or_else(|| ComfyError::PropertyNotFound {
                    node: node_id,
                    name: name.to_string(),
                })?;
            if !prop.combo_push(value) {
                return Err(ComfyError::InvalidValue {
                    property: name.to_string(),
                    value: value.to_string(),
                });
            }
        }
        self.set_property_value(node_id, name, Value::String(value.to_string()))
    }

    /// Record an uploaded filename on an image-upload property (or
    /// directly on a combo): appends to the bound combo and selects it.
    pub fn apply_upload(&mut self, node_id: i64, property: &str, filename: &str) -> Result<()> {
        let combo_name = {
            let node = self
                .node(node_id)
                .ok_or(ComfyError::NodeNotFound(node_id))?;
            let prop = node
                .property(property)
                .ok_or_else(|| ComfyError::PropertyNotFound {
                    node: node_id,
                    name: property.to_string(),
                })?;
            prop.upload_target().unwrap_or(property).to_string()
        };
        self.combo_append(node_id, &combo_name, filename)
    }

    /// The condensed group-based API view; `None` when no matching group
    /// exists. Defaults to the group titled `"API"`.
    pub fn simple_api(&self, title: Option<&str>) -> Option<SimpleApi> {
        let group = self.group_with_title(title.unwrap_or("API"))?;
        let mut api = SimpleApi::default();
        for node in self.nodes_in_group(group) {
            if node.is_output {
                api.output_nodes.push(node.id);
            }
            let uploader = node
                .properties
                .iter()
                .find(|p| matches!(p.kind(), PropertyKind::ImageUpload(_)));
            if let Some(chosen) = uploader.or_else(|| node.properties.first()) {
                api.properties.insert(
                    node.title_or_display().to_string(),
                    PropertyHandle {
                        node: node.id,
                        property: chosen.name().to_string(),
                    },
                );
            }
        }
        Some(api)
    }

    /// Bind typed properties onto every node from the catalogue schema.
    ///
    /// Returns the node kinds the catalogue does not know about; the
    /// caller decides whether an incomplete binding is acceptable.
    pub fn create_node_properties(&mut self, catalogue: &NodeCatalogue) -> Vec<String> {
        let subgraph_meta: HashMap<String, (String, Vec<SubgraphPort>)> = self
            .definitions
            .as_ref()
            .map(|d| {
                d.subgraphs
                    .iter()
                    .map(|s| (s.id.clone(), (s.name.clone(), s.inputs.clone())))
                    .collect()
            })
            .unwrap_or_default();

        let mut missing: Vec<String> = Vec::new();
        let mut primitives: Vec<i64> = Vec::new();

        for node in &mut self.nodes {
            bind_one_node(
                node,
                catalogue,
                &subgraph_meta,
                &mut missing,
                Some(&mut primitives),
            );
        }

        if let Some(defs) = &mut self.definitions {
            for def in &mut defs.subgraphs {
                for node in &mut def.nodes {
                    bind_one_node(node, catalogue, &subgraph_meta, &mut missing, None);
                }
            }
        }

        self.bind_primitive_values(&primitives);
        missing
    }

    /// Primitive nodes expose the first linked target's property as their
    /// own `value`; further targets attach as secondaries so a single set
    /// fans out to every linked widget.
    fn bind_primitive_values(&mut self, primitives: &[i64]) {
        for &pid in primitives {
            let mut value_prop: Option<Property> = None;
            {
                let Some(node) = self.node(pid) else { continue };
                for output in &node.outputs {
                    let Some(link_ids) = &output.links else {
                        continue;
                    };
                    let mut pindex = 0usize;
                    for lid in link_ids {
                        let Some(link) = self.link(*lid) else { continue };
                        let Some(target) = self.node(link.target_id) else {
                            continue;
                        };
                        let Some(slot) = target.inputs.get(link.target_slot as usize) else {
                            continue;
                        };
                        let Some(prop_name) = &slot.property else {
                            tracing::warn!(
                                node = target.id,
                                slot = %slot.name,
                                "primitive target slot has no bound property"
                            );
                            continue;
                        };
                        let Some(prop) = target.property(prop_name) else {
                            continue;
                        };
                        let mut dup = prop.clone();
                        dup.set_index(pindex);
                        pindex += 1;
                        match &mut value_prop {
                            None => {
                                let original = dup.name().to_string();
                                dup.rename("value");
                                dup.set_alias(original);
                                value_prop = Some(dup);
                            }
                            Some(primary) => primary.attach_secondary(dup),
                        }
                    }
                }
            }
            if let Some(prop) = value_prop {
                if let Some(node) = self.node_mut(pid) {
                    node.properties.push(prop);
                }
            }
        }
    }
}

enum WriteOp {
    Widget {
        node: i64,
        key: WidgetKey,
        value: Value,
    },
    Direct {
        value: Value,
    },
}

fn collect_write_ops(prop: &Property, value: &Value, ops: &mut Vec<WriteOp>) -> Result<()> {
    let text = value_to_string(value);
    let coerced = prop
        .value_from_str(&text)
        .ok_or_else(|| ComfyError::InvalidValue {
            property: prop.name().to_string(),
            value: text,
        })?;
    match prop.target() {
        PropertyTarget::Widget { node, key } => ops.push(WriteOp::Widget {
            node: *node,
            key: key.clone(),
            value: coerced.clone(),
        }),
        PropertyTarget::Direct(_) => ops.push(WriteOp::Direct {
            value: coerced.clone(),
        }),
        PropertyTarget::Unbound => return Err(ComfyError::Unbound(prop.name().to_string())),
    }
    for secondary in prop.secondaries() {
        collect_write_ops(secondary, &coerced, ops)?;
    }
    Ok(())
}

fn bind_one_node(
    node: &mut Node,
    catalogue: &NodeCatalogue,
    subgraph_meta: &HashMap<String, (String, Vec<SubgraphPort>)>,
    missing: &mut Vec<String>,
    primitives: Option<&mut Vec<i64>>,
) {
    if node.is_subgraph {
        if let Some((name, ports)) = subgraph_meta.get(&node.kind) {
            bind_instance_ports(node, name, ports);
        }
        return;
    }
    match catalogue.node_object(&node.kind) {
        Some(object) => bind_catalogue_properties(node, object),
        None => match node.kind.as_str() {
            "PrimitiveNode" => {
                if let Some(primitives) = primitives {
                    primitives.push(node.id);
                }
            }
            "Note" => bind_note(node),
            "Reroute" => {}
            other => {
                tracing::warn!(kind = other, node = node.id, "no catalogue entry for node");
                if !missing.iter().any(|m| m == other) {
                    missing.push(other.to_string());
                }
            }
        },
    }
}

fn bind_catalogue_properties(node: &mut Node, object: &NodeObject) {
    node.display_name = object.display_name.clone();
    node.description = object.description.clone();
    node.is_output = object.output_node;
    node.properties.clear();

    let templates: Vec<Property> = object.input_properties().to_vec();
    let mut pindex = 0usize;
    bind_templates(node, &templates, &mut pindex);

    // LoadImage and friends carry a file-chooser widget that the schema
    // does not declare; bridge it to the image combo so uploads can bind.
    let widget_backed = node
        .properties
        .iter()
        .filter(|p| p.is_widget_backed())
        .count();
    if node.widget_value_count() != widget_backed
        && matches!(object.name.as_str(), "LoadImage" | "LoadImageMask")
    {
        if node
            .property("image")
            .map(|p| p.combo_values().is_some())
            .unwrap_or(false)
        {
            let mut upload = Property::new(
                "choose file to upload",
                false,
                node.properties.len(),
                PropertyKind::ImageUpload(ImageUploadSpec {
                    target_property: "image".to_string(),
                }),
            );
            upload.set_alias("file");
            node.properties.push(upload);
        } else {
            tracing::warn!(node = node.id, "image loader has no image combo to bridge");
        }
    }
}

fn bind_templates(node: &mut Node, templates: &[Property], pindex: &mut usize) {
    for template in templates {
        let mut prop = template.clone();
        let mut cascade_children: Option<Vec<Property>> = None;

        if prop.is_widget_backed() {
            let key = node.widget_key_for(prop.name(), *pindex);
            if let PropertyKind::Cascade(spec) = prop.kind() {
                let current = node
                    .widgets_values
                    .as_ref()
                    .and_then(|wv| wv.get(&key))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match current.as_deref().and_then(|name| spec.group(name)) {
                    Some(group) => cascade_children = Some(group.properties.clone()),
                    None => tracing::warn!(
                        node = node.id,
                        property = prop.name(),
                        "no cascade group matches the current widget value"
                    ),
                }
            }
            let default = default_value(&prop);
            prop.set_target(node.widget_target(key, default));
            *pindex += 1;
        }

        let name = prop.name().to_string();
        prop.set_index(node.properties.len());
        node.properties.push(prop);
        node.attach_property_to_slot(&name);

        if let Some(children) = cascade_children {
            bind_templates(node, &children, pindex);
        }
    }
}

fn default_value(prop: &Property) -> Value {
    match prop.kind() {
        PropertyKind::Int(spec) => Value::from(spec.default),
        PropertyKind::Float(spec) => Value::from(spec.default),
        PropertyKind::String(spec) => Value::String(spec.default.clone()),
        PropertyKind::Bool(spec) => Value::Bool(spec.default),
        PropertyKind::Combo(spec) => spec
            .values
            .first()
            .map(|v| Value::String(v.clone()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn bind_note(node: &mut Node) {
    let key = node.widget_key_for("text", 0);
    let mut prop = Property::new(
        "text",
        false,
        0,
        PropertyKind::String(StringSpec {
            default: String::new(),
            multiline: true,
        }),
    );
    let target = node.widget_target(key, Value::String(String::new()));
    prop.set_target(target);
    node.properties.push(prop);
}

/// A subgraph instance exposes one property per definition input port,
/// typed from the port's declared type and bound to the instance's
/// widget values by positional index.
fn bind_instance_ports(node: &mut Node, def_name: &str, ports: &[SubgraphPort]) {
    node.display_name = def_name.to_string();
    node.properties.clear();
    for (i, port) in ports.iter().enumerate() {
        let kind = match port.kind.as_str() {
            "INT" => PropertyKind::Int(IntSpec::default()),
            "FLOAT" => PropertyKind::Float(FloatSpec::default()),
            "STRING" => PropertyKind::String(StringSpec::default()),
            "BOOLEAN" => PropertyKind::Bool(BoolSpec::default()),
            "COMBO" => PropertyKind::Combo(ComboSpec::default()),
            other => PropertyKind::Unknown(UnknownSpec {
                type_name: other.to_string(),
            }),
        };
        let mut prop = Property::new(port.name.clone(), false, i, kind);
        if prop.is_widget_backed() {
            let key = node.widget_key_for(&port.name, i);
            let default = default_value(&prop);
            prop.set_target(node.widget_target(key, default));
        }
        node.properties.push(prop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_catalogue() -> NodeCatalogue {
        NodeCatalogue::from_value(json!({
            "KSampler": {
                "input": {
                    "required": {
                        "model": ["MODEL"],
                        "seed": ["INT", {"default": 0, "min": 0}],
                        "steps": ["INT", {"default": 20, "min": 1, "max": 10000}],
                        "cfg": ["FLOAT", {"default": 8.0, "min": 0.0, "max": 100.0}],
                        "sampler_name": [["euler", "dpmpp_2m"]],
                        "positive": ["CONDITIONING"],
                        "latent_image": ["LATENT"]
                    }
                },
                "display_name": "KSampler"
            },
            "CLIPTextEncode": {
                "input": {
                    "required": {
                        "text": ["STRING", {"multiline": true}],
                        "clip": ["CLIP"]
                    }
                },
                "display_name": "CLIP Text Encode (Prompt)"
            },
            "LoadImage": {
                "input": {
                    "required": {
                        "image": [["a.png", "b.png"]]
                    }
                },
                "display_name": "Load Image"
            },
            "VAEDecode": {
                "input": {
                    "required": {
                        "samples": ["LATENT"],
                        "vae": ["VAE"]
                    }
                },
                "output_node": false,
                "display_name": "VAE Decode"
            },
            "SaveImage": {
                "input": {
                    "required": {
                        "filename_prefix": ["STRING", {"default": "ComfyUI"}],
                        "images": ["IMAGE"]
                    }
                },
                "output_node": true,
                "display_name": "Save Image"
            }
        }))
        .unwrap()
    }

    fn two_node_workflow() -> &'static str {
        r#"{
            "nodes": [
                {
                    "id": 1,
                    "type": "KSampler",
                    "pos": [100, 100],
                    "size": [210, 262],
                    "order": 0,
                    "mode": 0,
                    "inputs": [
                        {"name": "model", "type": "MODEL", "link": null},
                        {"name": "positive", "type": "CONDITIONING", "link": null},
                        {"name": "latent_image", "type": "LATENT", "link": null}
                    ],
                    "outputs": [{"name": "LATENT", "type": "LATENT", "links": [5]}],
                    "widgets_values": [42, "fixed", 20, 8.0, "euler"]
                },
                {
                    "id": 2,
                    "type": "VAEDecode",
                    "pos": [400, 100],
                    "size": [210, 46],
                    "order": 1,
                    "mode": 0,
                    "inputs": [
                        {"name": "samples", "type": "LATENT", "link": 5},
                        {"name": "vae", "type": "VAE", "link": null}
                    ],
                    "outputs": [{"name": "IMAGE", "type": "IMAGE", "links": []}]
                }
            ],
            "links": [[5, 1, 0, 2, 0, "LATENT"]],
            "groups": [],
            "last_node_id": 2,
            "last_link_id": 5,
            "version": 0.4
        }"#
    }

    #[test]
    fn load_builds_indices_and_order() {
        let graph = Graph::from_json(two_node_workflow()).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert!(graph.node(1).is_some());
        assert!(graph.node(99).is_none());
        assert_eq!(graph.link(5).unwrap().origin_id, 1);
        let order: Vec<i64> = graph.nodes_in_execution_order().map(|n| n.id).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn binding_creates_one_property_per_declared_input() {
        let mut graph = Graph::from_json(two_node_workflow()).unwrap();
        let missing = graph.create_node_properties(&test_catalogue());
        assert!(missing.is_empty());
        let sampler = graph.node(1).unwrap();
        // 7 declared inputs + control_after_generate
        assert_eq!(sampler.properties().len(), 8);
        assert_eq!(sampler.display_name, "KSampler");
        let names: Vec<&str> = sampler.properties().iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec![
                "model",
                "seed",
                "control_after_generate",
                "steps",
                "cfg",
                "sampler_name",
                "positive",
                "latent_image"
            ]
        );
    }

    #[test]
    fn widget_array_binding_reads_and_writes_by_position() {
        let mut graph = Graph::from_json(two_node_workflow()).unwrap();
        graph.create_node_properties(&test_catalogue());
        assert_eq!(graph.property_value(1, "seed"), Some(json!(42)));
        assert_eq!(graph.property_value(1, "steps"), Some(json!(20)));

        graph.set_property_value(1, "seed", 7).unwrap();
        let node = graph.node(1).unwrap();
        assert_eq!(
            node.widgets_values.as_ref().unwrap().as_array().unwrap()[0],
            json!(7)
        );
    }

    #[test]
    fn widget_map_binding_reads_and_writes_by_name() {
        let text = r#"{
            "nodes": [{
                "id": 1,
                "type": "KSampler",
                "order": 0,
                "widgets_values": {"seed": 42, "control_after_generate": "fixed", "steps": 20}
            }],
            "links": [],
            "last_node_id": 1,
            "last_link_id": 0,
            "version": 0.4
        }"#;
        let mut graph = Graph::from_json(text).unwrap();
        graph.create_node_properties(&test_catalogue());
        assert_eq!(graph.property_value(1, "seed"), Some(json!(42)));
        graph.set_property_value(1, "seed", 7).unwrap();
        let node = graph.node(1).unwrap();
        assert_eq!(
            node.widgets_values.as_ref().unwrap().as_map().unwrap()["seed"],
            json!(7)
        );
    }

    #[test]
    fn set_rejects_out_of_domain_values() {
        let mut graph = Graph::from_json(two_node_workflow()).unwrap();
        graph.create_node_properties(&test_catalogue());
        // combos require membership
        let err = graph
            .set_property_value(1, "sampler_name", "not_a_sampler")
            .unwrap_err();
        assert!(matches!(err, ComfyError::InvalidValue { .. }));
        // ints clamp rather than reject
        graph.set_property_value(1, "steps", 999999).unwrap();
        assert_eq!(graph.property_value(1, "steps"), Some(json!(10000)));
        // unparsable ints reject
        let err = graph.set_property_value(1, "steps", "abc").unwrap_err();
        assert!(matches!(err, ComfyError::InvalidValue { .. }));
    }

    #[test]
    fn unsettable_properties_report_not_settable() {
        let mut graph = Graph::from_json(two_node_workflow()).unwrap();
        graph.create_node_properties(&test_catalogue());
        let err = graph.set_property_value(1, "model", "x").unwrap_err();
        assert!(matches!(err, ComfyError::NotSettable(_)));
    }

    #[test]
    fn missing_kinds_are_collected_not_fatal() {
        let text = r#"{
            "nodes": [
                {"id": 1, "type": "TotallyCustomNode", "order": 0},
                {"id": 2, "type": "TotallyCustomNode", "order": 1},
                {"id": 3, "type": "AnotherMystery", "order": 2}
            ],
            "links": [],
            "last_node_id": 3,
            "last_link_id": 0,
            "version": 0.4
        }"#;
        let mut graph = Graph::from_json(text).unwrap();
        let missing = graph.create_node_properties(&test_catalogue());
        assert_eq!(missing, vec!["TotallyCustomNode", "AnotherMystery"]);
    }

    #[test]
    fn note_text_binds_to_first_widget_value() {
        let text = r#"{
            "nodes": [{
                "id": 4,
                "type": "Note",
                "order": 0,
                "widgets_values": ["remember to fix the vae"]
            }],
            "links": [],
            "last_node_id": 4,
            "last_link_id": 0,
            "version": 0.4
        }"#;
        let mut graph = Graph::from_json(text).unwrap();
        let missing = graph.create_node_properties(&test_catalogue());
        assert!(missing.is_empty());
        assert_eq!(
            graph.property_value(4, "text"),
            Some(json!("remember to fix the vae"))
        );
        graph.set_property_value(4, "text", "done").unwrap();
        let node = graph.node(4).unwrap();
        assert_eq!(
            node.widgets_values.as_ref().unwrap().as_array().unwrap()[0],
            json!("done")
        );
    }

    #[test]
    fn reroute_gets_no_properties() {
        let text = r#"{
            "nodes": [{"id": 9, "type": "Reroute", "order": 0}],
            "links": [],
            "last_node_id": 9,
            "last_link_id": 0,
            "version": 0.4
        }"#;
        let mut graph = Graph::from_json(text).unwrap();
        let missing = graph.create_node_properties(&test_catalogue());
        assert!(missing.is_empty());
        assert!(graph.node(9).unwrap().properties().is_empty());
    }

    #[test]
    fn primitive_value_fans_out_to_secondaries() {
        let text = r#"{
            "nodes": [
                {
                    "id": 1,
                    "type": "KSampler",
                    "order": 1,
                    "inputs": [{"name": "seed", "type": "INT", "link": 10, "widget": {"name": "seed"}}],
                    "widgets_values": [42, "fixed", 20, 8.0, "euler"]
                },
                {
                    "id": 2,
                    "type": "KSampler",
                    "order": 2,
                    "inputs": [{"name": "seed", "type": "INT", "link": 11, "widget": {"name": "seed"}}],
                    "widgets_values": [43, "fixed", 20, 8.0, "euler"]
                },
                {
                    "id": 3,
                    "type": "PrimitiveNode",
                    "order": 0,
                    "outputs": [{"name": "INT", "type": "INT", "links": [10, 11]}],
                    "widgets_values": [42, "fixed"]
                }
            ],
            "links": [
                [10, 3, 0, 1, 0, "INT"],
                [11, 3, 0, 2, 0, "INT"]
            ],
            "last_node_id": 3,
            "last_link_id": 11,
            "version": 0.4
        }"#;
        let mut graph = Graph::from_json(text).unwrap();
        let missing = graph.create_node_properties(&test_catalogue());
        assert!(missing.is_empty());

        let primitive = graph.node(3).unwrap();
        let value = primitive.property("value").unwrap();
        assert_eq!(value.secondaries().len(), 1);
        assert!(value.matches_alias("seed"));

        graph.set_property_value(3, "value", 1234).unwrap();
        assert_eq!(graph.property_value(1, "seed"), Some(json!(1234)));
        assert_eq!(graph.property_value(2, "seed"), Some(json!(1234)));
        assert_eq!(graph.property_value(3, "value"), Some(json!(1234)));
    }

    #[test]
    fn image_loader_gains_upload_property_with_file_alias() {
        let text = r#"{
            "nodes": [{
                "id": 6,
                "type": "LoadImage",
                "order": 0,
                "widgets_values": ["a.png", "image"]
            }],
            "links": [],
            "last_node_id": 6,
            "last_link_id": 0,
            "version": 0.4
        }"#;
        let mut graph = Graph::from_json(text).unwrap();
        graph.create_node_properties(&test_catalogue());
        let node = graph.node(6).unwrap();
        let upload = node.property("choose file to upload").unwrap();
        assert_eq!(upload.upload_target(), Some("image"));
        assert!(node.property("file").is_some());

        graph.apply_upload(6, "file", "uploaded_7731.png").unwrap();
        assert_eq!(
            graph.property_value(6, "image"),
            Some(json!("uploaded_7731.png"))
        );
        // the upload property serialises the bound combo's filename
        assert_eq!(
            graph.property_value(6, "choose file to upload"),
            Some(json!("uploaded_7731.png"))
        );
        let combo = graph.node(6).unwrap().property("image").unwrap();
        assert!(combo
            .combo_values()
            .unwrap()
            .contains(&"uploaded_7731.png".to_string()));
    }

    #[test]
    fn cascade_group_children_bind_after_the_cascade() {
        let cat = NodeCatalogue::from_value(json!({
            "ImageScale": {
                "input": {
                    "required": {
                        "mode": [[
                            ["scale", {"factor": ["FLOAT", {"default": 1.0, "min": 0.0, "max": 8.0}]}],
                            ["absolute", {
                                "width": ["INT", {"default": 512}],
                                "height": ["INT", {"default": 512}]
                            }]
                        ]],
                        "crop": [["disabled", "center"]]
                    }
                },
                "display_name": "Image Scale"
            }
        }))
        .unwrap();
        let text = json!({
            "nodes": [{"id": 1, "type": "ImageScale", "order": 0,
                       "widgets_values": ["absolute", 512, 512, "disabled"]}],
            "links": [],
            "last_node_id": 1,
            "last_link_id": 0,
            "version": 0.4
        })
        .to_string();
        let mut graph = Graph::from_json(&text).unwrap();
        let missing = graph.create_node_properties(&cat);
        assert!(missing.is_empty());

        let names: Vec<&str> = graph
            .node(1)
            .unwrap()
            .properties()
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(names, vec!["mode", "width", "height", "crop"]);

        // children occupy the widget slots after the cascade's own
        graph.set_property_value(1, "width", 768).unwrap();
        let node = graph.node(1).unwrap();
        assert_eq!(
            node.widgets_values.as_ref().unwrap().as_array().unwrap()[1],
            json!(768)
        );
        assert_eq!(graph.property_value(1, "crop"), Some(json!("disabled")));

        // the cascade itself only accepts its group names
        assert!(graph.set_property_value(1, "mode", "nonsense").is_err());
        graph.set_property_value(1, "mode", "scale").unwrap();
        assert_eq!(graph.property_value(1, "mode"), Some(json!("scale")));
    }

    #[test]
    fn group_containment_selects_nodes() {
        let text = r#"{
            "nodes": [
                {"id": 1, "type": "KSampler", "order": 0, "pos": [100, 100], "size": [200, 100]},
                {"id": 2, "type": "VAEDecode", "order": 1, "pos": [900, 900], "size": [200, 50]}
            ],
            "links": [],
            "groups": [{"title": "API", "bounding": [50, 50, 400, 300]}],
            "last_node_id": 2,
            "last_link_id": 0,
            "version": 0.4
        }"#;
        let mut graph = Graph::from_json(text).unwrap();
        graph.create_node_properties(&test_catalogue());
        let group = graph.group_with_title("API").unwrap();
        let inside = graph.nodes_in_group(group);
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].id, 1);

        let api = graph.simple_api(None).unwrap();
        assert_eq!(api.properties.len(), 1);
        let handle = &api.properties["KSampler"];
        assert_eq!(handle.node, 1);
        // no uploader on the node, so the first property by declaration
        // index is chosen even though it is a link input
        assert_eq!(handle.property, "model");
    }

    #[test]
    fn title_lookup_falls_back_to_display_name() {
        let mut graph = Graph::from_json(two_node_workflow()).unwrap();
        graph.create_node_properties(&test_catalogue());
        assert_eq!(graph.first_node_with_title("VAE Decode").unwrap().id, 2);
        assert!(graph.first_node_with_title("Nonexistent").is_none());
        assert_eq!(graph.nodes_with_type("KSampler").len(), 1);
    }

    #[test]
    fn roundtrip_preserves_shapes() {
        let graph = Graph::from_json(two_node_workflow()).unwrap();
        let encoded = graph.to_json().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["links"][0], json!([5, 1, 0, 2, 0, "LATENT"]));
        assert_eq!(value["nodes"][0]["pos"], json!([100.0, 100.0]));
        assert_eq!(
            value["nodes"][0]["widgets_values"],
            json!([42, "fixed", 20, 8.0, "euler"])
        );
    }

    #[test]
    fn indexed_object_positions_normalise_to_arrays() {
        let text = r#"{
            "nodes": [{
                "id": 1,
                "type": "VAEDecode",
                "order": 0,
                "pos": {"0": 12, "1": 34},
                "size": {"0": 210, "1": 46}
            }],
            "links": [],
            "last_node_id": 1,
            "last_link_id": 0,
            "version": 0.4
        }"#;
        let graph = Graph::from_json(text).unwrap();
        let value: Value = serde_json::from_str(&graph.to_json().unwrap()).unwrap();
        assert_eq!(value["nodes"][0]["pos"], json!([12.0, 34.0]));
        assert_eq!(value["nodes"][0]["size"], json!([210.0, 46.0]));
    }
}
