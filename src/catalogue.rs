//! The server's node catalogue.
//!
//! `GET /object_info` returns one schema object per node kind. Each kind
//! declares `input.required` and optionally `input.optional`, mappings
//! from input name to a one- or two-element sequence: the first element
//! is a kind tag (`"INT"`, `"FLOAT"`, `"STRING"`, `"BOOLEAN"`, or
//! anything else, treated as unknown), a sequence of string literals (a
//! combo), or a sequence of sequences (a cascade descriptor); the second
//! element, when present, is a configuration object (`min`, `max`,
//! `step`, `default`, `multiline`, …).
//!
//! Input declaration order is load-bearing: it is the order widget
//! values are laid out in workflow nodes. `serde_json` is built with
//! `preserve_order`, so map iteration yields keys in document order.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::properties::{
    BoolSpec, CascadeGroup, CascadeSpec, ComboSpec, FloatSpec, IntSpec, Property, PropertyKind,
    StringSpec, UnknownSpec,
};

/// Values of the synthetic seed-control combo.
const CONTROL_AFTER_GENERATE_VALUES: [&str; 4] =
    ["fixed", "increment", "decrement", "randomize"];

/// Declared inputs of one node kind, in declaration order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeObjectInput {
    #[serde(default)]
    pub required: serde_json::Map<String, Value>,
    #[serde(default)]
    pub optional: serde_json::Map<String, Value>,
}

impl NodeObjectInput {
    /// Required input names in declaration order.
    pub fn ordered_required(&self) -> impl Iterator<Item = &str> {
        self.required.keys().map(String::as_str)
    }

    /// Optional input names in declaration order.
    pub fn ordered_optional(&self) -> impl Iterator<Item = &str> {
        self.optional.keys().map(String::as_str)
    }
}

/// Schema for one node kind as advertised by the server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeObject {
    #[serde(default)]
    pub input: NodeObjectInput,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub output_node: bool,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub output_name: Option<Value>,
    #[serde(skip)]
    input_properties: Vec<Property>,
}

impl NodeObject {
    /// Property templates for every declared input, required first, in
    /// declaration order, with the synthetic `control_after_generate`
    /// combo inserted after each integer seed input.
    pub fn input_properties(&self) -> &[Property] {
        &self.input_properties
    }

    /// Only the templates a caller can assign values to.
    pub fn settable_properties(&self) -> impl Iterator<Item = &Property> {
        self.input_properties.iter().filter(|p| p.settable())
    }

    fn populate(&mut self) {
        let mut props = Vec::new();
        let mut index = 0usize;
        for (name, spec) in &self.input.required {
            push_input_property(&mut props, &mut index, name, spec, false);
        }
        for (name, spec) in &self.input.optional {
            push_input_property(&mut props, &mut index, name, spec, true);
        }
        self.input_properties = props;
    }
}

fn push_input_property(
    props: &mut Vec<Property>,
    index: &mut usize,
    name: &str,
    spec: &Value,
    optional: bool,
) {
    let Some(prop) = property_from_input(name, optional, spec, *index) else {
        tracing::warn!(input = name, "cannot derive property from input declaration");
        return;
    };
    *index += 1;

    let is_seed = matches!(name, "seed" | "noise_seed")
        && matches!(prop.kind(), PropertyKind::Int(_));
    props.push(prop);

    // Integer seed inputs grow a widget-only generation-control combo
    // directly after them; it never reaches the server.
    if is_seed {
        let mut control = Property::new(
            "control_after_generate",
            optional,
            *index,
            PropertyKind::Combo(ComboSpec {
                values: CONTROL_AFTER_GENERATE_VALUES
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }),
        );
        control.set_serializable(false);
        *index += 1;
        props.push(control);
    }
}

fn num_i64(config: &serde_json::Map<String, Value>, key: &str) -> Option<i64> {
    let v = config.get(key)?;
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}

fn num_f64(config: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    config.get(key).and_then(Value::as_f64)
}

/// Derive a property template from one `[tag, config?]` input
/// declaration. Returns `None` when the declaration has no recognisable
/// shape at all.
pub(crate) fn property_from_input(
    name: &str,
    optional: bool,
    spec: &Value,
    index: usize,
) -> Option<Property> {
    let items = spec.as_array()?;
    let first = items.first()?;
    let config = items.get(1).and_then(Value::as_object);

    if let Some(choices) = first.as_array() {
        if choices.iter().any(Value::is_array) {
            return Some(Property::new(
                name,
                optional,
                index,
                PropertyKind::Cascade(parse_cascade(choices)),
            ));
        }
        let values = choices
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        return Some(Property::new(
            name,
            optional,
            index,
            PropertyKind::Combo(ComboSpec { values }),
        ));
    }

    let tag = first.as_str()?;
    let kind = match tag {
        "INT" => PropertyKind::Int(IntSpec {
            default: config.and_then(|c| num_i64(c, "default")).unwrap_or(0),
            min: config.and_then(|c| num_i64(c, "min")),
            max: config.and_then(|c| num_i64(c, "max")),
            step: config.and_then(|c| num_i64(c, "step")),
        }),
        "FLOAT" => PropertyKind::Float(FloatSpec {
            default: config.and_then(|c| num_f64(c, "default")).unwrap_or(0.0),
            min: config.and_then(|c| num_f64(c, "min")),
            max: config.and_then(|c| num_f64(c, "max")),
            step: config.and_then(|c| num_f64(c, "step")),
        }),
        "STRING" => PropertyKind::String(StringSpec {
            default: config
                .and_then(|c| c.get("default"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            multiline: config
                .and_then(|c| c.get("multiline"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }),
        "BOOLEAN" => PropertyKind::Bool(BoolSpec {
            default: config
                .and_then(|c| c.get("default"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            label_on: config
                .and_then(|c| c.get("label_on"))
                .and_then(Value::as_str)
                .map(str::to_string),
            label_off: config
                .and_then(|c| c.get("label_off"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        other => PropertyKind::Unknown(UnknownSpec {
            type_name: other.to_string(),
        }),
    };
    Some(Property::new(name, optional, index, kind))
}

/// A cascade descriptor is a sequence of `[group_name, {input: spec}]`
/// pairs; each group's children are ordinary input declarations.
fn parse_cascade(choices: &[Value]) -> CascadeSpec {
    let mut groups = Vec::new();
    for entry in choices {
        let Some(pair) = entry.as_array() else {
            continue;
        };
        let Some(name) = pair.first().and_then(Value::as_str) else {
            continue;
        };
        let mut properties = Vec::new();
        if let Some(children) = pair.get(1).and_then(Value::as_object) {
            for (idx, (child_name, child_spec)) in children.iter().enumerate() {
                if let Some(p) = property_from_input(child_name, false, child_spec, idx) {
                    properties.push(p);
                }
            }
        }
        groups.push(CascadeGroup {
            name: name.to_string(),
            properties,
        });
    }
    CascadeSpec { groups }
}

/// The full node catalogue, immutable once built.
#[derive(Debug, Clone, Default)]
pub struct NodeCatalogue {
    objects: HashMap<String, NodeObject>,
}

impl NodeCatalogue {
    /// Build a catalogue from a decoded `/object_info` document.
    pub fn from_value(value: Value) -> Result<Self> {
        let objects: HashMap<String, NodeObject> = serde_json::from_value(value)?;
        Ok(Self::from_objects(objects))
    }

    /// Build a catalogue from a raw `/object_info` JSON string.
    pub fn from_json(text: &str) -> Result<Self> {
        let objects: HashMap<String, NodeObject> = serde_json::from_str(text)?;
        Ok(Self::from_objects(objects))
    }

    pub(crate) fn from_objects(mut objects: HashMap<String, NodeObject>) -> Self {
        for (name, object) in objects.iter_mut() {
            if object.name.is_empty() {
                object.name = name.clone();
            }
            object.populate();
        }
        Self { objects }
    }

    pub fn node_object(&self, kind: &str) -> Option<&NodeObject> {
        self.objects.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.objects.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Node kind names, unordered.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ksampler_catalogue() -> NodeCatalogue {
        NodeCatalogue::from_value(json!({
            "KSampler": {
                "input": {
                    "required": {
                        "model": ["MODEL"],
                        "seed": ["INT", {"default": 0, "min": 0, "max": 18446744073709551615u64}],
                        "steps": ["INT", {"default": 20, "min": 1, "max": 10000}],
                        "cfg": ["FLOAT", {"default": 8.0, "min": 0.0, "max": 100.0}],
                        "sampler_name": [["euler", "dpmpp_2m"]],
                        "denoise": ["FLOAT", {"default": 1.0, "min": 0.0, "max": 1.0}]
                    },
                    "optional": {
                        "tiled": ["BOOLEAN", {"default": false}]
                    }
                },
                "display_name": "KSampler",
                "output_node": false
            }
        }))
        .unwrap()
    }

    #[test]
    fn preserves_input_declaration_order() {
        let cat = ksampler_catalogue();
        let obj = cat.node_object("KSampler").unwrap();
        let names: Vec<&str> = obj.input_properties().iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec![
                "model",
                "seed",
                "control_after_generate",
                "steps",
                "cfg",
                "sampler_name",
                "denoise",
                "tiled"
            ]
        );
    }

    #[test]
    fn control_after_generate_is_not_serialisable() {
        let cat = ksampler_catalogue();
        let obj = cat.node_object("KSampler").unwrap();
        let control = obj
            .input_properties()
            .iter()
            .find(|p| p.name() == "control_after_generate")
            .unwrap();
        assert!(!control.serializable());
        assert_eq!(
            control.combo_values().unwrap(),
            &["fixed", "increment", "decrement", "randomize"]
        );
    }

    #[test]
    fn noise_seed_also_gets_the_control_combo() {
        let cat = NodeCatalogue::from_value(json!({
            "SamplerAdvanced": {
                "input": {
                    "required": {
                        "noise_seed": ["INT", {"default": 0}]
                    }
                }
            }
        }))
        .unwrap();
        let obj = cat.node_object("SamplerAdvanced").unwrap();
        assert_eq!(obj.input_properties().len(), 2);
        assert_eq!(obj.input_properties()[1].name(), "control_after_generate");
    }

    #[test]
    fn string_named_seed_gets_no_control_combo() {
        let cat = NodeCatalogue::from_value(json!({
            "Oddball": {
                "input": {
                    "required": {
                        "seed": ["STRING", {}]
                    }
                }
            }
        }))
        .unwrap();
        let obj = cat.node_object("Oddball").unwrap();
        assert_eq!(obj.input_properties().len(), 1);
    }

    #[test]
    fn link_inputs_become_unknown_and_unsettable() {
        let cat = ksampler_catalogue();
        let obj = cat.node_object("KSampler").unwrap();
        let model = &obj.input_properties()[0];
        assert_eq!(model.type_string(), "MODEL");
        assert!(!model.settable());
        let settable: Vec<&str> = obj.settable_properties().map(|p| p.name()).collect();
        assert!(!settable.contains(&"model"));
    }

    #[test]
    fn combo_values_parse_in_order() {
        let cat = ksampler_catalogue();
        let obj = cat.node_object("KSampler").unwrap();
        let sampler = obj
            .input_properties()
            .iter()
            .find(|p| p.name() == "sampler_name")
            .unwrap();
        assert_eq!(sampler.combo_values().unwrap(), &["euler", "dpmpp_2m"]);
    }

    #[test]
    fn cascade_descriptor_parses_groups() {
        let cat = NodeCatalogue::from_value(json!({
            "Resize": {
                "input": {
                    "required": {
                        "mode": [[
                            ["scale", {"factor": ["FLOAT", {"default": 1.0}]}],
                            ["absolute", {
                                "width": ["INT", {"default": 512}],
                                "height": ["INT", {"default": 512}]
                            }]
                        ]]
                    }
                }
            }
        }))
        .unwrap();
        let obj = cat.node_object("Resize").unwrap();
        let mode = &obj.input_properties()[0];
        assert_eq!(mode.type_string(), "CASCADE");
        let PropertyKind::Cascade(spec) = mode.kind() else {
            panic!("expected cascade");
        };
        assert_eq!(spec.groups.len(), 2);
        assert_eq!(spec.groups[1].name, "absolute");
        assert_eq!(spec.groups[1].properties.len(), 2);
        assert_eq!(spec.groups[1].properties[0].name(), "width");
    }

    #[test]
    fn missing_input_section_is_tolerated() {
        let cat = NodeCatalogue::from_value(json!({"Bare": {}})).unwrap();
        let obj = cat.node_object("Bare").unwrap();
        assert!(obj.input_properties().is_empty());
        assert_eq!(obj.name, "Bare");
    }
}
