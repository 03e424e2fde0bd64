//! Typed, settable node inputs.
//!
//! A [`Property`] is the handle through which callers read and write a
//! node's widget values. Each property carries a kind (integer, float,
//! string, combo, boolean, cascade, image-upload, or unknown), a target
//! binding into the owning node's widget payload, and optionally a list
//! of *secondary* properties kept in lockstep when the primary is set
//! (used by primitive nodes that fan one value out to several inputs).
//!
//! Catalogue-derived properties are templates: they are deep-copied onto
//! each workflow node at bind time so per-node state (target, current
//! value, secondaries) is never shared.

use serde_json::Value;

use crate::wire::WidgetKey;

/// Where a property's value lives.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyTarget {
    /// Not bound to anything; setting the value fails.
    Unbound,
    /// A slot in a node's widget payload, addressed by index (array
    /// payloads) or by name (map payloads).
    Widget { node: i64, key: WidgetKey },
    /// A free value cell owned by the property itself. Used when the
    /// node payload has no slot for this input.
    Direct(Value),
}

/// Numeric range and stepping for an integer input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntSpec {
    pub default: i64,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub step: Option<i64>,
}

/// Numeric range and stepping for a float input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloatSpec {
    pub default: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringSpec {
    pub default: String,
    pub multiline: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolSpec {
    pub default: bool,
    pub label_on: Option<String>,
    pub label_off: Option<String>,
}

/// An ordered set of allowed string values. An empty set is *open*: any
/// string is accepted (subgraph input ports declare combos without
/// enumerating their values).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComboSpec {
    pub values: Vec<String>,
}

/// One named group of child properties within a cascade.
#[derive(Debug, Clone)]
pub struct CascadeGroup {
    pub name: String,
    pub properties: Vec<Property>,
}

/// A combo whose current value selects a named group of child
/// properties; the selected group's children are appended to the owning
/// node at bind time.
#[derive(Debug, Clone, Default)]
pub struct CascadeSpec {
    pub groups: Vec<CascadeGroup>,
}

impl CascadeSpec {
    pub fn group(&self, name: &str) -> Option<&CascadeGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

/// Bridges a file-chooser input to the combo property holding the
/// uploaded filename. Not directly settable; it serialises the bound
/// combo's current value.
#[derive(Debug, Clone)]
pub struct ImageUploadSpec {
    /// Name of the combo property on the same node (typically `image`).
    pub target_property: String,
}

/// An input kind the server advertised but this library does not model.
/// Preserved, not settable.
#[derive(Debug, Clone, Default)]
pub struct UnknownSpec {
    pub type_name: String,
}

#[derive(Debug, Clone)]
pub enum PropertyKind {
    Int(IntSpec),
    Float(FloatSpec),
    String(StringSpec),
    Bool(BoolSpec),
    Combo(ComboSpec),
    Cascade(CascadeSpec),
    ImageUpload(ImageUploadSpec),
    Unknown(UnknownSpec),
}

/// A typed descriptor for one settable node input.
#[derive(Debug, Clone)]
pub struct Property {
    name: String,
    alias: Option<String>,
    optional: bool,
    serializable: bool,
    index: usize,
    target: PropertyTarget,
    override_value: Option<Value>,
    secondaries: Vec<Property>,
    kind: PropertyKind,
}

impl Property {
    pub fn new(name: impl Into<String>, optional: bool, index: usize, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            alias: None,
            optional,
            serializable: true,
            index,
            target: PropertyTarget::Unbound,
            override_value: None,
            secondaries: Vec::new(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn set_alias(&mut self, alias: impl Into<String>) {
        self.alias = Some(alias.into());
    }

    pub(crate) fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn optional(&self) -> bool {
        self.optional
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    /// The wire name of the property kind (`"INT"`, `"COMBO"`, …);
    /// unknown kinds report the tag the server used.
    pub fn type_string(&self) -> &str {
        match &self.kind {
            PropertyKind::Int(_) => "INT",
            PropertyKind::Float(_) => "FLOAT",
            PropertyKind::String(_) => "STRING",
            PropertyKind::Bool(_) => "BOOLEAN",
            PropertyKind::Combo(_) => "COMBO",
            PropertyKind::Cascade(_) => "CASCADE",
            PropertyKind::ImageUpload(_) => "IMAGEUPLOAD",
            PropertyKind::Unknown(spec) => &spec.type_name,
        }
    }

    /// Whether this input occupies a slot in the node's widget payload.
    pub(crate) fn is_widget_backed(&self) -> bool {
        !matches!(
            self.kind,
            PropertyKind::ImageUpload(_) | PropertyKind::Unknown(_)
        )
    }

    pub fn settable(&self) -> bool {
        !matches!(
            self.kind,
            PropertyKind::ImageUpload(_) | PropertyKind::Unknown(_)
        )
    }

    pub fn serializable(&self) -> bool {
        self.serializable
    }

    pub fn set_serializable(&mut self, serializable: bool) {
        self.serializable = serializable;
    }

    pub fn target(&self) -> &PropertyTarget {
        &self.target
    }

    pub fn set_target(&mut self, target: PropertyTarget) {
        self.target = target;
    }

    pub(crate) fn set_direct(&mut self, value: Value) {
        self.target = PropertyTarget::Direct(value);
    }

    pub fn override_value(&self) -> Option<&Value> {
        self.override_value.as_ref()
    }

    pub fn set_override(&mut self, value: Option<Value>) {
        self.override_value = value;
    }

    pub fn secondaries(&self) -> &[Property] {
        &self.secondaries
    }

    pub fn attach_secondary(&mut self, property: Property) {
        self.secondaries.push(property);
    }

    /// `true` when `name` equals the primary name.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name == name
    }

    /// `true` when `name` equals the alias.
    pub fn matches_alias(&self, name: &str) -> bool {
        self.alias.as_deref() == Some(name)
    }

    /// The allowed combo values, when this is a combo.
    pub fn combo_values(&self) -> Option<&[String]> {
        match &self.kind {
            PropertyKind::Combo(spec) => Some(&spec.values),
            _ => None,
        }
    }

    /// Add `value` to a combo's allowed set if absent. Returns `false`
    /// when the property is not a combo.
    pub(crate) fn combo_push(&mut self, value: &str) -> bool {
        match &mut self.kind {
            PropertyKind::Combo(spec) => {
                if !spec.values.iter().any(|v| v == value) {
                    spec.values.push(value.to_string());
                }
                true
            }
            _ => false,
        }
    }

    /// The combo property an image uploader writes through to.
    pub fn upload_target(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::ImageUpload(spec) => Some(&spec.target_property),
            _ => None,
        }
    }

    /// Parse and constrain a candidate value. Numeric kinds clamp to
    /// their declared range; combos require membership; unsettable kinds
    /// always return `None`.
    pub fn value_from_str(&self, value: &str) -> Option<Value> {
        match &self.kind {
            PropertyKind::Int(spec) => {
                let mut v: i64 = value.trim().parse().ok()?;
                if spec.min.is_some() || spec.max.is_some() {
                    v = v.clamp(spec.min.unwrap_or(i64::MIN), spec.max.unwrap_or(i64::MAX));
                }
                Some(Value::from(v))
            }
            PropertyKind::Float(spec) => {
                let mut v: f64 = value.trim().parse().ok()?;
                if spec.min.is_some() || spec.max.is_some() {
                    v = v.clamp(
                        spec.min.unwrap_or(f64::NEG_INFINITY),
                        spec.max.unwrap_or(f64::INFINITY),
                    );
                }
                Some(Value::from(v))
            }
            PropertyKind::String(_) => Some(Value::String(value.to_string())),
            PropertyKind::Bool(_) => match value.trim() {
                "true" | "True" | "1" => Some(Value::Bool(true)),
                "false" | "False" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            PropertyKind::Combo(spec) => {
                if spec.values.is_empty() || spec.values.iter().any(|v| v == value) {
                    Some(Value::String(value.to_string()))
                } else {
                    None
                }
            }
            PropertyKind::Cascade(spec) => {
                if spec.groups.iter().any(|g| g.name == value) {
                    Some(Value::String(value.to_string()))
                } else {
                    None
                }
            }
            PropertyKind::ImageUpload(_) | PropertyKind::Unknown(_) => None,
        }
    }
}

/// Stringify a JSON value the way a user would type it: strings are
/// unquoted, everything else uses its JSON rendering.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
