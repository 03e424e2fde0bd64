//! Shape-polymorphic wire primitives.
//!
//! The workflow format encodes the same logical values in more than one
//! JSON shape: positions and sizes arrive as 2-element arrays or as
//! objects keyed `"0"`/`"1"`, links as 6-tuples or named objects, and
//! widget values as an ordered array or a name-keyed map. Decoders here
//! accept every shape; encoders emit the canonical one (arrays for
//! geometry) or the shape the value was decoded from (links).

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A 2-D point or extent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

fn number(v: &Value) -> Option<f64> {
    v.as_f64()
}

impl<'de> Deserialize<'de> for Vec2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        match &raw {
            Value::Array(items) => {
                let x = items.first().and_then(number).unwrap_or(0.0);
                let y = items.get(1).and_then(number).unwrap_or(0.0);
                Ok(Vec2 { x, y })
            }
            Value::Object(map) => {
                let x = map.get("0").and_then(number).unwrap_or(0.0);
                let y = map.get("1").and_then(number).unwrap_or(0.0);
                Ok(Vec2 { x, y })
            }
            other => Err(D::Error::custom(format!(
                "expected a 2-element array or an indexed object, got {other}"
            ))),
        }
    }
}

impl Serialize for Vec2 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        [self.x, self.y].serialize(serializer)
    }
}

/// Which serialisation a [`Link`] was decoded from. Links created in
/// memory default to the tuple form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkShape {
    /// `[id, origin_id, origin_slot, target_id, target_slot, type]`
    #[default]
    Tuple,
    /// `{"id": …, "origin_id": …, …}` (links inside subgraph definitions)
    Object,
}

/// A directed edge between an origin output slot and a target input slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: i64,
    pub origin_id: i64,
    pub origin_slot: i64,
    pub target_id: i64,
    pub target_slot: i64,
    /// Data-type tag (`"MODEL"`, `"IMAGE"`, …). Kept as raw JSON so a
    /// null or numeric tag survives a round-trip.
    pub kind: Value,
    pub shape: LinkShape,
}

impl Link {
    pub fn new(
        id: i64,
        origin_id: i64,
        origin_slot: i64,
        target_id: i64,
        target_slot: i64,
        kind: impl Into<Value>,
    ) -> Self {
        Self {
            id,
            origin_id,
            origin_slot,
            target_id,
            target_slot,
            kind: kind.into(),
            shape: LinkShape::Tuple,
        }
    }

    /// The type tag, when it is a string.
    pub fn kind_tag(&self) -> Option<&str> {
        self.kind.as_str()
    }
}

fn int_at(items: &[Value], idx: usize) -> Option<i64> {
    items.get(idx).and_then(Value::as_i64)
}

fn int_field(map: &serde_json::Map<String, Value>, key: &str) -> Option<i64> {
    map.get(key).and_then(Value::as_i64)
}

impl<'de> Deserialize<'de> for Link {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        match raw {
            Value::Array(items) => {
                if items.len() != 6 {
                    return Err(D::Error::custom(format!(
                        "link tuple has {} fields, expected 6",
                        items.len()
                    )));
                }
                Ok(Link {
                    id: int_at(&items, 0)
                        .ok_or_else(|| D::Error::custom("link id is not an integer"))?,
                    origin_id: int_at(&items, 1)
                        .ok_or_else(|| D::Error::custom("link origin id is not an integer"))?,
                    origin_slot: int_at(&items, 2).unwrap_or(0),
                    target_id: int_at(&items, 3)
                        .ok_or_else(|| D::Error::custom("link target id is not an integer"))?,
                    target_slot: int_at(&items, 4).unwrap_or(0),
                    kind: items[5].clone(),
                    shape: LinkShape::Tuple,
                })
            }
            Value::Object(map) => Ok(Link {
                id: int_field(&map, "id")
                    .ok_or_else(|| D::Error::custom("link object is missing \"id\""))?,
                origin_id: int_field(&map, "origin_id")
                    .ok_or_else(|| D::Error::custom("link object is missing \"origin_id\""))?,
                origin_slot: int_field(&map, "origin_slot").unwrap_or(0),
                target_id: int_field(&map, "target_id")
                    .ok_or_else(|| D::Error::custom("link object is missing \"target_id\""))?,
                target_slot: int_field(&map, "target_slot").unwrap_or(0),
                kind: map.get("type").cloned().unwrap_or(Value::Null),
                shape: LinkShape::Object,
            }),
            other => Err(D::Error::custom(format!(
                "expected a link tuple or object, got {other}"
            ))),
        }
    }
}

impl Serialize for Link {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.shape {
            LinkShape::Tuple => {
                let tuple = serde_json::json!([
                    self.id,
                    self.origin_id,
                    self.origin_slot,
                    self.target_id,
                    self.target_slot,
                    self.kind,
                ]);
                tuple.serialize(serializer)
            }
            LinkShape::Object => {
                let obj = serde_json::json!({
                    "id": self.id,
                    "origin_id": self.origin_id,
                    "origin_slot": self.origin_slot,
                    "target_id": self.target_id,
                    "target_slot": self.target_slot,
                    "type": self.kind,
                });
                obj.serialize(serializer)
            }
        }
    }
}

/// Addressing for one widget value within a node's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetKey {
    /// Position within an array-shaped payload.
    Index(usize),
    /// Key within a map-shaped payload.
    Name(String),
}

/// A node's widget-value payload: either an ordered sequence of scalars
/// or a mapping from widget name to scalar, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidgetValues {
    Array(Vec<Value>),
    Map(serde_json::Map<String, Value>),
}

impl WidgetValues {
    /// Array view; `None` when the payload is a mapping.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            WidgetValues::Array(items) => Some(items),
            WidgetValues::Map(_) => None,
        }
    }

    /// Map view; `None` when the payload is a sequence.
    pub fn as_map(&self) -> Option<&serde_json::Map<String, Value>> {
        match self {
            WidgetValues::Array(_) => None,
            WidgetValues::Map(map) => Some(map),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WidgetValues::Array(items) => items.len(),
            WidgetValues::Map(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &WidgetKey) -> Option<&Value> {
        match (self, key) {
            (WidgetValues::Array(items), WidgetKey::Index(i)) => items.get(*i),
            (WidgetValues::Map(map), WidgetKey::Name(name)) => map.get(name),
            _ => None,
        }
    }

    /// Write a value at the given key. An array payload is padded with
    /// nulls when the index lies past its end; a mismatched key shape
    /// returns `false`.
    pub fn set(&mut self, key: &WidgetKey, value: Value) -> bool {
        match (self, key) {
            (WidgetValues::Array(items), WidgetKey::Index(i)) => {
                if *i >= items.len() {
                    items.resize(*i + 1, Value::Null);
                }
                items[*i] = value;
                true
            }
            (WidgetValues::Map(map), WidgetKey::Name(name)) => {
                map.insert(name.clone(), value);
                true
            }
            _ => false,
        }
    }
}
