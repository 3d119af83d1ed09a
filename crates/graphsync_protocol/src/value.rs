//! Exported entity values.
//!
//! `Value` is the plain, transport-ready form of everything an entity can
//! hold. References to other entities come in two flavours: a gid-only
//! [`Value::Ref`] for entities the receiver already knows, and a full
//! recursive [`Value::Entity`] export for entities it does not.
//!
//! The serde representation follows the JSON wire shape: scalars are plain
//! JSON scalars, a reference is `{"gid": ...}`, a full export is
//! `{"gid": ..., <fields>}` and a list is an array.
//!
//! Decoding is lenient in two places and does not round-trip them: an
//! integer gid (`{"gid": 7}`) becomes the string gid `"7"` and is encoded
//! as a string again, and an unsigned integer above `i64::MAX` becomes a
//! float and may lose precision.

use crate::gid::Gid;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Field name → value mapping, as carried by commits.
pub type Changes = BTreeMap<String, Value>;

/// Reserved key holding an entity's gid in exported objects.
pub const GID_KEY: &str = "gid";

/// A scalar value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Scalar {
    /// Absent value (also the default of every field).
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
}

impl Scalar {
    /// Check if this scalar is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

/// A dynamic exported value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A scalar.
    Scalar(Scalar),
    /// Reference to an entity the receiver already knows.
    Ref(Gid),
    /// Full recursive export of an entity.
    Entity(EntityData),
    /// Ordered collection.
    List(Vec<Value>),
}

/// Full export of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityData {
    /// Gid of the exported entity.
    pub gid: Gid,
    /// Exported fields, never containing the reserved `gid` key.
    pub fields: BTreeMap<String, Value>,
}

impl EntityData {
    /// Creates an export without fields.
    pub fn new(gid: impl Into<Gid>) -> Self {
        Self {
            gid: gid.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field (builder style). The reserved `gid` key is ignored.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts a field. The reserved `gid` key is ignored.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        if name != GID_KEY {
            self.fields.insert(name, value.into());
        }
    }

    /// Looks up a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl Value {
    /// The null value.
    pub const NULL: Value = Value::Scalar(Scalar::Null);

    /// Creates a gid-only reference.
    pub fn reference(gid: impl Into<Gid>) -> Self {
        Value::Ref(gid.into())
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Scalar(Scalar::Null))
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Scalar(Scalar::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float, if it is one.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Scalar(Scalar::Float(n)) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a list, if it is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get the full entity export, if this is one.
    pub fn as_entity(&self) -> Option<&EntityData> {
        match self {
            Value::Entity(data) => Some(data),
            _ => None,
        }
    }

    /// Gid of the referenced entity, for references and full exports.
    pub fn gid(&self) -> Option<&Gid> {
        match self {
            Value::Ref(gid) => Some(gid),
            Value::Entity(data) => Some(&data.gid),
            _ => None,
        }
    }

    /// Returns the gid-only form of this value: full exports become
    /// references, recursively through lists.
    #[must_use]
    pub fn to_shallow(&self) -> Value {
        match self {
            Value::Entity(data) => Value::Ref(data.gid.clone()),
            Value::List(items) => Value::List(items.iter().map(Value::to_shallow).collect()),
            other => other.clone(),
        }
    }

    /// Structural equality in which two entity values are equal as soon as
    /// their gids match, whether they are references or full exports.
    pub fn is_equivalent(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_equivalent(y))
            }
            (a, b) => match (a.gid(), b.gid()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    /// Collects every gid mentioned anywhere in this value.
    pub fn collect_gids(&self, out: &mut BTreeSet<Gid>) {
        match self {
            Value::Scalar(_) => {}
            Value::Ref(gid) => {
                out.insert(gid.clone());
            }
            Value::Entity(data) => {
                out.insert(data.gid.clone());
                for value in data.fields.values() {
                    value.collect_gids(out);
                }
            }
            Value::List(items) => {
                for item in items {
                    item.collect_gids(out);
                }
            }
        }
    }
}

/// Collects every gid mentioned in a change set.
pub fn gids_in_changes(changes: &Changes) -> BTreeSet<Gid> {
    let mut out = BTreeSet::new();
    for value in changes.values() {
        value.collect_gids(&mut out);
    }
    out
}

impl Default for Value {
    fn default() -> Self {
        Value::NULL
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::Scalar(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Scalar(Scalar::Integer(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Scalar(Scalar::Integer(i64::from(n)))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Scalar(Scalar::Float(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(Scalar::Text(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(Scalar::Text(s))
    }
}

impl From<EntityData> for Value {
    fn from(data: EntityData) -> Self {
        Value::Entity(data)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Scalar(Scalar::Null) => serializer.serialize_unit(),
            Value::Scalar(Scalar::Bool(b)) => serializer.serialize_bool(*b),
            Value::Scalar(Scalar::Integer(n)) => serializer.serialize_i64(*n),
            Value::Scalar(Scalar::Float(n)) => serializer.serialize_f64(*n),
            Value::Scalar(Scalar::Text(s)) => serializer.serialize_str(s),
            Value::Ref(gid) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(GID_KEY, gid)?;
                map.end()
            }
            Value::Entity(data) => {
                let mut map = serializer.serialize_map(Some(data.fields.len() + 1))?;
                map.serialize_entry(GID_KEY, &data.gid)?;
                for (name, value) in &data.fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar, an array or an object carrying a gid")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::NULL)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::NULL)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        match i64::try_from(v) {
            Ok(n) => Ok(Value::from(n)),
            Err(_) => Ok(Value::from(v as f64)),
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut gid = None;
        let mut fields = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            if key == GID_KEY {
                gid = Some(match value {
                    Value::Scalar(Scalar::Text(s)) => Gid::from(s),
                    Value::Scalar(Scalar::Integer(n)) => Gid::new(n.to_string()),
                    _ => return Err(de::Error::custom("gid must be a string or an integer")),
                });
            } else {
                fields.insert(key, value);
            }
        }

        let gid = gid.ok_or_else(|| de::Error::custom("object values must carry a gid"))?;
        if fields.is_empty() {
            Ok(Value::Ref(gid))
        } else {
            Ok(Value::Entity(EntityData { gid, fields }))
        }
    }
}
