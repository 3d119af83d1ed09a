//! Live field values.

use crate::entity::{export_field, Entity, ExportOptions};
use graphsync_protocol::{Scalar, Value};
use std::collections::HashSet;

/// The live value of an entity field.
///
/// Unlike [`Value`], which is a detached export, a `Field` holds handles to
/// the entities it references.
#[derive(Debug, Clone)]
pub enum Field {
    /// A scalar value.
    Scalar(Scalar),
    /// Reference to another entity.
    Entity(Entity),
    /// Ordered collection.
    List(Vec<Field>),
}

impl Field {
    /// The null field.
    pub const NULL: Field = Field::Scalar(Scalar::Null);

    /// Check if this field is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Field::Scalar(Scalar::Null))
    }

    /// Check if this field holds a default value: null or an empty
    /// collection.
    pub fn is_default(&self) -> bool {
        match self {
            Field::Scalar(scalar) => scalar.is_null(),
            Field::List(items) => items.is_empty(),
            Field::Entity(_) => false,
        }
    }

    /// Get the referenced entity, if this field is a reference.
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Field::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Get the items, if this field is a collection.
    pub fn as_list(&self) -> Option<&[Field]> {
        match self {
            Field::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get the scalar, if this field is one.
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Field::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    /// Get this field as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Field::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Get this field as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Field::Scalar(Scalar::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    /// Exports this field.
    ///
    /// With `shallow`, referenced entities become gid-only references;
    /// otherwise they are exported in full, recursively. Cycles are cut with
    /// references.
    pub fn to_value(&self, shallow: bool) -> Value {
        let options = if shallow {
            ExportOptions::shallow()
        } else {
            ExportOptions::deep()
        };
        export_field(self, options, &mut HashSet::new())
    }
}

impl Default for Field {
    fn default() -> Self {
        Field::NULL
    }
}

/// Entities compare by gid; everything else structurally.
impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Field::Scalar(a), Field::Scalar(b)) => a == b,
            (Field::Entity(a), Field::Entity(b)) => a.gid() == b.gid(),
            (Field::List(a), Field::List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Scalar> for Field {
    fn from(s: Scalar) -> Self {
        Field::Scalar(s)
    }
}

impl From<bool> for Field {
    fn from(b: bool) -> Self {
        Field::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for Field {
    fn from(n: i64) -> Self {
        Field::Scalar(Scalar::Integer(n))
    }
}

impl From<i32> for Field {
    fn from(n: i32) -> Self {
        Field::Scalar(Scalar::Integer(i64::from(n)))
    }
}

impl From<f64> for Field {
    fn from(n: f64) -> Self {
        Field::Scalar(Scalar::Float(n))
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::Scalar(Scalar::Text(s.to_string()))
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Field::Scalar(Scalar::Text(s))
    }
}

impl From<Entity> for Field {
    fn from(entity: Entity) -> Self {
        Field::Entity(entity)
    }
}

impl From<&Entity> for Field {
    fn from(entity: &Entity) -> Self {
        Field::Entity(entity.clone())
    }
}

impl From<Vec<Field>> for Field {
    fn from(items: Vec<Field>) -> Self {
        Field::List(items)
    }
}
