//! Global entity identifier.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Globally unique, stable identifier of an entity in a synchronized graph.
///
/// Gids are:
/// - Unique across all replicas of a graph
/// - Immutable once assigned
/// - Compared by value (numeric gids are kept as their decimal string)
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gid(String);

impl Gid {
    /// Creates a gid from any string-like value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Creates a new random gid.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the gid as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the gid, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gid({})", self.0)
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Gid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Gid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for Gid {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<Gid> for String {
    fn from(gid: Gid) -> Self {
        gid.0
    }
}

impl Borrow<str> for Gid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Gid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Gid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Gid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(GidVisitor)
    }
}

struct GidVisitor;

impl<'de> Visitor<'de> for GidVisitor {
    type Value = Gid;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or integer gid")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Gid, E> {
        Ok(Gid::from(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Gid, E> {
        Ok(Gid::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Gid, E> {
        Ok(Gid::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Gid, E> {
        Ok(Gid::new(v.to_string()))
    }
}
