// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Discriminated property values stored on resources and produced by templates.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ident::{PropertyRef, ResourceId};

/// A property value.
///
/// Resources never store [`Value::Null`]; setting null removes the property.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating point scalar.
    Float(f64),
    /// String scalar.
    String(String),
    /// Reference to another resource.
    Id(ResourceId),
    /// Deferred reference to a property of another resource.
    Ref(PropertyRef),
    /// Ordered collection (also used for sets, which keep items unique).
    List(Vec<Value>),
    /// String-keyed map with deterministic key order.
    Map(BTreeMap<String, Value>),
}

/// Resource references carried by a value, by shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Refs {
    /// The value references no resource.
    None,
    /// A single resource reference (or a property reference on that resource).
    One(ResourceId),
    /// A list of resource references.
    Many(Vec<ResourceId>),
}

impl Refs {
    /// Flattens into a vector of ids.
    pub fn into_vec(self) -> Vec<ResourceId> {
        match self {
            Self::None => Vec::new(),
            Self::One(id) => vec![id],
            Self::Many(ids) => ids,
        }
    }
}

impl Value {
    /// `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Template truthiness: empty and zero values are false.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Id(id) => !id.is_zero(),
            Self::Ref(r) => !r.is_zero(),
            Self::List(l) => !l.is_empty(),
            Self::Map(m) => !m.is_empty(),
        }
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a resource id.
    pub fn as_id(&self) -> Option<&ResourceId> {
        match self {
            Self::Id(id) => Some(id),
            _ => None,
        }
    }

    /// Borrow as a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Borrow as a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Classifies the resource references held by this value.
    pub fn refs(&self) -> Refs {
        match self {
            Self::Id(id) => Refs::One(id.clone()),
            Self::Ref(r) => Refs::One(r.resource.clone()),
            Self::List(items) => {
                let ids: Vec<ResourceId> = items
                    .iter()
                    .filter_map(|v| match v {
                        Self::Id(id) => Some(id.clone()),
                        Self::Ref(r) => Some(r.resource.clone()),
                        _ => None,
                    })
                    .collect();
                if ids.is_empty() {
                    Refs::None
                } else {
                    Refs::Many(ids)
                }
            }
            _ => Refs::None,
        }
    }

    /// `true` if this value is `id` or a list containing `id`.
    pub fn references(&self, id: &ResourceId) -> bool {
        match self.refs() {
            Refs::None => false,
            Refs::One(one) => &one == id,
            Refs::Many(ids) => ids.contains(id),
        }
    }

    /// Rewrites every reference to `old` (recursively) to point at `new`.
    pub fn replace_id(&mut self, old: &ResourceId, new: &ResourceId) {
        match self {
            Self::Id(id) if id == old => *id = new.clone(),
            Self::Ref(r) if &r.resource == old => r.resource = new.clone(),
            Self::List(items) => items.iter_mut().for_each(|v| v.replace_id(old, new)),
            Self::Map(m) => m.values_mut().for_each(|v| v.replace_id(old, new)),
            _ => {}
        }
    }

    /// Converts into plain JSON; ids and refs become their text form.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Self::Null => J::Null,
            Self::Bool(b) => J::Bool(*b),
            Self::Int(i) => J::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
            Self::String(s) => J::String(s.clone()),
            Self::Id(id) => J::String(id.to_string()),
            Self::Ref(r) => J::String(r.to_string()),
            Self::List(l) => J::Array(l.iter().map(Self::to_json).collect()),
            Self::Map(m) => J::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
        }
    }

    /// Untyped conversion from JSON (strings stay strings).
    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as J;
        match json {
            J::Null => Self::Null,
            J::Bool(b) => Self::Bool(*b),
            J::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or_default()), Self::Int),
            J::String(s) => Self::String(s.clone()),
            J::Array(a) => Self::List(a.iter().map(Self::from_json).collect()),
            J::Object(o) => Self::Map(o.iter().map(|(k, v)| (k.clone(), Self::from_json(v))).collect()),
        }
    }

    /// Short name of the variant for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Id(_) => "resource",
            Self::Ref(_) => "property_ref",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

/// Renders the value the way templates print it: scalars as text,
/// collections as JSON.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::Id(id) => write!(f, "{id}"),
            Self::Ref(r) => write!(f, "{r}"),
            Self::List(_) | Self::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Untyped: ids and refs arrive as strings and are typed by property parsing.
impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(&json))
    }
}

impl From<ResourceId> for Value {
    fn from(id: ResourceId) -> Self {
        Self::Id(id)
    }
}

impl From<PropertyRef> for Value {
    fn from(r: PropertyRef) -> Self {
        Self::Ref(r)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<Vec<ResourceId>> for Value {
    fn from(ids: Vec<ResourceId>) -> Self {
        Self::List(ids.into_iter().map(Self::Id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_discriminate_shape() {
        let a = ResourceId::new("aws", "subnet", "a");
        let b = ResourceId::new("aws", "subnet", "b");
        assert_eq!(Value::Null.refs(), Refs::None);
        assert_eq!(Value::from("x").refs(), Refs::None);
        assert_eq!(Value::from(a.clone()).refs(), Refs::One(a.clone()));
        assert_eq!(
            Value::from(vec![a.clone(), b.clone()]).refs(),
            Refs::Many(vec![a.clone(), b])
        );
        assert!(Value::Ref(PropertyRef::new(a.clone(), "Arn")).references(&a));
    }

    #[test]
    fn replace_id_reaches_nested_values() {
        let old = ResourceId::new("aws", "vpc", "old");
        let new = ResourceId::new("aws", "vpc", "new");
        let mut m = BTreeMap::new();
        m.insert("vpc".to_owned(), Value::from(old.clone()));
        m.insert(
            "refs".to_owned(),
            Value::List(vec![Value::Ref(PropertyRef::new(old.clone(), "Id"))]),
        );
        let mut v = Value::Map(m);
        v.replace_id(&old, &new);
        assert!(!v.to_json().to_string().contains("old"));
    }

    #[test]
    fn display_prints_collections_as_json() {
        let v = Value::List(vec![Value::from("a"), Value::Int(2)]);
        assert_eq!(v.to_string(), r#"["a",2]"#);
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
    }
}
