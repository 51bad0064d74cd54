// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed resource properties.
//!
//! A [`Property`] is a closed union over [`PropertyKind`]: every operation
//! (parse, validate, zero value, set/append/remove) matches exhaustively on
//! the kind, so adding a variant is a compile error until every operation
//! handles it.
use std::collections::BTreeMap;

use thiserror::Error;

mod parse;
mod validate;

use crate::ident::ResourceId;
use crate::resource::{PathError, Resource};
use crate::rule::PropertyRule;
use crate::template::{Template, TemplateError};
use crate::value::Value;

pub(crate) use parse::parse_bool;
pub use validate::SanitizeError;

/// Properties by name, sorted.
pub type Properties = BTreeMap<String, Property>;

/// Property parsing, validation and mutation failures.
#[derive(Debug, Error)]
pub enum PropertyError {
    /// The type string names no known kind.
    #[error("unknown property type '{0}'")]
    UnknownType(String),
    /// The type string is syntactically wrong.
    #[error("malformed property type '{ty}': {reason}")]
    MalformedType {
        /// Type string.
        ty: String,
        /// What is wrong with it.
        reason: String,
    },
    /// A value does not have the shape the property expects.
    #[error("invalid value for '{path}': expected {expected}, got {found}")]
    Invalid {
        /// Property path.
        path: String,
        /// Expected kind.
        expected: &'static str,
        /// What was found.
        found: String,
    },
    /// A string is not among the allowed values.
    #[error("value '{value}' for '{path}' is not one of [{allowed}]")]
    NotAllowed {
        /// Property path.
        path: String,
        /// Offending value.
        value: String,
        /// Allowed values, comma separated.
        allowed: String,
    },
    /// A number or length is outside its bounds.
    #[error("value {value} for '{path}' is out of bounds: {bound}")]
    OutOfBounds {
        /// Property path.
        path: String,
        /// Offending value or length.
        value: String,
        /// The violated bound.
        bound: String,
    },
    /// A resource id is not of an allowed type.
    #[error("resource '{value}' for '{path}' is not one of the allowed types [{allowed}]")]
    ResourceNotAllowed {
        /// Property path.
        path: String,
        /// Offending id.
        value: ResourceId,
        /// Allowed types, comma separated.
        allowed: String,
    },
    /// A required property has no value.
    #[error("required property '{path}' is not set on resource '{resource}'")]
    Required {
        /// Property path.
        path: String,
        /// Resource being validated.
        resource: ResourceId,
    },
    /// Removing a resource reference that is not the current value.
    #[error("cannot remove '{value}' from '{path}': current value is '{current}'")]
    Mismatch {
        /// Property path.
        path: String,
        /// Value asked to remove.
        value: String,
        /// Current value.
        current: String,
    },
    /// A string needs sanitizing; carries the corrected value.
    #[error(transparent)]
    Sanitize(SanitizeError),
    /// Template evaluation failed.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// A path was malformed or did not fit the stored value.
    #[error(transparent)]
    Path(#[from] PathError),
    /// Several independent failures.
    #[error("{}", join_errors(.0))]
    Multiple(Vec<PropertyError>),
}

fn join_errors(errs: &[PropertyError]) -> String {
    errs.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Shared metadata of every property.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyDetails {
    /// Last path segment.
    pub name: String,
    /// Full dotted path from the resource root.
    pub path: String,
    /// Validation fails when unset.
    pub required: bool,
    /// The referenced resource scopes this resource's identity.
    pub namespace: bool,
    /// Only known at deploy time; exempt from `required`.
    pub deploy_time: bool,
    /// Not user-configurable.
    pub configuration_disabled: bool,
    /// Rule resolving the property's value or dependents.
    pub operational_rule: Option<PropertyRule>,
}

/// List or set element typing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Collection {
    /// Element type for lists of primitives.
    pub item: Option<Box<Property>>,
    /// Element fields for lists of objects.
    pub properties: Properties,
    /// Minimum element count.
    pub min_length: Option<usize>,
    /// Maximum element count.
    pub max_length: Option<usize>,
}

/// Map key/value typing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapShape {
    /// Key type.
    pub key: Option<Box<Property>>,
    /// Value type.
    pub value: Option<Box<Property>>,
    /// Known fields for object-shaped maps.
    pub properties: Properties,
    /// Minimum entry count.
    pub min_length: Option<usize>,
    /// Maximum entry count.
    pub max_length: Option<usize>,
}

/// The kinds a property can have.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyKind {
    /// Text, optionally restricted and sanitized.
    String {
        /// Allowed values; empty means any.
        allowed_values: Vec<String>,
        /// Template whose output is the canonical form of the value.
        sanitize: Option<Template>,
    },
    /// Signed integer.
    Int {
        /// Inclusive lower bound.
        min: Option<i64>,
        /// Inclusive upper bound.
        max: Option<i64>,
    },
    /// Floating point number.
    Float {
        /// Inclusive lower bound.
        min: Option<f64>,
        /// Inclusive upper bound.
        max: Option<f64>,
    },
    /// Boolean.
    Bool,
    /// Reference to another resource.
    Resource {
        /// Allowed type selectors; empty means any.
        allowed_types: Vec<ResourceId>,
    },
    /// Ordered list.
    List(Collection),
    /// List without duplicates.
    Set(Collection),
    /// String-keyed map.
    Map(MapShape),
    /// Untyped.
    Any,
}

/// A typed property of a resource template.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    /// Shared metadata.
    pub details: PropertyDetails,
    /// Value used when none is configured.
    pub default_value: Option<Value>,
    /// Kind and its constraints.
    pub kind: PropertyKind,
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts
}

impl Property {
    /// A property at top-level path `name`.
    pub fn new(name: &str, kind: PropertyKind) -> Self {
        Self {
            details: PropertyDetails {
                name: name.to_owned(),
                path: name.to_owned(),
                ..PropertyDetails::default()
            },
            default_value: None,
            kind,
        }
    }

    /// Builds a property from a type string such as `list(resource(aws:vpc))`.
    pub fn from_type(name: &str, path: &str, ty: &str) -> Result<Self, PropertyError> {
        let malformed = |reason: &str| PropertyError::MalformedType {
            ty: ty.to_owned(),
            reason: reason.to_owned(),
        };
        let ty = ty.trim();
        let (head, args) = match ty.find('(') {
            Some(i) => {
                let inner = ty[i + 1..].strip_suffix(')').ok_or_else(|| malformed("missing ')'"))?;
                (&ty[..i], Some(inner.trim()))
            }
            None => (ty, None),
        };
        let element = |arg: &str| Self::from_type(name, path, arg).map(Box::new);
        let kind = match (head.trim().to_ascii_lowercase().as_str(), args) {
            ("string", None) => PropertyKind::String {
                allowed_values: Vec::new(),
                sanitize: None,
            },
            ("int", None) => PropertyKind::Int { min: None, max: None },
            ("float", None) => PropertyKind::Float { min: None, max: None },
            ("bool", None) => PropertyKind::Bool,
            ("any", None) => PropertyKind::Any,
            ("resource", args) => {
                let mut allowed_types = Vec::new();
                for part in args.map(split_top_level).unwrap_or_default() {
                    if part.is_empty() {
                        continue;
                    }
                    allowed_types.push(ResourceId::parse(part).map_err(|e| malformed(&e.to_string()))?);
                }
                PropertyKind::Resource { allowed_types }
            }
            ("list", args) => PropertyKind::List(Collection {
                item: args.map(element).transpose()?,
                ..Collection::default()
            }),
            ("set", args) => PropertyKind::Set(Collection {
                item: args.map(element).transpose()?,
                ..Collection::default()
            }),
            ("map", None) => PropertyKind::Map(MapShape::default()),
            ("map", Some(args)) => match split_top_level(args).as_slice() {
                [key, value] => PropertyKind::Map(MapShape {
                    key: Some(element(key)?),
                    value: Some(element(value)?),
                    ..MapShape::default()
                }),
                _ => return Err(malformed("map takes exactly two type arguments")),
            },
            ("string" | "int" | "float" | "bool" | "any", Some(_)) => {
                return Err(malformed("primitive types take no arguments"))
            }
            _ => return Err(PropertyError::UnknownType(ty.to_owned())),
        };
        let mut prop = Self::new(name, kind);
        prop.details.path = path.to_owned();
        Ok(prop)
    }

    /// The type string this property was declared with.
    pub fn type_name(&self) -> String {
        match &self.kind {
            PropertyKind::String { .. } => "string".into(),
            PropertyKind::Int { .. } => "int".into(),
            PropertyKind::Float { .. } => "float".into(),
            PropertyKind::Bool => "bool".into(),
            PropertyKind::Any => "any".into(),
            PropertyKind::Resource { allowed_types } if allowed_types.is_empty() => "resource".into(),
            PropertyKind::Resource { allowed_types } => format!(
                "resource({})",
                allowed_types.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
            ),
            PropertyKind::List(c) => c.item.as_ref().map_or_else(|| "list".into(), |i| format!("list({})", i.type_name())),
            PropertyKind::Set(c) => c.item.as_ref().map_or_else(|| "set".into(), |i| format!("set({})", i.type_name())),
            PropertyKind::Map(m) => match (&m.key, &m.value) {
                (Some(k), Some(v)) => format!("map({},{})", k.type_name(), v.type_name()),
                _ => "map".into(),
            },
        }
    }

    /// Value of a fresh, unset property.
    pub fn zero_value(&self) -> Value {
        match &self.kind {
            PropertyKind::String { .. } => Value::String(String::new()),
            PropertyKind::Int { .. } => Value::Int(0),
            PropertyKind::Float { .. } => Value::Float(0.0),
            PropertyKind::Bool => Value::Bool(false),
            PropertyKind::Resource { .. } => Value::Id(ResourceId::default()),
            PropertyKind::List(_) | PropertyKind::Set(_) | PropertyKind::Map(_) | PropertyKind::Any => Value::Null,
        }
    }

    /// `true` for kinds holding a single value.
    pub fn is_scalar(&self) -> bool {
        !matches!(self.kind, PropertyKind::List(_) | PropertyKind::Set(_) | PropertyKind::Map(_))
    }

    /// Field properties of object-shaped lists, sets and maps.
    pub fn sub_properties(&self) -> Option<&Properties> {
        match &self.kind {
            PropertyKind::List(c) | PropertyKind::Set(c) if !c.properties.is_empty() => Some(&c.properties),
            PropertyKind::Map(m) if !m.properties.is_empty() => Some(&m.properties),
            _ => None,
        }
    }

    /// Element property of a list or set.
    pub fn item_property(&self) -> Option<&Self> {
        match &self.kind {
            PropertyKind::List(c) | PropertyKind::Set(c) => c.item.as_deref(),
            _ => None,
        }
    }

    fn items_are_collections(&self) -> bool {
        self.item_property().is_some_and(|i| !i.is_scalar())
    }

    /// Copy with `old` replaced by `new` at the front of every nested path.
    pub fn with_path_prefix(&self, old: &str, new: &str) -> Self {
        let mut out = self.clone();
        out.rewrite_prefix(old, new);
        out
    }

    fn rewrite_prefix(&mut self, old: &str, new: &str) {
        if let Some(rest) = self.details.path.strip_prefix(old) {
            self.details.path = format!("{new}{rest}");
        }
        let (item, props) = match &mut self.kind {
            PropertyKind::List(c) | PropertyKind::Set(c) => (c.item.as_deref_mut(), &mut c.properties),
            PropertyKind::Map(m) => (m.value.as_deref_mut(), &mut m.properties),
            _ => return,
        };
        if let Some(item) = item {
            item.rewrite_prefix(old, new);
        }
        for p in props.values_mut() {
            p.rewrite_prefix(old, new);
        }
    }

    /// `true` if `value` contains `needle` in the sense of the kind:
    /// substring, element, or map subset.
    pub fn contains(&self, value: &Value, needle: &Value) -> bool {
        match (&self.kind, value, needle) {
            (PropertyKind::String { .. }, Value::String(v), Value::String(n)) => v.contains(n.as_str()),
            (PropertyKind::Resource { .. }, v, Value::Id(id)) => v.references(id),
            (PropertyKind::List(_) | PropertyKind::Set(_), Value::List(items), Value::List(needles))
                if !self.items_are_collections() =>
            {
                needles.iter().all(|n| items.contains(n))
            }
            (PropertyKind::List(_) | PropertyKind::Set(_), Value::List(items), n) => items.contains(n),
            (PropertyKind::Map(_), Value::Map(m), Value::Map(sub)) => sub.iter().all(|(k, v)| m.get(k) == Some(v)),
            (PropertyKind::Map(_), Value::Map(m), Value::String(k)) => m.contains_key(k),
            (_, v, n) => v == n,
        }
    }

    fn check_shape(&self, value: &Value) -> Result<(), PropertyError> {
        let ok = match (&self.kind, value) {
            (_, Value::Null | Value::Ref(_)) => true,
            (PropertyKind::List(_) | PropertyKind::Set(_), v) => matches!(v, Value::List(_)),
            (PropertyKind::Map(_), v) => matches!(v, Value::Map(_)),
            (PropertyKind::Resource { .. }, v) => matches!(v, Value::Id(_)),
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(PropertyError::Invalid {
                path: self.details.path.clone(),
                expected: self.expected_kind(),
                found: value.kind_name().to_owned(),
            })
        }
    }

    pub(crate) fn expected_kind(&self) -> &'static str {
        match &self.kind {
            PropertyKind::String { .. } => "string",
            PropertyKind::Int { .. } => "int",
            PropertyKind::Float { .. } => "float",
            PropertyKind::Bool => "bool",
            PropertyKind::Resource { .. } => "resource",
            PropertyKind::List(_) => "list",
            PropertyKind::Set(_) => "set",
            PropertyKind::Map(_) => "map",
            PropertyKind::Any => "any",
        }
    }

    /// Overwrites the value on `resource`.
    pub fn set_property(&self, resource: &mut Resource, value: Value) -> Result<(), PropertyError> {
        self.check_shape(&value)?;
        resource.set_property(&self.details.path, value)?;
        Ok(())
    }

    /// Adds `value`: collections grow (sets skip existing members, maps
    /// merge), scalars are overwritten. A list value appended to a list of
    /// scalars is flattened.
    pub fn append_property(&self, resource: &mut Resource, value: Value) -> Result<(), PropertyError> {
        let path = self.details.path.as_str();
        match &self.kind {
            PropertyKind::List(_) | PropertyKind::Set(_) => {
                let set = matches!(self.kind, PropertyKind::Set(_));
                let items = match value {
                    Value::List(items) if !self.items_are_collections() => items,
                    other => vec![other],
                };
                for item in items {
                    let present = matches!(resource.get_property(path)?, Some(Value::List(cur)) if cur.contains(&item));
                    if set && present {
                        continue;
                    }
                    resource.append_property(path, item)?;
                }
                Ok(())
            }
            PropertyKind::Map(_) => {
                self.check_shape(&value)?;
                if resource.get_property(path)?.is_none() {
                    resource.set_property(path, value)?;
                } else {
                    resource.append_property(path, value)?;
                }
                Ok(())
            }
            _ => self.set_property(resource, value),
        }
    }

    /// Removes `value` (or everything when `None`).
    ///
    /// Resource properties only clear when `value` is the current referent.
    pub fn remove_property(&self, resource: &mut Resource, value: Option<&Value>) -> Result<(), PropertyError> {
        let path = self.details.path.as_str();
        match (&self.kind, value) {
            (_, None) => resource.remove_property(path, None)?,
            (PropertyKind::List(_) | PropertyKind::Set(_), Some(Value::List(items))) if !self.items_are_collections() => {
                for item in items {
                    resource.remove_property(path, Some(item))?;
                }
            }
            (PropertyKind::List(_) | PropertyKind::Set(_), Some(item)) => resource.remove_property(path, Some(item))?,
            (PropertyKind::Map(_), Some(Value::Map(remove))) => {
                if let Some(Value::Map(current)) = resource.get_property(path)? {
                    let kept: BTreeMap<String, Value> = current
                        .iter()
                        .filter(|(k, v)| remove.get(*k) != Some(*v))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    resource.set_property(path, Value::Map(kept))?;
                }
            }
            (PropertyKind::Resource { .. }, Some(v)) => {
                if let Some(current) = resource.get_property(path)? {
                    if current != v {
                        return Err(PropertyError::Mismatch {
                            path: path.to_owned(),
                            value: v.to_string(),
                            current: current.to_string(),
                        });
                    }
                }
                resource.remove_property(path, None)?;
            }
            (_, Some(_)) => resource.remove_property(path, None)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn prop(ty: &str) -> Property {
        Property::from_type("p", "p", ty).unwrap()
    }

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn type_strings_round_trip() {
        for ty in [
            "string",
            "int",
            "float",
            "bool",
            "any",
            "resource",
            "resource(aws:vpc)",
            "list(string)",
            "set(resource(aws:subnet))",
            "map(string,list(int))",
            "list",
            "map",
        ] {
            assert_eq!(prop(ty).type_name(), ty);
        }
    }

    #[test]
    fn bad_type_strings() {
        assert!(matches!(
            Property::from_type("p", "p", "widget"),
            Err(PropertyError::UnknownType(_))
        ));
        assert!(matches!(
            Property::from_type("p", "p", "map(string)"),
            Err(PropertyError::MalformedType { .. })
        ));
        assert!(matches!(
            Property::from_type("p", "p", "list(string"),
            Err(PropertyError::MalformedType { .. })
        ));
    }

    #[test]
    fn clone_is_deep() {
        let original = prop("list(map(string,int))");
        let mut copy = original.clone();
        if let PropertyKind::List(c) = &mut copy.kind {
            c.item = None;
        }
        assert!(original.item_property().is_some());
        assert!(copy.item_property().is_none());
    }

    #[test]
    fn set_append_remove_list() {
        let p = prop("list(string)");
        let mut r = Resource::new(id("aws:thing:t"));
        p.append_property(&mut r, Value::from("a")).unwrap();
        p.append_property(&mut r, Value::List(vec![Value::from("b"), Value::from("a")])).unwrap();
        assert_eq!(
            r.get_property("p").unwrap(),
            Some(&Value::List(vec![Value::from("a"), Value::from("b"), Value::from("a")]))
        );
        p.remove_property(&mut r, Some(&Value::from("a"))).unwrap();
        assert_eq!(r.get_property("p").unwrap(), Some(&Value::List(vec![Value::from("b")])));
        assert!(p.set_property(&mut r, Value::from("x")).is_err());
    }

    #[test]
    fn set_kind_skips_duplicates() {
        let p = prop("set(string)");
        let mut r = Resource::new(id("aws:thing:t"));
        p.append_property(&mut r, Value::List(vec![Value::from("a"), Value::from("a")])).unwrap();
        p.append_property(&mut r, Value::from("a")).unwrap();
        assert_eq!(r.get_property("p").unwrap(), Some(&Value::List(vec![Value::from("a")])));
    }

    #[test]
    fn map_append_merges_and_remove_subset() {
        let p = prop("map(string,string)");
        let mut r = Resource::new(id("aws:thing:t"));
        let one: BTreeMap<String, Value> = [("a".to_owned(), Value::from("1"))].into();
        let two: BTreeMap<String, Value> = [("b".to_owned(), Value::from("2"))].into();
        p.append_property(&mut r, Value::Map(one.clone())).unwrap();
        p.append_property(&mut r, Value::Map(two.clone())).unwrap();
        p.remove_property(&mut r, Some(&Value::Map(one))).unwrap();
        assert_eq!(r.get_property("p").unwrap(), Some(&Value::Map(two)));
    }

    #[test]
    fn resource_remove_requires_match() {
        let p = prop("resource(aws:vpc)");
        let mut r = Resource::new(id("aws:thing:t"));
        p.set_property(&mut r, Value::Id(id("aws:vpc:v"))).unwrap();
        assert!(matches!(
            p.remove_property(&mut r, Some(&Value::Id(id("aws:vpc:other")))),
            Err(PropertyError::Mismatch { .. })
        ));
        p.remove_property(&mut r, Some(&Value::Id(id("aws:vpc:v")))).unwrap();
        assert_eq!(r.get_property("p").unwrap(), None);
    }

    #[test]
    fn contains_by_kind() {
        assert!(prop("string").contains(&Value::from("hello"), &Value::from("ell")));
        let list = Value::List(vec![Value::from("a"), Value::from("b")]);
        assert!(prop("list(string)").contains(&list, &Value::from("a")));
        assert!(prop("list(string)").contains(&list, &Value::List(vec![Value::from("b")])));
        assert!(!prop("list(string)").contains(&list, &Value::from("c")));
        assert!(prop("resource").contains(&Value::Id(id("aws:vpc:v")), &Value::Id(id("aws:vpc:v"))));
    }

    #[test]
    fn prefix_rewrite_reaches_children() {
        let mut p = prop("list");
        p.details.path = "rules".into();
        if let PropertyKind::List(c) = &mut p.kind {
            c.properties
                .insert("port".into(), Property::from_type("port", "rules.port", "int").unwrap());
        }
        let q = p.with_path_prefix("rules", "rules[2]");
        assert_eq!(q.details.path, "rules[2]");
        assert_eq!(q.sub_properties().unwrap()["port"].details.path, "rules[2].port");
    }
}
