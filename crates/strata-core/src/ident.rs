// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource identifiers and property references.
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error returned when a resource id or property reference fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// A single non-empty segment was given without a trailing `:`.
    #[error("must have trailing ':' for provider-only id: '{0}'")]
    ProviderOnly(String),
    /// One or more segments did not match their allowed character class.
    #[error("invalid resource id '{input}': {reasons}")]
    Invalid {
        /// The text that was parsed.
        input: String,
        /// Human-readable description of each offending segment.
        reasons: String,
    },
    /// A property reference was missing the `#` separator.
    #[error("invalid property reference '{0}': expected 'resource#property'")]
    MalformedRef(String),
}

/// Structured identifier of a resource in the graph.
///
/// The zero value (all fields empty) is a wildcard when used as a selector and
/// is never a valid vertex key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct ResourceId {
    /// Provider namespace for the type (e.g. `aws`, `kubernetes`).
    pub provider: String,
    /// Resource type within the provider.
    pub kind: String,
    /// Optional namespace disambiguating resources with the same name.
    pub namespace: String,
    /// Resource name.
    pub name: String,
}

impl ResourceId {
    /// Builds an id with an empty namespace.
    pub fn new(provider: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: kind.into(),
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Builds an id for a type only (empty namespace and name).
    pub fn of_type(provider: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(provider, kind, "")
    }

    /// Returns a copy of this id with `namespace` set.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Returns a copy of this id with `name` set.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// `true` when every field is empty.
    pub fn is_zero(&self) -> bool {
        self.provider.is_empty()
            && self.kind.is_empty()
            && self.namespace.is_empty()
            && self.name.is_empty()
    }

    /// `provider:type`.
    pub fn qualified_type_name(&self) -> String {
        format!("{}:{}", self.provider, self.kind)
    }

    /// Uses `self` as a filter: every non-empty field must equal the field of `other`.
    pub fn matches(&self, other: &Self) -> bool {
        (self.provider.is_empty() || self.provider == other.provider)
            && (self.kind.is_empty() || self.kind == other.kind)
            && (self.namespace.is_empty() || self.namespace == other.namespace)
            && (self.name.is_empty() || self.name == other.name)
    }

    /// `true` when both ids share provider and type.
    pub fn same_type(&self, other: &Self) -> bool {
        self.provider == other.provider && self.kind == other.kind
    }

    /// Parses the textual id form (`provider:type[:namespace]:name`).
    pub fn parse(text: &str) -> Result<Self, IdError> {
        let parts: Vec<&str> = text.splitn(4, ':').collect();
        let mut id = Self::default();
        match parts.as_slice() {
            [single] => {
                if !single.is_empty() {
                    return Err(IdError::ProviderOnly(text.to_owned()));
                }
                return Ok(id);
            }
            [provider, kind] => {
                id.provider = (*provider).to_owned();
                id.kind = (*kind).to_owned();
            }
            [provider, kind, name] => {
                id.provider = (*provider).to_owned();
                id.kind = (*kind).to_owned();
                id.name = (*name).to_owned();
            }
            [provider, kind, namespace, name] => {
                id.provider = (*provider).to_owned();
                id.kind = (*kind).to_owned();
                id.namespace = (*namespace).to_owned();
                id.name = (*name).to_owned();
            }
            _ => return Ok(id),
        }
        if id.is_zero() {
            return Ok(id);
        }
        let patterns = patterns();
        let mut reasons = Vec::new();
        if !patterns.provider.is_match(&id.provider) {
            reasons.push(format!("invalid provider '{}'", id.provider));
        }
        if !id.kind.is_empty() && !patterns.kind.is_match(&id.kind) {
            reasons.push(format!("invalid type '{}'", id.kind));
        }
        if !id.namespace.is_empty() && !patterns.namespace.is_match(&id.namespace) {
            reasons.push(format!("invalid namespace '{}'", id.namespace));
        }
        if !patterns.name.is_match(&id.name) {
            reasons.push(format!("invalid name '{}'", id.name));
        }
        if reasons.is_empty() {
            Ok(id)
        } else {
            Err(IdError::Invalid {
                input: text.to_owned(),
                reasons: reasons.join("; "),
            })
        }
    }
}

struct IdPatterns {
    provider: Regex,
    kind: Regex,
    namespace: Regex,
    name: Regex,
}

fn patterns() -> &'static IdPatterns {
    static PATTERNS: OnceLock<IdPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| IdPatterns {
        provider: compile(r"^[a-zA-Z0-9_]+$"),
        kind: compile(r"^[a-zA-Z0-9_]+$"),
        namespace: compile(r"^[a-zA-Z0-9_./\-\[\]]*$"),
        name: compile(r"^[a-zA-Z0-9_./\-:\[\]]*$"),
    })
}

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    // Patterns are compile-time constants.
    Regex::new(pattern).expect("static id pattern")
}

/// Strips characters that are not allowed in a resource name.
pub fn sanitize_name(name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    INVALID
        .get_or_init(|| compile(r"[^a-zA-Z0-9_./\-:\[\]]"))
        .replace_all(name, "")
        .into_owned()
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return Ok(());
        }
        write!(f, "{}:{}", self.provider, self.kind)?;
        if !self.namespace.is_empty() || self.name.contains(':') {
            write!(f, ":{}", self.namespace)?;
        }
        if !self.name.is_empty() {
            write!(f, ":{}", self.name)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// A pointer to a property on another resource, resolved lazily.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct PropertyRef {
    /// Resource owning the property.
    pub resource: ResourceId,
    /// Dotted path of the property on that resource.
    pub property: String,
}

impl PropertyRef {
    /// Builds a reference to `property` on `resource`.
    pub fn new(resource: ResourceId, property: impl Into<String>) -> Self {
        Self {
            resource,
            property: property.into(),
        }
    }

    /// `true` when both halves are empty.
    pub fn is_zero(&self) -> bool {
        self.resource.is_zero() && self.property.is_empty()
    }

    /// Parses `resource#property`.
    pub fn parse(text: &str) -> Result<Self, IdError> {
        let (res, prop) = text
            .split_once('#')
            .ok_or_else(|| IdError::MalformedRef(text.to_owned()))?;
        if prop.is_empty() {
            return Err(IdError::MalformedRef(text.to_owned()));
        }
        Ok(Self {
            resource: ResourceId::parse(res)?,
            property: prop.to_owned(),
        })
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.property)
    }
}

impl FromStr for PropertyRef {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PropertyRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PropertyRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_every_arity() {
        assert_eq!(ResourceId::parse("").unwrap(), ResourceId::default());
        assert_eq!(
            ResourceId::parse("aws:vpc").unwrap(),
            ResourceId::of_type("aws", "vpc")
        );
        assert_eq!(
            ResourceId::parse("aws:vpc:main").unwrap(),
            ResourceId::new("aws", "vpc", "main")
        );
        assert_eq!(
            ResourceId::parse("aws:subnet:main:public-1").unwrap(),
            ResourceId::new("aws", "subnet", "public-1").with_namespace("main")
        );
        assert!(matches!(
            ResourceId::parse("aws"),
            Err(IdError::ProviderOnly(_))
        ));
        assert!(matches!(
            ResourceId::parse("aws:v pc:x"),
            Err(IdError::Invalid { .. })
        ));
    }

    #[test]
    fn display_writes_namespace_when_name_has_colon() {
        let id = ResourceId::new("k8s", "pod", "a:b");
        assert_eq!(id.to_string(), "k8s:pod::a:b");
        assert_eq!(ResourceId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn empty_fields_are_wildcards() {
        let sel = ResourceId::of_type("aws", "subnet");
        assert!(sel.matches(&ResourceId::new("aws", "subnet", "a").with_namespace("v")));
        assert!(!sel.matches(&ResourceId::new("aws", "vpc", "a")));
        assert!(ResourceId::default().matches(&ResourceId::new("x", "y", "z")));
    }

    #[test]
    fn property_ref_round_trips_text() {
        let r = PropertyRef::parse("aws:vpc:main#CidrBlock").unwrap();
        assert_eq!(r.resource, ResourceId::new("aws", "vpc", "main"));
        assert_eq!(r.property, "CidrBlock");
        assert_eq!(r.to_string(), "aws:vpc:main#CidrBlock");
        assert!(PropertyRef::parse("aws:vpc:main").is_err());
    }

    #[test]
    fn sanitize_name_drops_invalid_chars() {
        assert_eq!(sanitize_name("my bucket!*"), "mybucket");
        assert_eq!(sanitize_name("a/b-c_d.e"), "a/b-c_d.e");
    }

    proptest! {
        #[test]
        fn display_then_parse_is_identity(
            provider in "[a-z][a-z0-9_]{0,6}",
            kind in "[a-z][a-z0-9_]{0,8}",
            namespace in "[a-z0-9_\\-]{0,6}",
            name in "[a-z0-9_\\-]{1,10}",
        ) {
            let id = ResourceId::new(provider, kind, name).with_namespace(namespace);
            prop_assert_eq!(ResourceId::parse(&id.to_string()).unwrap(), id);
        }
    }
}
