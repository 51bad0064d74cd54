// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-type resource schemas.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::consumption::Consumption;
use crate::ident::ResourceId;
use crate::property::{Properties, Property, PropertyKind};
use crate::resource::Resource;
use crate::template::funcs::Sanitizer;
use crate::template::{Template, TemplateError};
use crate::value::Value;

/// Coarse capability class of a resource type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Functionality {
    /// Runs code.
    Compute,
    /// Groups compute.
    Cluster,
    /// Holds data.
    Storage,
    /// Serves requests.
    Api,
    /// Moves messages.
    Messaging,
    /// Glue; no functional classification.
    Unknown,
}

impl Functionality {
    /// Lowercase tag as used in `classification.is`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Cluster => "cluster",
            Self::Storage => "storage",
            Self::Api => "api",
            Self::Messaging => "messaging",
            Self::Unknown => "unknown",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "compute" => Some(Self::Compute),
            "cluster" => Some(Self::Cluster),
            "storage" => Some(Self::Storage),
            "api" => Some(Self::Api),
            "messaging" => Some(Self::Messaging),
            _ => None,
        }
    }
}

impl fmt::Display for Functionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Functionality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower == "unknown" {
            return Ok(Self::Unknown);
        }
        Self::from_tag(&lower).ok_or_else(|| format!("unknown functionality '{s}'"))
    }
}

/// An attribute a type provides, and for which functionalities.
///
/// Written as `"attr"` (every functionality) or `"attr:f1,f2"`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gives {
    /// Attribute name, e.g. `serverless`.
    pub attribute: String,
    /// Functionality names, or `*`.
    pub functionality: Vec<String>,
}

impl Gives {
    /// Parses the compact string form.
    pub fn parse(text: &str) -> Self {
        match text.split_once(':') {
            Some((attribute, funcs)) => Self {
                attribute: attribute.trim().to_owned(),
                functionality: funcs.split(',').map(|f| f.trim().to_owned()).filter(|f| !f.is_empty()).collect(),
            },
            None => Self {
                attribute: text.trim().to_owned(),
                functionality: vec!["*".to_owned()],
            },
        }
    }
}

impl fmt::Display for Gives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.functionality.iter().any(|g| g == "*") {
            return f.write_str(&self.attribute);
        }
        write!(f, "{}:{}", self.attribute, self.functionality.join(","))
    }
}

impl Serialize for Gives {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Gives {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::parse(&text))
    }
}

/// Type-level tags and capabilities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Classification {
    /// What the type is (`compute`, `role`, ...).
    pub is: Vec<String>,
    /// Attributes it gives.
    pub gives: Vec<Gives>,
}

/// Conditions under which a resource of the type may be deleted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteContext {
    /// Only deletable with no upstream dependents.
    pub requires_no_upstream: bool,
    /// Only deletable with no downstream dependencies.
    pub requires_no_downstream: bool,
    /// Only deletable when fully disconnected.
    pub requires_no_upstream_or_downstream: bool,
}

/// Schema for one resource type.
#[derive(Clone, Debug, Default)]
pub struct ResourceTemplate {
    /// `provider:type`.
    pub qualified_type_name: String,
    /// Human-facing name.
    pub display_name: String,
    /// Top-level properties.
    pub properties: Properties,
    /// Tags and capabilities.
    pub classification: Classification,
    /// Deletion constraints.
    pub delete_context: DeleteContext,
    /// View name to role (`big`, `small`, `parent`, `child`).
    pub views: BTreeMap<String, String>,
    /// Template applied to new resource names.
    pub sanitize_name: Option<Template>,
    /// Values emitted to and consumed from other resources.
    pub consumption: Consumption,
}

impl ResourceTemplate {
    /// The type id (`provider:type`, empty name).
    pub fn id(&self) -> ResourceId {
        match self.qualified_type_name.split_once(':') {
            Some((provider, kind)) => ResourceId::of_type(provider, kind),
            None => ResourceId::of_type(self.qualified_type_name.as_str(), ""),
        }
    }

    /// Functionality derived from `classification.is`; none or several tags yield `Unknown`.
    pub fn get_functionality(&self) -> Functionality {
        let mut found = None;
        for tag in &self.classification.is {
            let Some(f) = Functionality::from_tag(tag) else {
                continue;
            };
            match found {
                None => found = Some(f),
                Some(prev) if prev == f => {}
                Some(_) => return Functionality::Unknown,
            }
        }
        found.unwrap_or(Functionality::Unknown)
    }

    /// `true` when some `gives` entry provides `attribute` for `functionality` (or `*`).
    pub fn gives_attribute_for_functionality(&self, attribute: &str, functionality: Functionality) -> bool {
        self.classification.gives.iter().any(|g| {
            g.attribute == attribute
                && g.functionality
                    .iter()
                    .any(|f| f == "*" || f.eq_ignore_ascii_case(functionality.as_str()))
        })
    }

    /// Every needed tag is in `is` or equals the qualified type name.
    pub fn resource_contains_classifications(&self, needs: &[String]) -> bool {
        needs
            .iter()
            .all(|need| *need == self.qualified_type_name || self.classification.is.contains(need))
    }

    /// The first top-level property flagged as the namespace.
    pub fn get_namespaced_property(&self) -> Option<&Property> {
        self.properties.values().find(|p| p.details.namespace)
    }

    /// Looks up a possibly nested property by path (`a.b[0].c`).
    ///
    /// Indexing into a list or map whose elements are typed by an item or
    /// value property resolves to that element property.
    pub fn get_property(&self, path: &str) -> Option<&Property> {
        let fields: Vec<&str> = path.split('.').collect();
        let mut props = &self.properties;
        for (i, field) in fields.iter().enumerate() {
            let name = field.split_once('[').map_or(*field, |(n, _)| n);
            let found = props.get(name)?;
            if i == fields.len() - 1 {
                return Some(found);
            }
            match &found.kind {
                PropertyKind::List(c) | PropertyKind::Set(c) if c.properties.is_empty() => {
                    return c.item.as_deref();
                }
                PropertyKind::Map(m) if m.properties.is_empty() => return m.value.as_deref(),
                _ => props = found.sub_properties()?,
            }
        }
        None
    }

    /// Every property, nested ones included, with paths expanded per list
    /// element of `resource` for lists of objects. Parents precede children.
    pub fn loop_properties(&self, resource: &Resource) -> Vec<Property> {
        let mut out = Vec::new();
        let mut queue: Vec<Property> = self.properties.values().cloned().collect();
        while !queue.is_empty() {
            let mut next = Vec::new();
            for prop in queue {
                match &prop.kind {
                    PropertyKind::List(c) | PropertyKind::Set(c) if !c.properties.is_empty() => {
                        let len = match resource.get_property(&prop.details.path) {
                            Ok(Some(Value::List(items))) => items.len(),
                            _ => 0,
                        };
                        for index in 0..len {
                            for child in c.properties.values() {
                                let prefix = format!("{}[{index}]", prop.details.path);
                                next.push(child.with_path_prefix(&prop.details.path, &prefix));
                            }
                        }
                    }
                    PropertyKind::Map(m) if !m.properties.is_empty() => {
                        next.extend(m.properties.values().cloned());
                    }
                    _ => {}
                }
                out.push(prop);
            }
            queue = next;
        }
        out
    }

    /// Applies `sanitize_name`, if any, to `name`.
    pub fn sanitize_name(&self, name: &str) -> Result<String, TemplateError> {
        match &self.sanitize_name {
            Some(t) => Ok(t.execute(&Sanitizer, &Value::String(name.to_owned()))?.trim().to_owned()),
            None => Ok(name.to_owned()),
        }
    }
}
