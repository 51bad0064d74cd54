// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Knowledge base: resource and edge templates plus the weighted type graph
//! they form.
//!
//! The type graph is what makes "functional reachability" cheap to answer:
//! edges between two glue types cost nothing, entering a functional type from
//! glue costs a lot, and everything else costs one. The lowest-cost path
//! between two types therefore prefers plumbing over crossing functional
//! boundaries.
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use thiserror::Error;
use tracing::debug;

mod edge;
pub mod layer;
mod template;

pub use edge::{EdgeTemplate, Unique};
pub use layer::DependencyLayer;
pub use template::{Classification, DeleteContext, Functionality, Gives, ResourceTemplate};

use crate::dynamic::{DynamicValueContext, DynamicValueData};
use crate::ident::ResourceId;
use crate::property::PropertyError;
use crate::resource::{PathError, Resource};
use crate::template::TemplateError;
use crate::value::Value;

/// Cost of an edge between two glue types.
pub const GLUE_WEIGHT: u64 = 0;
/// Cost of an edge from glue into a functional type.
pub const FUNCTIONAL_BOUNDARY_WEIGHT: u64 = 10_000;
/// Cost of any other edge.
pub const DEFAULT_WEIGHT: u64 = 1;

/// Knowledge-base registration and lookup failures.
#[derive(Debug, Error)]
pub enum KbError {
    /// A resource template with this type is already registered.
    #[error("resource template '{0}' already registered")]
    DuplicateTemplate(String),
    /// An edge template for this pair is already registered.
    #[error("edge template {from} -> {to} already registered")]
    DuplicateEdge {
        /// Source type.
        from: String,
        /// Target type.
        to: String,
    },
    /// An edge names a type with no resource template.
    #[error("edge template {from} -> {to}: no resource template for '{missing}'")]
    MissingEndpoint {
        /// Source type.
        from: String,
        /// Target type.
        to: String,
        /// The unregistered endpoint.
        missing: String,
    },
    /// No resource template for the type.
    #[error("no resource template for '{0}'")]
    TemplateNotFound(String),
    /// The template has no property at the path.
    #[error("resource '{resource}' has no property '{path}' in its template")]
    PropertyNotFound {
        /// Resource the lookup was for.
        resource: ResourceId,
        /// Requested path.
        path: String,
    },
    /// A namespace property holds something other than a resource id.
    #[error("namespace property '{path}' on '{resource}' is a {found}, not a resource")]
    NamespaceValue {
        /// Resource whose namespace was read.
        resource: ResourceId,
        /// Namespace property path.
        path: String,
        /// Kind of the value found.
        found: &'static str,
    },
    /// Template evaluation failed.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// Property parsing failed.
    #[error(transparent)]
    Property(#[from] PropertyError),
    /// A property path was malformed or did not fit the value.
    #[error(transparent)]
    Path(#[from] PathError),
}

#[derive(Clone, Debug)]
struct TypeEdge {
    template: EdgeTemplate,
    weight: u64,
}

/// Registered templates and the type graph.
#[derive(Clone, Debug, Default)]
pub struct KnowledgeBase {
    templates: BTreeMap<String, ResourceTemplate>,
    edges: BTreeMap<String, BTreeMap<String, TypeEdge>>,
}

impl KnowledgeBase {
    /// Creates an empty knowledge base.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource template.
    pub fn add_resource_template(&mut self, template: ResourceTemplate) -> Result<(), KbError> {
        let key = template.qualified_type_name.clone();
        if self.templates.contains_key(&key) {
            return Err(KbError::DuplicateTemplate(key));
        }
        debug!(template = %key, "registered resource template");
        self.templates.insert(key, template);
        Ok(())
    }

    /// Registers an edge template; both endpoint types must be registered.
    pub fn add_edge_template(&mut self, template: EdgeTemplate) -> Result<(), KbError> {
        let from = template.source.qualified_type_name();
        let to = template.target.qualified_type_name();
        for endpoint in [&from, &to] {
            if !self.templates.contains_key(endpoint) {
                return Err(KbError::MissingEndpoint {
                    from: from.clone(),
                    to: to.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        if self.edges.get(&from).is_some_and(|m| m.contains_key(&to)) {
            return Err(KbError::DuplicateEdge { from, to });
        }
        let source_f = self.get_functionality(&template.source);
        let target_f = self.get_functionality(&template.target);
        let weight = match (source_f, target_f) {
            (Functionality::Unknown, Functionality::Unknown) => GLUE_WEIGHT,
            (Functionality::Unknown, _) => FUNCTIONAL_BOUNDARY_WEIGHT,
            _ => DEFAULT_WEIGHT,
        };
        self.edges
            .entry(from)
            .or_default()
            .insert(to, TypeEdge { template, weight });
        Ok(())
    }

    /// Every resource template, sorted by qualified type name.
    pub fn list_resources(&self) -> impl Iterator<Item = &ResourceTemplate> {
        self.templates.values()
    }

    /// Every edge template, sorted by source then target.
    pub fn list_edges(&self) -> impl Iterator<Item = &EdgeTemplate> {
        self.edges.values().flat_map(|m| m.values().map(|e| &e.template))
    }

    /// Template for the type of `id`.
    pub fn get_resource_template(&self, id: &ResourceId) -> Option<&ResourceTemplate> {
        self.templates.get(&id.qualified_type_name())
    }

    /// Like [`Self::get_resource_template`] but missing is an error.
    pub fn get_resource_template_for(&self, id: &ResourceId) -> Result<&ResourceTemplate, KbError> {
        self.get_resource_template(id)
            .ok_or_else(|| KbError::TemplateNotFound(id.qualified_type_name()))
    }

    /// Edge template between the types of `from` and `to`.
    pub fn get_edge_template(&self, from: &ResourceId, to: &ResourceId) -> Option<&EdgeTemplate> {
        self.edges
            .get(&from.qualified_type_name())?
            .get(&to.qualified_type_name())
            .map(|e| &e.template)
    }

    /// Edge templates whose source is the type of `source`.
    pub fn get_edge_templates_for(&self, source: &ResourceId) -> Vec<&EdgeTemplate> {
        self.edges
            .get(&source.qualified_type_name())
            .map(|m| m.values().map(|e| &e.template).collect())
            .unwrap_or_default()
    }

    /// `true` when an edge template joins the two types directly.
    pub fn has_direct_path(&self, from: &ResourceId, to: &ResourceId) -> bool {
        self.get_edge_template(from, to).is_some()
    }

    /// `true` when the cheapest type path from `from` to `to` only passes
    /// through glue types. Endpoints may be functional.
    pub fn has_functional_path(&self, from: &ResourceId, to: &ResourceId) -> bool {
        if from.same_type(to) {
            return true;
        }
        let Some(path) = self.type_path(&from.qualified_type_name(), &to.qualified_type_name()) else {
            return false;
        };
        path.len() < 3
            || path[1..path.len() - 1]
                .iter()
                .all(|t| self.functionality_of(t) == Functionality::Unknown)
    }

    /// Cheapest path over the type graph, ties broken lexicographically.
    pub fn type_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if !self.templates.contains_key(from) || !self.templates.contains_key(to) {
            return None;
        }
        let mut settled: BTreeMap<&str, u64> = BTreeMap::new();
        let mut heap = BinaryHeap::new();
        heap.push(Reverse((0_u64, vec![from.to_owned()])));
        while let Some(Reverse((cost, path))) = heap.pop() {
            let Some(last) = path.last() else { continue };
            if settled.contains_key(last.as_str()) {
                continue;
            }
            if last == to {
                return Some(path);
            }
            let Some((key, _)) = self.templates.get_key_value(last.as_str()) else {
                continue;
            };
            settled.insert(key.as_str(), cost);
            if let Some(out) = self.edges.get(key) {
                for (next, edge) in out {
                    if settled.contains_key(next.as_str()) {
                        continue;
                    }
                    let mut extended = path.clone();
                    extended.push(next.clone());
                    heap.push(Reverse((cost + edge.weight, extended)));
                }
            }
        }
        None
    }

    /// Functionality of the type of `id`; unregistered types are `Unknown`.
    pub fn get_functionality(&self, id: &ResourceId) -> Functionality {
        self.functionality_of(&id.qualified_type_name())
    }

    fn functionality_of(&self, qualified: &str) -> Functionality {
        self.templates
            .get(qualified)
            .map_or(Functionality::Unknown, ResourceTemplate::get_functionality)
    }

    /// Classification of the type of `id`; empty when unregistered.
    pub fn get_classification(&self, id: &ResourceId) -> Classification {
        self.get_resource_template(id)
            .map(|t| t.classification.clone())
            .unwrap_or_default()
    }

    /// The resource `resource` is namespaced into, read from its namespace property.
    pub fn get_resources_namespace_resource(&self, resource: &Resource) -> Result<Option<ResourceId>, KbError> {
        let template = self.get_resource_template_for(&resource.id)?;
        let Some(prop) = template.get_namespaced_property() else {
            return Ok(None);
        };
        match resource.get_property(&prop.details.path)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Id(id)) => Ok(Some(id.clone())),
            Some(other) => Err(KbError::NamespaceValue {
                resource: resource.id.clone(),
                path: prop.details.path.clone(),
                found: other.kind_name(),
            }),
        }
    }

    /// Types a resource of type `id` may be namespaced into, per the
    /// selectors of its namespace property's rule.
    pub fn get_allowed_namespaced_resource_ids(
        &self,
        ctx: &DynamicValueContext<'_>,
        id: &ResourceId,
    ) -> Result<Vec<ResourceId>, KbError> {
        let template = self.get_resource_template_for(id)?;
        let Some(step) = template
            .get_namespaced_property()
            .and_then(|p| p.details.operational_rule.as_ref())
            .and_then(|r| r.step.as_ref())
        else {
            return Ok(Vec::new());
        };
        let data = DynamicValueData::default();
        let mut out = Vec::new();
        for selector in &step.resources {
            if selector.selector.is_empty() {
                for t in self.list_resources() {
                    if t.resource_contains_classifications(&selector.classifications) {
                        out.push(t.id());
                    }
                }
                continue;
            }
            let candidate = ctx.execute_decode_as_resource_id(&selector.selector, &data)?;
            if self
                .get_resource_template(&candidate)
                .is_some_and(|t| t.resource_contains_classifications(&selector.classifications))
            {
                out.push(candidate);
            }
        }
        Ok(out)
    }

    /// Parses `value` as the property at `path` of `resource`'s template.
    /// A missing value yields the property's zero value.
    pub fn transform_to_property_value(
        &self,
        resource: &ResourceId,
        path: &str,
        value: Option<&Value>,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
    ) -> Result<Value, KbError> {
        let template = self.get_resource_template_for(resource)?;
        let prop = template.get_property(path).ok_or_else(|| KbError::PropertyNotFound {
            resource: resource.clone(),
            path: path.to_owned(),
        })?;
        match value {
            None | Some(Value::Null) => Ok(prop.zero_value()),
            Some(v) => Ok(prop.parse(v, ctx, data)?),
        }
    }

    /// Builds an empty resource of `id`'s type with its name sanitized.
    pub fn create_resource(&self, id: ResourceId) -> Result<Resource, KbError> {
        let template = self.get_resource_template_for(&id)?;
        let name = template.sanitize_name(&id.name)?;
        Ok(Resource::new(id.with_name(name)))
    }
}
