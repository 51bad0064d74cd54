// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Construct expansion: turning an abstract construct into concrete resource
//! chains.
//!
//! A base template is chosen by the construct's functionality. Attributes the
//! base does not satisfy itself are satisfied by templates functionally
//! reachable from it that give the attribute, one edge per attribute. The
//! search uses an explicit work stack bounded in depth (attributes per
//! branch) and in solutions, and never revisits a state.
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::graph::Edge;
use crate::ident::ResourceId;
use crate::kb::{Functionality, KnowledgeBase, ResourceTemplate};
use crate::resource::Resource;
use crate::value::Value;

/// Default bound on attributes per branch.
pub const DEFAULT_MAX_DEPTH: usize = 8;
/// Default bound on solutions per construct.
pub const DEFAULT_MAX_SOLUTIONS: usize = 64;
/// Property of a construct holding its declared attributes.
pub const ATTRIBUTES_PROPERTY: &str = "attributes";

/// Expansion failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpansionError {
    /// Two constraints name different types for the same construct.
    #[error("conflicting types for construct '{construct}': '{first}' and '{second}'")]
    ConflictingType {
        /// The construct.
        construct: ResourceId,
        /// Type seen first.
        first: String,
        /// Conflicting type.
        second: String,
    },
    /// Two sources give different values for one attribute.
    #[error("attribute '{attribute}' of construct '{construct}' has conflicting values '{first}' and '{second}'")]
    ConflictingAttribute {
        /// The construct.
        construct: ResourceId,
        /// Attribute name.
        attribute: String,
        /// Value seen first.
        first: Value,
        /// Conflicting value.
        second: Value,
    },
    /// No template chain satisfies the attributes.
    #[error("no expansions found for construct '{construct}' with attributes [{}]", .attributes.join(", "))]
    NoExpansions {
        /// The construct.
        construct: ResourceId,
        /// Attributes that were requested.
        attributes: Vec<String>,
    },
    /// The search hit one of its bounds.
    #[error("expansion of '{construct}' exceeded its {bound} bound of {limit}")]
    BoundExceeded {
        /// The construct.
        construct: ResourceId,
        /// Which bound: `depth` or `solutions`.
        bound: &'static str,
        /// The configured limit.
        limit: usize,
    },
}

/// User constraint on how a construct expands.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstructConstraint {
    /// Construct the constraint applies to.
    pub target: ResourceId,
    /// Required type of the base resource (`type` or `provider:type`).
    pub kind: Option<String>,
    /// Required attributes and their values.
    pub attributes: BTreeMap<String, Value>,
}

/// A construct and the attributes its expansion must provide.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpansionSet {
    /// The abstract resource.
    pub construct: Resource,
    /// Attribute names, sorted and unique.
    pub attributes: Vec<String>,
}

impl ExpansionSet {
    /// Builds a set; attributes are sorted and deduplicated.
    pub fn new(construct: Resource, attributes: impl IntoIterator<Item = String>) -> Self {
        let attributes: BTreeSet<String> = attributes.into_iter().collect();
        Self {
            construct,
            attributes: attributes.into_iter().collect(),
        }
    }
}

/// One way to expand a construct.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ExpansionSolution {
    /// Auxiliary edges from the base resource, sorted.
    pub edges: Vec<Edge>,
    /// The concrete resource that stands in for the construct.
    pub directly_mapped_resource: ResourceId,
}

/// Attributes of `construct` merged with those of every constraint
/// targeting it, and the single type constraint if any.
pub fn merge_constraints(
    construct: &Resource,
    constraints: &[ConstructConstraint],
) -> Result<(Option<String>, BTreeMap<String, Value>), ExpansionError> {
    let mut kind: Option<String> = None;
    let mut attributes: BTreeMap<String, Value> = BTreeMap::new();
    let declared = match construct.get_property(ATTRIBUTES_PROPERTY) {
        Ok(Some(Value::Map(m))) => m.clone(),
        Ok(Some(Value::List(items))) => items.iter().map(|v| (v.to_string(), Value::Bool(true))).collect(),
        _ => BTreeMap::new(),
    };
    let sources = std::iter::once((None, &declared)).chain(
        constraints
            .iter()
            .filter(|c| c.target == construct.id)
            .map(|c| (c.kind.as_ref(), &c.attributes)),
    );
    for (constraint_kind, attrs) in sources {
        if let Some(k) = constraint_kind {
            match &kind {
                Some(prev) if prev != k => {
                    return Err(ExpansionError::ConflictingType {
                        construct: construct.id.clone(),
                        first: prev.clone(),
                        second: k.clone(),
                    });
                }
                _ => kind = Some(k.clone()),
            }
        }
        for (name, value) in attrs {
            if let Some(prev) = attributes.get(name) {
                if prev != value {
                    return Err(ExpansionError::ConflictingAttribute {
                        construct: construct.id.clone(),
                        attribute: name.clone(),
                        first: prev.clone(),
                        second: value.clone(),
                    });
                }
            }
            attributes.insert(name.clone(), value.clone());
        }
    }
    Ok((kind, attributes))
}

/// Expands constructs against a knowledge base.
#[derive(Clone, Copy, Debug)]
pub struct ConstructExpansionContext<'a> {
    kb: &'a KnowledgeBase,
    max_depth: usize,
    max_solutions: usize,
}

impl<'a> ConstructExpansionContext<'a> {
    /// A context with the default bounds.
    pub fn new(kb: &'a KnowledgeBase) -> Self {
        Self {
            kb,
            max_depth: DEFAULT_MAX_DEPTH,
            max_solutions: DEFAULT_MAX_SOLUTIONS,
        }
    }

    /// Same context with explicit bounds.
    #[must_use]
    pub fn with_bounds(mut self, max_depth: usize, max_solutions: usize) -> Self {
        self.max_depth = max_depth;
        self.max_solutions = max_solutions;
        self
    }

    /// Expands `construct` under `constraints`.
    pub fn expand_construct(
        &self,
        construct: &Resource,
        functionality: Functionality,
        constraints: &[ConstructConstraint],
    ) -> Result<Vec<ExpansionSolution>, ExpansionError> {
        let (kind, attributes) = merge_constraints(construct, constraints)?;
        let set = ExpansionSet::new(construct.clone(), attributes.into_keys());
        self.find_possible_expansions(&set, functionality, kind.as_deref())
    }

    /// Every solution over every base template of `functionality`, narrowed
    /// to `base_type` when given.
    #[instrument(level = "debug", skip_all, fields(construct = %set.construct.id))]
    pub fn find_possible_expansions(
        &self,
        set: &ExpansionSet,
        functionality: Functionality,
        base_type: Option<&str>,
    ) -> Result<Vec<ExpansionSolution>, ExpansionError> {
        if set.attributes.len() > self.max_depth {
            return Err(bound_exceeded(set, "depth", self.max_depth));
        }
        let mut solutions = BTreeSet::new();
        for template in self.kb.list_resources() {
            if base_type.is_some_and(|t| !type_matches(template, t)) {
                continue;
            }
            if !template.classification.is.iter().any(|t| t == functionality.as_str()) {
                continue;
            }
            let base = template.id().with_name(set.construct.id.name.clone());
            let unsatisfied: Vec<String> = set
                .attributes
                .iter()
                .filter(|a| {
                    !template.classification.is.contains(a) && !template.gives_attribute_for_functionality(a, functionality)
                })
                .cloned()
                .collect();
            for edges in self.find_expansions(set, &base, unsatisfied, functionality)? {
                solutions.insert(ExpansionSolution {
                    edges,
                    directly_mapped_resource: base.clone(),
                });
                if solutions.len() > self.max_solutions {
                    return Err(bound_exceeded(set, "solutions", self.max_solutions));
                }
            }
        }
        if solutions.is_empty() {
            return Err(ExpansionError::NoExpansions {
                construct: set.construct.id.clone(),
                attributes: set.attributes.clone(),
            });
        }
        Ok(solutions.into_iter().collect())
    }

    /// Edge sets from `base` that satisfy every attribute in `attributes`.
    /// Empty when no branch succeeds.
    fn find_expansions(
        &self,
        set: &ExpansionSet,
        base: &ResourceId,
        attributes: Vec<String>,
        functionality: Functionality,
    ) -> Result<Vec<Vec<Edge>>, ExpansionError> {
        let mut found: BTreeSet<Vec<Edge>> = BTreeSet::new();
        let mut seen: BTreeSet<(Vec<String>, Vec<Edge>)> = BTreeSet::new();
        let mut stack: Vec<(Vec<String>, Vec<Edge>)> = vec![(attributes, Vec::new())];
        while let Some((remaining, edges)) = stack.pop() {
            if remaining.is_empty() {
                found.insert(edges);
                if found.len() > self.max_solutions {
                    return Err(bound_exceeded(set, "solutions", self.max_solutions));
                }
                continue;
            }
            for attribute in &remaining {
                for template in self.kb.list_resources() {
                    let candidate = template.id();
                    if candidate.same_type(base)
                        || !self.kb.has_functional_path(base, &candidate)
                        || !template.gives_attribute_for_functionality(attribute, functionality)
                    {
                        continue;
                    }
                    let mut next_edges = edges.clone();
                    next_edges.push(Edge::new(base.clone(), candidate.with_name(base.name.clone())));
                    next_edges.sort();
                    next_edges.dedup();
                    let next_remaining: Vec<String> = remaining.iter().filter(|a| *a != attribute).cloned().collect();
                    let state = (next_remaining, next_edges);
                    if seen.insert(state.clone()) {
                        stack.push(state);
                    }
                }
            }
        }
        if found.is_empty() {
            debug!(base = %base, "no expansion branch from base");
        }
        Ok(found.into_iter().collect())
    }
}

fn bound_exceeded(set: &ExpansionSet, bound: &'static str, limit: usize) -> ExpansionError {
    ExpansionError::BoundExceeded {
        construct: set.construct.id.clone(),
        bound,
        limit,
    }
}

fn type_matches(template: &ResourceTemplate, wanted: &str) -> bool {
    template.qualified_type_name == wanted || template.id().kind == wanted
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::kb::{Classification, EdgeTemplate, Gives};

    fn template(qtn: &str, is: &[&str], gives: &[&str]) -> ResourceTemplate {
        ResourceTemplate {
            qualified_type_name: qtn.into(),
            classification: Classification {
                is: is.iter().map(|s| (*s).to_owned()).collect(),
                gives: gives.iter().map(|g| Gives::parse(g)).collect(),
            },
            ..ResourceTemplate::default()
        }
    }

    fn construct() -> Resource {
        Resource::new(ResourceId::new("", "", "test"))
    }

    #[test]
    fn merge_rejects_conflicts() {
        let c = construct();
        let mut a = ConstructConstraint {
            target: c.id.clone(),
            kind: Some("resource1".into()),
            ..ConstructConstraint::default()
        };
        a.attributes.insert("x".into(), Value::Bool(true));
        let mut b = a.clone();
        b.attributes.insert("x".into(), Value::Bool(false));
        assert!(matches!(
            merge_constraints(&c, &[a.clone(), b]),
            Err(ExpansionError::ConflictingAttribute { .. })
        ));
        let mut other_type = a.clone();
        other_type.kind = Some("resource2".into());
        assert!(matches!(
            merge_constraints(&c, &[a.clone(), other_type]),
            Err(ExpansionError::ConflictingType { .. })
        ));
        let (kind, attrs) = merge_constraints(&c, &[a]).unwrap();
        assert_eq!(kind.as_deref(), Some("resource1"));
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn constraints_for_other_constructs_are_ignored() {
        let c = construct();
        let other = ConstructConstraint {
            target: ResourceId::new("", "", "other"),
            kind: Some("resource1".into()),
            ..ConstructConstraint::default()
        };
        assert_eq!(merge_constraints(&c, &[other]).unwrap().0, None);
    }

    #[test]
    fn type_constraint_narrows_base() {
        let mut kb = KnowledgeBase::new();
        kb.add_resource_template(template("mock:resource1", &["compute"], &[])).unwrap();
        kb.add_resource_template(template("mock:resource2", &["compute"], &[])).unwrap();
        let ctx = ConstructExpansionContext::new(&kb);
        let set = ExpansionSet::new(construct(), Vec::new());
        assert_eq!(ctx.find_possible_expansions(&set, Functionality::Compute, None).unwrap().len(), 2);
        let narrowed = ctx
            .find_possible_expansions(&set, Functionality::Compute, Some("resource2"))
            .unwrap();
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].directly_mapped_resource, ResourceId::new("mock", "resource2", "test"));
    }

    #[test]
    fn depth_bound() {
        let mut kb = KnowledgeBase::new();
        kb.add_resource_template(template("mock:resource1", &["compute"], &[])).unwrap();
        let ctx = ConstructExpansionContext::new(&kb).with_bounds(1, 8);
        let set = ExpansionSet::new(construct(), vec!["a".to_owned(), "b".to_owned()]);
        assert!(matches!(
            ctx.find_possible_expansions(&set, Functionality::Compute, None),
            Err(ExpansionError::BoundExceeded { bound: "depth", .. })
        ));
    }

    #[test]
    fn two_attributes_chain_two_edges() {
        let mut kb = KnowledgeBase::new();
        kb.add_resource_template(template("mock:db", &["storage"], &[])).unwrap();
        kb.add_resource_template(template("mock:replica", &[], &["reliability"])).unwrap();
        kb.add_resource_template(template("mock:cache", &[], &["fast"])).unwrap();
        for to in ["mock:replica", "mock:cache"] {
            kb.add_edge_template(EdgeTemplate {
                source: ResourceId::parse("mock:db").unwrap(),
                target: ResourceId::parse(to).unwrap(),
                ..EdgeTemplate::default()
            })
            .unwrap();
        }
        let ctx = ConstructExpansionContext::new(&kb);
        let set = ExpansionSet::new(construct(), vec!["reliability".to_owned(), "fast".to_owned()]);
        let solutions = ctx.find_possible_expansions(&set, Functionality::Storage, None).unwrap();
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].edges.len(), 2);
    }
}
