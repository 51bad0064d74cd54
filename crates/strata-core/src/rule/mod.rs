// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operational rules: declarative descriptions of the dependents a resource,
//! property or edge needs, and the engine that makes the graph satisfy them.
//!
//! Rules are authored in template YAML and evaluated against a
//! [`DynamicValueContext`]. The engine ([`OperationalRuleContext`]) runs each
//! step as a small state machine: count what already satisfies the step, stop
//! if that is enough, otherwise attach explicit resources, reuse eligible
//! existing ones through a [`placer`] and create the remainder.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod action;
mod engine;
pub mod placer;

pub use engine::OperationalRuleContext;

use crate::dynamic::{DynamicValueContext, DynamicValueData};
use crate::graph::{Direction, Edge, GraphError};
use crate::ident::ResourceId;
use crate::kb::KbError;
use crate::property::PropertyError;
use crate::resource::{PathError, Resource};
use crate::template::TemplateError;
use crate::value::Value;

/// A conditional group of steps and configuration rules.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OperationalRule {
    /// Boolean template; an empty condition always holds.
    #[serde(rename = "if")]
    pub if_condition: String,
    /// Dependents to resolve.
    pub steps: Vec<OperationalStep>,
    /// Values to apply onto fields.
    pub configuration_rules: Vec<ConfigurationRule>,
}

/// The rule attached to a single property.
///
/// A rule with a `value` and no `step` just sets the property from the
/// template.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PropertyRule {
    /// Boolean template; an empty condition always holds.
    #[serde(rename = "if")]
    pub if_condition: String,
    /// Dependents whose ids become the property's value.
    pub step: Option<OperationalStep>,
    /// Value to parse and set on the property.
    pub value: Option<Value>,
}

/// Placement heuristic used when several existing resources could satisfy a
/// step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionOperator {
    /// Prefer the least connected candidate; never reuse a sole candidate.
    #[serde(rename = "spread")]
    Spread,
    /// Prefer the most connected candidate.
    #[serde(rename = "cluster")]
    Cluster,
    /// Prefer the candidate nearest to the anchor.
    #[default]
    #[serde(rename = "closest", alias = "")]
    Closest,
}

/// One requirement of a rule: `num_needed` resources matching `resources`
/// in `direction` of the anchor.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OperationalStep {
    /// Template for the anchor when the binding has no resource (edge rules).
    pub resource: String,
    /// Side of the anchor the dependents are on.
    pub direction: Direction,
    /// What counts as a dependent.
    pub resources: Vec<ResourceSelector>,
    /// How many dependents are required; zero means one.
    pub num_needed: usize,
    /// Boolean template; when true existing dependents are dropped first.
    pub replacement_condition: String,
    /// Fail instead of acting when dependents are missing.
    pub fail_if_missing: bool,
    /// Always create new dependents owned by the anchor.
    pub unique: bool,
    /// Placement among existing candidates.
    pub selection_operator: SelectionOperator,
}

impl OperationalStep {
    /// `num_needed` with zero read as one.
    pub fn needed(&self) -> usize {
        self.num_needed.max(1)
    }
}

/// Identifies candidate dependents by a selector template, literal property
/// values and classification tags.
///
/// Written either as a bare selector string or as a map.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(from = "RawSelector")]
pub struct ResourceSelector {
    /// Template rendering to one id or a list of ids; empty means every type.
    pub selector: String,
    /// Property values a candidate must hold.
    pub properties: BTreeMap<String, Value>,
    /// Tags the candidate's type must carry.
    pub classifications: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSelector {
    Bare(String),
    Full(FullSelector),
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct FullSelector {
    selector: String,
    properties: BTreeMap<String, Value>,
    classifications: Vec<String>,
}

impl From<RawSelector> for ResourceSelector {
    fn from(raw: RawSelector) -> Self {
        match raw {
            RawSelector::Bare(selector) => Self {
                selector,
                ..Self::default()
            },
            RawSelector::Full(f) => Self {
                selector: f.selector,
                properties: f.properties,
                classifications: f.classifications,
            },
        }
    }
}

impl ResourceSelector {
    /// A selector for the bare template `selector`.
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Self::default()
        }
    }

    /// Ids the selector names whose types carry the classifications. Names
    /// in the rendered ids are kept; an empty selector yields every
    /// registered type.
    pub fn extract_resource_ids(
        &self,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
    ) -> Result<Vec<ResourceId>, KbError> {
        let candidates: Vec<ResourceId> = if self.selector.trim().is_empty() {
            ctx.kb().list_resources().map(|t| t.id()).collect()
        } else {
            let ids: Vec<ResourceId> = ctx.execute_decode(&self.selector, data)?;
            if ids.iter().any(ResourceId::is_zero) {
                return Err(TemplateError::ZeroSelector(self.selector.clone()).into());
            }
            ids
        };
        let mut out = Vec::with_capacity(candidates.len());
        for id in candidates {
            let template = ctx.kb().get_resource_template_for(&id)?;
            if template.resource_contains_classifications(&self.classifications) {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// `true` when the type of `id` is one the selector names.
    ///
    /// Only provider and type are compared so a renamed resource still
    /// matches.
    pub fn is_type_match(
        &self,
        ctx: &DynamicValueContext<'_>,
        id: &ResourceId,
        data: &DynamicValueData,
    ) -> Result<bool, KbError> {
        Ok(self
            .extract_resource_ids(ctx, data)?
            .iter()
            .any(|sel| sel.same_type(id)))
    }

    /// `true` when `resource` matches the selector's type and holds every
    /// selector property.
    pub fn is_match(
        &self,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
        resource: &Resource,
    ) -> Result<bool, KbError> {
        self.matches(ctx, data, resource, false)
    }

    /// Like [`Self::is_match`] but unset properties are acceptable: the
    /// resource can be configured to match.
    pub fn can_use(
        &self,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
        resource: &Resource,
    ) -> Result<bool, KbError> {
        self.matches(ctx, data, resource, true)
    }

    fn matches(
        &self,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
        resource: &Resource,
        allow_unset: bool,
    ) -> Result<bool, KbError> {
        if !self.is_type_match(ctx, &resource.id, data)? {
            return Ok(false);
        }
        let template = ctx.kb().get_resource_template_for(&resource.id)?;
        if !template.resource_contains_classifications(&self.classifications) {
            return Ok(false);
        }
        for (path, wanted) in &self.properties {
            let wanted = ctx
                .kb()
                .transform_to_property_value(&resource.id, path, Some(wanted), ctx, data)?;
            let current = resource.get_property(path)?;
            if current == Some(&wanted) {
                continue;
            }
            if !(allow_unset && current.is_none_or(Value::is_null)) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Sets a field on a resource as part of a rule.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfigurationRule {
    /// Template rendering to the resource to configure.
    pub resource: String,
    /// What to set.
    pub configuration: Configuration,
}

/// A field and the value to give it.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Property path on the target resource.
    pub field: String,
    /// Literal or template value.
    pub value: Value,
}

/// Graph changes made by applying rules.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApplyResult {
    /// Resources added to the graph.
    pub created_resources: Vec<ResourceId>,
    /// Edges added to the graph.
    pub added_dependencies: Vec<Edge>,
}

impl ApplyResult {
    /// Appends another result.
    pub fn extend(&mut self, other: Self) {
        self.created_resources.extend(other.created_resources);
        self.added_dependencies.extend(other.added_dependencies);
    }

    /// `true` when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.created_resources.is_empty() && self.added_dependencies.is_empty()
    }
}

/// Rule resolution failures.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A template failed to render or decode.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// A graph mutation failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A property failed to parse, validate or update.
    #[error(transparent)]
    Property(#[from] PropertyError),
    /// A knowledge-base lookup failed.
    #[error(transparent)]
    Kb(#[from] KbError),
    /// A property path did not fit the resource.
    #[error(transparent)]
    Path(#[from] PathError),
    /// The resource a rule refers to is not in the graph.
    #[error("resource '{0}' not found")]
    ResourceNotFound(ResourceId),
    /// A property rule was applied without a resource binding.
    #[error("property rule applied without a resource")]
    NoAnchor,
    /// A property rule was applied without its property.
    #[error("property rule on '{0}' applied without a property")]
    NoProperty(ResourceId),
    /// A step with `fail_if_missing` found too few dependents.
    #[error("operational resource '{resource}' missing when required: needed {needed}, found {found}")]
    MissingRequired {
        /// The anchor of the step.
        resource: ResourceId,
        /// Dependents required.
        needed: usize,
        /// Dependents found.
        found: usize,
    },
    /// No selector names a type that can be created.
    #[error("no resource types found for step on '{0}'")]
    NoResourceTypes(ResourceId),
    /// Adding the edge would break its template's uniqueness constraint.
    #[error("edge {from} -> {to} violates its uniqueness constraint")]
    UniqueViolation {
        /// Edge source.
        from: ResourceId,
        /// Edge target.
        to: ResourceId,
    },
    /// An explicitly named dependent does not match its selector.
    #[error("resource '{resource}' does not match selector '{selector}'")]
    SelectorMismatch {
        /// The named resource.
        resource: ResourceId,
        /// The selector it was named by.
        selector: String,
    },
    /// A step of a rule failed.
    #[error("step {index} on '{resource}': {error}")]
    Step {
        /// Position of the step in its rule.
        index: usize,
        /// Anchor of the rule.
        resource: ResourceId,
        /// Underlying failure.
        #[source]
        error: Box<RuleError>,
    },
    /// A configuration rule failed.
    #[error("configuration rule {index}: {error}")]
    Configuration {
        /// Position of the configuration rule.
        index: usize,
        /// Underlying failure.
        #[source]
        error: Box<RuleError>,
    },
    /// Several independent failures.
    #[error("{}", join_errors(.0))]
    Multiple(Vec<RuleError>),
}

fn join_errors(errs: &[RuleError]) -> String {
    errs.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl RuleError {
    /// Collapses accumulated errors: none is `Ok`, one is itself.
    pub fn collect(mut errs: Vec<Self>) -> Result<(), Self> {
        match errs.len() {
            0 => Ok(()),
            1 => Err(errs.remove(0)),
            _ => Err(Self::Multiple(errs)),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn step_from_yaml() {
        let step: OperationalStep = serde_yaml::from_str(
            r"
direction: upstream
resources:
  - aws:security_group
  - selector: aws:subnet
    classifications: [private]
num_needed: 2
unique: true
selection_operator: spread
",
        )
        .unwrap();
        assert_eq!(step.direction, Direction::Upstream);
        assert_eq!(step.resources[0], ResourceSelector::new("aws:security_group"));
        assert_eq!(step.resources[1].classifications, ["private"]);
        assert_eq!(step.needed(), 2);
        assert!(step.unique);
        assert_eq!(step.selection_operator, SelectionOperator::Spread);
    }

    #[test]
    fn defaults() {
        let step: OperationalStep = serde_yaml::from_str("resources: [aws:role]").unwrap();
        assert_eq!(step.direction, Direction::Downstream);
        assert_eq!(step.needed(), 1);
        assert_eq!(step.selection_operator, SelectionOperator::Closest);
        let op: SelectionOperator = serde_yaml::from_str("''").unwrap();
        assert_eq!(op, SelectionOperator::Closest);
    }

    #[test]
    fn rule_with_condition_and_configuration() {
        let rule: OperationalRule = serde_yaml::from_str(
            r"
if: '{{ hasUpstream `aws:vpc` .Self }}'
configuration_rules:
  - resource: '{{ .Self }}'
    configuration:
      field: Port
      value: 80
",
        )
        .unwrap();
        assert!(rule.if_condition.contains("hasUpstream"));
        assert!(rule.steps.is_empty());
        assert_eq!(rule.configuration_rules[0].configuration.value, Value::Int(80));
    }

    #[test]
    fn collect_errors() {
        assert!(RuleError::collect(Vec::new()).is_ok());
        let one = RuleError::collect(vec![RuleError::NoAnchor]).unwrap_err();
        assert!(matches!(one, RuleError::NoAnchor));
        let many = RuleError::collect(vec![RuleError::NoAnchor, RuleError::NoAnchor]).unwrap_err();
        assert!(matches!(many, RuleError::Multiple(ref v) if v.len() == 2));
    }
}
