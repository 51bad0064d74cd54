// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Rule application against a mutable graph.
use tracing::{debug, info, instrument};

use super::action::Action;
use super::{ApplyResult, ConfigurationRule, OperationalRule, OperationalStep, PropertyRule, RuleError};
use crate::dynamic::{DynamicValueContext, DynamicValueData};
use crate::graph::{Edge, ResourceGraph};
use crate::ident::ResourceId;
use crate::kb::{layer, DependencyLayer, KbError, KnowledgeBase};
use crate::property::Property;
use crate::resource::PropertyPath;
use crate::value::Value;

/// Hops searched downstream of an anchor for namespace resources.
pub const DEFAULT_TRAVERSAL_RADIUS: usize = 3;

/// Everything a rule needs while it runs: the graph it mutates, the
/// knowledge base, the property the rule is attached to and the binding
/// templates see.
///
/// Mutations are applied as they happen. A failing step leaves the changes
/// of earlier steps in place.
#[derive(Debug)]
pub struct OperationalRuleContext<'a> {
    /// Graph being resolved.
    pub graph: &'a mut ResourceGraph,
    /// Template registry.
    pub kb: &'a KnowledgeBase,
    /// Property the rule is attached to, if any.
    pub property: Option<Property>,
    /// Binding for template evaluation.
    pub data: DynamicValueData,
    /// Hops searched downstream of an anchor for namespace resources.
    pub radius: usize,
}

impl<'a> OperationalRuleContext<'a> {
    /// A context with no property and an empty binding.
    pub fn new(graph: &'a mut ResourceGraph, kb: &'a KnowledgeBase) -> Self {
        Self {
            graph,
            kb,
            property: None,
            data: DynamicValueData::default(),
            radius: DEFAULT_TRAVERSAL_RADIUS,
        }
    }

    /// Same context with the namespace search radius set.
    #[must_use]
    pub fn with_radius(mut self, radius: usize) -> Self {
        self.radius = radius;
        self
    }

    /// Read-only template view of the current graph.
    pub fn dynamic(&self) -> DynamicValueContext<'_> {
        DynamicValueContext::new(&*self.graph, self.kb)
    }

    /// Runs every step and configuration rule of `rule` unless its condition
    /// is false. Failures are collected across steps.
    pub fn handle_operational_rule(&mut self, rule: &OperationalRule) -> Result<ApplyResult, RuleError> {
        if !self.dynamic().evaluate_condition(&rule.if_condition, &self.data, true)? {
            debug!(resource = %self.data.resource, "rule skipped: condition is false");
            return Ok(ApplyResult::default());
        }
        let mut out = ApplyResult::default();
        let mut errs = Vec::new();
        for (index, step) in rule.steps.iter().enumerate() {
            if let Err(error) = self.run_step(step, &mut out) {
                errs.push(RuleError::Step {
                    index,
                    resource: self.data.resource.clone(),
                    error: Box::new(error),
                });
            }
        }
        for (index, config) in rule.configuration_rules.iter().enumerate() {
            if let Err(error) = self.handle_configuration_rule(config) {
                errs.push(RuleError::Configuration {
                    index,
                    error: Box::new(error),
                });
            }
        }
        RuleError::collect(errs)?;
        Ok(out)
    }

    /// Applies the rule of [`Self::property`] to the bound resource.
    ///
    /// With a step, values that no longer match the step's selectors are
    /// dropped first. With a value, the property is set from it.
    pub fn handle_property_rule(&mut self, rule: &PropertyRule) -> Result<ApplyResult, RuleError> {
        if self.data.resource.is_zero() {
            return Err(RuleError::NoAnchor);
        }
        let Some(property) = self.property.clone() else {
            return Err(RuleError::NoProperty(self.data.resource.clone()));
        };
        if !self.dynamic().evaluate_condition(&rule.if_condition, &self.data, true)? {
            debug!(resource = %self.data.resource, path = %property.details.path, "property rule skipped: condition is false");
            return Ok(ApplyResult::default());
        }
        let mut out = ApplyResult::default();
        let mut errs = Vec::new();
        if let Some(step) = &rule.step {
            if !step.resources.is_empty() {
                if let Err(e) = self.clean_property(&property, step) {
                    errs.push(e);
                }
            }
            if let Err(e) = self.run_step(step, &mut out) {
                errs.push(e);
            }
        }
        if let Some(value) = &rule.value {
            if let Err(e) = self.set_rule_value(&property, value) {
                errs.push(e);
            }
        }
        RuleError::collect(errs)?;
        Ok(out)
    }

    /// Resolves one step on its own.
    pub fn handle_operational_step(&mut self, step: &OperationalStep) -> Result<ApplyResult, RuleError> {
        let mut out = ApplyResult::default();
        self.run_step(step, &mut out)?;
        Ok(out)
    }

    /// Parses the configured value against the target property and sets it.
    pub fn handle_configuration_rule(&mut self, rule: &ConfigurationRule) -> Result<(), RuleError> {
        let kb = self.kb;
        let (id, field, value) = {
            let ctx = DynamicValueContext::new(&*self.graph, kb);
            let id = ctx.execute_decode_as_resource_id(&rule.resource, &self.data)?;
            let field = ctx.render(&rule.configuration.field, &self.data)?.trim().to_owned();
            let value = kb.transform_to_property_value(&id, &field, Some(&rule.configuration.value), &ctx, &self.data)?;
            (id, field, value)
        };
        let property = kb
            .get_resource_template_for(&id)?
            .get_property(&field)
            .ok_or_else(|| KbError::PropertyNotFound {
                resource: id.clone(),
                path: field.clone(),
            })?;
        let resource = self
            .graph
            .resource_mut(&id)
            .ok_or_else(|| RuleError::ResourceNotFound(id.clone()))?;
        property.set_property(resource, value)?;
        debug!(resource = %id, field = %field, "configured field");
        Ok(())
    }

    /// Runs the rules of the edge template between the endpoints of `edge`
    /// with `.Source` and `.Target` bound.
    pub fn apply_edge_rules(&mut self, edge: &Edge) -> Result<ApplyResult, RuleError> {
        let kb = self.kb;
        let Some(template) = kb.get_edge_template(&edge.source, &edge.target) else {
            return Ok(ApplyResult::default());
        };
        let saved_data = std::mem::replace(&mut self.data, DynamicValueData::for_edge(edge.clone()));
        let saved_property = self.property.take();
        let mut out = ApplyResult::default();
        let mut errs = Vec::new();
        for rule in &template.operational_rules {
            match self.handle_operational_rule(rule) {
                Ok(r) => out.extend(r),
                Err(e) => errs.push(e),
            }
        }
        self.data = saved_data;
        self.property = saved_property;
        RuleError::collect(errs)?;
        Ok(out)
    }

    /// Runs every property rule of `id`'s template, list-of-object children
    /// included. Returns the changes and the resource's final id.
    pub fn apply_resource_rules(&mut self, id: &ResourceId) -> Result<(ApplyResult, ResourceId), RuleError> {
        let kb = self.kb;
        let template = kb.get_resource_template_for(id)?;
        let resource = self
            .graph
            .resource(id)
            .ok_or_else(|| RuleError::ResourceNotFound(id.clone()))?;
        let properties = template.loop_properties(resource);
        let saved_data = std::mem::take(&mut self.data);
        let saved_property = self.property.take();
        let mut current = id.clone();
        let mut out = ApplyResult::default();
        let mut errs = Vec::new();
        for property in properties {
            let Some(rule) = property.details.operational_rule.clone() else {
                continue;
            };
            let path = PropertyPath::parse(&property.details.path)?;
            self.data = DynamicValueData::for_resource(current.clone()).with_path(path);
            self.property = Some(property);
            match self.handle_property_rule(&rule) {
                Ok(r) => out.extend(r),
                Err(e) => errs.push(e),
            }
            current = self.data.resource.clone();
        }
        self.data = saved_data;
        self.property = saved_property;
        RuleError::collect(errs)?;
        Ok((out, current))
    }

    /// One pass over the graph: property rules of every resource, then the
    /// rules of every edge, each in id order.
    pub fn apply_pass(&mut self) -> Result<ApplyResult, RuleError> {
        let mut out = ApplyResult::default();
        let mut errs = Vec::new();
        for id in self.graph.resource_ids() {
            if !self.graph.contains(&id) || self.kb.get_resource_template(&id).is_none() {
                continue;
            }
            match self.apply_resource_rules(&id) {
                Ok((r, _)) => out.extend(r),
                Err(e) => errs.push(e),
            }
        }
        for edge in self.graph.edges() {
            if !self.graph.has_dependency(&edge.source, &edge.target) {
                continue;
            }
            match self.apply_edge_rules(&edge) {
                Ok(r) => out.extend(r),
                Err(e) => errs.push(e),
            }
        }
        RuleError::collect(errs)?;
        Ok(out)
    }

    #[instrument(level = "debug", skip_all, fields(resource = %self.data.resource))]
    fn run_step(&mut self, step: &OperationalStep, out: &mut ApplyResult) -> Result<(), RuleError> {
        let needed = step.needed();
        let mut anchor = if self.data.resource.is_zero() {
            self.dynamic().execute_decode_as_resource_id(&step.resource, &self.data)?
        } else {
            self.data.resource.clone()
        };
        if !self.graph.contains(&anchor) {
            return Err(RuleError::ResourceNotFound(anchor));
        }
        let replace = self
            .dynamic()
            .evaluate_condition(&step.replacement_condition, &self.data, false)?;

        let current = match self.property.clone() {
            Some(property) => {
                if replace {
                    self.clear_property(&property, step, &anchor)?;
                }
                self.add_dependencies_from_property(&property, step, &mut anchor, out)?
            }
            None => {
                let ids = self.resources_for_step(step, &anchor)?;
                if replace {
                    for id in &ids {
                        let (source, target) = step.direction.edge(&anchor, id);
                        self.graph.remove_dependency(&source, &target)?;
                    }
                    Vec::new()
                } else {
                    ids
                }
            }
        };

        if current.len() >= needed {
            debug!(resource = %anchor, found = current.len(), needed, "step already satisfied");
            return Ok(());
        }
        if step.fail_if_missing {
            return Err(RuleError::MissingRequired {
                resource: anchor,
                needed,
                found: current.len(),
            });
        }
        Action::new(step, anchor, current).run(self, out)
    }

    /// Dependents of `anchor` in the step's direction, up to and including
    /// the first functional resource, whose types the step selects.
    fn resources_for_step(&self, step: &OperationalStep, anchor: &ResourceId) -> Result<Vec<ResourceId>, RuleError> {
        let ctx = self.dynamic();
        let deps = layer::layered(&ctx, anchor, step.direction, DependencyLayer::FirstFunctional)?;
        let mut types = Vec::new();
        for selector in &step.resources {
            types.extend(selector.extract_resource_ids(&ctx, &self.data)?);
        }
        Ok(deps
            .into_iter()
            .filter(|d| types.iter().any(|t| t.same_type(d)))
            .collect())
    }

    /// Drops the property's dependents in the step's direction, then the value.
    fn clear_property(
        &mut self,
        property: &Property,
        step: &OperationalStep,
        anchor: &ResourceId,
    ) -> Result<(), RuleError> {
        let resource = self
            .graph
            .resource(anchor)
            .ok_or_else(|| RuleError::ResourceNotFound(anchor.clone()))?;
        let Some(value) = resource.get_property(&property.details.path)?.cloned() else {
            return Ok(());
        };
        for id in value.refs().into_vec() {
            let (source, target) = step.direction.edge(anchor, &id);
            if self.graph.has_dependency(&source, &target) {
                self.graph.remove_dependency(&source, &target)?;
            }
        }
        let resource = self
            .graph
            .resource_mut(anchor)
            .ok_or_else(|| RuleError::ResourceNotFound(anchor.clone()))?;
        property.remove_property(resource, None)?;
        debug!(resource = %anchor, path = %property.details.path, "cleared property for replacement");
        Ok(())
    }

    /// Wires every resource the property already references and returns
    /// those ids.
    fn add_dependencies_from_property(
        &mut self,
        property: &Property,
        step: &OperationalStep,
        anchor: &mut ResourceId,
        out: &mut ApplyResult,
    ) -> Result<Vec<ResourceId>, RuleError> {
        let resource = self
            .graph
            .resource(anchor)
            .ok_or_else(|| RuleError::ResourceNotFound(anchor.clone()))?;
        let Some(value) = resource.get_property(&property.details.path)?.cloned() else {
            return Ok(Vec::new());
        };
        let ids = value.refs().into_vec();
        let mut errs = Vec::new();
        for id in &ids {
            if id == anchor {
                continue;
            }
            if !self.graph.contains(id) {
                errs.push(RuleError::ResourceNotFound(id.clone()));
                continue;
            }
            if let Err(e) = self.add_dependency_for_direction(step, anchor, id, out) {
                errs.push(e);
            }
        }
        RuleError::collect(errs)?;
        Ok(ids)
    }

    /// Removes property values that no selector of `step` matches any more,
    /// together with their edges. A dependent left without edges is removed.
    fn clean_property(&mut self, property: &Property, step: &OperationalStep) -> Result<(), RuleError> {
        let anchor = self.data.resource.clone();
        let resource = self
            .graph
            .resource(&anchor)
            .ok_or_else(|| RuleError::ResourceNotFound(anchor.clone()))?;
        let Some(value) = resource.get_property(&property.details.path)?.cloned() else {
            return Ok(());
        };
        let mut stale = Vec::new();
        {
            let ctx = self.dynamic();
            for id in value.refs().into_vec() {
                let mut keep = false;
                if let Some(dep) = ctx.graph().resource(&id) {
                    for selector in &step.resources {
                        if selector.is_match(&ctx, &self.data, dep)? {
                            keep = true;
                            break;
                        }
                    }
                }
                if !keep {
                    stale.push(id);
                }
            }
        }
        if stale.is_empty() {
            return Ok(());
        }
        for id in &stale {
            for (source, target) in [(&anchor, id), (id, &anchor)] {
                if self.graph.has_dependency(source, target) {
                    self.graph.remove_dependency(source, target)?;
                }
            }
        }
        let resource = self
            .graph
            .resource_mut(&anchor)
            .ok_or_else(|| RuleError::ResourceNotFound(anchor.clone()))?;
        match value {
            Value::List(items) => {
                let kept: Vec<Value> = items
                    .into_iter()
                    .filter(|v| !v.refs().into_vec().iter().any(|id| stale.contains(id)))
                    .collect();
                property.set_property(resource, Value::List(kept))?;
            }
            _ => property.remove_property(resource, None)?,
        }
        for id in &stale {
            if self.graph.contains(id) && self.graph.degree(id) == 0 {
                self.graph.remove_resource(id)?;
                info!(resource = %id, "removed resource no longer matching its rule");
            }
        }
        Ok(())
    }

    fn set_rule_value(&mut self, property: &Property, value: &Value) -> Result<(), RuleError> {
        let parsed = {
            let ctx = DynamicValueContext::new(&*self.graph, self.kb);
            property.parse(value, &ctx, &self.data)?
        };
        let id = self.data.resource.clone();
        let resource = self
            .graph
            .resource_mut(&id)
            .ok_or_else(|| RuleError::ResourceNotFound(id.clone()))?;
        property.set_property(resource, parsed)?;
        Ok(())
    }

    /// Adds the edge between `anchor` and `dependent` in the step's direction
    /// and records `dependent` in the bound property.
    ///
    /// Setting a namespace property renames the anchor; `anchor` is updated
    /// to the new id.
    pub(super) fn add_dependency_for_direction(
        &mut self,
        step: &OperationalStep,
        anchor: &mut ResourceId,
        dependent: &ResourceId,
        out: &mut ApplyResult,
    ) -> Result<(), RuleError> {
        let (source, target) = step.direction.edge(anchor, dependent);
        if !self.graph.has_dependency(&source, &target) {
            if let Some(template) = self.kb.get_edge_template(&source, &target) {
                if !template.unique.can_add(&self.graph.edges(), &source, &target) {
                    return Err(RuleError::UniqueViolation { from: source, to: target });
                }
            }
            if self.graph.add_dependency(&source, &target)? {
                debug!(from = %source, to = %target, "added dependency");
                out.added_dependencies.push(Edge::new(source, target));
            }
        }
        self.set_field(step, anchor, dependent, out)
    }

    fn set_field(
        &mut self,
        step: &OperationalStep,
        anchor: &mut ResourceId,
        dependent: &ResourceId,
        out: &mut ApplyResult,
    ) -> Result<(), RuleError> {
        let Some(property) = &self.property else {
            return Ok(());
        };
        let path = property.details.path.as_str();
        let current = self
            .graph
            .resource(anchor)
            .ok_or_else(|| RuleError::ResourceNotFound(anchor.clone()))?
            .get_property(path)?
            .cloned();
        if current.as_ref().is_some_and(|v| v.references(dependent)) {
            return Ok(());
        }
        if !property.is_scalar() {
            let resource = self
                .graph
                .resource_mut(anchor)
                .ok_or_else(|| RuleError::ResourceNotFound(anchor.clone()))?;
            property.append_property(resource, Value::Id(dependent.clone()))?;
            info!(resource = %anchor, path, value = %dependent, "appended field");
            return Ok(());
        }

        if let Some(Value::Id(old)) = &current {
            let (source, target) = step.direction.edge(anchor, old);
            if self.graph.has_dependency(&source, &target) {
                self.graph.remove_dependency(&source, &target)?;
            }
            if self.graph.contains(old) && self.graph.degree(old) == 0 {
                self.graph.remove_resource(old)?;
                info!(resource = %old, "removed replaced field value");
            }
        }
        let resource = self
            .graph
            .resource_mut(anchor)
            .ok_or_else(|| RuleError::ResourceNotFound(anchor.clone()))?;
        property.set_property(resource, Value::Id(dependent.clone()))?;
        info!(resource = %anchor, path, value = %dependent, "set field");

        if property.details.namespace && anchor.namespace != dependent.name {
            let renamed = anchor.clone().with_namespace(dependent.name.clone());
            self.graph.replace_resource_id(anchor, &renamed)?;
            info!(from = %anchor, to = %renamed, "namespaced resource");
            rename_in(out, anchor, &renamed);
            if self.data.resource == *anchor {
                self.data.resource = renamed.clone();
            }
            *anchor = renamed;
        }
        Ok(())
    }
}

fn rename_in(out: &mut ApplyResult, old: &ResourceId, new: &ResourceId) {
    for id in &mut out.created_resources {
        if id == old {
            *id = new.clone();
        }
    }
    for edge in &mut out.added_dependencies {
        if &edge.source == old {
            edge.source = new.clone();
        }
        if &edge.target == old {
            edge.target = new.clone();
        }
    }
}
