// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Making up a step's shortfall.
use std::collections::BTreeSet;

use tracing::{debug, info};

use super::engine::OperationalRuleContext;
use super::placer::placer_for;
use super::{ApplyResult, OperationalStep, ResourceSelector, RuleError};
use crate::graph::Direction;
use crate::ident::ResourceId;
use crate::kb::KbError;

/// Resolves the dependents a step is still missing, in order: explicitly
/// named resources, then (for non-unique steps) eligible existing resources
/// chosen by the step's placer, then new resources.
pub(super) struct Action<'s> {
    step: &'s OperationalStep,
    anchor: ResourceId,
    current: Vec<ResourceId>,
    remaining: usize,
}

impl<'s> Action<'s> {
    pub(super) fn new(step: &'s OperationalStep, anchor: ResourceId, current: Vec<ResourceId>) -> Self {
        let remaining = step.needed().saturating_sub(current.len());
        Self {
            step,
            anchor,
            current,
            remaining,
        }
    }

    pub(super) fn run(mut self, ctx: &mut OperationalRuleContext<'_>, out: &mut ApplyResult) -> Result<(), RuleError> {
        if self.remaining == 0 {
            return Ok(());
        }
        self.use_explicit_resources(ctx, out)?;
        if self.remaining == 0 {
            return Ok(());
        }
        if self.step.unique {
            return self.create_unique_resources(ctx, out);
        }
        self.use_available_resources(ctx, out)?;
        if self.remaining > 0 {
            let (kind, selector) = self.priority_type(ctx)?;
            while self.remaining > 0 {
                self.create_resource(ctx, &kind, selector, out)?;
            }
        }
        Ok(())
    }

    fn attach(&mut self, ctx: &mut OperationalRuleContext<'_>, id: &ResourceId, out: &mut ApplyResult) -> Result<(), RuleError> {
        ctx.add_dependency_for_direction(self.step, &mut self.anchor, id, out)?;
        self.current.push(id.clone());
        self.remaining -= 1;
        Ok(())
    }

    /// Selector ids with a name refer to one specific resource: use it,
    /// creating it when absent.
    fn use_explicit_resources(&mut self, ctx: &mut OperationalRuleContext<'_>, out: &mut ApplyResult) -> Result<(), RuleError> {
        let kb = ctx.kb;
        let step = self.step;
        for selector in &step.resources {
            let ids = selector.extract_resource_ids(&ctx.dynamic(), &ctx.data)?;
            for id in ids.into_iter().filter(|id| !id.name.is_empty()) {
                if self.remaining == 0 {
                    return Ok(());
                }
                let resource = kb.create_resource(id)?;
                let id = resource.id.clone();
                if self.current.contains(&id) {
                    continue;
                }
                let created = !ctx.graph.contains(&id);
                if created {
                    ctx.graph.add_resource(resource)?;
                    info!(resource = %id, "created explicit resource");
                    out.created_resources.push(id.clone());
                }
                let usable = {
                    let dynamic = ctx.dynamic();
                    let existing = ctx
                        .graph
                        .resource(&id)
                        .ok_or_else(|| RuleError::ResourceNotFound(id.clone()))?;
                    selector.can_use(&dynamic, &ctx.data, existing)?
                };
                if !usable {
                    return Err(RuleError::SelectorMismatch {
                        resource: id,
                        selector: selector.selector.clone(),
                    });
                }
                let id = apply_selector_properties(ctx, selector, &id, &self.anchor)?;
                self.attach(ctx, &id, out)?;
            }
        }
        Ok(())
    }

    /// Reuses direct dependents of the priority type that only the anchor
    /// uses, then creates the rest.
    fn create_unique_resources(mut self, ctx: &mut OperationalRuleContext<'_>, out: &mut ApplyResult) -> Result<(), RuleError> {
        let (kind, selector) = self.priority_type(ctx)?;
        for id in ctx.graph.neighbors(&self.anchor, self.step.direction) {
            if self.remaining == 0 {
                break;
            }
            if !kind.matches(&id) || self.current.contains(&id) {
                continue;
            }
            let users = ctx.graph.neighbors(&id, self.step.direction.reverse());
            if users.len() == 1 && users[0] == self.anchor {
                self.attach(ctx, &id, out)?;
            }
        }
        while self.remaining > 0 {
            self.create_resource(ctx, &kind, selector, out)?;
        }
        Ok(())
    }

    /// Gathers existing resources the step may use and lets the step's placer
    /// choose among them.
    fn use_available_resources(&mut self, ctx: &mut OperationalRuleContext<'_>, out: &mut ApplyResult) -> Result<(), RuleError> {
        let kb = ctx.kb;
        let edges = ctx.graph.edges();
        let mut available: BTreeSet<ResourceId> = BTreeSet::new();
        let step = self.step;
        for selector in &step.resources {
            let types = selector.extract_resource_ids(&ctx.dynamic(), &ctx.data)?;
            for kind in types {
                let reachable = match self.step.direction {
                    Direction::Downstream => kb.has_functional_path(&self.anchor, &kind),
                    Direction::Upstream => kb.has_functional_path(&kind, &self.anchor),
                };
                if !reachable {
                    continue;
                }
                for candidate in ctx.graph.resource_ids() {
                    if !kind.same_type(&candidate)
                        || candidate == self.anchor
                        || self.current.contains(&candidate)
                        || available.contains(&candidate)
                    {
                        continue;
                    }
                    let (matched, usable) = {
                        let dynamic = ctx.dynamic();
                        let resource = ctx
                            .graph
                            .resource(&candidate)
                            .ok_or_else(|| RuleError::ResourceNotFound(candidate.clone()))?;
                        let matched = selector.is_match(&dynamic, &ctx.data, resource)?;
                        let usable = matched || selector.can_use(&dynamic, &ctx.data, resource)?;
                        (matched, usable)
                    };
                    if !usable || !self.satisfies_namespace(ctx, &candidate)? {
                        continue;
                    }
                    let (source, target) = self.step.direction.edge(&self.anchor, &candidate);
                    let allowed = ctx.graph.has_dependency(&source, &target)
                        || kb
                            .get_edge_template(&source, &target)
                            .is_some_and(|t| t.unique.can_add(&edges, &source, &target));
                    if !allowed {
                        continue;
                    }
                    let candidate = if matched {
                        candidate
                    } else {
                        debug!(resource = %candidate, "configuring resource to match selector");
                        apply_selector_properties(ctx, selector, &candidate, &self.anchor)?
                    };
                    available.insert(candidate);
                }
            }
        }
        if available.is_empty() {
            return Ok(());
        }
        let candidates: Vec<ResourceId> = available.into_iter().collect();
        let chosen = placer_for(self.step.selection_operator).place(
            &ctx.dynamic(),
            &self.anchor,
            self.step,
            &candidates,
            self.remaining,
        );
        for id in chosen {
            if self.remaining == 0 {
                break;
            }
            debug!(resource = %id, anchor = %self.anchor, "placed on existing resource");
            self.attach(ctx, &id, out)?;
        }
        Ok(())
    }

    /// A candidate whose type lives inside a namespace must already be
    /// namespaced into one of the namespace resources found downstream of the
    /// anchor, when there are any.
    fn satisfies_namespace(&self, ctx: &OperationalRuleContext<'_>, candidate: &ResourceId) -> Result<bool, RuleError> {
        let kb = ctx.kb;
        let dynamic = ctx.dynamic();
        let allowed = kb.get_allowed_namespaced_resource_ids(&dynamic, candidate)?;
        if allowed.is_empty() {
            return Ok(true);
        }
        let downstream = ctx.graph.downstream(&self.anchor, ctx.radius);
        let mut namespaces = Vec::new();
        for kind in &allowed {
            if kb.has_functional_path(&self.anchor, kind) {
                namespaces.extend(downstream.iter().filter(|d| kind.matches(d)).cloned());
            }
        }
        if namespaces.is_empty() {
            return Ok(true);
        }
        let resource = ctx
            .graph
            .resource(candidate)
            .ok_or_else(|| RuleError::ResourceNotFound(candidate.clone()))?;
        Ok(match kb.get_resources_namespace_resource(resource)? {
            Some(namespace) => namespaces.contains(&namespace),
            None => true,
        })
    }

    /// First selector type that can be created, without a name.
    /// Type new resources are created as: the first selector id that is not
    /// zero and, for non-unique steps, does not name a resource already in
    /// the graph.
    fn priority_type(&self, ctx: &OperationalRuleContext<'_>) -> Result<(ResourceId, &'s ResourceSelector), RuleError> {
        let dynamic = ctx.dynamic();
        let step = self.step;
        for selector in &step.resources {
            for id in selector.extract_resource_ids(&dynamic, &ctx.data)? {
                if id.is_zero() || (!step.unique && ctx.graph.contains(&id)) {
                    continue;
                }
                return Ok((id.with_name(""), selector));
            }
        }
        Err(RuleError::NoResourceTypes(self.anchor.clone()))
    }

    fn create_resource(
        &mut self,
        ctx: &mut OperationalRuleContext<'_>,
        kind: &ResourceId,
        selector: &ResourceSelector,
        out: &mut ApplyResult,
    ) -> Result<(), RuleError> {
        let name = self.generate_name(ctx, kind);
        let resource = ctx.kb.create_resource(kind.clone().with_name(name))?;
        let id = resource.id.clone();
        ctx.graph.add_resource(resource)?;
        info!(resource = %id, anchor = %self.anchor, "created resource");
        out.created_resources.push(id.clone());
        ctx.add_dependency_for_direction(self.step, &mut self.anchor, &id, out)?;
        let id = apply_selector_properties(ctx, selector, &id, &self.anchor)?;
        self.current.push(id);
        self.remaining -= 1;
        Ok(())
    }

    /// `{Type}-{AnchorName}` for unique steps (with `-{N}` when several are
    /// needed), `{Type}-{count of that type}` otherwise. Taken names get an
    /// increasing counter.
    fn generate_name(&self, ctx: &OperationalRuleContext<'_>, kind: &ResourceId) -> String {
        let taken: BTreeSet<&str> = ctx
            .graph
            .list_resources()
            .filter(|r| r.id.same_type(kind))
            .map(|r| r.id.name.as_str())
            .collect();
        let base = if self.step.unique {
            let needed = self.step.needed();
            if needed > 1 {
                format!("{}-{}-{}", kind.kind, self.anchor.name, needed - self.remaining)
            } else {
                format!("{}-{}", kind.kind, self.anchor.name)
            }
        } else {
            format!("{}-{}", kind.kind, taken.len())
        };
        if !taken.contains(base.as_str()) {
            return base;
        }
        let mut n = if self.step.unique { 1 } else { taken.len() + 1 };
        loop {
            let name = if self.step.unique {
                format!("{base}-{n}")
            } else {
                format!("{}-{n}", kind.kind)
            };
            if !taken.contains(name.as_str()) {
                return name;
            }
            n += 1;
        }
    }
}

/// Sets the selector's literal properties on `id`. Setting a namespace
/// property moves the resource into the anchor's namespace; the possibly new
/// id is returned.
fn apply_selector_properties(
    ctx: &mut OperationalRuleContext<'_>,
    selector: &ResourceSelector,
    id: &ResourceId,
    anchor: &ResourceId,
) -> Result<ResourceId, RuleError> {
    if selector.properties.is_empty() {
        return Ok(id.clone());
    }
    let kb = ctx.kb;
    let template = kb.get_resource_template_for(id)?;
    let mut values = Vec::with_capacity(selector.properties.len());
    {
        let dynamic = ctx.dynamic();
        for (path, raw) in &selector.properties {
            let property = template.get_property(path).ok_or_else(|| KbError::PropertyNotFound {
                resource: id.clone(),
                path: path.clone(),
            })?;
            let value = kb.transform_to_property_value(id, path, Some(raw), &dynamic, &ctx.data)?;
            values.push((property, value));
        }
    }
    let mut namespaced = false;
    let resource = ctx
        .graph
        .resource_mut(id)
        .ok_or_else(|| RuleError::ResourceNotFound(id.clone()))?;
    for (property, value) in values {
        property.set_property(resource, value)?;
        namespaced |= property.details.namespace;
    }
    if namespaced && id.namespace != anchor.namespace {
        let renamed = id.clone().with_namespace(anchor.namespace.clone());
        ctx.graph.replace_resource_id(id, &renamed)?;
        return Ok(renamed);
    }
    Ok(id.clone())
}
