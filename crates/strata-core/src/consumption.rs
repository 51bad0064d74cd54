// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cross-resource value propagation.
//!
//! A template *emits* values under a model name and other templates *consume*
//! them into one of their properties. Matching is purely by model name. A
//! consumed value lands immediately when its target already holds a value;
//! otherwise a [`DelayedConsumption`] is handed back for the caller to apply
//! with [`resolve_delayed`] once the target is ready.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::dynamic::{decode_output, DynamicValueContext, DynamicValueData};
use crate::graph::ResourceGraph;
use crate::ident::ResourceId;
use crate::kb::{KbError, KnowledgeBase};
use crate::property::PropertyError;
use crate::resource::PathError;
use crate::template::TemplateError;
use crate::value::Value;

/// What a resource template emits and consumes.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Consumption {
    /// Values offered to consumers.
    pub emitted: Vec<ConsumptionObject>,
    /// Values taken from emitters.
    pub consumed: Vec<ConsumptionObject>,
}

/// One emitted or consumed entry.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConsumptionObject {
    /// Shared name connecting emitters to consumers.
    pub model: String,
    /// Emitted value; strings are templates evaluated against the emitter.
    pub value: Value,
    /// Consumer property receiving the value.
    pub property_path: String,
    /// Template applied to the emitted value (bound as `.`) before consuming.
    pub converter: String,
    /// Template redirecting to another resource than the one bound.
    pub resource: String,
}

/// A consumed value whose target was not ready.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DelayedConsumption {
    /// Converted value to apply.
    pub value: Value,
    /// Target resource.
    pub resource: ResourceId,
    /// Target property.
    pub property_path: String,
}

/// Emission and consumption failures.
#[derive(Debug, Error)]
pub enum ConsumptionError {
    /// An emitted entry has no value.
    #[error("emitted model '{0}' has no value")]
    NoValue(String),
    /// An entry has no model name.
    #[error("consumption entry has no model")]
    NoModel,
    /// A consumed entry names no target property.
    #[error("consumed model '{0}' has no property path")]
    NoPropertyPath(String),
    /// A converter was requested on an entry without one.
    #[error("consumed model '{0}' has no converter")]
    NoConverter(String),
    /// The target resource is missing from the graph.
    #[error("resource '{0}' not found in graph")]
    ResourceNotFound(ResourceId),
    /// Knowledge-base lookup failed.
    #[error(transparent)]
    Kb(#[from] KbError),
    /// Template evaluation failed.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// Property parsing or mutation failed.
    #[error(transparent)]
    Property(#[from] PropertyError),
    /// Property path failure.
    #[error(transparent)]
    Path(#[from] PathError),
    /// Several independent failures.
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ConsumptionError>),
}

impl ConsumptionError {
    /// Collapses accumulated errors: none is `Ok`, one is itself.
    pub fn collect(mut errs: Vec<Self>) -> Result<(), Self> {
        match errs.len() {
            0 => Ok(()),
            1 => Err(errs.remove(0)),
            _ => Err(Self::Multiple(errs)),
        }
    }
}

impl ConsumptionObject {
    /// Evaluates this emitted entry for `resource`.
    pub fn emit(&self, ctx: &DynamicValueContext<'_>, resource: &ResourceId) -> Result<Value, ConsumptionError> {
        if self.model.is_empty() {
            return Err(ConsumptionError::NoModel);
        }
        let mut data = DynamicValueData::for_resource(resource.clone());
        if !self.resource.is_empty() {
            data.resource = ctx.execute_decode_as_resource_id(&self.resource, &data)?;
        }
        match &self.value {
            Value::Null => Err(ConsumptionError::NoValue(self.model.clone())),
            Value::String(s) if s.is_empty() => Err(ConsumptionError::NoValue(self.model.clone())),
            Value::String(tpl) => Ok(ctx.execute_decode::<Value>(tpl, &data)?),
            other => Ok(other.clone()),
        }
    }

    /// Runs the converter over `value` and parses the result as the target
    /// property of `resource`.
    pub fn convert(
        &self,
        value: &Value,
        resource: &ResourceId,
        ctx: &DynamicValueContext<'_>,
    ) -> Result<Value, ConsumptionError> {
        if self.converter.is_empty() {
            return Err(ConsumptionError::NoConverter(self.model.clone()));
        }
        if self.property_path.is_empty() {
            return Err(ConsumptionError::NoPropertyPath(self.model.clone()));
        }
        let data = DynamicValueData::for_resource(resource.clone());
        let out = ctx.render_with(&self.converter, &data, value)?;
        let converted: Value = decode_output(&out)?;
        Ok(ctx
            .kb()
            .transform_to_property_value(resource, &self.property_path, Some(&converted), ctx, &data)?)
    }

    /// Writes `value` into the target property of `resource`: parsed and
    /// sanitized against the template, appended to collections (skipping
    /// values already present) and set on scalars.
    pub fn consume(
        &self,
        value: &Value,
        graph: &mut ResourceGraph,
        kb: &KnowledgeBase,
        resource: &ResourceId,
    ) -> Result<(), ConsumptionError> {
        consume_into(graph, kb, resource, &self.property_path, value)
    }
}

fn consume_into(
    graph: &mut ResourceGraph,
    kb: &KnowledgeBase,
    resource: &ResourceId,
    path: &str,
    value: &Value,
) -> Result<(), ConsumptionError> {
    if path.is_empty() {
        return Err(ConsumptionError::NoPropertyPath(resource.to_string()));
    }
    let prop = kb
        .get_resource_template_for(resource)?
        .get_property(path)
        .ok_or_else(|| KbError::PropertyNotFound {
            resource: resource.clone(),
            path: path.to_owned(),
        })?;
    let parsed = {
        let ctx = DynamicValueContext::new(&*graph, kb);
        let data = DynamicValueData::for_resource(resource.clone());
        prop.parse(value, &ctx, &data)?
    };
    let sanitized = prop.validate_and_sanitize(resource, &parsed)?;
    let target = graph
        .resource_mut(resource)
        .ok_or_else(|| ConsumptionError::ResourceNotFound(resource.clone()))?;
    if prop.is_scalar() {
        prop.set_property(target, sanitized)?;
        return Ok(());
    }
    let present = target
        .get_property(path)?
        .is_some_and(|current| prop.contains(current, &sanitized));
    if !present {
        prop.append_property(target, sanitized)?;
    }
    Ok(())
}

/// Pairs of (consumed, emitted) entries sharing a model.
fn matching_models<'k>(
    kb: &'k KnowledgeBase,
    consumer: &ResourceId,
    emitter: &ResourceId,
) -> Result<Vec<(&'k ConsumptionObject, &'k ConsumptionObject)>, ConsumptionError> {
    let consumer_template = kb.get_resource_template_for(consumer)?;
    let emitter_template = kb.get_resource_template_for(emitter)?;
    let mut pairs = Vec::new();
    for consume in &consumer_template.consumption.consumed {
        for emit in &emitter_template.consumption.emitted {
            if consume.model == emit.model {
                pairs.push((consume, emit));
            }
        }
    }
    Ok(pairs)
}

/// A value ready to consume plus where it goes.
struct Pending<'k> {
    consume: &'k ConsumptionObject,
    target: ResourceId,
    value: Value,
    ready: bool,
}

fn evaluate<'k>(
    ctx: &DynamicValueContext<'_>,
    consume: &'k ConsumptionObject,
    emit: &ConsumptionObject,
    consumer: &ResourceId,
    emitter: &ResourceId,
) -> Result<Pending<'k>, ConsumptionError> {
    let mut value = emit.emit(ctx, emitter)?;
    let target = if consume.resource.is_empty() {
        consumer.clone()
    } else {
        ctx.execute_decode_as_resource_id(&consume.resource, &DynamicValueData::for_resource(consumer.clone()))?
    };
    if !consume.converter.is_empty() {
        value = consume.convert(&value, &target, ctx)?;
    }
    let ready = match ctx.graph().resource(&target) {
        Some(res) => res.get_property(&consume.property_path)?.is_some_and(|v| !v.is_null()),
        None => false,
    };
    Ok(Pending {
        consume,
        target,
        value,
        ready,
    })
}

/// Feeds every value `emitter` emits into the matching properties of
/// `consumer`. Targets without a value yet come back as delayed.
#[instrument(skip_all, fields(consumer = %consumer, emitter = %emitter))]
pub fn consume_from_resource(
    graph: &mut ResourceGraph,
    kb: &KnowledgeBase,
    consumer: &ResourceId,
    emitter: &ResourceId,
) -> Result<Vec<DelayedConsumption>, ConsumptionError> {
    let pairs = matching_models(kb, consumer, emitter)?;
    let mut errs = Vec::new();
    let mut pending = Vec::new();
    {
        let ctx = DynamicValueContext::new(&*graph, kb);
        for (consume, emit) in pairs {
            match evaluate(&ctx, consume, emit, consumer, emitter) {
                Ok(p) => pending.push(p),
                Err(e) => errs.push(e),
            }
        }
    }
    let mut delays = Vec::new();
    for p in pending {
        if !p.ready {
            debug!(target = %p.target, path = %p.consume.property_path, "deferring consumption");
            delays.push(DelayedConsumption {
                value: p.value,
                resource: p.target,
                property_path: p.consume.property_path.clone(),
            });
            continue;
        }
        if let Err(e) = p.consume.consume(&p.value, graph, kb, &p.target) {
            errs.push(e);
        }
    }
    ConsumptionError::collect(errs)?;
    Ok(delays)
}

/// `true` when `consumer` already holds at least one value `emitter` emits,
/// or when no model connects the two.
pub fn has_consumed_from_resource(
    graph: &ResourceGraph,
    kb: &KnowledgeBase,
    consumer: &ResourceId,
    emitter: &ResourceId,
) -> Result<bool, ConsumptionError> {
    let pairs = matching_models(kb, consumer, emitter)?;
    if pairs.is_empty() {
        return Ok(true);
    }
    let ctx = DynamicValueContext::new(graph, kb);
    for (consume, emit) in pairs {
        let Ok(p) = evaluate(&ctx, consume, emit, consumer, emitter) else {
            continue;
        };
        if !p.ready {
            continue;
        }
        let Some(prop) = kb.get_resource_template_for(&p.target)?.get_property(&consume.property_path) else {
            continue;
        };
        let current = graph
            .resource(&p.target)
            .map(|r| r.get_property(&consume.property_path))
            .transpose()?
            .flatten();
        if current.is_some_and(|c| prop.contains(c, &p.value)) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Applies delayed consumptions whose target resource now exists; returns
/// the ones still waiting.
pub fn resolve_delayed(
    graph: &mut ResourceGraph,
    kb: &KnowledgeBase,
    delays: Vec<DelayedConsumption>,
) -> Result<Vec<DelayedConsumption>, ConsumptionError> {
    let mut waiting = Vec::new();
    let mut errs = Vec::new();
    for delay in delays {
        if !graph.contains(&delay.resource) {
            waiting.push(delay);
            continue;
        }
        if let Err(e) = consume_into(graph, kb, &delay.resource, &delay.property_path, &delay.value) {
            errs.push(e);
        }
    }
    ConsumptionError::collect(errs)?;
    Ok(waiting)
}
