// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Layered dependency traversal.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Functionality, KbError};
use crate::dynamic::{DynamicValueContext, DynamicValueData};
use crate::graph::{Direction, Walk};
use crate::ident::ResourceId;

/// How far a dependency traversal reaches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyLayer {
    /// Resources that exist because of the start resource's own rules.
    #[serde(rename = "local")]
    Local,
    /// Immediate neighbours.
    #[serde(rename = "direct")]
    Direct,
    /// Glue reachable without crossing a functional resource.
    #[serde(rename = "glue")]
    Glue,
    /// Glue plus the first functional resource on each path.
    #[default]
    #[serde(rename = "first")]
    FirstFunctional,
    /// Everything reachable.
    #[serde(rename = "all")]
    All,
}

impl fmt::Display for DependencyLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Direct => "direct",
            Self::Glue => "glue",
            Self::FirstFunctional => "first",
            Self::All => "all",
        })
    }
}

impl FromStr for DependencyLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "direct" => Ok(Self::Direct),
            "glue" => Ok(Self::Glue),
            "first" | "first_functional" => Ok(Self::FirstFunctional),
            "all" => Ok(Self::All),
            other => Err(format!("unknown dependency layer '{other}'")),
        }
    }
}

/// Resources upstream of `rid` within `layer`, in BFS order.
pub fn upstream(
    ctx: &DynamicValueContext<'_>,
    rid: &ResourceId,
    layer: DependencyLayer,
) -> Result<Vec<ResourceId>, KbError> {
    layered(ctx, rid, Direction::Upstream, layer)
}

/// Resources downstream of `rid` within `layer`, in BFS order.
pub fn downstream(
    ctx: &DynamicValueContext<'_>,
    rid: &ResourceId,
    layer: DependencyLayer,
) -> Result<Vec<ResourceId>, KbError> {
    layered(ctx, rid, Direction::Downstream, layer)
}

/// Resources reachable from `rid` in `direction` within `layer`.
pub fn layered(
    ctx: &DynamicValueContext<'_>,
    rid: &ResourceId,
    direction: Direction,
    layer: DependencyLayer,
) -> Result<Vec<ResourceId>, KbError> {
    let mut out = Vec::new();
    let mut failure = None;
    ctx.graph().walk(rid, direction, |path| {
        let current = &path[path.len() - 1];
        let (include, next) = match layer {
            DependencyLayer::All => (true, Walk::Continue),
            DependencyLayer::Direct => (true, Walk::SkipPath),
            DependencyLayer::Glue => {
                if ctx.kb().get_functionality(current) == Functionality::Unknown {
                    (true, Walk::Continue)
                } else {
                    (false, Walk::SkipPath)
                }
            }
            DependencyLayer::FirstFunctional => {
                if ctx.kb().get_functionality(current) == Functionality::Unknown {
                    (true, Walk::Continue)
                } else {
                    (true, Walk::SkipPath)
                }
            }
            DependencyLayer::Local => match is_operational_resource_side_effect(ctx, rid, current) {
                Ok(true) => (true, Walk::Continue),
                Ok(false) => (false, Walk::SkipPath),
                Err(err) => {
                    failure = Some(err);
                    return Walk::Stop;
                }
            },
        };
        if include {
            out.push(current.clone());
        }
        next
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

/// `true` when `side_effect` is attached to `rid` because of one of `rid`'s
/// property rules.
///
/// Selectors are compared by type, properties and classification only, so a
/// renamed resource is still recognized.
pub fn is_operational_resource_side_effect(
    ctx: &DynamicValueContext<'_>,
    rid: &ResourceId,
    side_effect: &ResourceId,
) -> Result<bool, KbError> {
    let Some(template) = ctx.kb().get_resource_template(rid) else {
        return Ok(false);
    };
    let Some(resource) = ctx.graph().resource(rid) else {
        return Ok(false);
    };
    let data = DynamicValueData::for_resource(rid.clone());
    for prop in template.loop_properties(resource) {
        let Some(step) = prop.details.operational_rule.as_ref().and_then(|r| r.step.as_ref()) else {
            continue;
        };
        let mut matched = false;
        for selector in &step.resources {
            if selector.is_type_match(ctx, side_effect, &data)? {
                matched = true;
                break;
            }
        }
        if !matched {
            continue;
        }
        let connected = match step.direction {
            Direction::Upstream => ctx.graph().shortest_path(side_effect, rid).is_some(),
            Direction::Downstream => ctx.graph().shortest_path(rid, side_effect).is_some(),
        };
        if !connected {
            continue;
        }
        if resource
            .get_property(&prop.details.path)?
            .is_some_and(|v| v.references(side_effect))
        {
            return Ok(true);
        }
    }
    Ok(false)
}
