// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! strata-core: knowledge-base-driven operational rule engine.
//!
//! A [`KnowledgeBase`] of resource and edge templates describes which
//! resource types exist, what properties they carry and which of those
//! properties must be satisfied by other resources. The
//! [`OperationalRuleContext`] resolves those requirements against a
//! [`ResourceGraph`], creating or reusing resources and placing ambiguous
//! choices with a [`rule::placer::ResourcePlacer`]. Construct expansion maps
//! abstract constructs to concrete types, and consumption propagates emitted
//! values between resources.
//!
//! Everything iterates in sorted order, so the same graph and knowledge base
//! always produce the same result.
#![forbid(unsafe_code)]

pub mod consumption;
pub mod dynamic;
pub mod expansion;
pub mod graph;
mod ident;
pub mod kb;
pub mod property;
pub mod reader;
mod resource;
pub mod rule;
pub mod template;
mod value;

pub use consumption::{Consumption, ConsumptionError, ConsumptionObject, DelayedConsumption};
pub use dynamic::{DynamicValueContext, DynamicValueData};
pub use expansion::{
    ConstructConstraint, ConstructExpansionContext, ExpansionError, ExpansionSet, ExpansionSolution,
};
pub use graph::{Direction, Edge, GraphError, ResourceGraph};
pub use ident::{sanitize_name, IdError, PropertyRef, ResourceId};
pub use kb::{EdgeTemplate, Functionality, KbError, KnowledgeBase, ResourceTemplate};
pub use property::{Property, PropertyError, PropertyKind};
pub use reader::ReaderError;
pub use resource::{PathError, PathSegment, PropertyPath, Resource};
pub use rule::{
    ApplyResult, OperationalRule, OperationalRuleContext, OperationalStep, PropertyRule, ResourceSelector,
    RuleError, SelectionOperator,
};
pub use value::{Refs, Value};
