// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Placement heuristics: which existing candidates a step should use.
//!
//! Placers only choose; the caller attaches. Candidates arrive sorted by id
//! and ties keep that order, so the choice is deterministic.
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use super::{OperationalStep, SelectionOperator};
use crate::dynamic::DynamicValueContext;
use crate::graph::Direction;
use crate::ident::ResourceId;
use crate::kb::Functionality;

/// Weight of an edge touching a functional resource in [`ClosestPlacer`]'s
/// distance.
pub const FUNCTIONAL_HOP_WEIGHT: u64 = 1000;
/// Weight of an edge between two glue resources.
pub const GLUE_HOP_WEIGHT: u64 = 1;

/// Chooses up to `needed` of `candidates` for `anchor`, best first.
pub trait ResourcePlacer {
    /// Returns the chosen candidates in attachment order.
    fn place(
        &self,
        ctx: &DynamicValueContext<'_>,
        anchor: &ResourceId,
        step: &OperationalStep,
        candidates: &[ResourceId],
        needed: usize,
    ) -> Vec<ResourceId>;
}

/// Least-connected first; a sole candidate is never used.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpreadPlacer;

/// Most-connected first.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClusterPlacer;

/// Nearest to the anchor first.
///
/// Distance is measured over edges in both directions, whatever the step's
/// direction, so a candidate upstream of a downstream step still counts as
/// near.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClosestPlacer;

/// The placer for `op`.
pub fn placer_for(op: SelectionOperator) -> &'static dyn ResourcePlacer {
    match op {
        SelectionOperator::Spread => &SpreadPlacer,
        SelectionOperator::Cluster => &ClusterPlacer,
        SelectionOperator::Closest => &ClosestPlacer,
    }
}

/// Buckets candidates by how many resources of the anchor's type already use
/// them in the step's direction.
fn connection_buckets(
    ctx: &DynamicValueContext<'_>,
    anchor: &ResourceId,
    step: &OperationalStep,
    candidates: &[ResourceId],
) -> BTreeMap<usize, Vec<ResourceId>> {
    let mut buckets: BTreeMap<usize, Vec<ResourceId>> = BTreeMap::new();
    for candidate in candidates {
        let score = ctx
            .graph()
            .neighbors(candidate, step.direction.reverse())
            .iter()
            .filter(|c| c.same_type(anchor))
            .count();
        buckets.entry(score).or_default().push(candidate.clone());
    }
    buckets
}

impl ResourcePlacer for SpreadPlacer {
    fn place(
        &self,
        ctx: &DynamicValueContext<'_>,
        anchor: &ResourceId,
        step: &OperationalStep,
        candidates: &[ResourceId],
        needed: usize,
    ) -> Vec<ResourceId> {
        if candidates.len() <= 1 || needed == 0 {
            return Vec::new();
        }
        connection_buckets(ctx, anchor, step, candidates)
            .into_values()
            .flatten()
            .take(needed)
            .collect()
    }
}

impl ResourcePlacer for ClusterPlacer {
    fn place(
        &self,
        ctx: &DynamicValueContext<'_>,
        anchor: &ResourceId,
        step: &OperationalStep,
        candidates: &[ResourceId],
        needed: usize,
    ) -> Vec<ResourceId> {
        connection_buckets(ctx, anchor, step, candidates)
            .into_values()
            .rev()
            .flatten()
            .take(needed)
            .collect()
    }
}

impl ResourcePlacer for ClosestPlacer {
    fn place(
        &self,
        ctx: &DynamicValueContext<'_>,
        anchor: &ResourceId,
        _step: &OperationalStep,
        candidates: &[ResourceId],
        needed: usize,
    ) -> Vec<ResourceId> {
        if needed == 0 {
            return Vec::new();
        }
        let distances = undirected_distances(ctx, anchor);
        let mut ranked: Vec<&ResourceId> = candidates.iter().collect();
        ranked.sort_by_key(|c| distances.get(*c).copied().unwrap_or(u64::MAX));
        ranked.into_iter().take(needed).cloned().collect()
    }
}

/// Weighted distance from `anchor` to every reachable resource, ignoring edge
/// direction. Hops touching a functional resource cost
/// [`FUNCTIONAL_HOP_WEIGHT`].
fn undirected_distances(ctx: &DynamicValueContext<'_>, anchor: &ResourceId) -> BTreeMap<ResourceId, u64> {
    let graph = ctx.graph();
    let functional = |id: &ResourceId| ctx.kb().get_functionality(id) != Functionality::Unknown;
    let mut settled: BTreeMap<ResourceId, u64> = BTreeMap::new();
    let mut heap = BinaryHeap::new();
    heap.push(Reverse((0_u64, anchor.clone())));
    while let Some(Reverse((cost, id))) = heap.pop() {
        if settled.contains_key(&id) {
            continue;
        }
        let mut next = graph.neighbors(&id, Direction::Downstream);
        next.extend(graph.neighbors(&id, Direction::Upstream));
        for n in next {
            if settled.contains_key(&n) {
                continue;
            }
            let weight = if functional(&id) || functional(&n) {
                FUNCTIONAL_HOP_WEIGHT
            } else {
                GLUE_HOP_WEIGHT
            };
            heap.push(Reverse((cost + weight, n)));
        }
        settled.insert(id, cost);
    }
    settled
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use proptest::prelude::*;

    use super::*;
    use crate::graph::ResourceGraph;
    use crate::kb::{Classification, KnowledgeBase, ResourceTemplate};

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        for (qtn, is) in [("p:fn", vec!["compute"]), ("p:subnet", vec![]), ("p:vpc", vec![])] {
            kb.add_resource_template(ResourceTemplate {
                qualified_type_name: qtn.into(),
                classification: Classification {
                    is: is.into_iter().map(str::to_owned).collect(),
                    gives: Vec::new(),
                },
                ..ResourceTemplate::default()
            })
            .unwrap();
        }
        kb
    }

    /// `p:subnet:s{i}` used by `counts[i]` functions.
    fn graph_with_usage(counts: &[usize]) -> (ResourceGraph, Vec<ResourceId>) {
        let mut g = ResourceGraph::new();
        let mut subnets = Vec::new();
        let mut f = 0;
        for (i, n) in counts.iter().enumerate() {
            let s = id(&format!("p:subnet:s{i:02}"));
            g.ensure_resource(&s);
            for _ in 0..*n {
                g.add_dependency(&id(&format!("p:fn:f{f:03}")), &s).unwrap();
                f += 1;
            }
            subnets.push(s);
        }
        (g, subnets)
    }

    #[test]
    fn spread_refuses_single_candidate() {
        let kb = kb();
        let (g, subnets) = graph_with_usage(&[0]);
        let ctx = DynamicValueContext::new(&g, &kb);
        assert!(SpreadPlacer
            .place(&ctx, &id("p:fn:new"), &OperationalStep::default(), &subnets, 1)
            .is_empty());
    }

    #[test]
    fn spread_and_cluster_order() {
        let kb = kb();
        let (g, subnets) = graph_with_usage(&[2, 0, 1]);
        let ctx = DynamicValueContext::new(&g, &kb);
        let anchor = id("p:fn:new");
        let step = OperationalStep::default();
        assert_eq!(
            SpreadPlacer.place(&ctx, &anchor, &step, &subnets, 2),
            [subnets[1].clone(), subnets[2].clone()]
        );
        assert_eq!(ClusterPlacer.place(&ctx, &anchor, &step, &subnets, 1), [subnets[0].clone()]);
    }

    #[test]
    fn closest_prefers_glue_paths() {
        let kb = kb();
        let mut g = ResourceGraph::new();
        let anchor = id("p:fn:a");
        let near = id("p:subnet:near");
        let far = id("p:subnet:far");
        g.add_dependency(&anchor, &id("p:vpc:v")).unwrap();
        g.add_dependency(&near, &id("p:vpc:v")).unwrap();
        g.add_dependency(&id("p:fn:b"), &far).unwrap();
        g.add_dependency(&anchor, &id("p:fn:b")).unwrap();
        let ctx = DynamicValueContext::new(&g, &kb);
        let chosen = ClosestPlacer.place(&ctx, &anchor, &OperationalStep::default(), &[far.clone(), near.clone()], 2);
        assert_eq!(chosen, [near, far]);
    }

    #[test]
    fn closest_puts_unreachable_last() {
        let kb = kb();
        let mut g = ResourceGraph::new();
        let anchor = id("p:fn:a");
        g.add_dependency(&anchor, &id("p:subnet:b")).unwrap();
        g.ensure_resource(&id("p:subnet:a"));
        let ctx = DynamicValueContext::new(&g, &kb);
        let chosen = ClosestPlacer.place(
            &ctx,
            &anchor,
            &OperationalStep::default(),
            &[id("p:subnet:a"), id("p:subnet:b")],
            1,
        );
        assert_eq!(chosen, [id("p:subnet:b")]);
    }

    #[test]
    fn closest_ignores_the_step_direction() {
        let kb = kb();
        let mut g = ResourceGraph::new();
        let anchor = id("p:fn:a");
        g.add_dependency(&anchor, &id("p:vpc:v")).unwrap();
        g.add_dependency(&id("p:subnet:near"), &id("p:vpc:v")).unwrap();
        g.ensure_resource(&id("p:subnet:lone"));
        let ctx = DynamicValueContext::new(&g, &kb);
        let candidates = [id("p:subnet:lone"), id("p:subnet:near")];
        for direction in [Direction::Downstream, Direction::Upstream] {
            let step = OperationalStep {
                direction,
                ..OperationalStep::default()
            };
            assert_eq!(ClosestPlacer.place(&ctx, &anchor, &step, &candidates, 1), [id("p:subnet:near")]);
        }
    }

    proptest! {
        #[test]
        fn spread_takes_the_lowest_scores(counts in prop::collection::vec(0_usize..4, 2..6), needed in 1_usize..6) {
            let kb = kb();
            let (g, subnets) = graph_with_usage(&counts);
            let ctx = DynamicValueContext::new(&g, &kb);
            let chosen = SpreadPlacer.place(&ctx, &id("p:fn:new"), &OperationalStep::default(), &subnets, needed);

            let mut expected: Vec<(usize, ResourceId)> =
                counts.iter().copied().zip(subnets.iter().cloned()).collect();
            expected.sort_by_key(|(c, _)| *c);
            let expected: Vec<ResourceId> = expected.into_iter().map(|(_, s)| s).take(needed).collect();
            prop_assert_eq!(chosen, expected);
        }
    }
}
