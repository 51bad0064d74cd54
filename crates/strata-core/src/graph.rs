// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Minimal in-memory resource graph store consumed by the rule engine.
//!
//! Vertices are [`Resource`]s keyed by [`ResourceId`]; an edge `a -> b` means
//! `a` depends on `b` (`b` is downstream of `a`). All iteration is in id order
//! so that every traversal, and therefore every generated graph, is
//! reproducible.
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ident::ResourceId;
use crate::resource::Resource;

/// Errors returned by [`ResourceGraph`] mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The resource does not exist in the graph.
    #[error("resource '{0}' not found")]
    ResourceNotFound(ResourceId),
    /// A resource with this id is already present.
    #[error("resource '{0}' already exists")]
    ResourceExists(ResourceId),
    /// The resource still has outgoing edges; remove them first.
    #[error("resource '{0}' has outgoing dependencies")]
    HasOutgoingEdges(ResourceId),
    /// The resource still has incoming edges; remove them first.
    #[error("resource '{0}' has incoming dependencies")]
    HasIncomingEdges(ResourceId),
    /// No such dependency.
    #[error("dependency {from} -> {to} not found")]
    DependencyNotFound {
        /// Dependent side.
        from: ResourceId,
        /// Dependency side.
        to: ResourceId,
    },
    /// A self-loop was requested.
    #[error("resource '{0}' cannot depend on itself")]
    SelfLoop(ResourceId),
}

/// Direction of travel relative to a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Towards resources that depend on this one.
    Upstream,
    /// Towards resources this one depends on.
    #[default]
    Downstream,
}

impl Direction {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Self::Upstream => Self::Downstream,
            Self::Downstream => Self::Upstream,
        }
    }

    /// Orders `(anchor, other)` into `(source, target)` for an edge in this direction.
    pub fn edge(self, anchor: &ResourceId, other: &ResourceId) -> (ResourceId, ResourceId) {
        match self {
            Self::Downstream => (anchor.clone(), other.clone()),
            Self::Upstream => (other.clone(), anchor.clone()),
        }
    }
}

/// A directed dependency edge.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Dependent resource.
    pub source: ResourceId,
    /// Resource depended upon.
    pub target: ResourceId,
}

impl Edge {
    /// Builds an edge.
    pub fn new(source: ResourceId, target: ResourceId) -> Self {
        Self { source, target }
    }
}

/// Control returned by a [`ResourceGraph::walk`] visitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Walk {
    /// Keep expanding beyond this vertex.
    Continue,
    /// Do not expand beyond this vertex.
    SkipPath,
    /// Abort the walk.
    Stop,
}

/// In-memory resource graph.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: BTreeMap<ResourceId, Resource>,
    edges_from: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    edges_to: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl ResourceGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// `true` when the graph holds no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Inserts a new resource. Fails if the id is already present.
    pub fn add_resource(&mut self, resource: Resource) -> Result<(), GraphError> {
        if self.resources.contains_key(&resource.id) {
            return Err(GraphError::ResourceExists(resource.id));
        }
        self.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// Inserts an empty resource for `id` when absent.
    pub fn ensure_resource(&mut self, id: &ResourceId) {
        if !self.resources.contains_key(id) {
            self.resources.insert(id.clone(), Resource::new(id.clone()));
        }
    }

    /// Returns the resource when it exists.
    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Returns a mutable reference to the resource when it exists.
    pub fn resource_mut(&mut self, id: &ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    /// `true` if `id` is a vertex.
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    /// Iterates resources in id order.
    pub fn list_resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// All vertex ids in id order.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.resources.keys().cloned().collect()
    }

    /// Adds `source -> target`, creating missing endpoints.
    ///
    /// Returns `true` if the edge was new.
    pub fn add_dependency(&mut self, source: &ResourceId, target: &ResourceId) -> Result<bool, GraphError> {
        if source == target {
            return Err(GraphError::SelfLoop(source.clone()));
        }
        self.ensure_resource(source);
        self.ensure_resource(target);
        let added = self
            .edges_from
            .entry(source.clone())
            .or_default()
            .insert(target.clone());
        self.edges_to
            .entry(target.clone())
            .or_default()
            .insert(source.clone());
        Ok(added)
    }

    /// Removes `source -> target`.
    pub fn remove_dependency(&mut self, source: &ResourceId, target: &ResourceId) -> Result<(), GraphError> {
        let removed = self
            .edges_from
            .get_mut(source)
            .is_some_and(|out| out.remove(target));
        if !removed {
            return Err(GraphError::DependencyNotFound {
                from: source.clone(),
                to: target.clone(),
            });
        }
        if self.edges_from.get(source).is_some_and(BTreeSet::is_empty) {
            self.edges_from.remove(source);
        }
        if let Some(inc) = self.edges_to.get_mut(target) {
            inc.remove(source);
            if inc.is_empty() {
                self.edges_to.remove(target);
            }
        }
        Ok(())
    }

    /// `true` if `source -> target` exists.
    pub fn has_dependency(&self, source: &ResourceId, target: &ResourceId) -> bool {
        self.edges_from
            .get(source)
            .is_some_and(|out| out.contains(target))
    }

    /// All edges in `(source, target)` order.
    pub fn edges(&self) -> Vec<Edge> {
        self.edges_from
            .iter()
            .flat_map(|(s, ts)| ts.iter().map(move |t| Edge::new(s.clone(), t.clone())))
            .collect()
    }

    /// Removes an isolated resource.
    ///
    /// Removal must not cascade: a resource with incident edges is an error and
    /// the caller must remove those dependencies first.
    pub fn remove_resource(&mut self, id: &ResourceId) -> Result<Resource, GraphError> {
        if !self.resources.contains_key(id) {
            return Err(GraphError::ResourceNotFound(id.clone()));
        }
        if self.edges_from.get(id).is_some_and(|e| !e.is_empty()) {
            return Err(GraphError::HasOutgoingEdges(id.clone()));
        }
        if self.edges_to.get(id).is_some_and(|e| !e.is_empty()) {
            return Err(GraphError::HasIncomingEdges(id.clone()));
        }
        self.resources
            .remove(id)
            .ok_or_else(|| GraphError::ResourceNotFound(id.clone()))
    }

    /// Immediate neighbours of `id` in `direction`, in id order.
    pub fn neighbors(&self, id: &ResourceId, direction: Direction) -> Vec<ResourceId> {
        let map = match direction {
            Direction::Downstream => &self.edges_from,
            Direction::Upstream => &self.edges_to,
        };
        map.get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of edges touching `id` in either direction.
    pub fn degree(&self, id: &ResourceId) -> usize {
        self.edges_from.get(id).map_or(0, BTreeSet::len) + self.edges_to.get(id).map_or(0, BTreeSet::len)
    }

    /// Breadth-first walk from `start` (exclusive). The visitor sees the path
    /// from `start` to the visited vertex, inclusive of both ends.
    ///
    /// Each vertex is visited at most once.
    pub fn walk<F>(&self, start: &ResourceId, direction: Direction, mut visit: F)
    where
        F: FnMut(&[ResourceId]) -> Walk,
    {
        let mut seen: BTreeSet<ResourceId> = BTreeSet::new();
        seen.insert(start.clone());
        let mut queue: VecDeque<Vec<ResourceId>> = VecDeque::new();
        queue.push_back(vec![start.clone()]);
        while let Some(path) = queue.pop_front() {
            let Some(last) = path.last() else { continue };
            for next in self.neighbors(last, direction) {
                if !seen.insert(next.clone()) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(next);
                match visit(&next_path) {
                    Walk::Stop => return,
                    Walk::SkipPath => {}
                    Walk::Continue => queue.push_back(next_path),
                }
            }
        }
    }

    /// Transitive neighbours of `id` up to `depth` hops (0 = unbounded), BFS order.
    pub fn reachable(&self, id: &ResourceId, direction: Direction, depth: usize) -> Vec<ResourceId> {
        let mut out = Vec::new();
        self.walk(id, direction, |path| {
            out.push(path[path.len() - 1].clone());
            if depth != 0 && path.len() > depth {
                Walk::SkipPath
            } else {
                Walk::Continue
            }
        });
        out
    }

    /// Downstream resources of `id` up to `depth` hops (0 = unbounded).
    pub fn downstream(&self, id: &ResourceId, depth: usize) -> Vec<ResourceId> {
        self.reachable(id, Direction::Downstream, depth)
    }

    /// Upstream resources of `id` up to `depth` hops (0 = unbounded).
    pub fn upstream(&self, id: &ResourceId, depth: usize) -> Vec<ResourceId> {
        self.reachable(id, Direction::Upstream, depth)
    }

    /// Downstream resources matching `selector` up to `depth` hops.
    pub fn downstream_of_type(&self, id: &ResourceId, depth: usize, selector: &ResourceId) -> Vec<ResourceId> {
        self.downstream(id, depth)
            .into_iter()
            .filter(|d| selector.matches(d))
            .collect()
    }

    /// Upstream resources matching `selector` up to `depth` hops.
    pub fn upstream_of_type(&self, id: &ResourceId, depth: usize, selector: &ResourceId) -> Vec<ResourceId> {
        self.upstream(id, depth)
            .into_iter()
            .filter(|d| selector.matches(d))
            .collect()
    }

    /// Shortest directed path from `source` to `target`, both inclusive.
    ///
    /// Neighbours are explored in id order, so ties resolve to the
    /// lexicographically smallest path.
    pub fn shortest_path(&self, source: &ResourceId, target: &ResourceId) -> Option<Vec<ResourceId>> {
        if !self.contains(source) || !self.contains(target) {
            return None;
        }
        if source == target {
            return Some(vec![source.clone()]);
        }
        let mut found = None;
        self.walk(source, Direction::Downstream, |path| {
            if path.last() == Some(target) {
                found = Some(path.to_vec());
                Walk::Stop
            } else {
                Walk::Continue
            }
        });
        found
    }

    /// Every simple directed path from `source` to `target`, in id order.
    pub fn all_paths(&self, source: &ResourceId, target: &ResourceId) -> Vec<Vec<ResourceId>> {
        let mut out = Vec::new();
        if !self.contains(source) || !self.contains(target) {
            return out;
        }
        let mut stack = vec![source.clone()];
        self.collect_paths(target, &mut stack, &mut out);
        out
    }

    fn collect_paths(&self, target: &ResourceId, stack: &mut Vec<ResourceId>, out: &mut Vec<Vec<ResourceId>>) {
        let Some(last) = stack.last().cloned() else { return };
        if &last == target {
            out.push(stack.clone());
            return;
        }
        for next in self.neighbors(&last, Direction::Downstream) {
            if stack.contains(&next) {
                continue;
            }
            stack.push(next);
            self.collect_paths(target, stack, out);
            stack.pop();
        }
    }

    /// Dependents before dependencies. Vertices on cycles are appended in id order.
    pub fn topological_order(&self) -> Vec<ResourceId> {
        let mut indegree: BTreeMap<&ResourceId, usize> = self
            .resources
            .keys()
            .map(|id| (id, self.edges_to.get(id).map_or(0, BTreeSet::len)))
            .collect();
        let mut ready: BTreeSet<&ResourceId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.resources.len());
        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            indegree.remove(id);
            for next in self.edges_from.get(id).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(next) {
                    *d = d.saturating_sub(1);
                    if *d == 0 {
                        ready.insert(next);
                    }
                }
            }
        }
        order.extend(indegree.keys().map(|id| (*id).clone()));
        order
    }

    /// Renames a vertex in one step: the resource, every incident edge and
    /// every property reference held by any resource move to `new`.
    pub fn replace_resource_id(&mut self, old: &ResourceId, new: &ResourceId) -> Result<(), GraphError> {
        if old == new {
            return Ok(());
        }
        if self.resources.contains_key(new) {
            return Err(GraphError::ResourceExists(new.clone()));
        }
        let mut resource = self
            .resources
            .remove(old)
            .ok_or_else(|| GraphError::ResourceNotFound(old.clone()))?;
        resource.id = new.clone();
        self.resources.insert(new.clone(), resource);

        let outgoing = self.edges_from.remove(old).unwrap_or_default();
        for t in &outgoing {
            if let Some(inc) = self.edges_to.get_mut(t) {
                inc.remove(old);
                inc.insert(new.clone());
            }
        }
        if !outgoing.is_empty() {
            self.edges_from.insert(new.clone(), outgoing);
        }
        let incoming = self.edges_to.remove(old).unwrap_or_default();
        for s in &incoming {
            if let Some(out) = self.edges_from.get_mut(s) {
                out.remove(old);
                out.insert(new.clone());
            }
        }
        if !incoming.is_empty() {
            self.edges_to.insert(new.clone(), incoming);
        }
        for r in self.resources.values_mut() {
            r.replace_references(old, new);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::value::Value;

    fn id(name: &str) -> ResourceId {
        ResourceId::new("p", "t", name)
    }

    fn chain() -> ResourceGraph {
        let mut g = ResourceGraph::new();
        g.add_dependency(&id("a"), &id("b")).unwrap();
        g.add_dependency(&id("b"), &id("c")).unwrap();
        g.add_dependency(&id("a"), &id("d")).unwrap();
        g.add_dependency(&id("d"), &id("c")).unwrap();
        g
    }

    #[test]
    fn add_dependency_creates_endpoints() {
        let g = chain();
        assert_eq!(g.len(), 4);
        assert!(g.has_dependency(&id("a"), &id("b")));
        assert!(!g.has_dependency(&id("b"), &id("a")));
    }

    #[test]
    fn remove_resource_does_not_cascade() {
        let mut g = chain();
        assert_eq!(
            g.remove_resource(&id("b")),
            Err(GraphError::HasOutgoingEdges(id("b")))
        );
        g.remove_dependency(&id("b"), &id("c")).unwrap();
        assert_eq!(
            g.remove_resource(&id("b")),
            Err(GraphError::HasIncomingEdges(id("b")))
        );
        g.remove_dependency(&id("a"), &id("b")).unwrap();
        assert!(g.remove_resource(&id("b")).is_ok());
        assert!(!g.contains(&id("b")));
    }

    #[test]
    fn depth_limits_traversal() {
        let g = chain();
        assert_eq!(g.downstream(&id("a"), 1), vec![id("b"), id("d")]);
        assert_eq!(g.downstream(&id("a"), 0), vec![id("b"), id("d"), id("c")]);
        assert_eq!(g.upstream(&id("c"), 0), vec![id("b"), id("d"), id("a")]);
    }

    #[test]
    fn shortest_and_all_paths() {
        let g = chain();
        assert_eq!(
            g.shortest_path(&id("a"), &id("c")).unwrap(),
            vec![id("a"), id("b"), id("c")]
        );
        assert_eq!(g.all_paths(&id("a"), &id("c")).len(), 2);
        assert!(g.shortest_path(&id("c"), &id("a")).is_none());
    }

    #[test]
    fn replace_id_preserves_edges_and_references() {
        let mut g = chain();
        g.resource_mut(&id("a"))
            .unwrap()
            .set_property("Dep", Value::from(id("b")))
            .unwrap();
        let renamed = id("b").with_namespace("ns");
        g.replace_resource_id(&id("b"), &renamed).unwrap();
        assert!(g.has_dependency(&id("a"), &renamed));
        assert!(g.has_dependency(&renamed, &id("c")));
        assert!(!g.contains(&id("b")));
        assert_eq!(
            g.resource(&id("a")).unwrap().get_property("Dep").unwrap(),
            Some(&Value::from(renamed))
        );
    }

    #[test]
    fn topological_order_puts_dependents_first() {
        let g = chain();
        let order = g.topological_order();
        let pos = |n: &str| order.iter().position(|x| x == &id(n)).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
        assert!(pos("d") < pos("c"));
    }
}
