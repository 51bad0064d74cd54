// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource graph builder for tests.

use strata_core::{Resource, ResourceGraph, ResourceId, Value};

/// Parses `text` as a resource id.
///
/// # Panics
/// When `text` is not a valid id.
#[allow(clippy::expect_used)]
pub fn id(text: &str) -> ResourceId {
    ResourceId::parse(text).expect("resource id")
}

/// Builds a [`ResourceGraph`] from ids, property values and edges.
///
/// # Example
///
/// ```
/// use strata_dry_tests::{id, GraphBuilder};
///
/// let graph = GraphBuilder::new()
///     .resource("p:function:api")
///     .resource("p:role:r1")
///     .edge("p:function:api", "p:role:r1")
///     .build();
/// assert!(graph.has_dependency(&id("p:function:api"), &id("p:role:r1")));
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    resources: Vec<Resource>,
    edges: Vec<(ResourceId, ResourceId)>,
}

impl GraphBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A resource with no properties.
    pub fn resource(self, text: &str) -> Self {
        self.resource_with(text, [])
    }

    /// A resource with top-level property values.
    pub fn resource_with<'k>(mut self, text: &str, properties: impl IntoIterator<Item = (&'k str, Value)>) -> Self {
        let mut resource = Resource::new(id(text));
        for (name, value) in properties {
            resource.properties.insert(name.to_owned(), value);
        }
        self.resources.push(resource);
        self
    }

    /// A `source -> target` dependency.
    pub fn edge(mut self, source: &str, target: &str) -> Self {
        self.edges.push((id(source), id(target)));
        self
    }

    /// # Panics
    /// On a duplicate resource or an edge to a resource not declared.
    #[allow(clippy::expect_used)]
    pub fn build(self) -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        for resource in self.resources {
            graph.add_resource(resource).expect("resource");
        }
        for (source, target) in &self.edges {
            graph.add_dependency(source, target).expect("dependency");
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_properties_and_edges() {
        let graph = GraphBuilder::new()
            .resource_with("p:subnet:n1:s1", [("Network", Value::Id(id("p:network:n1")))])
            .resource("p:network:n1")
            .edge("p:subnet:n1:s1", "p:network:n1")
            .build();
        assert_eq!(graph.len(), 2);
        let subnet = graph.resource(&id("p:subnet:n1:s1"));
        assert_eq!(
            subnet.and_then(|r| r.properties.get("Network")),
            Some(&Value::Id(id("p:network:n1")))
        );
        assert_eq!(graph.downstream(&id("p:subnet:n1:s1"), 1), vec![id("p:network:n1")]);
    }
}
