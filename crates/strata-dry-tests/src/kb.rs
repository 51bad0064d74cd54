// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Knowledge base builder for tests.

use strata_core::kb::{Classification, Gives, Unique};
use strata_core::reader::{edge_template_from_yaml, resource_template_from_yaml};
use strata_core::{EdgeTemplate, KnowledgeBase, ResourceId, ResourceTemplate};

/// Collects templates and builds a [`KnowledgeBase`], panicking on any
/// invalid declaration.
///
/// # Example
///
/// ```
/// use strata_dry_tests::KbBuilder;
///
/// let kb = KbBuilder::new()
///     .resource("mock:resource1", &["compute"], &[])
///     .resource("mock:resource2", &["storage"], &["reliability"])
///     .edge("mock:resource1", "mock:resource2")
///     .build();
/// assert_eq!(kb.list_resources().count(), 2);
/// ```
#[derive(Debug, Default)]
pub struct KbBuilder {
    resources: Vec<ResourceTemplate>,
    resource_docs: Vec<String>,
    edges: Vec<EdgeTemplate>,
    edge_docs: Vec<String>,
}

impl KbBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A template with only a type name, `is` tags and `gives` entries
    /// (`attr` or `attr:functionality,...`).
    pub fn resource(mut self, qualified_type_name: &str, is: &[&str], gives: &[&str]) -> Self {
        self.resources.push(ResourceTemplate {
            qualified_type_name: qualified_type_name.to_owned(),
            classification: Classification {
                is: is.iter().map(|s| (*s).to_owned()).collect(),
                gives: gives.iter().map(|g| Gives::parse(g)).collect(),
            },
            ..ResourceTemplate::default()
        });
        self
    }

    /// A resource template YAML document.
    pub fn resource_yaml(mut self, text: &str) -> Self {
        self.resource_docs.push(text.to_owned());
        self
    }

    /// A many-to-many edge template between two types.
    pub fn edge(self, source: &str, target: &str) -> Self {
        self.edge_with(source, target, Unique::default())
    }

    /// An edge template with a cardinality constraint.
    #[allow(clippy::expect_used)]
    pub fn edge_with(mut self, source: &str, target: &str, unique: Unique) -> Self {
        self.edges.push(EdgeTemplate {
            source: ResourceId::parse(source).expect("edge source type"),
            target: ResourceId::parse(target).expect("edge target type"),
            unique,
            ..EdgeTemplate::default()
        });
        self
    }

    /// An edge template YAML document.
    pub fn edge_yaml(mut self, text: &str) -> Self {
        self.edge_docs.push(text.to_owned());
        self
    }

    /// Registers resources before edges, in insertion order.
    ///
    /// # Panics
    /// On a malformed document or a duplicate or dangling template.
    #[allow(clippy::expect_used)]
    pub fn build(self) -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        for template in self.resources {
            kb.add_resource_template(template).expect("resource template");
        }
        for doc in &self.resource_docs {
            let template = resource_template_from_yaml(doc).expect("resource template document");
            kb.add_resource_template(template).expect("resource template");
        }
        for template in self.edges {
            kb.add_edge_template(template).expect("edge template");
        }
        for doc in &self.edge_docs {
            let template = edge_template_from_yaml(doc).expect("edge template document");
            kb.add_edge_template(template).expect("edge template");
        }
        kb
    }
}
