// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;

use strata_core::{
    ConstructConstraint, ConstructExpansionContext, Edge, ExpansionError, Functionality, Resource, ResourceId,
    Value,
};
use strata_dry_tests::{id, KbBuilder};

fn construct(attributes: &[&str]) -> Resource {
    let mut resource = Resource::new(ResourceId::new("", "", "test"));
    let declared: BTreeMap<String, Value> = attributes.iter().map(|a| ((*a).to_owned(), Value::Bool(true))).collect();
    resource.properties.insert("attributes".into(), Value::Map(declared));
    resource
}

#[test]
fn attribute_given_by_the_base_needs_no_edges() {
    let kb = KbBuilder::new()
        .resource("mock:resource1", &["compute"], &[])
        .resource("mock:resource2", &["compute"], &["serverless"])
        .build();
    let solutions = ConstructExpansionContext::new(&kb)
        .expand_construct(&construct(&["serverless"]), Functionality::Compute, &[])
        .unwrap();
    assert_eq!(solutions.len(), 1);
    assert_eq!(solutions[0].directly_mapped_resource, id("mock:resource2:test"));
    assert!(solutions[0].edges.is_empty());
}

#[test]
fn attribute_from_a_reachable_template_adds_one_edge() {
    let kb = KbBuilder::new()
        .resource("mock:resource1", &["compute"], &["reliability"])
        .resource("mock:resource2", &["compute"], &["reliability"])
        .resource("mock:resource3", &["storage"], &[])
        .edge("mock:resource3", "mock:resource1")
        .edge("mock:resource3", "mock:resource2")
        .build();
    let solutions = ConstructExpansionContext::new(&kb)
        .expand_construct(&construct(&["reliability"]), Functionality::Storage, &[])
        .unwrap();
    assert_eq!(solutions.len(), 2);
    let base = id("mock:resource3:test");
    for (solution, target) in solutions.iter().zip(["mock:resource1:test", "mock:resource2:test"]) {
        assert_eq!(solution.directly_mapped_resource, base);
        assert_eq!(solution.edges, vec![Edge::new(base.clone(), id(target))]);
    }
}

#[test]
fn attribute_nobody_gives_fails_explicitly() {
    let kb = KbBuilder::new()
        .resource("mock:resource1", &["compute"], &["serverless"])
        .resource("mock:resource2", &["storage"], &["encrypted:storage"])
        .edge("mock:resource1", "mock:resource2")
        .build();
    let err = ConstructExpansionContext::new(&kb)
        .expand_construct(&construct(&["encrypted"]), Functionality::Compute, &[])
        .unwrap_err();
    assert!(matches!(err, ExpansionError::NoExpansions { ref attributes, .. } if attributes == &["encrypted".to_owned()]));
    assert!(err.to_string().contains("no expansions found"));
}

#[test]
fn constraints_pin_the_base_type_and_add_attributes() {
    let kb = KbBuilder::new()
        .resource("mock:resource1", &["compute"], &["serverless"])
        .resource("mock:resource2", &["compute"], &["serverless"])
        .build();
    let c = construct(&[]);
    let mut constraint = ConstructConstraint {
        target: c.id.clone(),
        kind: Some("mock:resource1".into()),
        ..ConstructConstraint::default()
    };
    constraint.attributes.insert("serverless".into(), Value::Bool(true));

    let solutions = ConstructExpansionContext::new(&kb)
        .expand_construct(&c, Functionality::Compute, &[constraint])
        .unwrap();
    assert_eq!(solutions.len(), 1);
    assert_eq!(solutions[0].directly_mapped_resource, id("mock:resource1:test"));
}

#[test]
fn solution_bound_is_enforced() {
    let mut builder = KbBuilder::new().resource("mock:base", &["storage"], &[]);
    let names: Vec<String> = (0..4).map(|i| format!("mock:giver{i}")).collect();
    for name in &names {
        builder = builder.resource(name, &[], &["reliability"]).edge("mock:base", name);
    }
    let kb = builder.build();
    let err = ConstructExpansionContext::new(&kb)
        .with_bounds(8, 2)
        .expand_construct(&construct(&["reliability"]), Functionality::Storage, &[])
        .unwrap_err();
    assert!(matches!(err, ExpansionError::BoundExceeded { bound: "solutions", limit: 2, .. }));
}
