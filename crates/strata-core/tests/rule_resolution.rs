// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use strata_core::reader::graph_to_yaml;
use strata_core::{
    Direction, DynamicValueData, Edge, OperationalRuleContext, OperationalStep, PropertyPath, PropertyRule,
    ResourceGraph, ResourceSelector, RuleError, Value,
};
use strata_dry_tests::{id, sample_kb, GraphBuilder};

fn ids(list: &[&str]) -> Value {
    Value::List(list.iter().map(|s| Value::Id(id(s))).collect())
}

fn property(graph: &ResourceGraph, resource: &str, name: &str) -> Option<Value> {
    graph.resource(&id(resource)).and_then(|r| r.properties.get(name).cloned())
}

#[test]
fn new_function_gets_its_own_role_and_two_subnets() {
    let kb = sample_kb();
    let mut graph = GraphBuilder::new().resource("p:function:api").build();
    let mut ctx = OperationalRuleContext::new(&mut graph, &kb);

    let (result, final_id) = ctx.apply_resource_rules(&id("p:function:api")).unwrap();
    assert_eq!(final_id, id("p:function:api"));
    assert_eq!(
        result.created_resources,
        vec![id("p:role:role-api"), id("p:subnet:subnet-0"), id("p:subnet:subnet-1")]
    );
    assert_eq!(result.added_dependencies.len(), 3);

    // Re-applying a satisfied rule changes nothing.
    let (again, _) = ctx.apply_resource_rules(&id("p:function:api")).unwrap();
    assert!(again.is_empty(), "{again:?}");

    assert_eq!(property(&graph, "p:function:api", "Role"), Some(Value::Id(id("p:role:role-api"))));
    assert_eq!(
        property(&graph, "p:function:api", "Subnets"),
        Some(ids(&["p:subnet:subnet-0", "p:subnet:subnet-1"]))
    );
    assert!(graph.has_dependency(&id("p:function:api"), &id("p:role:role-api")));
}

#[test]
fn passes_reach_a_fixpoint_with_namespaced_subnets() {
    let kb = sample_kb();
    let mut graph = GraphBuilder::new().resource("p:function:api").build();
    let mut ctx = OperationalRuleContext::new(&mut graph, &kb);

    let mut passes = 0;
    loop {
        passes += 1;
        assert!(passes <= 10, "no fixpoint after 10 passes");
        if ctx.apply_pass().unwrap().is_empty() {
            break;
        }
    }
    // Pass one creates the role and subnets, pass two their network, pass
    // three finds nothing to do.
    assert_eq!(passes, 3);

    let before = graph_to_yaml(&graph).unwrap();
    assert!(OperationalRuleContext::new(&mut graph, &kb).apply_pass().unwrap().is_empty());
    assert_eq!(graph_to_yaml(&graph).unwrap(), before);

    let subnets = ["p:subnet:network-0:subnet-0", "p:subnet:network-0:subnet-1"];
    assert_eq!(property(&graph, "p:function:api", "Subnets"), Some(ids(&subnets)));
    for subnet in subnets {
        assert_eq!(property(&graph, subnet, "Network"), Some(Value::Id(id("p:network:network-0"))));
        assert!(graph.has_dependency(&id(subnet), &id("p:network:network-0")));
    }
    assert!(!graph.contains(&id("p:subnet:subnet-0")));
}

#[test]
fn spread_prefers_the_least_used_subnets() {
    let kb = sample_kb();
    let mut graph = GraphBuilder::new()
        .resource("p:function:f1")
        .resource("p:function:f2")
        .resource("p:function:f3")
        .resource("p:subnet:s0")
        .resource("p:subnet:s1")
        .resource("p:subnet:s2")
        .edge("p:function:f1", "p:subnet:s0")
        .edge("p:function:f2", "p:subnet:s0")
        .edge("p:function:f1", "p:subnet:s2")
        .build();

    let (result, _) = OperationalRuleContext::new(&mut graph, &kb)
        .apply_resource_rules(&id("p:function:f3"))
        .unwrap();
    assert_eq!(result.created_resources, vec![id("p:role:role-f3")]);
    assert_eq!(
        property(&graph, "p:function:f3", "Subnets"),
        Some(ids(&["p:subnet:s1", "p:subnet:s2"]))
    );
    assert!(!graph.has_dependency(&id("p:function:f3"), &id("p:subnet:s0")));
}

#[test]
fn candidates_outside_the_anchors_namespace_are_rejected() {
    let kb = sample_kb();
    let mut graph = GraphBuilder::new()
        .resource("p:function:api")
        .resource("p:network:n1")
        .resource("p:network:n2")
        .resource_with("p:subnet:n1:s1", [("Network", Value::Id(id("p:network:n1")))])
        .resource_with("p:subnet:n2:s2", [("Network", Value::Id(id("p:network:n2")))])
        .edge("p:function:api", "p:network:n2")
        .edge("p:subnet:n1:s1", "p:network:n1")
        .edge("p:subnet:n2:s2", "p:network:n2")
        .build();

    let template = kb.get_resource_template(&id("p:function:api")).unwrap();
    let subnets = template.get_property("Subnets").unwrap().clone();
    let rule = PropertyRule {
        step: Some(OperationalStep {
            direction: Direction::Downstream,
            resources: vec![ResourceSelector::new("p:subnet")],
            num_needed: 1,
            ..OperationalStep::default()
        }),
        ..PropertyRule::default()
    };

    let mut ctx = OperationalRuleContext::new(&mut graph, &kb);
    ctx.property = Some(subnets);
    ctx.data = DynamicValueData::for_resource(id("p:function:api")).with_path(PropertyPath::parse("Subnets").unwrap());
    let result = ctx.handle_property_rule(&rule).unwrap();

    assert!(result.created_resources.is_empty());
    assert_eq!(
        result.added_dependencies,
        vec![Edge::new(id("p:function:api"), id("p:subnet:n2:s2"))]
    );
    assert_eq!(property(&graph, "p:function:api", "Subnets"), Some(ids(&["p:subnet:n2:s2"])));
    assert!(!graph.has_dependency(&id("p:function:api"), &id("p:subnet:n1:s1")));
}

fn shared_role_graph() -> ResourceGraph {
    GraphBuilder::new()
        .resource("p:function:f1")
        .resource("p:function:f2")
        .resource("p:role:r1")
        .edge("p:function:f1", "p:role:r1")
        .build()
}

#[test]
fn roles_serving_another_function_are_not_reused() {
    let kb = sample_kb();
    let mut graph = shared_role_graph();
    let step = OperationalStep {
        resources: vec![ResourceSelector::new("p:role")],
        ..OperationalStep::default()
    };

    let mut ctx = OperationalRuleContext::new(&mut graph, &kb);
    ctx.data = DynamicValueData::for_resource(id("p:function:f2"));
    let result = ctx.handle_operational_step(&step).unwrap();

    assert_eq!(result.created_resources, vec![id("p:role:role-1")]);
    assert!(graph.has_dependency(&id("p:function:f2"), &id("p:role:role-1")));
    assert_eq!(graph.upstream(&id("p:role:r1"), 1), vec![id("p:function:f1")]);
}

#[test]
fn an_exclusive_role_already_wired_is_adopted() {
    let kb = sample_kb();
    let mut graph = GraphBuilder::new()
        .resource("p:function:api")
        .resource("p:role:r1")
        .edge("p:function:api", "p:role:r1")
        .build();

    let (result, _) = OperationalRuleContext::new(&mut graph, &kb)
        .apply_resource_rules(&id("p:function:api"))
        .unwrap();
    assert_eq!(
        result.created_resources,
        vec![id("p:subnet:subnet-0"), id("p:subnet:subnet-1")]
    );
    assert_eq!(property(&graph, "p:function:api", "Role"), Some(Value::Id(id("p:role:r1"))));
    assert_eq!(graph.downstream_of_type(&id("p:function:api"), 1, &id("p:role")), vec![id("p:role:r1")]);
}

#[test]
fn new_resources_skip_selectors_naming_existing_resources() {
    let kb = sample_kb();
    let mut graph = GraphBuilder::new()
        .resource("p:function:api")
        .resource("p:subnet:s1")
        .build();
    let step = OperationalStep {
        resources: vec![ResourceSelector::new("p:subnet:s1"), ResourceSelector::new("p:role")],
        num_needed: 2,
        ..OperationalStep::default()
    };

    let mut ctx = OperationalRuleContext::new(&mut graph, &kb);
    ctx.data = DynamicValueData::for_resource(id("p:function:api"));
    let result = ctx.handle_operational_step(&step).unwrap();

    assert_eq!(result.created_resources, vec![id("p:role:role-0")]);
    assert!(graph.has_dependency(&id("p:function:api"), &id("p:subnet:s1")));
    assert!(graph.has_dependency(&id("p:function:api"), &id("p:role:role-0")));
}

#[test]
fn naming_a_taken_role_violates_uniqueness() {
    let kb = sample_kb();
    let mut graph = shared_role_graph();
    let step = OperationalStep {
        resources: vec![ResourceSelector::new("p:role:r1")],
        ..OperationalStep::default()
    };

    let mut ctx = OperationalRuleContext::new(&mut graph, &kb);
    ctx.data = DynamicValueData::for_resource(id("p:function:f2"));
    let err = ctx.handle_operational_step(&step).unwrap_err();
    assert!(matches!(err, RuleError::UniqueViolation { .. }), "{err}");
    assert!(!graph.has_dependency(&id("p:function:f2"), &id("p:role:r1")));
}

#[test]
fn fail_if_missing_reports_the_shortfall() {
    let kb = sample_kb();
    let mut graph = GraphBuilder::new().resource("p:function:api").build();
    let step = OperationalStep {
        resources: vec![ResourceSelector::new("p:subnet")],
        num_needed: 2,
        fail_if_missing: true,
        ..OperationalStep::default()
    };

    let mut ctx = OperationalRuleContext::new(&mut graph, &kb);
    ctx.data = DynamicValueData::for_resource(id("p:function:api"));
    let err = ctx.handle_operational_step(&step).unwrap_err();
    assert!(matches!(err, RuleError::MissingRequired { needed: 2, found: 0, .. }), "{err}");
    assert_eq!(graph.len(), 1);
}

#[test]
fn edge_rules_configure_the_target() {
    let kb = sample_kb();
    let mut graph = GraphBuilder::new()
        .resource("p:function:api")
        .resource("p:bucket:data")
        .edge("p:function:api", "p:bucket:data")
        .build();

    let edge = Edge::new(id("p:function:api"), id("p:bucket:data"));
    let result = OperationalRuleContext::new(&mut graph, &kb).apply_edge_rules(&edge).unwrap();
    assert!(result.is_empty());
    assert_eq!(
        property(&graph, "p:bucket:data", "StorageClass"),
        Some(Value::String("archive".into()))
    );
}
