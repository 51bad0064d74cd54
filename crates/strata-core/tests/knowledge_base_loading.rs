// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::fs;

use strata_core::reader::{graph_from_yaml, graph_to_yaml, load_knowledge_base};
use strata_core::{Functionality, PropertyError, ResourceId, Value};
use strata_dry_tests::templates::{FUNCTION_TO_BUCKET, RESOURCES};
use strata_dry_tests::{id, sample_kb};

#[test]
fn directory_layout_loads_every_template() {
    let dir = tempfile::tempdir().unwrap();
    let resources = dir.path().join("resources/p");
    let edges = dir.path().join("edges");
    fs::create_dir_all(&resources).unwrap();
    fs::create_dir_all(&edges).unwrap();
    for (i, doc) in RESOURCES.iter().enumerate() {
        fs::write(resources.join(format!("{i}.yaml")), doc).unwrap();
    }
    fs::write(resources.join("notes.txt"), "not a template").unwrap();
    fs::write(edges.join("function_bucket.yml"), FUNCTION_TO_BUCKET).unwrap();
    fs::write(edges.join("subnet_network.yaml"), "source: p:subnet\ntarget: p:network\n").unwrap();

    let kb = load_knowledge_base(dir.path()).unwrap();
    assert_eq!(kb.list_resources().count(), RESOURCES.len());
    assert_eq!(kb.list_edges().count(), 2);
    assert_eq!(kb.get_functionality(&id("p:bucket:b")), Functionality::Storage);
    let rules = &kb
        .get_edge_template(&id("p:function:f"), &id("p:bucket:b"))
        .unwrap()
        .operational_rules;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].configuration_rules[0].configuration.field, "StorageClass");
}

#[test]
fn missing_directory_is_an_empty_knowledge_base() {
    let dir = tempfile::tempdir().unwrap();
    let kb = load_knowledge_base(dir.path()).unwrap();
    assert_eq!(kb.list_resources().count(), 0);
}

#[test]
fn resource_names_are_sanitized_on_creation() {
    let kb = sample_kb();
    let bucket = kb.create_resource(ResourceId::new("p", "bucket", "My Bucket_1")).unwrap();
    assert_eq!(bucket.id, id("p:bucket:my-bucket-1"));
    // Types without a sanitizer keep the name as given.
    let role = kb.create_resource(id("p:role:Mixed_Case")).unwrap();
    assert_eq!(role.id.name, "Mixed_Case");
}

#[test]
fn property_values_are_validated_and_sanitized() {
    let kb = sample_kb();
    let bucket = id("p:bucket:logs");
    let template = kb.get_resource_template(&bucket).unwrap();

    let name = template.get_property("BucketName").unwrap();
    let raw = Value::String("Logs Archive".into());
    assert!(matches!(
        name.validate(&bucket, &raw),
        Err(PropertyError::Sanitize(ref e)) if e.sanitized == Value::String("logs-archive".into())
    ));
    assert_eq!(
        name.validate_and_sanitize(&bucket, &raw).unwrap(),
        Value::String("logs-archive".into())
    );
    assert!(name.validate(&bucket, &Value::String("logs-archive".into())).is_ok());

    let class = template.get_property("StorageClass").unwrap();
    assert!(matches!(
        class.validate(&bucket, &Value::String("cold".into())),
        Err(PropertyError::NotAllowed { .. })
    ));

    let function = id("p:function:api");
    let timeout = kb.get_resource_template(&function).unwrap().get_property("Timeout").unwrap();
    assert!(timeout.validate(&function, &Value::Int(30)).is_ok());
    assert!(matches!(
        timeout.validate(&function, &Value::Int(0)),
        Err(PropertyError::OutOfBounds { .. })
    ));
    assert!(matches!(
        timeout.validate(&function, &Value::String("soon".into())),
        Err(PropertyError::Invalid { .. })
    ));
}

const GRAPH: &str = r"
resources:
  'p:function:api':
    Subnets: ['p:subnet:s1']
    Timeout: 30
  'p:subnet:s1': {}
edges:
  - p:function:api -> p:subnet:s1
";

#[test]
fn graph_documents_are_typed_by_their_templates() {
    let kb = sample_kb();
    let graph = graph_from_yaml(GRAPH, &kb).unwrap();
    let api = graph.resource(&id("p:function:api")).unwrap();
    assert_eq!(
        api.properties.get("Subnets"),
        Some(&Value::List(vec![Value::Id(id("p:subnet:s1"))]))
    );
    assert_eq!(api.properties.get("Timeout"), Some(&Value::Int(30)));
    assert!(graph.has_dependency(&id("p:function:api"), &id("p:subnet:s1")));

    let again = graph_from_yaml(&graph_to_yaml(&graph).unwrap(), &kb).unwrap();
    assert_eq!(graph_to_yaml(&again).unwrap(), graph_to_yaml(&graph).unwrap());
}
