// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! YAML loading for templates and graphs.
//!
//! Resource templates are read into raw serde structs first and then
//! converted, so that property type strings, nested properties, bounds and
//! sanitize templates are checked once with their full path in the error.
//! A knowledge-base directory holds `resources/` and `edges/` trees of
//! `.yaml` files, loaded in sorted path order.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Number;
use thiserror::Error;
use tracing::debug;

use crate::consumption::Consumption;
use crate::dynamic::{DynamicValueContext, DynamicValueData};
use crate::graph::{GraphError, ResourceGraph};
use crate::ident::{IdError, ResourceId};
use crate::kb::{Classification, DeleteContext, EdgeTemplate, KbError, KnowledgeBase, ResourceTemplate};
use crate::property::{Properties, Property, PropertyError, PropertyKind};
use crate::resource::Resource;
use crate::rule::PropertyRule;
use crate::template::{Template, TemplateError};
use crate::value::Value;

/// Failures while reading templates or graphs.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// A file could not be read.
    #[error("reading {path}: {error}")]
    Io {
        /// File or directory.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        error: std::io::Error,
    },
    /// A document is not valid YAML for its schema.
    #[error("parsing {origin}: {error}")]
    Yaml {
        /// File name or `<inline>`.
        origin: String,
        /// Underlying failure.
        #[source]
        error: serde_yaml::Error,
    },
    /// A property declaration is invalid.
    #[error("property '{path}' of '{template}': {error}")]
    Property {
        /// Owning template.
        template: String,
        /// Property path.
        path: String,
        /// Underlying failure.
        #[source]
        error: PropertyError,
    },
    /// A template string failed to parse.
    #[error("template in '{template}': {error}")]
    Template {
        /// Owning template.
        template: String,
        /// Underlying failure.
        #[source]
        error: TemplateError,
    },
    /// A graph edge is not written as `source -> target`.
    #[error("malformed edge '{0}': expected 'source -> target'")]
    MalformedEdge(String),
    /// A resource id failed to parse.
    #[error(transparent)]
    Id(#[from] IdError),
    /// Registration in the knowledge base failed.
    #[error(transparent)]
    Kb(#[from] KbError),
    /// Graph construction failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawResourceTemplate {
    qualified_type_name: String,
    display_name: String,
    properties: BTreeMap<String, RawProperty>,
    classification: Classification,
    delete_context: DeleteContext,
    views: BTreeMap<String, String>,
    sanitize_name: Option<String>,
    consumption: Consumption,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawProperty {
    #[serde(rename = "type")]
    ty: String,
    namespace: bool,
    default_value: Option<Value>,
    required: bool,
    configuration_disabled: bool,
    deploy_time: bool,
    operational_rule: Option<PropertyRule>,
    properties: BTreeMap<String, RawProperty>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min_value: Option<Number>,
    max_value: Option<Number>,
    allowed_types: Vec<ResourceId>,
    sanitize: Option<String>,
    allowed_values: Vec<String>,
}

struct Converter<'t> {
    template: &'t str,
}

impl Converter<'_> {
    fn property_error(&self, path: &str, error: PropertyError) -> ReaderError {
        ReaderError::Property {
            template: self.template.to_owned(),
            path: path.to_owned(),
            error,
        }
    }

    fn properties(&self, raw: BTreeMap<String, RawProperty>, parent: Option<&str>) -> Result<Properties, ReaderError> {
        let mut out = Properties::new();
        for (name, prop) in raw {
            let path = parent.map_or_else(|| name.clone(), |p| format!("{p}.{name}"));
            let converted = self.property(&name, &path, prop)?;
            out.insert(name, converted);
        }
        Ok(out)
    }

    fn int_bound(&self, path: &str, n: Option<Number>) -> Result<Option<i64>, ReaderError> {
        n.map(|n| {
            n.as_i64().ok_or_else(|| {
                self.property_error(
                    path,
                    PropertyError::MalformedType {
                        ty: "int".into(),
                        reason: format!("bound {n} is not an integer"),
                    },
                )
            })
        })
        .transpose()
    }

    fn property(&self, name: &str, path: &str, raw: RawProperty) -> Result<Property, ReaderError> {
        if raw.ty.trim().is_empty() {
            return Err(self.property_error(path, PropertyError::UnknownType(String::new())));
        }
        let mut prop = Property::from_type(name, path, &raw.ty).map_err(|e| self.property_error(path, e))?;
        prop.details.namespace = raw.namespace;
        prop.details.required = raw.required;
        prop.details.configuration_disabled = raw.configuration_disabled;
        prop.details.deploy_time = raw.deploy_time;
        prop.details.operational_rule = raw.operational_rule;
        prop.default_value = raw.default_value;
        let nested = if raw.properties.is_empty() {
            Properties::new()
        } else {
            self.properties(raw.properties, Some(path))?
        };
        match &mut prop.kind {
            PropertyKind::String { allowed_values, sanitize } => {
                *allowed_values = raw.allowed_values;
                if let Some(src) = raw.sanitize.filter(|s| !s.trim().is_empty()) {
                    *sanitize = Some(Template::parse(&src).map_err(|error| ReaderError::Template {
                        template: self.template.to_owned(),
                        error,
                    })?);
                }
            }
            PropertyKind::Int { min, max } => {
                *min = self.int_bound(path, raw.min_value)?;
                *max = self.int_bound(path, raw.max_value)?;
            }
            PropertyKind::Float { min, max } => {
                *min = raw.min_value.and_then(|n| n.as_f64());
                *max = raw.max_value.and_then(|n| n.as_f64());
            }
            PropertyKind::Resource { allowed_types } => {
                if !raw.allowed_types.is_empty() {
                    *allowed_types = raw.allowed_types;
                }
            }
            PropertyKind::List(c) | PropertyKind::Set(c) => {
                c.min_length = raw.min_length;
                c.max_length = raw.max_length;
                c.properties = nested;
            }
            PropertyKind::Map(m) => {
                m.min_length = raw.min_length;
                m.max_length = raw.max_length;
                m.properties = nested;
            }
            PropertyKind::Bool | PropertyKind::Any => {}
        }
        Ok(prop)
    }
}

fn yaml<T: for<'de> Deserialize<'de>>(text: &str, origin: &str) -> Result<T, ReaderError> {
    serde_yaml::from_str(text).map_err(|error| ReaderError::Yaml {
        origin: origin.to_owned(),
        error,
    })
}

/// Parses one resource template document.
pub fn resource_template_from_yaml(text: &str) -> Result<ResourceTemplate, ReaderError> {
    resource_template_from(text, "<inline>")
}

fn resource_template_from(text: &str, origin: &str) -> Result<ResourceTemplate, ReaderError> {
    let raw: RawResourceTemplate = yaml(text, origin)?;
    let conv = Converter {
        template: &raw.qualified_type_name,
    };
    let properties = conv.properties(raw.properties, None)?;
    let sanitize_name = raw
        .sanitize_name
        .filter(|s| !s.trim().is_empty())
        .map(|s| Template::parse(&s))
        .transpose()
        .map_err(|error| ReaderError::Template {
            template: raw.qualified_type_name.clone(),
            error,
        })?;
    Ok(ResourceTemplate {
        qualified_type_name: raw.qualified_type_name,
        display_name: raw.display_name,
        properties,
        classification: raw.classification,
        delete_context: raw.delete_context,
        views: raw.views,
        sanitize_name,
        consumption: raw.consumption,
    })
}

/// Parses one edge template document.
pub fn edge_template_from_yaml(text: &str) -> Result<EdgeTemplate, ReaderError> {
    yaml(text, "<inline>")
}

fn yaml_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ReaderError> {
    let io = |error| ReaderError::Io {
        path: dir.to_path_buf(),
        error,
    };
    let mut entries = fs::read_dir(dir).map_err(io)?.collect::<Result<Vec<_>, _>>().map_err(io)?;
    entries.sort_by_key(fs::DirEntry::path);
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            yaml_files(&path, out)?;
        } else if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
            out.push(path);
        }
    }
    Ok(())
}

fn read(path: &Path) -> Result<String, ReaderError> {
    fs::read_to_string(path).map_err(|error| ReaderError::Io {
        path: path.to_path_buf(),
        error,
    })
}

/// Loads `<dir>/resources` and `<dir>/edges` into a knowledge base. Either
/// subdirectory may be missing.
pub fn load_knowledge_base(dir: &Path) -> Result<KnowledgeBase, ReaderError> {
    let mut kb = KnowledgeBase::new();
    let mut files = Vec::new();
    let resources = dir.join("resources");
    if resources.is_dir() {
        yaml_files(&resources, &mut files)?;
    }
    for path in files.drain(..) {
        let text = read(&path)?;
        let template = resource_template_from(&text, &path.display().to_string())?;
        debug!(path = %path.display(), template = %template.qualified_type_name, "loaded resource template");
        kb.add_resource_template(template)?;
    }
    let edges = dir.join("edges");
    if edges.is_dir() {
        yaml_files(&edges, &mut files)?;
    }
    for path in files {
        let text = read(&path)?;
        let template: EdgeTemplate = yaml(&text, &path.display().to_string())?;
        debug!(path = %path.display(), source = %template.source, target = %template.target, "loaded edge template");
        kb.add_edge_template(template)?;
    }
    Ok(kb)
}

/// On-disk graph shape: resources with their properties and
/// `source -> target` edge strings.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct GraphDocument {
    resources: BTreeMap<String, BTreeMap<String, Value>>,
    edges: Vec<String>,
}

fn parse_edge(text: &str) -> Result<(ResourceId, ResourceId), ReaderError> {
    let (source, target) = text
        .split_once("->")
        .ok_or_else(|| ReaderError::MalformedEdge(text.to_owned()))?;
    Ok((ResourceId::parse(source.trim())?, ResourceId::parse(target.trim())?))
}

/// Parses a graph document. Property values of resources with a template in
/// `kb` are parsed against it, so resource-typed strings become ids.
pub fn graph_from_yaml(text: &str, kb: &KnowledgeBase) -> Result<ResourceGraph, ReaderError> {
    let doc: GraphDocument = yaml(text, "<graph>")?;
    let mut graph = ResourceGraph::new();
    for (id, properties) in &doc.resources {
        let mut resource = Resource::new(ResourceId::parse(id)?);
        resource.properties = properties.clone();
        graph.add_resource(resource)?;
    }
    for edge in &doc.edges {
        let (source, target) = parse_edge(edge)?;
        graph.add_dependency(&source, &target)?;
    }
    let mut parsed = Vec::new();
    {
        let ctx = DynamicValueContext::new(&graph, kb);
        for resource in graph.list_resources() {
            let Some(template) = kb.get_resource_template(&resource.id) else {
                continue;
            };
            let data = DynamicValueData::for_resource(resource.id.clone());
            for (name, value) in &resource.properties {
                let Some(prop) = template.properties.get(name) else {
                    continue;
                };
                let v = prop.parse(value, &ctx, &data).map_err(|error| ReaderError::Property {
                    template: template.qualified_type_name.clone(),
                    path: name.clone(),
                    error,
                })?;
                parsed.push((resource.id.clone(), name.clone(), v));
            }
        }
    }
    for (id, name, value) in parsed {
        if let Some(resource) = graph.resource_mut(&id) {
            resource.properties.insert(name, value);
        }
    }
    Ok(graph)
}

/// Writes a graph in the shape [`graph_from_yaml`] reads.
pub fn graph_to_yaml(graph: &ResourceGraph) -> Result<String, ReaderError> {
    let doc = GraphDocument {
        resources: graph
            .list_resources()
            .map(|r| (r.id.to_string(), r.properties.clone()))
            .collect(),
        edges: graph
            .edges()
            .iter()
            .map(|e| format!("{} -> {}", e.source, e.target))
            .collect(),
    };
    serde_yaml::to_string(&doc).map_err(|error| ReaderError::Yaml {
        origin: "<graph>".into(),
        error,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const FUNCTION: &str = r#"
qualified_type_name: aws:lambda_function
display_name: Lambda
classification:
  is: [compute, serverless]
sanitize_name: '{{ . | replace "[^a-zA-Z0-9-]" "-" }}'
properties:
  Role:
    type: resource(aws:iam_role)
    namespace: false
    operational_rule:
      step:
        direction: downstream
        resources: ['aws:iam_role']
        unique: true
  MemorySize:
    type: int
    min_value: 128
    max_value: 10240
    default_value: 512
  Runtime:
    type: string
    allowed_values: [python3.11, nodejs20.x]
  Vpc:
    type: map
    properties:
      Subnets:
        type: list(resource(aws:subnet))
        min_length: 1
"#;

    #[test]
    fn reads_resource_template() {
        let t = resource_template_from_yaml(FUNCTION).unwrap();
        assert_eq!(t.qualified_type_name, "aws:lambda_function");
        assert_eq!(t.sanitize_name("my func").unwrap(), "my-func");

        let role = t.get_property("Role").unwrap();
        assert!(role.details.operational_rule.as_ref().unwrap().step.as_ref().unwrap().unique);

        let mem = t.get_property("MemorySize").unwrap();
        assert_eq!(mem.kind, PropertyKind::Int { min: Some(128), max: Some(10240) });
        assert_eq!(mem.default_value, Some(Value::Int(512)));

        let subnets = t.get_property("Vpc.Subnets").unwrap();
        assert_eq!(subnets.details.path, "Vpc.Subnets");
        assert!(matches!(&subnets.kind, PropertyKind::List(c) if c.min_length == Some(1)));
    }

    #[test]
    fn rejects_bad_property_types() {
        let err = resource_template_from_yaml("qualified_type_name: p:x\nproperties:\n  A:\n    type: tuple\n")
            .unwrap_err();
        assert!(matches!(err, ReaderError::Property { ref path, .. } if path == "A"));

        let err = resource_template_from_yaml("qualified_type_name: p:x\nproperties:\n  A: {}\n").unwrap_err();
        assert!(matches!(err, ReaderError::Property { .. }));

        let err = resource_template_from_yaml(
            "qualified_type_name: p:x\nproperties:\n  A:\n    type: int\n    min_value: 1.5\n",
        )
        .unwrap_err();
        assert!(matches!(err, ReaderError::Property { .. }));
    }

    #[test]
    fn graph_documents_round_trip() {
        let mut kb = KnowledgeBase::new();
        kb.add_resource_template(resource_template_from_yaml(FUNCTION).unwrap()).unwrap();
        kb.add_resource_template(resource_template_from_yaml("qualified_type_name: aws:iam_role\n").unwrap())
            .unwrap();
        let text = "resources:\n  aws:lambda_function:api:\n    Role: aws:iam_role:r\n  aws:iam_role:r: {}\nedges:\n  - aws:lambda_function:api -> aws:iam_role:r\n";
        let g = graph_from_yaml(text, &kb).unwrap();
        let api = g.resource(&ResourceId::parse("aws:lambda_function:api").unwrap()).unwrap();
        assert_eq!(
            api.get_property("Role").unwrap(),
            Some(&Value::Id(ResourceId::parse("aws:iam_role:r").unwrap()))
        );
        let again = graph_from_yaml(&graph_to_yaml(&g).unwrap(), &kb).unwrap();
        assert_eq!(again.edges(), g.edges());
    }

    #[test]
    fn malformed_edges_are_reported() {
        let kb = KnowledgeBase::new();
        let err = graph_from_yaml("edges: ['a:b:c']\n", &kb).unwrap_err();
        assert!(matches!(err, ReaderError::MalformedEdge(_)));
    }

    #[test]
    fn loads_directory_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("resources/aws")).unwrap();
        fs::create_dir_all(dir.path().join("edges")).unwrap();
        fs::write(dir.path().join("resources/aws/role.yaml"), "qualified_type_name: aws:iam_role\n").unwrap();
        fs::write(dir.path().join("resources/aws/lambda.yaml"), FUNCTION).unwrap();
        fs::write(dir.path().join("resources/README.md"), "ignored").unwrap();
        fs::write(
            dir.path().join("edges/lambda_role.yaml"),
            "source: aws:lambda_function\ntarget: aws:iam_role\nunique: many_to_one\n",
        )
        .unwrap();
        let kb = load_knowledge_base(dir.path()).unwrap();
        assert_eq!(kb.list_resources().count(), 2);
        let from = ResourceId::parse("aws:lambda_function:a").unwrap();
        let to = ResourceId::parse("aws:iam_role:b").unwrap();
        assert!(kb.get_edge_template(&from, &to).unwrap().unique.target);
    }
}
