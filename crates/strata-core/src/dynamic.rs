// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Template evaluation bound to a graph and knowledge base.
//!
//! [`DynamicValueContext`] renders templates with graph-aware functions
//! (`upstream`, `fieldValue`, `shortestPath`, ...) against a
//! [`DynamicValueData`] binding, and decodes the trimmed output into a target
//! type with [`DynamicValueContext::execute_decode`].
use std::collections::BTreeMap;

use tracing::{debug, error, info, trace, warn};

use crate::graph::{Direction, Edge, ResourceGraph, Walk};
use crate::ident::{PropertyRef, ResourceId};
use crate::kb::{layer, DependencyLayer, Functionality, KnowledgeBase};
use crate::resource::PropertyPath;
use crate::template::funcs::{arg, call_util, id_arg, int_arg, str_arg};
use crate::template::{Functions, Template, TemplateError};
use crate::value::Value;

/// Maximum number of property references followed by `fieldValue`.
const MAX_REF_HOPS: usize = 16;

/// Per-evaluation binding exposed to templates as `.Self`, `.Source`,
/// `.Target`, `.Path` and `.Tag`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DynamicValueData {
    /// Resource being evaluated.
    pub resource: ResourceId,
    /// Edge being evaluated.
    pub edge: Option<Edge>,
    /// Property path being evaluated.
    pub path: Option<PropertyPath>,
    /// Free-form tag.
    pub tag: String,
}

impl DynamicValueData {
    /// Binding for a resource.
    pub fn for_resource(resource: ResourceId) -> Self {
        Self {
            resource,
            ..Self::default()
        }
    }

    /// Binding for an edge.
    pub fn for_edge(edge: Edge) -> Self {
        Self {
            edge: Some(edge),
            ..Self::default()
        }
    }

    /// Same binding with `.Path` set.
    #[must_use]
    pub fn with_path(mut self, path: PropertyPath) -> Self {
        self.path = Some(path);
        self
    }

    /// The map templates see as `.`.
    pub fn to_value(&self) -> Value {
        let id = |id: &ResourceId| if id.is_zero() { Value::Null } else { Value::Id(id.clone()) };
        let mut m = BTreeMap::new();
        m.insert("Self".to_owned(), id(&self.resource));
        if let Some(edge) = &self.edge {
            m.insert("Source".to_owned(), id(&edge.source));
            m.insert("Target".to_owned(), id(&edge.target));
        }
        if let Some(path) = &self.path {
            m.insert("Path".to_owned(), Value::String(path.to_string()));
        }
        m.insert("Tag".to_owned(), Value::String(self.tag.clone()));
        Value::Map(m)
    }
}

/// Target types for [`DynamicValueContext::execute_decode`].
pub trait Decode: Sized {
    /// Name used in decode errors.
    const TARGET: &'static str;

    /// Decodes trimmed template output.
    fn decode(text: &str) -> Result<Self, String>;
}

impl Decode for String {
    const TARGET: &'static str = "string";

    fn decode(text: &str) -> Result<Self, String> {
        Ok(text.to_owned())
    }
}

impl Decode for bool {
    const TARGET: &'static str = "bool";

    fn decode(text: &str) -> Result<Self, String> {
        crate::property::parse_bool(text).ok_or_else(|| format!("invalid syntax for bool: '{text}'"))
    }
}

impl Decode for i64 {
    const TARGET: &'static str = "int";

    fn decode(text: &str) -> Result<Self, String> {
        text.parse().map_err(|e| format!("{e}"))
    }
}

impl Decode for f64 {
    const TARGET: &'static str = "float";

    fn decode(text: &str) -> Result<Self, String> {
        text.parse().map_err(|e| format!("{e}"))
    }
}

impl Decode for Vec<u8> {
    const TARGET: &'static str = "bytes";

    fn decode(text: &str) -> Result<Self, String> {
        Ok(text.as_bytes().to_vec())
    }
}

impl Decode for ResourceId {
    const TARGET: &'static str = "resource id";

    fn decode(text: &str) -> Result<Self, String> {
        Self::parse(text).map_err(|e| e.to_string())
    }
}

impl Decode for PropertyRef {
    const TARGET: &'static str = "property reference";

    fn decode(text: &str) -> Result<Self, String> {
        Self::parse(text).map_err(|e| e.to_string())
    }
}

/// A JSON list of ids, a single id, or nothing.
impl Decode for Vec<ResourceId> {
    const TARGET: &'static str = "resource id list";

    fn decode(text: &str) -> Result<Self, String> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        if text.starts_with('[') {
            let items: Vec<String> = serde_json::from_str(text).map_err(|e| e.to_string())?;
            return items
                .iter()
                .map(|s| ResourceId::parse(s).map_err(|e| e.to_string()))
                .collect();
        }
        ResourceId::parse(text).map(|id| vec![id]).map_err(|e| e.to_string())
    }
}

impl Decode for serde_json::Value {
    const TARGET: &'static str = "json";

    fn decode(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }
}

/// JSON when the text parses as JSON, otherwise the text itself.
impl Decode for Value {
    const TARGET: &'static str = "value";

    fn decode(text: &str) -> Result<Self, String> {
        if text.is_empty() {
            return Ok(Self::Null);
        }
        Ok(serde_json::from_str::<serde_json::Value>(text)
            .map_or_else(|_| Self::String(text.to_owned()), |j| Self::from_json(&j)))
    }
}

/// Read-only view of a graph and knowledge base for template evaluation.
#[derive(Clone, Copy, Debug)]
pub struct DynamicValueContext<'a> {
    graph: &'a ResourceGraph,
    kb: &'a KnowledgeBase,
}

impl<'a> DynamicValueContext<'a> {
    /// Binds a graph and knowledge base.
    pub fn new(graph: &'a ResourceGraph, kb: &'a KnowledgeBase) -> Self {
        Self { graph, kb }
    }

    /// The bound graph.
    pub fn graph(&self) -> &'a ResourceGraph {
        self.graph
    }

    /// The bound knowledge base.
    pub fn kb(&self) -> &'a KnowledgeBase {
        self.kb
    }

    /// Renders `template` against `data`, untrimmed.
    pub fn render(&self, template: &str, data: &DynamicValueData) -> Result<String, TemplateError> {
        self.render_with(template, data, &data.to_value())
    }

    /// Renders `template` with `dot` as `.` while graph functions still see `data`.
    pub fn render_with(&self, template: &str, data: &DynamicValueData, dot: &Value) -> Result<String, TemplateError> {
        let parsed = Template::parse(template)?;
        parsed.execute(&Bound { ctx: self, data }, dot)
    }

    /// Renders `template` and decodes the trimmed output as `T`.
    pub fn execute_decode<T: Decode>(&self, template: &str, data: &DynamicValueData) -> Result<T, TemplateError> {
        let out = self.render(template, data)?;
        decode_output(&out)
    }

    /// Decodes a resource id; a zero id is an error.
    pub fn execute_decode_as_resource_id(
        &self,
        template: &str,
        data: &DynamicValueData,
    ) -> Result<ResourceId, TemplateError> {
        let id: ResourceId = self.execute_decode(template, data)?;
        if id.is_zero() {
            return Err(TemplateError::ZeroSelector(template.to_owned()));
        }
        Ok(id)
    }

    /// Evaluates a condition; `default` applies to an empty template.
    pub fn evaluate_condition(&self, template: &str, data: &DynamicValueData, default: bool) -> Result<bool, TemplateError> {
        if template.trim().is_empty() {
            return Ok(default);
        }
        self.execute_decode(template, data)
    }
}

/// Decodes trimmed template output as `T`.
pub fn decode_output<T: Decode>(out: &str) -> Result<T, TemplateError> {
    let trimmed = out.trim();
    T::decode(trimmed).map_err(|message| TemplateError::Decode {
        output: trimmed.to_owned(),
        target: T::TARGET,
        message,
    })
}

struct Bound<'c, 'a> {
    ctx: &'c DynamicValueContext<'a>,
    data: &'c DynamicValueData,
}

impl Functions for Bound<'_, '_> {
    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, TemplateError>> {
        let result = match name {
            "hasUpstream" | "upstream" | "hasDownstream" | "downstream" => self.first_functional(name, args),
            "layeredUpstream" | "layeredDownstream" | "allUpstream" | "allDownstream" => self.layered(name, args),
            "closestDownstream" => self.closest_downstream(name, args),
            "shortestPath" => self.shortest_path(name, args),
            "longestPath" => self.longest_path(name, args),
            "fieldValue" => self.field_value(name, args),
            "hasField" => self.has_field(name, args),
            "fieldRef" => field_ref(name, args),
            "pathAncestor" | "pathAncestorExists" => path_ancestor(name, args),
            "log" => self.log(name, args),
            _ => return call_util(name, args),
        };
        Some(result)
    }
}

fn direction_of(name: &str) -> Direction {
    if name.contains("pstream") {
        Direction::Upstream
    } else {
        Direction::Downstream
    }
}

impl Bound<'_, '_> {
    fn first_functional(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let selector = id_arg(name, args, 0)?;
        let start = id_arg(name, args, 1)?;
        let direction = direction_of(name);
        let mut found = None;
        self.ctx.graph().walk(&start, direction, |path| {
            let current = &path[path.len() - 1];
            if selector.matches(current) {
                found = Some(current.clone());
                return Walk::Stop;
            }
            if self.ctx.kb().get_functionality(current) == Functionality::Unknown {
                Walk::Continue
            } else {
                Walk::SkipPath
            }
        });
        if name.starts_with("has") {
            return Ok(Value::Bool(found.is_some()));
        }
        found.map(Value::Id).ok_or_else(|| {
            let dir = if direction == Direction::Upstream { "upstream" } else { "downstream" };
            TemplateError::func(name, format!("no {dir} resource of '{start}' found matching selector '{selector}'"))
        })
    }

    fn layered(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let selector = id_arg(name, args, 0)?;
        let start = id_arg(name, args, 1)?;
        let layer = if name.starts_with("all") {
            DependencyLayer::All
        } else {
            str_arg(name, args, 2)?
                .parse::<DependencyLayer>()
                .map_err(|e| TemplateError::func(name, e))?
        };
        let ids = layer::layered(self.ctx, &start, direction_of(name), layer)
            .map_err(|e| TemplateError::func(name, e.to_string()))?;
        Ok(Value::from(
            ids.into_iter().filter(|id| selector.matches(id)).collect::<Vec<_>>(),
        ))
    }

    fn closest_downstream(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let selector = id_arg(name, args, 0)?;
        let start = id_arg(name, args, 1)?;
        let mut found = None;
        self.ctx.graph().walk(&start, Direction::Downstream, |path| {
            let current = &path[path.len() - 1];
            if selector.matches(current) {
                found = Some(current.clone());
                Walk::Stop
            } else {
                Walk::Continue
            }
        });
        found
            .map(Value::Id)
            .ok_or_else(|| TemplateError::func(name, format!("no resource downstream of '{start}' matches '{selector}'")))
    }

    fn shortest_path(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let source = id_arg(name, args, 0)?;
        let target = id_arg(name, args, 1)?;
        Ok(Value::from(self.ctx.graph().shortest_path(&source, &target).unwrap_or_default()))
    }

    fn longest_path(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let source = id_arg(name, args, 0)?;
        let target = id_arg(name, args, 1)?;
        let mut best: Vec<ResourceId> = Vec::new();
        for path in self.ctx.graph().all_paths(&source, &target) {
            if path.len() > best.len() {
                best = path;
            }
        }
        Ok(Value::from(best))
    }

    fn field_value(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let mut field = str_arg(name, args, 0)?;
        let mut id = id_arg(name, args, 1)?;
        for _ in 0..MAX_REF_HOPS {
            let resource = self
                .ctx
                .graph()
                .resource(&id)
                .ok_or_else(|| TemplateError::func(name, format!("resource '{id}' not found")))?;
            let value = resource
                .get_property(&field)
                .map_err(|e| TemplateError::func(name, e.to_string()))?
                .ok_or_else(|| TemplateError::func(name, format!("field '{field}' not found on resource '{id}'")))?;
            match value {
                Value::Ref(r) => {
                    field.clone_from(&r.property);
                    id = r.resource.clone();
                }
                other => return Ok(other.clone()),
            }
        }
        Err(TemplateError::func(name, format!("too many property references from '{id}'")))
    }

    fn has_field(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let field = str_arg(name, args, 0)?;
        let id = id_arg(name, args, 1)?;
        let present = match self.ctx.graph().resource(&id) {
            Some(r) => r.get_property(&field).ok().flatten().is_some(),
            None => false,
        };
        Ok(Value::Bool(present))
    }

    fn log(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let level = str_arg(name, args, 0)?;
        arg(name, args, 1)?;
        let message = args.get(1..).unwrap_or_default().iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
        let resource = &self.data.resource;
        match level.to_ascii_lowercase().as_str() {
            "trace" => trace!(%resource, "{message}"),
            "debug" => debug!(%resource, "{message}"),
            "info" => info!(%resource, "{message}"),
            "warn" => warn!(%resource, "{message}"),
            "error" => error!(%resource, "{message}"),
            other => return Err(TemplateError::func(name, format!("unknown log level '{other}'"))),
        }
        Ok(Value::String(String::new()))
    }
}

fn field_ref(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let field = str_arg(name, args, 0)?;
    let id = id_arg(name, args, 1)?;
    Ok(Value::Ref(PropertyRef::new(id, field)))
}

fn path_ancestor(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let text = str_arg(name, args, 0)?;
    let depth = usize::try_from(int_arg(name, args, 1)?)
        .map_err(|_| TemplateError::func(name, "depth must not be negative"))?;
    let path = PropertyPath::parse(&text).map_err(|e| TemplateError::func(name, e.to_string()))?;
    if name == "pathAncestorExists" {
        return Ok(Value::Bool(depth < path.len()));
    }
    path.ancestor(depth)
        .map(|p| Value::String(p.to_string()))
        .ok_or_else(|| TemplateError::func(name, format!("depth {depth} exceeds path '{text}'")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::kb::{Classification, ResourceTemplate};
    use crate::resource::Resource;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    fn kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        for (qtn, is) in [("p:fn", "compute"), ("p:db", "storage"), ("p:role", ""), ("p:policy", "")] {
            kb.add_resource_template(ResourceTemplate {
                qualified_type_name: qtn.into(),
                classification: Classification {
                    is: if is.is_empty() { Vec::new() } else { vec![is.into()] },
                    gives: Vec::new(),
                },
                ..ResourceTemplate::default()
            })
            .unwrap();
        }
        kb
    }

    /// fn:a -> role:r -> policy:p -> db:d -> role:deep
    fn graph() -> ResourceGraph {
        let mut g = ResourceGraph::new();
        g.add_dependency(&id("p:fn:a"), &id("p:role:r")).unwrap();
        g.add_dependency(&id("p:role:r"), &id("p:policy:p")).unwrap();
        g.add_dependency(&id("p:policy:p"), &id("p:db:d")).unwrap();
        g.add_dependency(&id("p:db:d"), &id("p:role:deep")).unwrap();
        let mut res = Resource::new(id("p:db:d"));
        res.set_property("Endpoint", Value::from("db.local")).unwrap();
        res.set_property("Alias", Value::Ref(PropertyRef::parse("p:db:d#Endpoint").unwrap())).unwrap();
        *g.resource_mut(&id("p:db:d")).unwrap() = res;
        g
    }

    fn render(g: &ResourceGraph, kb: &KnowledgeBase, t: &str) -> Result<String, TemplateError> {
        DynamicValueContext::new(g, kb).render(t, &DynamicValueData::for_resource(id("p:fn:a")))
    }

    #[test]
    fn downstream_stops_at_functional() {
        let (g, kb) = (graph(), kb());
        assert_eq!(render(&g, &kb, "{{ downstream \"p:db\" .Self }}").unwrap(), "p:db:d");
        assert_eq!(render(&g, &kb, "{{ hasDownstream \"p:policy\" .Self }}").unwrap(), "true");
        assert_eq!(render(&g, &kb, "{{ hasDownstream \"p:role:deep\" .Self }}").unwrap(), "false");
        let err = render(&g, &kb, "{{ upstream \"p:db\" .Self }}").unwrap_err();
        assert!(err.to_string().contains("no upstream resource of 'p:fn:a'"));
    }

    #[test]
    fn layered_and_all() {
        let (g, kb) = (graph(), kb());
        assert_eq!(
            render(&g, &kb, "{{ allDownstream \"p:role\" .Self | len }}").unwrap(),
            "2"
        );
        assert_eq!(
            render(&g, &kb, "{{ layeredDownstream \"p:role\" .Self \"glue\" | len }}").unwrap(),
            "1"
        );
        assert_eq!(
            render(&g, &kb, "{{ layeredDownstream \"\" .Self \"direct\" | len }}").unwrap(),
            "1"
        );
        assert!(render(&g, &kb, "{{ layeredDownstream \"\" .Self \"sideways\" }}").is_err());
    }

    #[test]
    fn field_value_follows_refs() {
        let (g, kb) = (graph(), kb());
        assert_eq!(render(&g, &kb, "{{ fieldValue \"Alias\" \"p:db:d\" }}").unwrap(), "db.local");
        assert_eq!(render(&g, &kb, "{{ hasField \"Nope\" \"p:db:d\" }}").unwrap(), "false");
        let err = render(&g, &kb, "{{ fieldValue \"Nope\" \"p:db:d\" }}").unwrap_err();
        assert!(err.to_string().contains("field 'Nope' not found on resource 'p:db:d'"));
        assert_eq!(render(&g, &kb, "{{ fieldRef \"Arn\" .Self }}").unwrap(), "p:fn:a#Arn");
    }

    #[test]
    fn paths() {
        let (g, kb) = (graph(), kb());
        assert_eq!(
            render(&g, &kb, "{{ shortestPath .Self \"p:db:d\" | len }}").unwrap(),
            "4"
        );
        assert_eq!(
            render(&g, &kb, "{{ pathAncestor \"a.b[0].c\" 1 }}").unwrap(),
            "a.b[0]"
        );
        assert_eq!(render(&g, &kb, "{{ pathAncestorExists \"a.b\" 2 }}").unwrap(), "false");
        assert!(render(&g, &kb, "{{ pathAncestor \"a\" 1 }}").is_err());
    }

    #[test]
    fn decode_targets() {
        let (g, kb) = (graph(), kb());
        let ctx = DynamicValueContext::new(&g, &kb);
        let data = DynamicValueData::for_resource(id("p:fn:a"));
        assert!(ctx.execute_decode::<bool>(" true ", &data).unwrap());
        assert_eq!(ctx.execute_decode::<i64>("{{ add 2 3 }}", &data).unwrap(), 5);
        assert_eq!(
            ctx.execute_decode::<Vec<ResourceId>>("[\"p:fn:a\",\"p:db:d\"]", &data).unwrap(),
            vec![id("p:fn:a"), id("p:db:d")]
        );
        assert!(matches!(
            ctx.execute_decode_as_resource_id("", &data),
            Err(TemplateError::ZeroSelector(_))
        ));
        assert!(matches!(
            ctx.execute_decode::<i64>("x", &data),
            Err(TemplateError::Decode { target: "int", .. })
        ));
        assert_eq!(ctx.execute_decode::<String>("{{ log \"debug\" \"hi\" }}", &data).unwrap(), "");
    }
}
