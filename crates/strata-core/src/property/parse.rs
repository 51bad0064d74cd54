// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Raw value to typed value conversion.
use std::collections::BTreeMap;

use super::{Collection, MapShape, Properties, Property, PropertyError, PropertyKind};
use crate::dynamic::{DynamicValueContext, DynamicValueData};
use crate::ident::{PropertyRef, ResourceId};
use crate::template::TemplateError;
use crate::value::Value;

impl Property {
    /// Converts a raw configured value into this property's typed form.
    ///
    /// Strings are rendered as templates first. Property references are kept
    /// as-is for later resolution. Null stays null.
    pub fn parse(
        &self,
        value: &Value,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
    ) -> Result<Value, PropertyError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match &self.kind {
            PropertyKind::String { .. } => self.parse_string(value, ctx, data),
            PropertyKind::Int { .. } => self.parse_scalar(value, ctx, data, |text| text.parse::<i64>().ok().map(Value::Int)),
            PropertyKind::Float { .. } => self.parse_float(value, ctx, data),
            PropertyKind::Bool => self.parse_scalar(value, ctx, data, |text| parse_bool(text).map(Value::Bool)),
            PropertyKind::Resource { allowed_types } => self.parse_resource(allowed_types, value, ctx, data),
            PropertyKind::List(c) => self.parse_list(c, false, value, ctx, data),
            PropertyKind::Set(c) => self.parse_list(c, true, value, ctx, data),
            PropertyKind::Map(m) => self.parse_map(m, value, ctx, data),
            PropertyKind::Any => parse_any(value, ctx, data),
        }
    }

    /// Parses the default value, if one is declared.
    pub fn get_default_value(
        &self,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
    ) -> Result<Option<Value>, PropertyError> {
        self.default_value.as_ref().map(|v| self.parse(v, ctx, data)).transpose()
    }

    fn invalid(&self, value: &Value) -> PropertyError {
        PropertyError::Invalid {
            path: self.details.path.clone(),
            expected: self.expected_kind(),
            found: format!("{} '{value}'", value.kind_name()),
        }
    }

    fn parse_string(
        &self,
        value: &Value,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
    ) -> Result<Value, PropertyError> {
        match value {
            Value::String(s) => {
                let rendered: String = ctx.execute_decode(s, data)?;
                if let Some(r) = as_property_ref(&rendered) {
                    return Ok(Value::Ref(r));
                }
                Ok(Value::String(rendered))
            }
            Value::Ref(_) => Ok(value.clone()),
            Value::Map(m) => map_to_ref(m).map(Value::Ref).ok_or_else(|| self.invalid(value)),
            Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Id(_) => Ok(Value::String(value.to_string())),
            _ => Err(self.invalid(value)),
        }
    }

    fn parse_scalar(
        &self,
        value: &Value,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
        from_text: fn(&str) -> Option<Value>,
    ) -> Result<Value, PropertyError> {
        match (value, &self.kind) {
            (Value::String(s), _) => {
                let rendered: String = ctx.execute_decode(s, data)?;
                if let Some(v) = from_text(&rendered) {
                    return Ok(v);
                }
                as_property_ref(&rendered).map(Value::Ref).ok_or_else(|| self.invalid(value))
            }
            (Value::Ref(_), _) | (Value::Int(_), PropertyKind::Int { .. }) | (Value::Bool(_), PropertyKind::Bool) => {
                Ok(value.clone())
            }
            (Value::Map(m), _) => map_to_ref(m).map(Value::Ref).ok_or_else(|| self.invalid(value)),
            _ => Err(self.invalid(value)),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn parse_float(
        &self,
        value: &Value,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
    ) -> Result<Value, PropertyError> {
        match value {
            Value::Float(_) => Ok(value.clone()),
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            _ => self.parse_scalar(value, ctx, data, |text| text.parse::<f64>().ok().map(Value::Float)),
        }
    }

    fn parse_resource(
        &self,
        allowed_types: &[ResourceId],
        value: &Value,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
    ) -> Result<Value, PropertyError> {
        let parsed = match value {
            Value::String(s) => {
                let rendered: String = ctx.execute_decode(s, data)?;
                match ResourceId::parse(&rendered) {
                    Ok(id) if id.is_zero() => return Err(TemplateError::ZeroSelector(s.clone()).into()),
                    Ok(id) => Value::Id(id),
                    Err(_) => as_property_ref(&rendered).map(Value::Ref).ok_or_else(|| self.invalid(value))?,
                }
            }
            Value::Id(_) | Value::Ref(_) => value.clone(),
            Value::Map(m) => map_to_id(m)
                .map(Value::Id)
                .or_else(|| map_to_ref(m).map(Value::Ref))
                .ok_or_else(|| self.invalid(value))?,
            _ => return Err(self.invalid(value)),
        };
        let id = match &parsed {
            Value::Id(id) => id,
            Value::Ref(r) => &r.resource,
            _ => return Ok(parsed),
        };
        if !id.is_zero() && !allowed_types.is_empty() && !allowed_types.iter().any(|a| a.matches(id)) {
            return Err(PropertyError::ResourceNotAllowed {
                path: self.details.path.clone(),
                value: id.clone(),
                allowed: allowed_types.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            });
        }
        Ok(parsed)
    }

    fn parse_list(
        &self,
        shape: &Collection,
        dedup: bool,
        value: &Value,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
    ) -> Result<Value, PropertyError> {
        let items = match value {
            Value::List(items) => items,
            Value::String(s) => {
                let decoded: Value = ctx.execute_decode(s, data)?;
                return match decoded {
                    Value::List(_) => self.parse_list(shape, dedup, &decoded, ctx, data),
                    Value::Null => Ok(Value::Null),
                    _ => Err(self.invalid(value)),
                };
            }
            Value::Ref(_) => return Ok(value.clone()),
            _ => return Err(self.invalid(value)),
        };
        let mut out: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            let parsed = match (&shape.item, shape.properties.is_empty()) {
                (Some(p), _) => p.parse(item, ctx, data)?,
                (None, false) => parse_object(&shape.properties, item, ctx, data)?,
                (None, true) => item.clone(),
            };
            if dedup && out.contains(&parsed) {
                continue;
            }
            out.push(parsed);
        }
        Ok(Value::List(out))
    }

    fn parse_map(
        &self,
        shape: &MapShape,
        value: &Value,
        ctx: &DynamicValueContext<'_>,
        data: &DynamicValueData,
    ) -> Result<Value, PropertyError> {
        let map = match value {
            Value::Map(m) => m,
            Value::String(s) => {
                let decoded: Value = ctx.execute_decode(s, data)?;
                return match decoded {
                    Value::Map(_) => self.parse_map(shape, &decoded, ctx, data),
                    Value::Null => Ok(Value::Null),
                    _ => Err(self.invalid(value)),
                };
            }
            Value::Ref(_) => return Ok(value.clone()),
            _ => return Err(self.invalid(value)),
        };
        if !shape.properties.is_empty() {
            return parse_object(&shape.properties, value, ctx, data);
        }
        let mut out = BTreeMap::new();
        for (k, v) in map {
            let key = match &shape.key {
                Some(kp) => kp.parse(&Value::String(k.clone()), ctx, data)?.to_string(),
                None => k.clone(),
            };
            let val = match &shape.value {
                Some(vp) => vp.parse(v, ctx, data)?,
                None => v.clone(),
            };
            out.insert(key, val);
        }
        Ok(Value::Map(out))
    }
}

fn parse_object(
    props: &Properties,
    value: &Value,
    ctx: &DynamicValueContext<'_>,
    data: &DynamicValueData,
) -> Result<Value, PropertyError> {
    let Value::Map(map) = value else {
        return Err(PropertyError::Invalid {
            path: props.values().next().map(|p| p.details.path.clone()).unwrap_or_default(),
            expected: "map",
            found: value.kind_name().to_owned(),
        });
    };
    let mut out = BTreeMap::new();
    let mut errs = Vec::new();
    for (name, prop) in props {
        let Some(v) = map.get(name) else { continue };
        match prop.parse(v, ctx, data) {
            Ok(parsed) => {
                out.insert(name.clone(), parsed);
            }
            Err(e) => errs.push(e),
        }
    }
    match errs.len() {
        0 => Ok(Value::Map(out)),
        1 => Err(errs.remove(0)),
        _ => Err(PropertyError::Multiple(errs)),
    }
}

fn parse_any(value: &Value, ctx: &DynamicValueContext<'_>, data: &DynamicValueData) -> Result<Value, PropertyError> {
    match value {
        Value::String(s) => {
            let rendered: String = ctx.execute_decode(s, data)?;
            if let Ok(id) = ResourceId::parse(&rendered) {
                if !id.is_zero() {
                    return Ok(Value::Id(id));
                }
            }
            if let Some(r) = as_property_ref(&rendered) {
                return Ok(Value::Ref(r));
            }
            Ok(Value::String(rendered))
        }
        Value::Map(m) => {
            let mut out = BTreeMap::new();
            for (k, v) in m {
                out.insert(k.clone(), parse_any(v, ctx, data)?);
            }
            Ok(Value::Map(out))
        }
        Value::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|v| parse_any(v, ctx, data))
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn as_property_ref(text: &str) -> Option<PropertyRef> {
    if !text.contains('#') {
        return None;
    }
    PropertyRef::parse(text).ok().filter(|r| !r.resource.is_zero())
}

fn map_to_ref(m: &BTreeMap<String, Value>) -> Option<PropertyRef> {
    let resource = match m.get("resource")? {
        Value::Id(id) => id.clone(),
        Value::String(s) => ResourceId::parse(s).ok()?,
        _ => return None,
    };
    let property = m.get("property")?.as_str()?;
    Some(PropertyRef::new(resource, property))
}

fn map_to_id(m: &BTreeMap<String, Value>) -> Option<ResourceId> {
    let text = |key: &str| m.get(key).and_then(Value::as_str).unwrap_or_default().to_owned();
    let id = ResourceId {
        provider: text("provider"),
        kind: text("type"),
        namespace: text("namespace"),
        name: text("name"),
    };
    (!id.provider.is_empty() && !id.kind.is_empty()).then_some(id)
}

/// Boolean spellings accepted from rendered templates.
pub(crate) fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use proptest::prelude::*;

    use super::*;
    use crate::graph::ResourceGraph;
    use crate::kb::KnowledgeBase;

    fn prop(ty: &str) -> Property {
        Property::from_type("p", "p", ty).unwrap()
    }

    fn parse(ty: &str, v: &Value) -> Result<Value, PropertyError> {
        let graph = ResourceGraph::new();
        let kb = KnowledgeBase::new();
        let ctx = DynamicValueContext::new(&graph, &kb);
        let data = DynamicValueData::for_resource(ResourceId::parse("aws:lambda:fn").unwrap());
        prop(ty).parse(v, &ctx, &data)
    }

    #[test]
    fn primitives_accept_templates() {
        assert_eq!(parse("string", &Value::from("{{ .Self.Name }}-x")).unwrap(), Value::from("fn-x"));
        assert_eq!(parse("int", &Value::from("{{ add 1 2 }}")).unwrap(), Value::Int(3));
        assert_eq!(parse("float", &Value::Int(2)).unwrap(), Value::Float(2.0));
        assert_eq!(parse("bool", &Value::from("true")).unwrap(), Value::Bool(true));
        assert!(parse("int", &Value::from("seven")).is_err());
        assert!(parse("bool", &Value::Int(1)).is_err());
    }

    #[test]
    fn property_refs_pass_through() {
        let v = parse("string", &Value::from("aws:vpc:v#CidrBlock")).unwrap();
        assert!(matches!(v, Value::Ref(ref r) if r.property == "CidrBlock"));
        let v = parse("int", &Value::from("aws:vpc:v#Port")).unwrap();
        assert!(matches!(v, Value::Ref(_)));
    }

    #[test]
    fn resources_check_allowed_types() {
        assert_eq!(
            parse("resource(aws:vpc)", &Value::from("aws:vpc:main")).unwrap(),
            Value::Id(ResourceId::parse("aws:vpc:main").unwrap())
        );
        assert!(matches!(
            parse("resource(aws:vpc)", &Value::from("aws:subnet:s")),
            Err(PropertyError::ResourceNotAllowed { .. })
        ));
        assert!(matches!(
            parse("resource", &Value::from("")),
            Err(PropertyError::Template(TemplateError::ZeroSelector(_)))
        ));
        let as_map: BTreeMap<String, Value> = [
            ("provider".to_owned(), Value::from("aws")),
            ("type".to_owned(), Value::from("vpc")),
            ("name".to_owned(), Value::from("m")),
        ]
        .into();
        assert_eq!(
            parse("resource", &Value::Map(as_map)).unwrap(),
            Value::Id(ResourceId::parse("aws:vpc:m").unwrap())
        );
    }

    #[test]
    fn collections_parse_elements() {
        let v = parse("set(int)", &Value::List(vec![Value::from("1"), Value::Int(1), Value::Int(2)])).unwrap();
        assert_eq!(v, Value::List(vec![Value::Int(1), Value::Int(2)]));
        let v = parse("list(string)", &Value::from(r#"["a","b"]"#)).unwrap();
        assert_eq!(v, Value::List(vec![Value::from("a"), Value::from("b")]));
        let m: BTreeMap<String, Value> = [("k".to_owned(), Value::from("5"))].into();
        assert_eq!(
            parse("map(string,int)", &Value::Map(m)).unwrap(),
            Value::Map([("k".to_owned(), Value::Int(5))].into())
        );
    }

    #[test]
    fn any_recognizes_ids() {
        assert_eq!(
            parse("any", &Value::from("aws:vpc:v")).unwrap(),
            Value::Id(ResourceId::parse("aws:vpc:v").unwrap())
        );
        assert_eq!(parse("any", &Value::from("plain")).unwrap(), Value::from("plain"));
        assert_eq!(parse("any", &Value::Int(4)).unwrap(), Value::Int(4));
    }

    #[test]
    fn null_stays_null() {
        for ty in ["string", "int", "resource", "list(string)", "map", "any"] {
            assert_eq!(parse(ty, &Value::Null).unwrap(), Value::Null);
        }
    }

    proptest! {
        #[test]
        fn zero_value_round_trips(idx in 0usize..5) {
            let ty = ["string", "int", "float", "bool", "resource"][idx];
            let p = prop(ty);
            prop_assert_eq!(parse(ty, &p.zero_value()).unwrap(), p.zero_value());
        }

        #[test]
        fn ints_round_trip_through_text(n in any::<i64>()) {
            prop_assert_eq!(parse("int", &Value::from(n.to_string())).unwrap(), Value::Int(n));
        }
    }
}
