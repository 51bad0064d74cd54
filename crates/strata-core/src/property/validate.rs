// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Value validation and sanitization.
use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use super::{Collection, MapShape, Properties, Property, PropertyError, PropertyKind};
use crate::ident::ResourceId;
use crate::template::funcs::Sanitizer;
use crate::value::Value;

/// A value is acceptable only after sanitizing; `sanitized` is the value to
/// store instead of `input`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("value '{input}' for '{path}' must be sanitized to '{sanitized}'")]
pub struct SanitizeError {
    /// Property path.
    pub path: String,
    /// The value as given.
    pub input: Value,
    /// The corrected value.
    pub sanitized: Value,
}

impl Property {
    /// Checks `value` against the property's constraints.
    ///
    /// A string whose sanitize template changes it fails with
    /// [`PropertyError::Sanitize`], carrying the corrected value; collections
    /// report their corrected form when any element needed sanitizing.
    pub fn validate(&self, resource: &ResourceId, value: &Value) -> Result<(), PropertyError> {
        if value.is_null() {
            if self.details.required && !self.details.deploy_time {
                return Err(PropertyError::Required {
                    path: self.details.path.clone(),
                    resource: resource.clone(),
                });
            }
            return Ok(());
        }
        if matches!(value, Value::Ref(_)) {
            return Ok(());
        }
        match (&self.kind, value) {
            (PropertyKind::String { allowed_values, sanitize }, Value::String(s)) => {
                if !allowed_values.is_empty() && !allowed_values.contains(s) {
                    return Err(PropertyError::NotAllowed {
                        path: self.details.path.clone(),
                        value: s.clone(),
                        allowed: allowed_values.join(", "),
                    });
                }
                if let Some(t) = sanitize {
                    let out = t.execute(&Sanitizer, value)?.trim().to_owned();
                    if out != *s {
                        return Err(self.needs_sanitizing(value, Value::String(out)));
                    }
                }
                Ok(())
            }
            (PropertyKind::Int { min, max }, Value::Int(i)) => {
                self.check_bound(min.is_some_and(|m| *i < m), i, || format!("min {}", min.unwrap_or_default()))?;
                self.check_bound(max.is_some_and(|m| *i > m), i, || format!("max {}", max.unwrap_or_default()))
            }
            (PropertyKind::Float { min, max }, Value::Float(_) | Value::Int(_)) => {
                let f = match value {
                    Value::Float(f) => *f,
                    #[allow(clippy::cast_precision_loss)]
                    Value::Int(i) => *i as f64,
                    _ => 0.0,
                };
                self.check_bound(min.is_some_and(|m| f < m), &f, || format!("min {}", min.unwrap_or_default()))?;
                self.check_bound(max.is_some_and(|m| f > m), &f, || format!("max {}", max.unwrap_or_default()))
            }
            (PropertyKind::Bool, Value::Bool(_)) | (PropertyKind::Any, _) => Ok(()),
            (PropertyKind::Resource { allowed_types }, Value::Id(id)) => {
                if allowed_types.is_empty() || id.is_zero() || allowed_types.iter().any(|a| a.matches(id)) {
                    Ok(())
                } else {
                    Err(PropertyError::ResourceNotAllowed {
                        path: self.details.path.clone(),
                        value: id.clone(),
                        allowed: allowed_types.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
                    })
                }
            }
            (PropertyKind::List(c) | PropertyKind::Set(c), Value::List(items)) => {
                self.validate_list(resource, c, value, items)
            }
            (PropertyKind::Map(m), Value::Map(map)) => self.validate_map(resource, m, value, map),
            _ => Err(PropertyError::Invalid {
                path: self.details.path.clone(),
                expected: self.expected_kind(),
                found: value.kind_name().to_owned(),
            }),
        }
    }

    /// Validates and returns the value to store: the sanitized form when
    /// sanitizing was needed, the input otherwise.
    pub fn validate_and_sanitize(&self, resource: &ResourceId, value: &Value) -> Result<Value, PropertyError> {
        match self.validate(resource, value) {
            Ok(()) => Ok(value.clone()),
            Err(PropertyError::Sanitize(e)) => Ok(e.sanitized),
            Err(e) => Err(e),
        }
    }

    fn needs_sanitizing(&self, input: &Value, sanitized: Value) -> PropertyError {
        PropertyError::Sanitize(SanitizeError {
            path: self.details.path.clone(),
            input: input.clone(),
            sanitized,
        })
    }

    fn check_bound(&self, violated: bool, value: &dyn fmt::Display, bound: impl FnOnce() -> String) -> Result<(), PropertyError> {
        if violated {
            return Err(PropertyError::OutOfBounds {
                path: self.details.path.clone(),
                value: value.to_string(),
                bound: bound(),
            });
        }
        Ok(())
    }

    fn check_length(&self, len: usize, min: Option<usize>, max: Option<usize>) -> Result<(), PropertyError> {
        self.check_bound(min.is_some_and(|m| len < m), &len, || {
            format!("min length {}", min.unwrap_or_default())
        })?;
        self.check_bound(max.is_some_and(|m| len > m), &len, || {
            format!("max length {}", max.unwrap_or_default())
        })
    }

    fn validate_list(
        &self,
        resource: &ResourceId,
        shape: &Collection,
        value: &Value,
        items: &[Value],
    ) -> Result<(), PropertyError> {
        self.check_length(items.len(), shape.min_length, shape.max_length)?;
        let mut changed = false;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let result = match (&shape.item, shape.properties.is_empty()) {
                (Some(p), _) => p.validate(resource, item),
                (None, false) => validate_object(resource, &shape.properties, item),
                (None, true) => Ok(()),
            };
            out.push(sanitized_or(result, item, &mut changed)?);
        }
        if changed {
            return Err(self.needs_sanitizing(value, Value::List(out)));
        }
        Ok(())
    }

    fn validate_map(
        &self,
        resource: &ResourceId,
        shape: &MapShape,
        value: &Value,
        map: &BTreeMap<String, Value>,
    ) -> Result<(), PropertyError> {
        self.check_length(map.len(), shape.min_length, shape.max_length)?;
        if !shape.properties.is_empty() {
            return match validate_object(resource, &shape.properties, value) {
                Err(PropertyError::Sanitize(e)) => Err(self.needs_sanitizing(value, e.sanitized)),
                other => other,
            };
        }
        let mut changed = false;
        let mut out = BTreeMap::new();
        for (k, v) in map {
            let key_value = Value::String(k.clone());
            let key = match &shape.key {
                Some(kp) => sanitized_or(kp.validate(resource, &key_value), &key_value, &mut changed)?,
                None => key_value,
            };
            let val = match &shape.value {
                Some(vp) => sanitized_or(vp.validate(resource, v), v, &mut changed)?,
                None => v.clone(),
            };
            out.insert(key.to_string(), val);
        }
        if changed {
            return Err(self.needs_sanitizing(value, Value::Map(out)));
        }
        Ok(())
    }
}

fn sanitized_or(result: Result<(), PropertyError>, original: &Value, changed: &mut bool) -> Result<Value, PropertyError> {
    match result {
        Ok(()) => Ok(original.clone()),
        Err(PropertyError::Sanitize(e)) => {
            *changed = true;
            Ok(e.sanitized)
        }
        Err(e) => Err(e),
    }
}

fn validate_object(resource: &ResourceId, props: &Properties, value: &Value) -> Result<(), PropertyError> {
    let Value::Map(map) = value else {
        return Err(PropertyError::Invalid {
            path: props.values().next().map(|p| p.details.path.clone()).unwrap_or_default(),
            expected: "map",
            found: value.kind_name().to_owned(),
        });
    };
    let mut changed = false;
    let mut out = map.clone();
    for (name, prop) in props {
        let v = map.get(name).unwrap_or(&Value::Null);
        let fixed = sanitized_or(prop.validate(resource, v), v, &mut changed)?;
        if !fixed.is_null() {
            out.insert(name.clone(), fixed);
        }
    }
    if changed {
        return Err(PropertyError::Sanitize(SanitizeError {
            path: String::new(),
            input: value.clone(),
            sanitized: Value::Map(out),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::template::Template;

    fn rid() -> ResourceId {
        ResourceId::parse("aws:thing:t").unwrap()
    }

    fn sanitized_string() -> Property {
        let mut p = Property::from_type("name", "name", "string").unwrap();
        p.kind = PropertyKind::String {
            allowed_values: Vec::new(),
            sanitize: Some(Template::parse("{{ . | lower }}").unwrap()),
        };
        p
    }

    #[test]
    fn required_unless_deploy_time() {
        let mut p = Property::from_type("arn", "arn", "string").unwrap();
        p.details.required = true;
        assert!(matches!(p.validate(&rid(), &Value::Null), Err(PropertyError::Required { .. })));
        p.details.deploy_time = true;
        assert!(p.validate(&rid(), &Value::Null).is_ok());
    }

    #[test]
    fn bounds_and_enums() {
        let mut p = Property::from_type("n", "n", "int").unwrap();
        p.kind = PropertyKind::Int { min: Some(1), max: Some(3) };
        assert!(p.validate(&rid(), &Value::Int(2)).is_ok());
        assert!(matches!(p.validate(&rid(), &Value::Int(4)), Err(PropertyError::OutOfBounds { .. })));
        assert!(matches!(p.validate(&rid(), &Value::from("2")), Err(PropertyError::Invalid { .. })));

        let mut s = Property::from_type("s", "s", "string").unwrap();
        s.kind = PropertyKind::String {
            allowed_values: vec!["a".into(), "b".into()],
            sanitize: None,
        };
        assert!(s.validate(&rid(), &Value::from("a")).is_ok());
        assert!(matches!(s.validate(&rid(), &Value::from("c")), Err(PropertyError::NotAllowed { .. })));
    }

    #[test]
    fn sanitize_returns_corrected_value() {
        let p = sanitized_string();
        match p.validate(&rid(), &Value::from("MyName")) {
            Err(PropertyError::Sanitize(e)) => assert_eq!(e.sanitized, Value::from("myname")),
            other => panic!("expected sanitize error, got {other:?}"),
        }
        assert_eq!(p.validate_and_sanitize(&rid(), &Value::from("MyName")).unwrap(), Value::from("myname"));
        assert_eq!(p.validate_and_sanitize(&rid(), &Value::from("ok")).unwrap(), Value::from("ok"));
    }

    #[test]
    fn sanitize_inside_collections() {
        let mut list = Property::from_type("names", "names", "list").unwrap();
        if let PropertyKind::List(c) = &mut list.kind {
            c.item = Some(Box::new(sanitized_string()));
        }
        let v = Value::List(vec![Value::from("A"), Value::from("b")]);
        assert_eq!(
            list.validate_and_sanitize(&rid(), &v).unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
    }

    #[test]
    fn list_length_bounds() {
        let mut list = Property::from_type("l", "l", "list(int)").unwrap();
        if let PropertyKind::List(c) = &mut list.kind {
            c.max_length = Some(1);
        }
        assert!(matches!(
            list.validate(&rid(), &Value::List(vec![Value::Int(1), Value::Int(2)])),
            Err(PropertyError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn resource_types() {
        let p = Property::from_type("vpc", "vpc", "resource(aws:vpc)").unwrap();
        assert!(p.validate(&rid(), &Value::Id(ResourceId::parse("aws:vpc:v").unwrap())).is_ok());
        assert!(p.validate(&rid(), &Value::Id(ResourceId::parse("aws:subnet:s").unwrap())).is_err());
    }
}
