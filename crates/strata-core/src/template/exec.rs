// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Template evaluation.
use std::cmp::Ordering;

use super::{Command, Node, Operand, Pipeline, TemplateError};
use crate::value::Value;

/// Function provider for template execution.
///
/// Returning `None` means "not mine"; the executor then tries the builtins.
pub trait Functions {
    /// Invokes `name` with already-evaluated arguments.
    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, TemplateError>>;
}

struct State<'a> {
    funcs: &'a dyn Functions,
    vars: Vec<(String, Value)>,
    out: String,
}

pub(super) fn execute(nodes: &[Node], funcs: &dyn Functions, data: &Value) -> Result<String, TemplateError> {
    let mut st = State {
        funcs,
        vars: vec![(String::new(), data.clone())],
        out: String::new(),
    };
    st.walk(nodes, data)?;
    Ok(st.out)
}

impl State<'_> {
    fn walk(&mut self, nodes: &[Node], dot: &Value) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(t) => self.out.push_str(t),
                Node::Action(p) => {
                    let v = self.pipeline(p, dot)?;
                    if p.vars.is_empty() {
                        self.out.push_str(&v.to_string());
                    }
                }
                Node::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    let mark = self.vars.len();
                    let branch = if self.pipeline(cond, dot)?.truthy() {
                        then
                    } else {
                        otherwise
                    };
                    self.walk(branch, dot)?;
                    self.vars.truncate(mark);
                }
                Node::Range {
                    over,
                    body,
                    otherwise,
                } => self.range(over, body, otherwise, dot)?,
            }
        }
        Ok(())
    }

    fn range(&mut self, over: &Pipeline, body: &[Node], otherwise: &[Node], dot: &Value) -> Result<(), TemplateError> {
        let mut value = None;
        for cmd in &over.commands {
            value = Some(self.command(cmd, dot, value)?);
        }
        let entries: Vec<(Value, Value)> = match value.unwrap_or_default() {
            Value::Null => Vec::new(),
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i64::try_from(i).unwrap_or(i64::MAX)), v))
                .collect(),
            Value::Map(m) => m.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
            other => {
                return Err(TemplateError::Exec(format!(
                    "range can't iterate over {}",
                    other.kind_name()
                )))
            }
        };
        if entries.is_empty() {
            return self.walk(otherwise, dot);
        }
        for (key, elem) in entries {
            let mark = self.vars.len();
            match over.vars.as_slice() {
                [] => {}
                [e] => self.vars.push((e.clone(), elem.clone())),
                [k, e, ..] => {
                    self.vars.push((k.clone(), key));
                    self.vars.push((e.clone(), elem.clone()));
                }
            }
            self.walk(body, &elem)?;
            self.vars.truncate(mark);
        }
        Ok(())
    }

    fn pipeline(&mut self, p: &Pipeline, dot: &Value) -> Result<Value, TemplateError> {
        let mut value = None;
        for cmd in &p.commands {
            value = Some(self.command(cmd, dot, value)?);
        }
        let value = value.unwrap_or_default();
        if let Some(name) = p.vars.first() {
            if p.declare {
                self.vars.push((name.clone(), value.clone()));
            } else {
                let slot = self
                    .vars
                    .iter_mut()
                    .rev()
                    .find(|(n, _)| n == name)
                    .ok_or_else(|| TemplateError::Exec(format!("undefined variable ${name}")))?;
                slot.1 = value.clone();
            }
        }
        Ok(value)
    }

    fn command(&mut self, cmd: &Command, dot: &Value, piped: Option<Value>) -> Result<Value, TemplateError> {
        let Some((first, rest)) = cmd.operands.split_first() else {
            return Err(TemplateError::Exec("empty command".to_owned()));
        };
        if let Operand::Func(name) = first {
            let mut args = Vec::with_capacity(rest.len() + 1);
            for op in rest {
                args.push(self.operand(op, dot)?);
            }
            if let Some(p) = piped {
                args.push(p);
            }
            return self.call(name, &args);
        }
        if !rest.is_empty() || piped.is_some() {
            return Err(TemplateError::Exec(
                "can't give argument to non-function".to_owned(),
            ));
        }
        self.operand(first, dot)
    }

    fn operand(&mut self, op: &Operand, dot: &Value) -> Result<Value, TemplateError> {
        match op {
            Operand::Literal(v) => Ok(v.clone()),
            Operand::Dot(fields) => fields_of(dot.clone(), fields),
            Operand::Var(name, fields) => {
                let v = self
                    .vars
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| TemplateError::Exec(format!("undefined variable ${name}")))?;
                fields_of(v, fields)
            }
            Operand::Func(name) => self.call(name, &[]),
            Operand::Sub(p, fields) => {
                let v = self.pipeline(p, dot)?;
                fields_of(v, fields)
            }
        }
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        if let Some(result) = self.funcs.call(name, args) {
            return result;
        }
        builtin(name, args).unwrap_or_else(|| Err(TemplateError::UnknownFunction(name.to_owned())))
    }
}

fn fields_of(mut value: Value, fields: &[String]) -> Result<Value, TemplateError> {
    for f in fields {
        value = field(&value, f)?;
    }
    Ok(value)
}

/// Looks up `name` on a value: map keys, id parts, property-ref parts.
pub(crate) fn field(value: &Value, name: &str) -> Result<Value, TemplateError> {
    match value {
        Value::Map(m) => Ok(m.get(name).cloned().unwrap_or_default()),
        Value::Id(id) => match name {
            "Provider" => Ok(Value::from(id.provider.clone())),
            "Type" => Ok(Value::from(id.kind.clone())),
            "Namespace" => Ok(Value::from(id.namespace.clone())),
            "Name" => Ok(Value::from(id.name.clone())),
            "QualifiedTypeName" => Ok(Value::from(id.qualified_type_name())),
            _ => Err(TemplateError::Exec(format!(
                "can't evaluate field {name} in resource id"
            ))),
        },
        Value::Ref(r) => match name {
            "Resource" => Ok(Value::Id(r.resource.clone())),
            "Property" => Ok(Value::from(r.property.clone())),
            _ => Err(TemplateError::Exec(format!(
                "can't evaluate field {name} in property ref"
            ))),
        },
        other => Err(TemplateError::Exec(format!(
            "can't evaluate field {name} in type {}",
            other.kind_name()
        ))),
    }
}

/// Equality that tolerates int/float mixing and string/id comparisons.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
            #[allow(clippy::cast_precision_loss)]
            let x = *x as f64;
            (x - y).abs() < f64::EPSILON
        }
        (Value::String(s), other @ (Value::Id(_) | Value::Ref(_)))
        | (other @ (Value::Id(_) | Value::Ref(_)), Value::String(s)) => other.to_string() == *s,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, TemplateError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Float(_) | Value::Int(_), Value::Float(_) | Value::Int(_)) => {
            let (x, y) = (as_f64(a), as_f64(b));
            x.partial_cmp(&y)
                .ok_or_else(|| TemplateError::Exec("incomparable floats".to_owned()))
        }
        _ => Err(TemplateError::Exec(format!(
            "incompatible types for comparison: {} and {}",
            a.kind_name(),
            b.kind_name()
        ))),
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        #[allow(clippy::cast_precision_loss)]
        Value::Int(i) => *i as f64,
        Value::Float(x) => *x,
        _ => 0.0,
    }
}

fn builtin(name: &str, args: &[Value]) -> Option<Result<Value, TemplateError>> {
    let need = |n: usize| -> Result<(), TemplateError> {
        if args.len() < n {
            Err(TemplateError::func(name, format!("wrong number of args: want {n}, got {}", args.len())))
        } else {
            Ok(())
        }
    };
    let result = match name {
        "eq" => need(2).map(|()| Value::Bool(args[1..].iter().any(|b| loose_eq(&args[0], b)))),
        "ne" => need(2).map(|()| Value::Bool(!loose_eq(&args[0], &args[1]))),
        "lt" | "le" | "gt" | "ge" => need(2).and_then(|()| {
            let ord = compare(&args[0], &args[1])?;
            Ok(Value::Bool(match name {
                "lt" => ord == Ordering::Less,
                "le" => ord != Ordering::Greater,
                "gt" => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }),
        "not" => need(1).map(|()| Value::Bool(!args[0].truthy())),
        "and" => need(1).map(|()| {
            args.iter()
                .find(|a| !a.truthy())
                .unwrap_or(&args[args.len() - 1])
                .clone()
        }),
        "or" => need(1).map(|()| {
            args.iter()
                .find(|a| a.truthy())
                .unwrap_or(&args[args.len() - 1])
                .clone()
        }),
        "len" => need(1).and_then(|()| {
            let n = match &args[0] {
                Value::String(s) => s.len(),
                Value::List(l) => l.len(),
                Value::Map(m) => m.len(),
                Value::Null => 0,
                other => {
                    return Err(TemplateError::func(
                        name,
                        format!("len of {}", other.kind_name()),
                    ))
                }
            };
            Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
        }),
        "index" => need(2).and_then(|()| match (&args[0], &args[1]) {
            (Value::List(l), Value::Int(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| l.get(i).cloned())
                .ok_or_else(|| TemplateError::func(name, format!("index {i} out of range"))),
            (Value::Map(m), key) => Ok(m.get(&key.to_string()).cloned().unwrap_or_default()),
            (c, _) => Err(TemplateError::func(
                name,
                format!("can't index item of type {}", c.kind_name()),
            )),
        }),
        "print" => Ok(Value::String(args.iter().map(ToString::to_string).collect())),
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::ResourceId;

    #[test]
    fn id_fields_resolve() {
        let id = Value::Id(ResourceId::new("aws", "vpc", "main").with_namespace("n"));
        assert_eq!(field(&id, "Type").ok(), Some(Value::from("vpc")));
        assert_eq!(field(&id, "QualifiedTypeName").ok(), Some(Value::from("aws:vpc")));
        assert!(field(&id, "Bogus").is_err());
        assert!(field(&Value::Int(1), "X").is_err());
    }

    #[test]
    fn loose_equality_crosses_kinds() {
        let id = Value::Id(ResourceId::new("aws", "vpc", "main"));
        assert!(loose_eq(&id, &Value::from("aws:vpc:main")));
        assert!(loose_eq(&Value::Int(2), &Value::Float(2.0)));
        assert!(!loose_eq(&Value::Int(2), &Value::from("2")));
    }

    #[test]
    fn builtins_compare_and_index() {
        assert_eq!(
            builtin("lt", &[Value::Int(1), Value::Int(2)]).and_then(Result::ok),
            Some(Value::Bool(true))
        );
        let list = Value::List(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(
            builtin("index", &[list, Value::Int(1)]).and_then(Result::ok),
            Some(Value::from("b"))
        );
        assert!(builtin("nope", &[]).is_none());
    }
}
