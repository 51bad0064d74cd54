// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph-independent template functions and argument coercions.
use std::collections::BTreeMap;

use regex::Regex;

use super::{Functions, TemplateError};
use crate::ident::{sanitize_name, ResourceId};
use crate::value::Value;

/// Returns argument `i` or an arity error.
pub fn arg<'a>(name: &str, args: &'a [Value], i: usize) -> Result<&'a Value, TemplateError> {
    args.get(i).ok_or_else(|| {
        TemplateError::func(name, format!("wrong number of args: want at least {}, got {}", i + 1, args.len()))
    })
}

/// Argument `i` as text. Ids and numbers render to their text form.
pub fn str_arg(name: &str, args: &[Value], i: usize) -> Result<String, TemplateError> {
    match arg(name, args, i)? {
        Value::String(s) => Ok(s.clone()),
        v @ (Value::Id(_) | Value::Ref(_) | Value::Int(_) | Value::Float(_) | Value::Bool(_)) => Ok(v.to_string()),
        other => Err(TemplateError::func(
            name,
            format!("argument {i}: expected string, got {}", other.kind_name()),
        )),
    }
}

/// Argument `i` as an integer; numeric strings are accepted.
pub fn int_arg(name: &str, args: &[Value], i: usize) -> Result<i64, TemplateError> {
    match arg(name, args, i)? {
        Value::Int(n) => Ok(*n),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| TemplateError::func(name, format!("argument {i}: '{s}' is not an integer"))),
        other => Err(TemplateError::func(
            name,
            format!("argument {i}: expected int, got {}", other.kind_name()),
        )),
    }
}

/// Argument `i` as a list of strings; a JSON array string is decoded.
pub fn str_list_arg(name: &str, args: &[Value], i: usize) -> Result<Vec<String>, TemplateError> {
    match arg(name, args, i)? {
        Value::List(items) => Ok(items.iter().map(ToString::to_string).collect()),
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.trim_start().starts_with('[') => serde_json::from_str(s)
            .map_err(|e| TemplateError::func(name, format!("argument {i}: {e}"))),
        other => Err(TemplateError::func(
            name,
            format!("argument {i}: expected list, got {}", other.kind_name()),
        )),
    }
}

/// Converts a template argument into a resource id.
pub fn to_id(name: &str, v: &Value) -> Result<ResourceId, TemplateError> {
    match v {
        Value::Id(id) => Ok(id.clone()),
        Value::Ref(r) => Ok(r.resource.clone()),
        Value::String(s) => ResourceId::parse(s).map_err(|e| TemplateError::func(name, e.to_string())),
        other => Err(TemplateError::func(
            name,
            format!("invalid argument type {}", other.kind_name()),
        )),
    }
}

/// Argument `i` as a resource id.
pub fn id_arg(name: &str, args: &[Value], i: usize) -> Result<ResourceId, TemplateError> {
    to_id(name, arg(name, args, i)?)
}

/// Argument `i` as a list of resource ids; a single id becomes a one-element list.
pub fn id_list_arg(name: &str, args: &[Value], i: usize) -> Result<Vec<ResourceId>, TemplateError> {
    match arg(name, args, i)? {
        Value::List(items) => items.iter().map(|v| to_id(name, v)).collect(),
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.trim_start().starts_with('[') => {
            let texts: Vec<String> =
                serde_json::from_str(s).map_err(|e| TemplateError::func(name, e.to_string()))?;
            texts
                .iter()
                .map(|t| ResourceId::parse(t).map_err(|e| TemplateError::func(name, e.to_string())))
                .collect()
        }
        other => Ok(vec![to_id(name, other)?]),
    }
}

fn regex(name: &str, pattern: &str) -> Result<Regex, TemplateError> {
    Regex::new(pattern).map_err(|e| TemplateError::func(name, e.to_string()))
}

fn strings(list: Vec<String>) -> Value {
    Value::List(list.into_iter().map(Value::String).collect())
}

/// Graph-independent helpers shared by every template context.
///
/// Returns `None` when `name` is not one of them.
pub fn call_util(name: &str, args: &[Value]) -> Option<Result<Value, TemplateError>> {
    let f: fn(&str, &[Value]) -> Result<Value, TemplateError> = match name {
        "split" => split,
        "join" => join,
        "basename" => basename,
        "firstId" => first_id,
        "filterIds" => filter_ids,
        "filterMatch" => filter_match,
        "mapString" => map_string,
        "zipToMap" => zip_to_map,
        "keysToMapWithDefault" => keys_to_map_with_default,
        "replace" => replace,
        "hasSuffix" => |n, a| Ok(Value::Bool(str_arg(n, a, 0)?.ends_with(&str_arg(n, a, 1)?))),
        "hasPrefix" => |n, a| Ok(Value::Bool(str_arg(n, a, 0)?.starts_with(&str_arg(n, a, 1)?))),
        "toLower" => |n, a| Ok(Value::String(str_arg(n, a, 0)?.to_lowercase())),
        "toUpper" => |n, a| Ok(Value::String(str_arg(n, a, 0)?.to_uppercase())),
        "sanitizeName" => |n, a| Ok(Value::String(sanitize_name(&str_arg(n, a, 0)?))),
        "add" => add,
        "sub" => sub,
        "last" => last,
        "toJson" => |n, a| Ok(Value::String(arg(n, a, 0)?.to_json().to_string())),
        _ => return None,
    };
    Some(f(name, args))
}

fn split(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let s = str_arg(name, args, 0)?;
    let sep = str_arg(name, args, 1)?;
    Ok(strings(s.split(sep.as_str()).map(str::to_owned).collect()))
}

fn join(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let items = str_list_arg(name, args, 0)?;
    let sep = str_arg(name, args, 1)?;
    Ok(Value::String(items.join(&sep)))
}

fn basename(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let s = str_arg(name, args, 0)?;
    let trimmed = s.trim_end_matches('/');
    Ok(Value::String(
        trimmed.rsplit('/').next().unwrap_or(trimmed).to_owned(),
    ))
}

fn first_id(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let sel = id_arg(name, args, 0)?;
    let ids = id_list_arg(name, args, 1)?;
    if ids.is_empty() {
        return Err(TemplateError::func(name, "no ids"));
    }
    ids.into_iter()
        .find(|id| sel.matches(id))
        .map(Value::Id)
        .ok_or_else(|| TemplateError::func(name, "no ids match selector"))
}

fn filter_ids(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let sel = id_arg(name, args, 0)?;
    let ids = id_list_arg(name, args, 1)?;
    Ok(Value::from(
        ids.into_iter().filter(|id| sel.matches(id)).collect::<Vec<_>>(),
    ))
}

fn filter_match(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let re = regex(name, &str_arg(name, args, 0)?)?;
    let values = str_list_arg(name, args, 1)?;
    Ok(strings(values.into_iter().filter(|v| re.is_match(v)).collect()))
}

fn map_string(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let re = regex(name, &str_arg(name, args, 0)?)?;
    let replacement = str_arg(name, args, 1)?;
    let values = str_list_arg(name, args, 2)?;
    Ok(strings(
        values
            .iter()
            .map(|v| re.replace_all(v, replacement.as_str()).into_owned())
            .collect(),
    ))
}

fn zip_to_map(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let keys = str_list_arg(name, args, 0)?;
    let Value::List(values) = arg(name, args, 1)? else {
        return Err(TemplateError::func(name, "values is not a list"));
    };
    if keys.len() != values.len() {
        return Err(TemplateError::func(
            name,
            format!("key length ({}) != value length ({})", keys.len(), values.len()),
        ));
    }
    Ok(Value::Map(keys.into_iter().zip(values.iter().cloned()).collect()))
}

fn keys_to_map_with_default(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let default = arg(name, args, 0)?.clone();
    let keys = str_list_arg(name, args, 1)?;
    Ok(Value::Map(
        keys.into_iter()
            .map(|k| (k, default.clone()))
            .collect::<BTreeMap<_, _>>(),
    ))
}

fn replace(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let re = regex(name, &str_arg(name, args, 0)?)?;
    let replacement = str_arg(name, args, 1)?;
    let value = str_arg(name, args, 2)?;
    Ok(Value::String(
        re.replace_all(&value, replacement.as_str()).into_owned(),
    ))
}

fn add(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let mut total: i64 = 0;
    for i in 0..args.len() {
        total = total
            .checked_add(int_arg(name, args, i)?)
            .ok_or_else(|| TemplateError::func(name, "integer overflow"))?;
    }
    Ok(Value::Int(total))
}

fn sub(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    if args.is_empty() {
        return Ok(Value::Int(0));
    }
    let mut total = int_arg(name, args, 0)?;
    for i in 1..args.len() {
        total = total
            .checked_sub(int_arg(name, args, i)?)
            .ok_or_else(|| TemplateError::func(name, "integer overflow"))?;
    }
    Ok(Value::Int(total))
}

fn last(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    match arg(name, args, 0)? {
        Value::List(l) => l
            .last()
            .cloned()
            .ok_or_else(|| TemplateError::func(name, "list is empty")),
        other => Err(TemplateError::func(
            name,
            format!("list is not a list, is {}", other.kind_name()),
        )),
    }
}

fn length(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let min = usize::try_from(int_arg(name, args, 0)?).unwrap_or(0);
    let max = usize::try_from(int_arg(name, args, 1)?).unwrap_or(0);
    let value = str_arg(name, args, 2)?;
    Ok(Value::String(fit_length(&value, min, max)))
}

/// Function set available to `sanitize` and `sanitize_name` templates, which
/// receive the raw string as `.`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sanitizer;

impl Functions for Sanitizer {
    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, TemplateError>> {
        match name {
            "length" => Some(length(name, args)),
            "lower" => Some(str_arg(name, args, 0).map(|s| Value::String(s.to_lowercase()))),
            "upper" => Some(str_arg(name, args, 0).map(|s| Value::String(s.to_uppercase()))),
            _ => call_util(name, args),
        }
    }
}

/// Pads with `0` up to `min`, or truncates to `max` keeping a blake3 digest
/// suffix so distinct long names stay distinct. Lengths count chars and the
/// result never exceeds `max`.
pub fn fit_length(value: &str, min: usize, max: usize) -> String {
    let len = value.chars().count();
    if len < min {
        return format!("{value}{}", "0".repeat(min - len));
    }
    if len > max {
        let keep = max.saturating_sub(8);
        let base: String = value.chars().take(keep).collect();
        let digest = hex::encode(blake3::hash(value.as_bytes()).as_bytes());
        return format!("{base}{}", &digest[..max.min(8)]);
    }
    value.to_owned()
}
