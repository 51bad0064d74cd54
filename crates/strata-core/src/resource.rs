// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resources and dotted property paths.
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::ident::ResourceId;
use crate::value::Value;

/// Error raised while walking or mutating a property path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path string was empty.
    #[error("empty property path")]
    Empty,
    /// An index segment was not of the form `[n]`.
    #[error("invalid array index '{segment}' in path '{path}'")]
    BadIndex {
        /// Full path text.
        path: String,
        /// Offending segment.
        segment: String,
    },
    /// A segment expected a map or list and found something else.
    #[error("path '{path}': expected {expected}, got {found}")]
    Shape {
        /// Path walked so far.
        path: String,
        /// Expected container kind.
        expected: &'static str,
        /// Kind actually found.
        found: &'static str,
    },
    /// Index was beyond the end of the list.
    #[error("path '{path}': index {index} out of range")]
    OutOfRange {
        /// Path walked so far.
        path: String,
        /// Index requested.
        index: usize,
    },
    /// Remove-by-value did not find the value.
    #[error("path '{path}': value {value} not found")]
    NotFound {
        /// Full path text.
        path: String,
        /// Rendered value.
        value: String,
    },
}

/// One segment of a [`PropertyPath`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    /// Map key.
    Key(String),
    /// List index.
    Index(usize),
}

/// Parsed `a.b[0].c` property path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PropertyPath(pub Vec<PathSegment>);

impl PropertyPath {
    /// Parses a dotted/indexed path.
    pub fn parse(text: &str) -> Result<Self, PathError> {
        if text.is_empty() {
            return Err(PathError::Empty);
        }
        let mut segments = Vec::new();
        let mut rest = text;
        let mut in_index = false;
        while !rest.is_empty() {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            let part = &rest[..end];
            if in_index {
                let digits = part.strip_suffix(']').ok_or_else(|| PathError::BadIndex {
                    path: text.to_owned(),
                    segment: part.to_owned(),
                })?;
                let index = digits.parse::<usize>().map_err(|_| PathError::BadIndex {
                    path: text.to_owned(),
                    segment: part.to_owned(),
                })?;
                segments.push(PathSegment::Index(index));
            } else if !part.is_empty() {
                segments.push(PathSegment::Key(part.to_owned()));
            }
            if end == rest.len() {
                break;
            }
            in_index = rest.as_bytes()[end] == b'[';
            rest = &rest[end + 1..];
        }
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self(segments))
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when there are no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drops the last `depth` segments.
    pub fn ancestor(&self, depth: usize) -> Option<Self> {
        (depth < self.0.len()).then(|| Self(self.0[..self.0.len() - depth].to_vec()))
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                PathSegment::Key(k) if i == 0 => f.write_str(k)?,
                PathSegment::Key(k) => write!(f, ".{k}")?,
                PathSegment::Index(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}

/// A vertex of the resource graph.
#[derive(Clone, Debug, PartialEq, Default, Serialize)]
pub struct Resource {
    /// Identity of the resource.
    pub id: ResourceId,
    /// Property values keyed by top-level property name.
    pub properties: BTreeMap<String, Value>,
}

impl Resource {
    /// Creates a resource with no properties.
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
        }
    }

    /// Reads the value at `path`, `None` if any segment is missing.
    pub fn get_property(&self, path: &str) -> Result<Option<&Value>, PathError> {
        let path = PropertyPath::parse(path)?;
        let mut segs = path.0.iter();
        let Some(PathSegment::Key(first)) = segs.next() else {
            return Ok(None);
        };
        let mut cur = match self.properties.get(first) {
            Some(v) => v,
            None => return Ok(None),
        };
        for seg in segs {
            cur = match (seg, cur) {
                (PathSegment::Key(k), Value::Map(m)) => match m.get(k) {
                    Some(v) => v,
                    None => return Ok(None),
                },
                (PathSegment::Index(i), Value::List(l)) => match l.get(*i) {
                    Some(v) => v,
                    None => return Ok(None),
                },
                (_, Value::Null) => return Ok(None),
                (PathSegment::Key(_), other) => {
                    return Err(PathError::Shape {
                        path: path.to_string(),
                        expected: "map",
                        found: other.kind_name(),
                    })
                }
                (PathSegment::Index(_), other) => {
                    return Err(PathError::Shape {
                        path: path.to_string(),
                        expected: "list",
                        found: other.kind_name(),
                    })
                }
            };
        }
        Ok(Some(cur))
    }

    /// Sets `path` to `value`, creating intermediate maps. Null removes the entry.
    pub fn set_property(&mut self, path: &str, value: Value) -> Result<(), PathError> {
        let parsed = PropertyPath::parse(path)?;
        if value.is_null() {
            return self.remove_property(path, None);
        }
        let slot = self.slot_mut(&parsed)?;
        *slot = value;
        Ok(())
    }

    /// Appends `value` to the list at `path`, creating the list when absent.
    ///
    /// Appending a map onto a map merges the keys.
    pub fn append_property(&mut self, path: &str, value: Value) -> Result<(), PathError> {
        let parsed = PropertyPath::parse(path)?;
        let slot = self.slot_mut(&parsed)?;
        if slot.is_null() {
            *slot = Value::List(vec![value]);
            return Ok(());
        }
        match (slot, value) {
            (Value::List(items), value) => items.push(value),
            (Value::Map(existing), Value::Map(more)) => existing.extend(more),
            (other, _) => {
                return Err(PathError::Shape {
                    path: parsed.to_string(),
                    expected: "list",
                    found: other.kind_name(),
                })
            }
        }
        Ok(())
    }

    /// Removes the entry at `path`, or with `Some(value)` removes matching list items.
    pub fn remove_property(&mut self, path: &str, value: Option<&Value>) -> Result<(), PathError> {
        let parsed = PropertyPath::parse(path)?;
        if self.get_property(path)?.is_none() {
            return Ok(());
        }
        match value {
            None => self.remove_at(&parsed),
            Some(target) => {
                let slot = self.slot_mut(&parsed)?;
                match slot {
                    Value::List(items) => {
                        let before = items.len();
                        items.retain(|v| v != target);
                        if items.len() == before {
                            return Err(PathError::NotFound {
                                path: parsed.to_string(),
                                value: target.to_string(),
                            });
                        }
                        Ok(())
                    }
                    other => Err(PathError::Shape {
                        path: parsed.to_string(),
                        expected: "list",
                        found: other.kind_name(),
                    }),
                }
            }
        }
    }

    /// Rewrites every property reference to `old` so it points at `new`.
    pub fn replace_references(&mut self, old: &ResourceId, new: &ResourceId) {
        for v in self.properties.values_mut() {
            v.replace_id(old, new);
        }
    }

    fn remove_at(&mut self, path: &PropertyPath) -> Result<(), PathError> {
        let (last, parents) = match path.0.split_last() {
            Some(split) => split,
            None => return Err(PathError::Empty),
        };
        if parents.is_empty() {
            if let PathSegment::Key(k) = last {
                self.properties.remove(k);
            }
            return Ok(());
        }
        let parent = self.slot_mut(&PropertyPath(parents.to_vec()))?;
        match (parent, last) {
            (Value::Map(m), PathSegment::Key(k)) => {
                m.remove(k);
            }
            (Value::List(l), PathSegment::Index(i)) if *i < l.len() => {
                l.remove(*i);
            }
            _ => {}
        }
        Ok(())
    }

    fn slot_mut(&mut self, path: &PropertyPath) -> Result<&mut Value, PathError> {
        let mut segs = path.0.iter();
        let first = match segs.next() {
            Some(PathSegment::Key(k)) => k,
            _ => return Err(PathError::Empty),
        };
        let mut cur = self.properties.entry(first.clone()).or_default();
        for seg in segs {
            if cur.is_null() {
                *cur = match seg {
                    PathSegment::Key(_) => Value::Map(BTreeMap::new()),
                    PathSegment::Index(_) => Value::List(Vec::new()),
                };
            }
            cur = match (seg, cur) {
                (PathSegment::Key(k), Value::Map(m)) => m.entry(k.clone()).or_default(),
                (PathSegment::Index(i), Value::List(l)) => {
                    l.get_mut(*i).ok_or_else(|| PathError::OutOfRange {
                        path: path.to_string(),
                        index: *i,
                    })?
                }
                (PathSegment::Key(_), other) => {
                    return Err(PathError::Shape {
                        path: path.to_string(),
                        expected: "map",
                        found: other.kind_name(),
                    })
                }
                (PathSegment::Index(_), other) => {
                    return Err(PathError::Shape {
                        path: path.to_string(),
                        expected: "list",
                        found: other.kind_name(),
                    })
                }
            };
        }
        Ok(cur)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn res() -> Resource {
        Resource::new(ResourceId::new("aws", "lambda_function", "fn"))
    }

    #[test]
    fn path_parse_and_display() {
        let p = PropertyPath::parse("a.b[2].c").unwrap();
        assert_eq!(
            p.0,
            vec![
                PathSegment::Key("a".into()),
                PathSegment::Key("b".into()),
                PathSegment::Index(2),
                PathSegment::Key("c".into()),
            ]
        );
        assert_eq!(p.to_string(), "a.b[2].c");
        assert_eq!(p.ancestor(2).unwrap().to_string(), "a.b");
        assert!(p.ancestor(4).is_none());
        assert!(PropertyPath::parse("a[x]").is_err());
        assert!(PropertyPath::parse("").is_err());
    }

    #[test]
    fn set_creates_intermediate_maps() {
        let mut r = res();
        r.set_property("Env.Vars.KEY", Value::from("v")).unwrap();
        assert_eq!(
            r.get_property("Env.Vars.KEY").unwrap(),
            Some(&Value::from("v"))
        );
        assert_eq!(r.get_property("Env.Missing").unwrap(), None);
    }

    #[test]
    fn append_then_remove_by_value() {
        let mut r = res();
        r.append_property("Subnets", Value::from("a")).unwrap();
        r.append_property("Subnets", Value::from("b")).unwrap();
        r.remove_property("Subnets", Some(&Value::from("a"))).unwrap();
        assert_eq!(
            r.get_property("Subnets").unwrap(),
            Some(&Value::List(vec![Value::from("b")]))
        );
        assert!(matches!(
            r.remove_property("Subnets", Some(&Value::from("zz"))),
            Err(PathError::NotFound { .. })
        ));
    }

    #[test]
    fn remove_whole_entry_and_null_set() {
        let mut r = res();
        r.set_property("Role", Value::from("x")).unwrap();
        r.set_property("Role", Value::Null).unwrap();
        assert!(r.properties.is_empty());
        r.set_property("A.B", Value::Int(1)).unwrap();
        r.remove_property("A.B", None).unwrap();
        assert_eq!(r.get_property("A.B").unwrap(), None);
    }

    #[test]
    fn indexing_a_scalar_is_a_shape_error() {
        let mut r = res();
        r.set_property("Name", Value::from("x")).unwrap();
        assert!(matches!(
            r.get_property("Name[0]"),
            Err(PathError::Shape { .. })
        ));
    }
}
