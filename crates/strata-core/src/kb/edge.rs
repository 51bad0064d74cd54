// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Edge schemas and their cardinality constraints.
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::graph::Edge;
use crate::ident::ResourceId;
use crate::rule::OperationalRule;

/// Cardinality constraint on an edge type.
///
/// `source` limits each target to one source of a given type; `target`
/// limits each source to one target of a given type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Unique {
    /// At most one source of the type per target.
    pub source: bool,
    /// At most one target of the type per source.
    pub target: bool,
}

impl Unique {
    /// Both sides unique.
    pub const ONE_TO_ONE: Self = Self { source: true, target: true };

    /// Parses the shorthand names.
    pub fn from_shorthand(text: &str) -> Option<Self> {
        match text {
            "one_to_one" => Some(Self::ONE_TO_ONE),
            "one_to_many" => Some(Self { source: true, target: false }),
            "many_to_one" => Some(Self { source: false, target: true }),
            "many_to_many" | "" => Some(Self::default()),
            _ => None,
        }
    }

    /// Whether `source -> target` may be added alongside `edges`.
    ///
    /// An edge that already exists is always allowed.
    pub fn can_add(&self, edges: &[Edge], source: &ResourceId, target: &ResourceId) -> bool {
        if !self.source && !self.target {
            return true;
        }
        if edges.iter().any(|e| &e.source == source && &e.target == target) {
            return true;
        }
        for e in edges {
            if self.source && &e.target == target && e.source.same_type(source) {
                return false;
            }
            if self.target && &e.source == source && e.target.same_type(target) {
                return false;
            }
        }
        true
    }
}

struct UniqueVisitor;

impl<'de> Visitor<'de> for UniqueVisitor {
    type Value = Unique;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a bool, a cardinality name or {source, target}")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Unique, E> {
        Ok(Unique { source: v, target: v })
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Unique, E> {
        Unique::from_shorthand(v).ok_or_else(|| E::custom(format!("unknown unique value '{v}'")))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Unique, E> {
        Ok(Unique::default())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Unique, A::Error> {
        let mut out = Unique::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "source" => out.source = map.next_value()?,
                "target" => out.target = map.next_value()?,
                other => return Err(de::Error::unknown_field(other, &["source", "target"])),
            }
        }
        Ok(out)
    }
}

impl<'de> Deserialize<'de> for Unique {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(UniqueVisitor)
    }
}

/// Schema for an allowed `source -> target` type pair.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EdgeTemplate {
    /// Source type.
    pub source: ResourceId,
    /// Target type.
    pub target: ResourceId,
    /// Cardinality.
    pub unique: Unique,
    /// Deploy the target before the source.
    pub deployment_order_reversed: bool,
    /// Only satisfiable by a direct edge, never through glue.
    pub direct_edge_only: bool,
    /// Tags for the edge.
    pub classification: Vec<String>,
    /// Rules run when the edge is added.
    pub operational_rules: Vec<OperationalRule>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn unique_shorthands() {
        let cases = [
            ("true", Unique::ONE_TO_ONE),
            ("false", Unique::default()),
            ("one_to_one", Unique::ONE_TO_ONE),
            ("one_to_many", Unique { source: true, target: false }),
            ("many_to_one", Unique { source: false, target: true }),
            ("many_to_many", Unique::default()),
            ("{source: true}", Unique { source: true, target: false }),
        ];
        for (text, want) in cases {
            let got: Unique = serde_yaml::from_str(text).unwrap();
            assert_eq!(got, want, "{text}");
        }
        assert!(serde_yaml::from_str::<Unique>("sometimes").is_err());
    }

    #[test]
    fn can_add_respects_sides() {
        let edges = vec![Edge::new(id("aws:lambda:a"), id("aws:role:r"))];
        let src_unique = Unique { source: true, target: false };
        assert!(!src_unique.can_add(&edges, &id("aws:lambda:b"), &id("aws:role:r")));
        assert!(src_unique.can_add(&edges, &id("aws:lambda:a"), &id("aws:role:r2")));
        assert!(src_unique.can_add(&edges, &id("aws:lambda:a"), &id("aws:role:r")));

        let tgt_unique = Unique { source: false, target: true };
        assert!(!tgt_unique.can_add(&edges, &id("aws:lambda:a"), &id("aws:role:r2")));
        assert!(tgt_unique.can_add(&edges, &id("aws:lambda:b"), &id("aws:role:r")));
        assert!(Unique::default().can_add(&edges, &id("aws:lambda:b"), &id("aws:role:r")));
    }

    #[test]
    fn edge_template_from_yaml() {
        let e: EdgeTemplate = serde_yaml::from_str(
            "source: aws:lambda\ntarget: aws:role\nunique: one_to_many\ndirect_edge_only: true\n",
        )
        .unwrap();
        assert_eq!(e.source, id("aws:lambda"));
        assert!(e.unique.source && !e.unique.target);
        assert!(e.direct_edge_only);
        assert!(e.operational_rules.is_empty());
    }
}
