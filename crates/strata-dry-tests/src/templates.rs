// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Sample template documents.
//!
//! A function needs a role of its own and two subnets spread across the
//! subnets already in use. Subnets live in the namespace of the network
//! they are attached to. Buckets sanitize their names and are archived
//! once a function uses them.

use strata_core::kb::Unique;
use strata_core::KnowledgeBase;

use crate::kb::KbBuilder;

/// `p:function`: compute with a unique role and two spread subnets.
pub const FUNCTION: &str = r#"
qualified_type_name: p:function
display_name: Function
classification:
  is: [compute]
properties:
  Role:
    type: resource(p:role)
    operational_rule:
      step:
        direction: downstream
        resources: ['p:role']
        unique: true
  Subnets:
    type: list(resource(p:subnet))
    operational_rule:
      step:
        direction: downstream
        resources: ['p:subnet']
        num_needed: 2
        selection_operator: spread
  Timeout:
    type: int
    min_value: 1
    max_value: 900
"#;

/// `p:role`: glue with no properties.
pub const ROLE: &str = r#"
qualified_type_name: p:role
display_name: Role
"#;

/// `p:subnet`: glue namespaced into its network.
pub const SUBNET: &str = r#"
qualified_type_name: p:subnet
display_name: Subnet
properties:
  Network:
    type: resource(p:network)
    namespace: true
    operational_rule:
      step:
        direction: downstream
        resources: ['p:network']
  CidrBlock:
    type: string
"#;

/// `p:network`: glue namespace holder.
pub const NETWORK: &str = r#"
qualified_type_name: p:network
display_name: Network
"#;

/// `p:bucket`: storage with sanitized names.
pub const BUCKET: &str = r#"
qualified_type_name: p:bucket
display_name: Bucket
classification:
  is: [storage]
sanitize_name: '{{ . | lower | replace "[^a-z0-9-]" "-" }}'
properties:
  BucketName:
    type: string
    sanitize: '{{ . | lower | replace "[^a-z0-9-]" "-" }}'
  StorageClass:
    type: string
    allowed_values: [standard, archive]
"#;

/// Buckets a function writes to are archived.
pub const FUNCTION_TO_BUCKET: &str = r#"
source: p:function
target: p:bucket
operational_rules:
  - configuration_rules:
      - resource: '{{ .Target }}'
        configuration:
          field: StorageClass
          value: archive
"#;

/// Every sample resource template.
pub const RESOURCES: [&str; 5] = [FUNCTION, ROLE, SUBNET, NETWORK, BUCKET];

/// The sample templates with their edges. A role serves one function.
pub fn sample_kb() -> KnowledgeBase {
    RESOURCES
        .iter()
        .fold(KbBuilder::new(), |b, doc| b.resource_yaml(doc))
        .edge_with("p:function", "p:role", Unique { source: true, target: false })
        .edge("p:function", "p:subnet")
        .edge_yaml(FUNCTION_TO_BUCKET)
        .edge("p:subnet", "p:network")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Functionality, ResourceId};

    #[test]
    fn sample_kb_registers_everything() {
        let kb = sample_kb();
        assert_eq!(kb.list_resources().count(), RESOURCES.len());
        assert_eq!(kb.list_edges().count(), 4);
        let function = ResourceId::of_type("p", "function");
        assert_eq!(kb.get_functionality(&function), Functionality::Compute);
        assert!(kb.has_functional_path(&function, &ResourceId::of_type("p", "network")));
    }
}
