// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine settings.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::store::ConfigError;

/// Key engine settings are stored under.
pub const ENGINE_CONFIG_KEY: &str = "engine";

/// Tunables of a resolution run. Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hops searched downstream of an anchor for namespace resources.
    pub traversal_radius: usize,
    /// Attributes a single expansion may satisfy.
    pub max_expansion_depth: usize,
    /// Expansion solutions kept before giving up.
    pub max_expansion_solutions: usize,
    /// Default `tracing` filter directive.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            traversal_radius: 3,
            max_expansion_depth: 8,
            max_expansion_solutions: 64,
            log_filter: "info".to_owned(),
        }
    }
}

impl EngineConfig {
    /// Reads a JSON settings file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"traversal_radius": 1}"#).unwrap();
        assert_eq!(cfg.traversal_radius, 1);
        assert_eq!(cfg.max_expansion_depth, 8);
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(&path, r#"{"log_filter": "strata_core=debug"}"#).unwrap();
        let cfg = EngineConfig::from_file(&path).unwrap();
        assert_eq!(cfg.log_filter, "strata_core=debug");
        assert!(matches!(
            EngineConfig::from_file(&dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
