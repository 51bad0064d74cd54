// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem-backed [`ConfigStore`] (platform config dir or an explicit root).

use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

use crate::store::{ConfigError, ConfigStore};

/// Stores configs as `<key>.json` files under a base directory.
#[derive(Clone, Debug)]
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// A store rooted at the user config directory (e.g. `~/.config/strata`).
    pub fn new() -> Result<Self, ConfigError> {
        let proj = ProjectDirs::from("dev", "flyingrobots", "strata")
            .ok_or_else(|| ConfigError::Other("could not resolve config dir".into()))?;
        Self::with_root(proj.config_dir())
    }

    /// A store rooted at `root`, created if missing.
    pub fn with_root(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base = root.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// The directory files are stored in.
    pub fn root(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{key}.json"))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::{ConfigService, EngineConfig, ENGINE_CONFIG_KEY};

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::with_root(dir.path()).unwrap();
        assert!(matches!(store.load_raw("absent"), Err(ConfigError::NotFound)));
    }

    #[test]
    fn engine_config_round_trips_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::with_root(dir.path().join("nested")).unwrap();
        let service = ConfigService::new(store);
        let cfg = EngineConfig {
            traversal_radius: 5,
            ..EngineConfig::default()
        };
        service.save(ENGINE_CONFIG_KEY, &cfg).unwrap();
        assert!(dir.path().join("nested/engine.json").is_file());
        let loaded: EngineConfig = service.load_or_default(ENGINE_CONFIG_KEY).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn nested_keys_create_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::with_root(dir.path()).unwrap();
        store.save_raw("profiles/dev", b"{}").unwrap();
        assert_eq!(store.load_raw("profiles/dev").unwrap(), b"{}");
    }
}
