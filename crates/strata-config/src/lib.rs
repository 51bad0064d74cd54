// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! strata-config: engine settings and where they are stored.
#![forbid(unsafe_code)]

mod engine;
mod fs;
mod store;

pub use engine::{EngineConfig, ENGINE_CONFIG_KEY};
pub use fs::FsConfigStore;
pub use store::{ConfigError, ConfigService, ConfigStore};
