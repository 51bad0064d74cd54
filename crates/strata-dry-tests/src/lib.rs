// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Strata crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`graph`] - Resource graph builder and id helper
//! - [`kb`] - Knowledge base builder
//! - [`templates`] - Sample template documents and the knowledge base built from them

pub mod config;
pub mod graph;
pub mod kb;
pub mod templates;

pub use config::InMemoryConfigStore;
pub use graph::{id, GraphBuilder};
pub use kb::KbBuilder;
pub use templates::sample_kb;
