//! Parsing and validation of `weft.toml` project configuration files.
//!
//! This crate reads the project configuration file and produces a strongly-typed
//! [`ProjectConfig`]. Every table rejects unknown keys at load time, and
//! [`resolve_project`] turns the relative bindings into absolute module
//! descriptions ordered by their dependency edges.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use resolve::{resolve_project, Coordinates, ResolvedBase, ResolvedModule, ResolvedProject};
pub use types::*;
