//! Error types for packaging and publishing.

use std::path::PathBuf;

use weft_cache::{CacheError, ModuleState};
use weft_config::ConfigError;
use weft_patch::PatchError;
use weft_upstream::UpstreamError;

/// Errors produced while packaging or publishing distributables.
#[derive(Debug, thiserror::Error)]
pub enum DistError {
    /// A module is not in a state that can be packaged.
    #[error("module '{module}' is not ready for packaging: {reason}")]
    ModuleNotReady {
        /// The module.
        module: String,
        /// Its recorded state.
        state: ModuleState,
        /// Why it cannot be packaged.
        reason: String,
    },

    /// Packaging metadata required for this artifact is absent.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Building an archive failed.
    #[error("failed to build {artifact}: {reason}")]
    Archive {
        /// Artifact file name.
        artifact: String,
        /// What went wrong.
        reason: String,
    },

    /// A local I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Invalid coordinates.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Reading module state failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Reading a module tree failed.
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Fetching the bootstrap loader or publishing failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl DistError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
