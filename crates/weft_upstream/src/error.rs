//! Error types for upstream resolution, tools, and repositories.

use std::path::PathBuf;

use weft_cache::CacheError;
use weft_config::ConfigError;
use weft_patch::PatchError;

/// Errors produced while fetching, decompiling, or linking upstream sources.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// A local I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The repository has no file at the requested location.
    #[error("not found in {repository}: {path}")]
    NotFound {
        /// Repository description.
        repository: String,
        /// Repository-relative path.
        path: String,
    },

    /// A fetch failed for a reason other than absence.
    #[error("fetching {location} failed: {reason}")]
    Fetch {
        /// URL or path.
        location: String,
        /// What went wrong.
        reason: String,
    },

    /// An upload failed.
    #[error("publishing {location} failed: {reason}")]
    Publish {
        /// URL or path.
        location: String,
        /// What went wrong.
        reason: String,
    },

    /// The binary artifact and mapping do not belong to the same release.
    #[error("artifact mismatch: {0}")]
    ArtifactMismatch(String),

    /// The remapper failed.
    #[error("remapping failed: {0}")]
    RemapFailed(String),

    /// The decompiler failed.
    #[error("decompilation failed: {0}")]
    DecompileFailed(String),

    /// An external tool exceeded its time budget.
    #[error("{tool} timed out after {secs}s")]
    StageTimeout {
        /// Tool name.
        tool: String,
        /// Configured limit.
        secs: u64,
    },

    /// An upstream ref could not be checked out.
    #[error("cannot resolve upstream ref '{reference}': {reason}")]
    UnresolvableRef {
        /// The requested ref.
        reference: String,
        /// What went wrong.
        reason: String,
    },

    /// Required configuration is absent.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Invalid coordinates or other configuration values.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A cache operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Reading or writing a tree failed.
    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl UpstreamError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
