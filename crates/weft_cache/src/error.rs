//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// Reads are fail-safe: corrupt or missing entries surface as cache misses.
/// This enum covers the failures that cannot be degraded to a miss, such as
/// being unable to durably record a stage result.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// Source trees hold regular files only.
    #[error("symbolic link {path} cannot be part of a source tree")]
    Symlink {
        /// The link found while walking the tree.
        path: PathBuf,
    },

    /// A worker panicked while holding the manifest lock.
    #[error("cache manifest lock poisoned")]
    Poisoned,
}

impl CacheError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
