//! Error types for the patch stack engine.

use std::path::PathBuf;

use weft_cache::CacheError;
use weft_common::ContentHash;

use crate::apply::ConflictReport;

/// Errors produced while reading, applying, or regenerating patch stacks.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// An I/O error occurred while reading or writing trees or patch files.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A patch file could not be parsed.
    #[error("malformed patch {name}: {reason}")]
    Parse {
        /// Patch file name.
        name: String,
        /// What was wrong.
        reason: String,
    },

    /// libgit2 could not compute the diff of a file.
    #[error("cannot diff {path}: {source}")]
    Diff {
        /// Tree-relative path.
        path: String,
        /// The underlying libgit2 error.
        source: git2::Error,
    },

    /// A patch did not apply cleanly.
    #[error("{0}")]
    Conflict(Box<ConflictReport>),

    /// The stack no longer reproduces the boundary hashes recorded by the
    /// last apply, so changes cannot be attributed to patches.
    #[error(
        "patch stack is stale at boundary {boundary}: recorded {recorded}, recomputed {recomputed}"
    )]
    StaleRebuild {
        /// Boundary index (0 is the base tree).
        boundary: usize,
        /// Hash recorded by the last apply.
        recorded: ContentHash,
        /// Hash obtained by replaying the stack now.
        recomputed: ContentHash,
    },

    /// Re-applying the stack in scratch did not reproduce the expected tree.
    #[error("validation failed: expected tree {expected}, got {actual}")]
    ValidationMismatch {
        /// The last known-good tree hash.
        expected: ContentHash,
        /// The hash the stack produced.
        actual: ContentHash,
    },

    /// A file that must be diffed or patched is not UTF-8 text.
    #[error("cannot diff binary file {path}")]
    BinaryFile {
        /// Tree-relative path.
        path: String,
    },

    /// A tree-relative path escapes the tree or is otherwise unusable.
    #[error("invalid tree path '{0}'")]
    InvalidPath(String),

    /// A cache operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl PatchError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the conflict report if this is a conflict.
    pub fn as_conflict(&self) -> Option<&ConflictReport> {
        match self {
            PatchError::Conflict(report) => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let err = PatchError::Parse {
            name: "0001-Fix.patch".to_string(),
            reason: "hunk header expected".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "malformed patch 0001-Fix.patch: hunk header expected"
        );
    }

    #[test]
    fn stale_rebuild_display_names_boundary() {
        let err = PatchError::StaleRebuild {
            boundary: 2,
            recorded: ContentHash::from_bytes(b"a"),
            recomputed: ContentHash::from_bytes(b"b"),
        };
        assert!(err.to_string().contains("boundary 2"));
    }

    #[test]
    fn binary_file_display() {
        let err = PatchError::BinaryFile {
            path: "icon.png".to_string(),
        };
        assert_eq!(err.to_string(), "cannot diff binary file icon.png");
    }
}
