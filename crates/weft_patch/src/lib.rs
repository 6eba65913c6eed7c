//! Patch stack engine.
//!
//! Holds each module's ordered patches, applies them to a base tree to
//! materialize the module output, regenerates them from a hand-edited output
//! (rebuild), and re-verifies that a stack still reproduces its last
//! known-good tree (validation).

#![warn(missing_docs)]

pub mod apply;
pub mod diff;
pub mod error;
pub mod format;
pub mod rebuild;
pub mod stack;
pub mod tree;

pub use apply::{ConflictReason, ConflictReport};
pub use error::PatchError;
pub use format::{FileChange, FilePatch, Patch, DEFAULT_AUTHOR};
pub use rebuild::{rebuild, RebuildOptions, RebuildOutcome};
pub use stack::{apply_patch, ApplyOutcome, PatchRecord, PatchStack};
pub use tree::{install_tree, recover_stale, SourceTree};
