//! Build cache management.
//!
//! This crate provides the content-hash keyed build cache that lets the
//! orchestrator skip stages whose inputs are unchanged: a JSON manifest of
//! stage and module records, a content-addressed artifact store for tree
//! snapshots and fetched blobs, and tree hashing with change detection.

#![warn(missing_docs)]

pub mod artifact;
pub mod cache;
pub mod error;
pub mod hasher;
pub mod manifest;

pub use artifact::ArtifactStore;
pub use cache::{BuildCache, CasOutcome};
pub use error::CacheError;
pub use hasher::{ChangeSet, TreeHasher, TreeSnapshot};
pub use manifest::{CacheManifest, ConflictSummary, ModuleRecord, ModuleState, StageRecord};
