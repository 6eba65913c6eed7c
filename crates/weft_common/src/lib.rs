//! Shared foundational types used across the weft fork builder.
//!
//! This crate provides content hashing for trees and cache keys, the pinned
//! [`VersionRef`] identifier, and the dense [`Arena`] used to hold ordered
//! patch records.

#![warn(missing_docs)]

pub mod arena;
pub mod hash;
pub mod ids;
pub mod version;

pub use arena::{Arena, ArenaId};
pub use hash::{ContentHash, ContentHasher, ParseHashError};
pub use ids::PatchId;
pub use version::{InvalidVersionRef, VersionRef};
