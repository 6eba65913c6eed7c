//! Distribution packaging and publishing.
//!
//! Assembles the runnable launcher (bootstrap loader, upstream download
//! pointer, bundled module outputs) and the development bundle (API
//! coordinates, library repositories, version metadata, patch sets) from
//! modules the cache records as applied and validated, and publishes them
//! with checksums.

#![warn(missing_docs)]

pub mod archive;
pub mod bundle;
pub mod error;
pub mod package;
pub mod publish;

pub use archive::{read_archive, ArchiveBuilder};
pub use bundle::{DevBundleConfig, LauncherManifest};
pub use error::DistError;
pub use package::{ready_module, Artifact, Packager, ReadyModule, DIST_DIR};
pub use publish::{publish_artifacts, Published};
