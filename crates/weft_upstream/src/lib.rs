//! Upstream inputs of the pipeline.
//!
//! Fetches the pinned binary distributable and its mapping from an artifact
//! repository, turns them into a readable source tree with the external
//! remapper and decompiler, and exports the pinned upstream source revision
//! that module bases are read from. Repository clients also serve the
//! publishing side of the distribution packager.

#![warn(missing_docs)]

pub mod decompile;
pub mod error;
pub mod linker;
pub mod mapping;
pub mod repository;
pub mod resolver;
pub mod tool;

pub use decompile::{DecompileStage, DecompiledTree};
pub use error::UpstreamError;
pub use linker::{GitVcs, UpstreamCheckout, UpstreamLinker, Vcs};
pub use mapping::Mapping;
pub use repository::{
    open_repository, publish_with_checksum, sha256_hex, Credentials, HttpRepository,
    LocalRepository, RepositoryClient,
};
pub use resolver::{cached_artifact, ArtifactResolver, ResolvedArtifacts};
pub use tool::{CommandTool, ExternalTool, ToolError, ToolInvocation};
