//! Metadata documents embedded in the launcher and the dev bundle.

use serde::{Deserialize, Serialize};

/// Current layout version of both metadata documents.
pub const FORMAT_VERSION: u32 = 1;

/// `launcher.json`: what the bootstrap loader needs at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherManifest {
    /// Layout version.
    pub format_version: u32,
    /// Fork name.
    pub name: String,
    /// Fork version.
    pub version: String,
    /// Coordinates of the bundled bootstrap loader.
    pub bootstrap: String,
    /// Archive path of the bootstrap loader.
    pub bootstrap_file: String,
    /// Where the loader downloads the upstream binary from, if configured.
    pub upstream: Option<UpstreamPointer>,
    /// Module trees bundled under `modules/<name>/`.
    pub modules: Vec<BundledModule>,
}

/// Download pointer to the upstream binary the launcher patches at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamPointer {
    /// Upstream release.
    pub release: String,
    /// `group:artifact:version` of the binary.
    pub coordinates: String,
    /// Repository hosting the binary.
    pub repository: String,
    /// Repository-relative download path.
    pub path: String,
    /// SHA-256 of the binary, when it has been fetched.
    pub sha256: Option<String>,
}

/// A module output bundled in the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundledModule {
    /// Module name.
    pub name: String,
    /// Tree hash of the bundled output.
    pub tree_hash: String,
    /// Number of bundled files.
    pub files: usize,
}

/// `config.json` of the dev bundle: how third parties build against the fork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevBundleConfig {
    /// Layout version.
    pub format_version: u32,
    /// Fork name.
    pub name: String,
    /// Fork version string.
    pub version: String,
    /// Upstream release the fork targets.
    pub release: String,
    /// Upstream source revision the patches apply to.
    pub upstream_ref: String,
    /// `group:artifact:version` of the fork's API.
    pub api_coordinates: String,
    /// Extra API coordinates published alongside the main API.
    pub extra_coordinates: Vec<String>,
    /// Repositories libraries resolve from.
    pub library_repositories: Vec<String>,
    /// Patch sets under `patches/<module>/`.
    pub modules: Vec<BundledPatchSet>,
}

/// One module's patch set in the dev bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundledPatchSet {
    /// Module name.
    pub name: String,
    /// Human-readable base description (`upstream:Paper-API`).
    pub base: String,
    /// Patch file names in apply order.
    pub patches: Vec<String>,
    /// Tree hash the patches produce.
    pub output_hash: String,
}
