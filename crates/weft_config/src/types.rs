//! Configuration types deserialized from `weft.toml`.
//!
//! Every table carries `#[serde(deny_unknown_fields)]`: a misspelled key is a
//! load-time error rather than a silently ignored option.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use weft_common::VersionRef;

/// The top-level project configuration parsed from `weft.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Fork metadata (name, version, publishing group).
    pub project: ProjectMeta,
    /// The pinned upstream source snapshot and release.
    pub upstream: UpstreamConfig,
    /// Where the upstream binary artifact and its mapping are fetched from.
    #[serde(default)]
    pub artifact: Option<ArtifactConfig>,
    /// External decompiler/remapper invocations.
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Patch application and rebuild settings.
    #[serde(default)]
    pub patches: PatchConfig,
    /// Build cache location.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// Output modules keyed by name.
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,
    /// Launcher and dev bundle metadata.
    #[serde(default)]
    pub bundle: BundleConfig,
    /// Publishing target. Publishing is disabled when absent.
    #[serde(default)]
    pub publish: Option<PublishConfig>,
}

/// Fork metadata required in every `weft.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectMeta {
    /// The fork name; used for artifact ids.
    pub name: String,
    /// The fork version string reported by `print-version`.
    pub version: String,
    /// Publishing group id (e.g. `dev.folia`).
    #[serde(default)]
    pub group: String,
    /// A brief description of the fork.
    #[serde(default)]
    pub description: String,
}

/// The pinned upstream this fork layers onto.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Revision of the upstream source snapshot.
    #[serde(rename = "ref")]
    pub reference: VersionRef,
    /// Path of the local upstream repository, relative to the project root.
    pub repository: String,
    /// Release identifier the binary artifact resolves to.
    pub release: VersionRef,
}

/// Location of the upstream binary distributable and its mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactConfig {
    /// Repository URL or local path hosting the artifacts.
    pub repository: String,
    /// `group:artifact` coordinates of the binary distributable.
    pub binary: String,
    /// `group:artifact` coordinates of the mapping table.
    pub mapping: String,
}

/// External tool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    /// Wall-clock limit for each external process (tools and `git`) and HTTP request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// The remapper invocation.
    #[serde(default)]
    pub remapper: Option<ToolConfig>,
    /// The decompiler invocation.
    #[serde(default)]
    pub decompiler: Option<ToolConfig>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            remapper: None,
            decompiler: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    600
}

/// A single black-box tool invocation.
///
/// `args` may contain the placeholders `{input}`, `{output}` and `{mapping}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    /// Executable to run.
    pub program: String,
    /// Arguments, with placeholders substituted per invocation.
    #[serde(default)]
    pub args: Vec<String>,
    /// Pinned tool version; part of every cache key the tool contributes to.
    pub version: String,
}

/// Patch application and rebuild settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchConfig {
    /// Filter line-ending and offset noise out of regenerated patches.
    #[serde(default)]
    pub filter: bool,
    /// Number of lines a hunk may drift from its recorded position.
    #[serde(default)]
    pub max_offset: usize,
}

/// Build cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache directory, relative to the project root.
    #[serde(default = "default_cache_dir")]
    pub dir: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> String {
    ".weft/cache".to_string()
}

/// Scheduler settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Maximum concurrent module workers (0 = available CPU cores).
    #[serde(default)]
    pub jobs: usize,
}

/// One output module.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    /// Where the module's base tree comes from.
    pub base: BaseSpec,
    /// Directory of ordered patch files, relative to the project root.
    pub patch_dir: String,
    /// Directory the module output is materialized into.
    pub output_dir: String,
    /// Modules whose outputs must be applied before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Whether the output is a bare generated-source directory.
    #[serde(default)]
    pub bare: bool,
}

/// Source of a module's base tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum BaseSpec {
    /// A subdirectory of the upstream checkout at `upstream.ref`.
    Upstream(UpstreamBase),
    /// A subdirectory of the decompiled upstream artifact.
    Decompiled(DecompiledBase),
    /// A subdirectory of another module's output.
    Module(ModuleBase),
}

/// `base = { upstream = "<subdir>" }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamBase {
    /// Subdirectory within the upstream checkout.
    pub upstream: String,
}

/// `base = { decompiled = "<subdir>" }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecompiledBase {
    /// Subdirectory within the decompiled tree.
    pub decompiled: String,
}

/// `base = { module = "<name>", path = "<subdir>" }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleBase {
    /// Name of the module whose output is used.
    pub module: String,
    /// Subdirectory within that module's output.
    #[serde(default)]
    pub path: String,
}

/// Launcher and dev bundle metadata.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleConfig {
    /// `group:artifact` coordinates of the fork's API.
    #[serde(default)]
    pub api_coordinates: Option<String>,
    /// Additional API coordinates published alongside the main API.
    ///
    /// Accepts either a single string or a list of strings.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub extra_coordinates: Vec<String>,
    /// Repositories third parties resolve libraries from.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub library_repositories: Vec<String>,
    /// `group:artifact:version` of the bootstrap loader bundled in the launcher.
    #[serde(default)]
    pub bootstrap: Option<String>,
    /// Modules whose outputs the launcher bundles (defaults to all modules).
    #[serde(default)]
    pub launcher_modules: Vec<String>,
}

/// Publishing target.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    /// Display name of the repository.
    pub name: String,
    /// Repository URL or local path.
    pub repository: String,
}

/// Deserializes a field that can be either a single string or a list of strings.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}
