//! Project resolution: turning relative bindings into absolute module descriptions.

use std::fmt;
use std::path::{Path, PathBuf};

use weft_common::VersionRef;

use crate::error::ConfigError;
use crate::types::{
    ArtifactConfig, BaseSpec, BundleConfig, PatchConfig, ProjectConfig, PublishConfig, ToolsConfig,
};

/// Repository coordinates in `group:artifact[:version]` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinates {
    /// Dotted group id.
    pub group: String,
    /// Artifact id.
    pub artifact: String,
    /// Version, when pinned in the coordinate string itself.
    pub version: Option<String>,
}

impl Coordinates {
    /// Parses `group:artifact` or `group:artifact:version`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let parts: Vec<&str> = value.split(':').collect();
        match parts.as_slice() {
            [group, artifact] if !group.is_empty() && !artifact.is_empty() => Ok(Self {
                group: group.to_string(),
                artifact: artifact.to_string(),
                version: None,
            }),
            [group, artifact, version]
                if !group.is_empty() && !artifact.is_empty() && !version.is_empty() =>
            {
                Ok(Self {
                    group: group.to_string(),
                    artifact: artifact.to_string(),
                    version: Some(version.to_string()),
                })
            }
            _ => Err(ConfigError::ValidationError(format!(
                "'{value}' is not of the form group:artifact[:version]"
            ))),
        }
    }

    /// Returns a copy pinned to `version`.
    pub fn with_version(&self, version: &str) -> Self {
        Self {
            version: Some(version.to_string()),
            ..self.clone()
        }
    }

    /// Repository-relative path of the file with the given extension.
    ///
    /// Follows the Maven layout: `group/as/dirs/artifact/version/artifact-version.ext`.
    /// Unversioned coordinates resolve to the artifact directory itself.
    pub fn repository_path(&self, ext: &str) -> String {
        let group = self.group.replace('.', "/");
        match &self.version {
            Some(version) => format!(
                "{group}/{artifact}/{version}/{artifact}-{version}.{ext}",
                artifact = self.artifact
            ),
            None => format!("{group}/{}", self.artifact),
        }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.artifact)?;
        if let Some(version) = &self.version {
            write!(f, ":{version}")?;
        }
        Ok(())
    }
}

/// Where a resolved module's base tree comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedBase {
    /// A subdirectory of the upstream checkout.
    Upstream {
        /// Subdirectory relative to the checkout root.
        subdir: String,
    },
    /// A subdirectory of the decompiled upstream artifact.
    Decompiled {
        /// Subdirectory relative to the decompiled root.
        subdir: String,
    },
    /// A subdirectory of another module's output.
    Module {
        /// The providing module.
        module: String,
        /// Subdirectory relative to that module's output directory.
        subdir: String,
    },
}

impl fmt::Display for ResolvedBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedBase::Upstream { subdir } => write!(f, "upstream:{subdir}"),
            ResolvedBase::Decompiled { subdir } => write!(f, "decompiled:{subdir}"),
            ResolvedBase::Module { module, subdir } if subdir.is_empty() => {
                write!(f, "module:{module}")
            }
            ResolvedBase::Module { module, subdir } => write!(f, "module:{module}/{subdir}"),
        }
    }
}

/// A module with absolute directories and its full dependency list.
#[derive(Debug, Clone)]
pub struct ResolvedModule {
    /// Module name.
    pub name: String,
    /// Base tree source.
    pub base: ResolvedBase,
    /// Absolute patch directory.
    pub patch_dir: PathBuf,
    /// Absolute output directory.
    pub output_dir: PathBuf,
    /// Explicit dependencies plus the providing module of a module base.
    pub depends_on: Vec<String>,
    /// Whether the output is a bare generated-source directory.
    pub bare: bool,
}

/// A fully resolved project: the immutable inputs of one run.
#[derive(Debug, Clone)]
pub struct ResolvedProject {
    /// Project root (directory containing `weft.toml`).
    pub root: PathBuf,
    /// Fork name.
    pub name: String,
    /// Fork version string.
    pub version: String,
    /// Publishing group id.
    pub group: String,
    /// Pinned upstream source revision.
    pub upstream_ref: VersionRef,
    /// Pinned upstream release.
    pub release: VersionRef,
    /// Absolute path of the upstream repository.
    pub upstream_repository: PathBuf,
    /// Binary artifact location, if any module needs it.
    pub artifact: Option<ArtifactConfig>,
    /// External tool settings.
    pub tools: ToolsConfig,
    /// Patch settings.
    pub patches: PatchConfig,
    /// Absolute cache directory.
    pub cache_dir: PathBuf,
    /// Worker limit (0 = available CPU cores).
    pub jobs: usize,
    /// Modules in name order.
    pub modules: Vec<ResolvedModule>,
    /// Packaging metadata.
    pub bundle: BundleConfig,
    /// Publishing target.
    pub publish: Option<PublishConfig>,
}

impl ResolvedProject {
    /// Looks up a module by name.
    pub fn module(&self, name: &str) -> Result<&ResolvedModule, ConfigError> {
        self.modules
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| ConfigError::UnknownModule(name.to_string()))
    }

    /// Returns `true` if any module is based on the decompiled artifact.
    pub fn needs_decompiled(&self) -> bool {
        self.modules
            .iter()
            .any(|m| matches!(m.base, ResolvedBase::Decompiled { .. }))
    }
}

/// Resolves a validated configuration against its project root.
pub fn resolve_project(config: &ProjectConfig, root: &Path) -> ResolvedProject {
    let modules = config
        .modules
        .iter()
        .map(|(name, module)| {
            let mut depends_on = module.depends_on.clone();
            let base = match &module.base {
                BaseSpec::Upstream(b) => ResolvedBase::Upstream {
                    subdir: b.upstream.clone(),
                },
                BaseSpec::Decompiled(b) => ResolvedBase::Decompiled {
                    subdir: b.decompiled.clone(),
                },
                BaseSpec::Module(b) => {
                    if !depends_on.contains(&b.module) {
                        depends_on.push(b.module.clone());
                    }
                    ResolvedBase::Module {
                        module: b.module.clone(),
                        subdir: b.path.clone(),
                    }
                }
            };
            depends_on.sort();
            depends_on.dedup();
            ResolvedModule {
                name: name.clone(),
                base,
                patch_dir: root.join(&module.patch_dir),
                output_dir: root.join(&module.output_dir),
                depends_on,
                bare: module.bare,
            }
        })
        .collect();

    ResolvedProject {
        root: root.to_path_buf(),
        name: config.project.name.clone(),
        version: config.project.version.clone(),
        group: config.project.group.clone(),
        upstream_ref: config.upstream.reference.clone(),
        release: config.upstream.release.clone(),
        upstream_repository: root.join(&config.upstream.repository),
        artifact: config.artifact.clone(),
        tools: config.tools.clone(),
        patches: config.patches.clone(),
        cache_dir: root.join(&config.cache.dir),
        jobs: config.build.jobs,
        modules,
        bundle: config.bundle.clone(),
        publish: config.publish.clone(),
    }
}
