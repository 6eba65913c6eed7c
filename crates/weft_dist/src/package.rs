//! Launcher and dev bundle assembly.
//!
//! Both artifacts are built entirely in memory from module outputs that the
//! cache records as applied and validated. Nothing is written unless every
//! module the artifact needs passes that check.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use weft_cache::{BuildCache, ModuleRecord, ModuleState};
use weft_config::{Coordinates, ResolvedModule, ResolvedProject};
use weft_patch::{PatchStack, SourceTree};
use weft_upstream::{cached_artifact, sha256_hex, RepositoryClient, UpstreamError};

use crate::archive::ArchiveBuilder;
use crate::bundle::{
    BundledModule, BundledPatchSet, DevBundleConfig, LauncherManifest, UpstreamPointer,
    FORMAT_VERSION,
};
use crate::error::DistError;

/// Directory, relative to the project root, where artifacts are written.
pub const DIST_DIR: &str = "build/dist";

/// Artifact id suffix of the launcher.
pub const LAUNCHER_SUFFIX: &str = "launcher";
/// Artifact id of the dev bundle.
pub const DEV_BUNDLE_ARTIFACT: &str = "dev-bundle";
/// Extension of both artifacts.
pub const ARTIFACT_EXT: &str = "tar.gz";

/// A finished, not yet written artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Versioned coordinates the artifact publishes under.
    pub coordinates: Coordinates,
    /// Archive bytes.
    pub data: Vec<u8>,
    /// SHA-256 of `data`.
    pub sha256: String,
}

impl Artifact {
    fn new(coordinates: Coordinates, data: Vec<u8>) -> Self {
        Self {
            sha256: sha256_hex(&data),
            coordinates,
            data,
        }
    }

    /// File name in Maven layout (`artifact-version.tar.gz`).
    pub fn file_name(&self) -> String {
        let version = self.coordinates.version.as_deref().unwrap_or("unversioned");
        format!("{}-{version}.{ARTIFACT_EXT}", self.coordinates.artifact)
    }

    /// Writes the archive and its `.sha256` into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, DistError> {
        std::fs::create_dir_all(dir).map_err(|e| DistError::io(dir, e))?;
        let path = dir.join(self.file_name());
        weft_cache::artifact::write_atomic(&path, &self.data)?;
        let sum = dir.join(format!("{}.sha256", self.file_name()));
        weft_cache::artifact::write_atomic(&sum, self.sha256.as_bytes())?;
        Ok(path)
    }
}

/// A module output verified as packageable.
#[derive(Debug, Clone)]
pub struct ReadyModule {
    /// Module name.
    pub name: String,
    /// Its cache record.
    pub record: ModuleRecord,
    /// The output tree as it is on disk.
    pub tree: SourceTree,
}

/// Checks that `module` is applied, validated, and unmodified on disk.
pub fn ready_module(cache: &BuildCache, module: &ResolvedModule) -> Result<ReadyModule, DistError> {
    let record = cache.module(&module.name)?;
    let not_ready = |reason: String| DistError::ModuleNotReady {
        module: module.name.clone(),
        state: record.state,
        reason,
    };
    if !record.is_ready() {
        let reason = match (record.state, &record.conflict) {
            (ModuleState::Conflict, Some(conflict)) => format!("conflict in {conflict}"),
            (ModuleState::Conflict, None) => "patches conflict".to_string(),
            (ModuleState::Applying, _) => "an earlier apply was interrupted".to_string(),
            (ModuleState::Unapplied, _) => "patches have not been applied".to_string(),
            (ModuleState::Applied, _) => "output has not been validated".to_string(),
        };
        return Err(not_ready(reason));
    }
    if !module.output_dir.is_dir() {
        return Err(not_ready(format!(
            "output directory {} is missing",
            module.output_dir.display()
        )));
    }
    let tree = SourceTree::read(&module.output_dir)?;
    if Some(tree.hash()) != record.output_hash {
        return Err(not_ready(
            "output differs from the applied patches; rebuild patches first".to_string(),
        ));
    }
    Ok(ReadyModule {
        name: module.name.clone(),
        record,
        tree,
    })
}

/// Builds distributables for one project.
pub struct Packager<'a> {
    project: &'a ResolvedProject,
    cache: &'a BuildCache,
}

impl<'a> Packager<'a> {
    /// Creates a packager.
    pub fn new(project: &'a ResolvedProject, cache: &'a BuildCache) -> Self {
        Self { project, cache }
    }

    /// Where artifacts are written by default.
    pub fn dist_dir(&self) -> PathBuf {
        self.project.root.join(DIST_DIR)
    }

    /// Modules bundled in the launcher: the configured list, or every
    /// module that is not bare.
    pub fn launcher_modules(&self) -> Vec<&'a ResolvedModule> {
        let configured = &self.project.bundle.launcher_modules;
        self.project
            .modules
            .iter()
            .filter(|m| {
                if configured.is_empty() {
                    !m.bare
                } else {
                    configured.contains(&m.name)
                }
            })
            .collect()
    }

    /// Builds the launcher: the bootstrap loader fetched from the library
    /// repositories, `launcher.json`, and the bundled module outputs.
    pub fn create_launcher(
        &self,
        libraries: &[Box<dyn RepositoryClient>],
    ) -> Result<Artifact, DistError> {
        let ready = self.ready(&self.launcher_modules())?;

        let bootstrap = self
            .project
            .bundle
            .bootstrap
            .as_deref()
            .ok_or_else(|| DistError::MissingConfig("bundle.bootstrap".to_string()))?;
        let bootstrap_coords = Coordinates::parse(bootstrap)?;
        let bootstrap_jar = fetch_first(libraries, &bootstrap_coords.repository_path("jar"))?;
        let bootstrap_file = format!(
            "bootstrap/{}",
            bootstrap_coords
                .repository_path("jar")
                .rsplit('/')
                .next()
                .unwrap_or("bootstrap.jar")
        );

        let manifest = LauncherManifest {
            format_version: FORMAT_VERSION,
            name: self.project.name.clone(),
            version: self.project.version.clone(),
            bootstrap: bootstrap_coords.to_string(),
            bootstrap_file: bootstrap_file.clone(),
            upstream: self.upstream_pointer()?,
            modules: ready
                .iter()
                .map(|m| BundledModule {
                    name: m.name.clone(),
                    tree_hash: m.tree.hash().to_string(),
                    files: m.tree.len(),
                })
                .collect(),
        };

        let mut archive = ArchiveBuilder::new("launcher");
        archive
            .add_file("launcher.json", to_json(&manifest)?)
            .add_file(&bootstrap_file, bootstrap_jar);
        for module in &ready {
            archive.add_tree(&format!("modules/{}", module.name), &module.tree);
        }
        let coords = self.launcher_coordinates()?;
        let artifact = Artifact::new(coords, archive.finish()?);
        info!(
            artifact = %artifact.coordinates,
            modules = ready.len(),
            bytes = artifact.data.len(),
            "launcher created"
        );
        Ok(artifact)
    }

    /// Builds the dev bundle: `config.json` plus every module's patch set.
    pub fn generate_dev_bundle(&self) -> Result<Artifact, DistError> {
        let modules: Vec<&ResolvedModule> = self.project.modules.iter().collect();
        let ready = self.ready(&modules)?;

        let api = self
            .project
            .bundle
            .api_coordinates
            .as_deref()
            .ok_or_else(|| DistError::MissingConfig("bundle.api_coordinates".to_string()))?;
        let api = Coordinates::parse(api)?.with_version(&self.project.version);

        let mut archive = ArchiveBuilder::new("dev bundle");
        let mut sets = Vec::new();
        for (module, ready) in modules.iter().zip(&ready) {
            let stack = PatchStack::load(&module.patch_dir)?;
            let mut names = Vec::with_capacity(stack.len());
            for (_, record) in stack.iter() {
                archive.add_file(
                    &format!("patches/{}/{}", module.name, record.name),
                    record.raw.as_bytes(),
                );
                names.push(record.name.clone());
            }
            sets.push(BundledPatchSet {
                name: module.name.clone(),
                base: module.base.to_string(),
                patches: names,
                output_hash: ready.tree.hash().to_string(),
            });
        }

        let config = DevBundleConfig {
            format_version: FORMAT_VERSION,
            name: self.project.name.clone(),
            version: self.project.version.clone(),
            release: self.project.release.to_string(),
            upstream_ref: self.project.upstream_ref.to_string(),
            api_coordinates: api.to_string(),
            extra_coordinates: self.project.bundle.extra_coordinates.clone(),
            library_repositories: self.project.bundle.library_repositories.clone(),
            modules: sets,
        };
        archive.add_file("config.json", to_json(&config)?);

        let coords = Coordinates {
            group: self.group()?,
            artifact: DEV_BUNDLE_ARTIFACT.to_string(),
            version: Some(self.project.version.clone()),
        };
        let artifact = Artifact::new(coords, archive.finish()?);
        info!(artifact = %artifact.coordinates, files = archive.len(), "dev bundle generated");
        Ok(artifact)
    }

    /// `<group>:<name>-launcher:<version>`.
    pub fn launcher_coordinates(&self) -> Result<Coordinates, DistError> {
        Ok(Coordinates {
            group: self.group()?,
            artifact: format!("{}-{LAUNCHER_SUFFIX}", self.project.name),
            version: Some(self.project.version.clone()),
        })
    }

    fn group(&self) -> Result<String, DistError> {
        if self.project.group.is_empty() {
            return Err(DistError::MissingConfig("project.group".to_string()));
        }
        Ok(self.project.group.clone())
    }

    fn ready(&self, modules: &[&ResolvedModule]) -> Result<Vec<ReadyModule>, DistError> {
        modules
            .iter()
            .map(|m| ready_module(self.cache, m))
            .collect()
    }

    fn upstream_pointer(&self) -> Result<Option<UpstreamPointer>, DistError> {
        let Some(artifact) = &self.project.artifact else {
            return Ok(None);
        };
        let coords = Coordinates::parse(&artifact.binary)?.with_version(self.project.release.as_str());
        let sha256 = cached_artifact(self.cache, &coords).map(|bytes| sha256_hex(&bytes));
        if sha256.is_none() {
            debug!(artifact = %coords, "upstream binary not in cache, pointer has no checksum");
        }
        Ok(Some(UpstreamPointer {
            release: self.project.release.to_string(),
            coordinates: coords.to_string(),
            repository: artifact.repository.clone(),
            path: coords.repository_path("jar"),
            sha256,
        }))
    }
}

/// Fetches `path` from the first repository that has it.
fn fetch_first(clients: &[Box<dyn RepositoryClient>], path: &str) -> Result<Vec<u8>, DistError> {
    let mut tried = Vec::new();
    for client in clients {
        match client.fetch(path) {
            Ok(bytes) => return Ok(bytes),
            Err(UpstreamError::NotFound { repository, .. }) => tried.push(repository),
            Err(e) => return Err(e.into()),
        }
    }
    Err(UpstreamError::NotFound {
        repository: if tried.is_empty() {
            "<no library repositories>".to_string()
        } else {
            tried.join(", ")
        },
        path: path.to_string(),
    }
    .into())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, DistError> {
    let mut text = serde_json::to_string_pretty(value).map_err(|e| DistError::Archive {
        artifact: "metadata".to_string(),
        reason: e.to_string(),
    })?;
    text.push('\n');
    Ok(text.into_bytes())
}
