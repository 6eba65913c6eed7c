//! Base trees shared by many modules.
//!
//! The upstream checkout and the decompiled tree are produced at most once
//! per run, on the main thread, before any module is scheduled. A failure
//! here is remembered and charged to every module that needed the input.

use std::path::Path;

use tracing::info;
use weft_cache::BuildCache;
use weft_config::{ResolvedBase, ResolvedModule, ResolvedProject};
use weft_patch::SourceTree;
use weft_upstream::{
    ArtifactResolver, DecompileStage, DecompiledTree, UpstreamCheckout, UpstreamError,
    UpstreamLinker,
};

use crate::error::{FailureKind, Stage, StageFailure};
use crate::toolchain::Toolchain;

/// Project-wide failures are charged to this pseudo-module.
pub const PROJECT: &str = "*";

/// Shared inputs for one run.
#[derive(Debug, Default)]
pub struct SharedInputs {
    upstream: Option<Result<UpstreamCheckout, StageFailure>>,
    decompiled: Option<Result<DecompiledTree, StageFailure>>,
}

impl SharedInputs {
    /// Produces whatever `modules` need: the upstream checkout if any of
    /// them is based on it, the decompiled tree likewise.
    pub fn prepare(
        project: &ResolvedProject,
        cache: &BuildCache,
        toolchain: &Toolchain,
        modules: &[&ResolvedModule],
    ) -> Self {
        let mut inputs = Self::default();
        if modules
            .iter()
            .any(|m| matches!(m.base, ResolvedBase::Upstream { .. }))
        {
            let linker =
                UpstreamLinker::new(toolchain.vcs.as_ref(), cache, &project.upstream_repository);
            inputs.upstream = Some(
                linker
                    .checkout(&project.upstream_ref)
                    .map_err(|e| StageFailure::from_upstream(PROJECT, Stage::Link, &e)),
            );
        }
        if modules
            .iter()
            .any(|m| matches!(m.base, ResolvedBase::Decompiled { .. }))
        {
            inputs.decompiled = Some(decompile(project, cache, toolchain));
        }
        inputs
    }

    /// The failures of shared stages, if any.
    pub fn failures(&self) -> Vec<&StageFailure> {
        let upstream = self.upstream.as_ref().and_then(|r| r.as_ref().err());
        let decompiled = self.decompiled.as_ref().and_then(|r| r.as_ref().err());
        upstream.into_iter().chain(decompiled).collect()
    }

    /// Reads `module`'s base tree.
    ///
    /// A module base is read from the providing module's output directory,
    /// which the scheduler guarantees is applied by now.
    pub fn base_tree(
        &self,
        project: &ResolvedProject,
        module: &ResolvedModule,
    ) -> Result<SourceTree, StageFailure> {
        let name = module.name.as_str();
        match &module.base {
            ResolvedBase::Upstream { subdir } => {
                let checkout = shared(&self.upstream, name, Stage::Link, "upstream checkout")?;
                checkout
                    .base(subdir)
                    .map_err(|e| StageFailure::from_upstream(name, Stage::Link, &e))
            }
            ResolvedBase::Decompiled { subdir } => {
                let tree = shared(&self.decompiled, name, Stage::Decompile, "decompiled tree")?;
                tree.base(subdir)
                    .map_err(|e| StageFailure::from_upstream(name, Stage::Decompile, &e))
            }
            ResolvedBase::Module {
                module: provider,
                subdir,
            } => {
                let provider_dir = project
                    .module(provider)
                    .map_err(|e| StageFailure::new(name, Stage::Link, FailureKind::Config, e.to_string()))?
                    .output_dir
                    .as_path();
                read_module_base(name, provider, provider_dir, subdir)
            }
        }
    }
}

fn shared<'a, T>(
    slot: &'a Option<Result<T, StageFailure>>,
    module: &str,
    stage: Stage,
    what: &str,
) -> Result<&'a T, StageFailure> {
    match slot {
        Some(Ok(value)) => Ok(value),
        Some(Err(failure)) => Err(failure.for_module(module)),
        None => Err(StageFailure::new(
            module,
            stage,
            FailureKind::Io,
            format!("{what} was not prepared"),
        )),
    }
}

fn read_module_base(
    module: &str,
    provider: &str,
    provider_dir: &Path,
    subdir: &str,
) -> Result<SourceTree, StageFailure> {
    let dir = if subdir.is_empty() || subdir == "." {
        provider_dir.to_path_buf()
    } else {
        provider_dir.join(subdir)
    };
    if !dir.is_dir() {
        return Err(StageFailure::new(
            module,
            Stage::Link,
            FailureKind::UnresolvableRef,
            format!("{} does not exist in the output of module '{provider}'", dir.display()),
        ));
    }
    SourceTree::read(&dir).map_err(|e| StageFailure::from_patch(module, Stage::Link, &e))
}

fn decompile(
    project: &ResolvedProject,
    cache: &BuildCache,
    toolchain: &Toolchain,
) -> Result<DecompiledTree, StageFailure> {
    let missing = |what: &str| {
        StageFailure::from_upstream(
            PROJECT,
            Stage::Resolve,
            &UpstreamError::MissingConfig(what.to_string()),
        )
    };
    let artifact = project.artifact.as_ref().ok_or_else(|| missing("artifact"))?;
    let client = toolchain.artifacts.as_deref().ok_or_else(|| missing("artifact.repository"))?;
    let remapper = toolchain.remapper.as_deref().ok_or_else(|| missing("tools.remapper"))?;
    let decompiler = toolchain
        .decompiler
        .as_deref()
        .ok_or_else(|| missing("tools.decompiler"))?;

    let artifacts = ArtifactResolver::new(client, cache)
        .resolve(artifact, &project.release)
        .map_err(|e| StageFailure::from_upstream(PROJECT, Stage::Resolve, &e))?;
    let tree = DecompileStage::new(cache, remapper, decompiler, toolchain.timeout)
        .run(&artifacts)
        .map_err(|e| StageFailure::from_upstream(PROJECT, Stage::Decompile, &e))?;
    info!(release = %project.release, tree = %tree.hash.short(), "decompiled tree ready");
    Ok(tree)
}
