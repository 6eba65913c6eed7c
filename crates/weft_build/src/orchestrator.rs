//! Sequencing of pipeline stages across modules.
//!
//! The orchestrator owns no global state. Each operation takes the module
//! graph, prepares the shared inputs (upstream checkout, decompiled tree) on
//! the calling thread, and then runs the per-module stage on a pool of
//! worker threads. Modules are dispatched only once every module they
//! depend on has finished successfully; a failure skips its dependents
//! with `ModuleNotReady` and leaves unrelated modules running.
//!
//! Every module result is durably recorded in the cache before the module
//! is reported as done.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex};

use tracing::{debug, info, warn};
use weft_cache::{BuildCache, CacheError, ModuleRecord, ModuleState, TreeHasher};
use weft_config::{ResolvedModule, ResolvedProject};
use weft_dist::{publish_artifacts, Artifact, Packager, Published};
use weft_patch::{
    install_tree, rebuild, recover_stale, PatchError, PatchStack, RebuildOptions, SourceTree,
    DEFAULT_AUTHOR,
};
use weft_upstream::UpstreamError;

use crate::error::{BuildError, FailureKind, Stage, StageFailure};
use crate::graph::ModuleGraph;
use crate::inputs::{SharedInputs, PROJECT};
use crate::report::{Drift, ModuleOutcome, ModuleReport, ModuleStatus, RebuildSummary, RunReport};
use crate::toolchain::Toolchain;

/// Which version string `print-version` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionQuery {
    /// The fork's own version.
    #[default]
    Project,
    /// The upstream release the binary artifact resolves to.
    Release,
    /// The upstream source revision.
    Upstream,
}

/// An artifact written to the distribution directory.
#[derive(Debug, Clone)]
pub struct PackagedArtifact {
    /// The artifact.
    pub artifact: Artifact,
    /// Where it was written.
    pub path: PathBuf,
}

/// What `clean-cache` removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanSummary {
    /// Snapshot and blob files.
    pub files: usize,
    /// Decompiled, upstream, and artifact directories.
    pub dirs: usize,
}

/// Drives the pipeline for one project.
pub struct Orchestrator<'a> {
    project: &'a ResolvedProject,
    cache: &'a BuildCache,
    toolchain: &'a Toolchain,
    graph: ModuleGraph<'a>,
}

impl<'a> Orchestrator<'a> {
    /// Creates an orchestrator; fails if the module graph is invalid.
    pub fn new(
        project: &'a ResolvedProject,
        cache: &'a BuildCache,
        toolchain: &'a Toolchain,
    ) -> Result<Self, BuildError> {
        Ok(Self {
            graph: ModuleGraph::from_project(project)?,
            project,
            cache,
            toolchain,
        })
    }

    /// The module graph.
    pub fn graph(&self) -> &ModuleGraph<'a> {
        &self.graph
    }

    /// The requested version string.
    pub fn version(&self, query: VersionQuery) -> &str {
        match query {
            VersionQuery::Project => &self.project.version,
            VersionQuery::Release => self.project.release.as_str(),
            VersionQuery::Upstream => self.project.upstream_ref.as_str(),
        }
    }

    /// Applies the patch stacks of `selection` and everything it depends on
    /// (every module when empty).
    pub fn apply(&self, selection: &[String]) -> Result<RunReport, BuildError> {
        let modules = self.graph.closure(selection)?;
        self.recover(&modules)?;
        let inputs = SharedInputs::prepare(self.project, self.cache, self.toolchain, &modules);
        let report = self.schedule(&modules, Stage::Apply, |m| self.apply_module(m, &inputs));
        self.invalidate_failed(&report);
        info!(
            modules = report.modules.len(),
            applied = report.applied_count(),
            failed = report.failures().len(),
            "apply finished"
        );
        Ok(report)
    }

    /// Runs the full pipeline over every module.
    pub fn build(&self) -> Result<RunReport, BuildError> {
        self.apply(&[])
    }

    /// Re-applies the stacks of `selection` (and its dependencies) in memory
    /// and compares each result with the recorded output hash.
    pub fn validate(&self, selection: &[String]) -> Result<RunReport, BuildError> {
        let modules = self.graph.closure(selection)?;
        let inputs = SharedInputs::prepare(self.project, self.cache, self.toolchain, &modules);
        let report = self.schedule(&modules, Stage::Validate, |m| {
            self.validate_module(m, &inputs)
        });
        self.invalidate_failed(&report);
        Ok(report)
    }

    /// Regenerates the patches of `selection` (every module when empty)
    /// from their hand-edited outputs, in dependency order.
    ///
    /// Modules are independent: a failure is collected and the remaining
    /// modules are still rebuilt.
    pub fn rebuild(
        &self,
        selection: &[String],
        filter_fuzz: bool,
    ) -> Result<Vec<RebuildSummary>, BuildError> {
        let modules: Vec<&ResolvedModule> = if selection.is_empty() {
            self.graph.topological()
        } else {
            let wanted = self.graph.closure(selection)?;
            wanted
                .into_iter()
                .filter(|m| selection.contains(&m.name))
                .collect()
        };
        self.recover(&modules)?;
        let inputs = SharedInputs::prepare(self.project, self.cache, self.toolchain, &modules);

        let mut summaries = Vec::new();
        let mut failures = Vec::new();
        for module in modules {
            match self.rebuild_module(module, &inputs, filter_fuzz) {
                Ok(summary) => summaries.push(summary),
                Err(failure) => {
                    warn!(module = %module.name, error = %failure.message, "rebuild failed");
                    failures.push(failure);
                }
            }
        }
        if failures.is_empty() {
            Ok(summaries)
        } else {
            Err(BuildError::ModuleFailed { failures })
        }
    }

    /// State and hand-edit drift of every module.
    pub fn status(&self) -> Result<Vec<ModuleStatus>, BuildError> {
        let mut out = Vec::with_capacity(self.graph.len());
        for module in self.graph.topological() {
            let record = self.cache.module(&module.name)?;
            let patches = PatchStack::load(&module.patch_dir)
                .map_err(|e| StageFailure::from_patch(&module.name, Stage::Apply, &e))?
                .len();
            let drift = self.drift(module, &record)?;
            out.push(ModuleStatus {
                module: module.name.clone(),
                state: record.state,
                validated: record.validated,
                patches,
                output_hash: record.output_hash,
                conflict: record.conflict,
                drift,
            });
        }
        Ok(out)
    }

    /// Validates the launcher modules, then builds the launcher and writes
    /// it to the distribution directory.
    pub fn create_launcher(&self) -> Result<PackagedArtifact, BuildError> {
        let artifact = self.package_launcher()?;
        self.write(artifact)
    }

    /// Validates every module, then builds the dev bundle and writes it to
    /// the distribution directory.
    pub fn generate_dev_bundle(&self) -> Result<PackagedArtifact, BuildError> {
        let artifact = self.package_dev_bundle()?;
        self.write(artifact)
    }

    /// Builds and uploads the launcher, and the dev bundle when
    /// `dev_bundle` is set, to the `[publish]` repository.
    ///
    /// Nothing is uploaded unless every artifact was built.
    pub fn publish(&self, dev_bundle: bool) -> Result<Vec<Published>, BuildError> {
        let publisher = self.toolchain.publisher.as_deref().ok_or_else(|| {
            StageFailure::from_upstream(
                PROJECT,
                Stage::Publish,
                &UpstreamError::MissingConfig("publish".to_string()),
            )
        })?;
        let mut artifacts = vec![self.package_launcher()?];
        if dev_bundle {
            artifacts.push(self.package_dev_bundle()?);
        }
        let published = publish_artifacts(publisher, &artifacts)
            .map_err(|e| StageFailure::from_dist(PROJECT, Stage::Publish, &e))?;
        info!(
            artifacts = published.len(),
            repository = %publisher.describe(),
            "publish finished"
        );
        Ok(published)
    }

    /// Removes cache entries nothing refers to any more: snapshots and
    /// blobs, decompiled and upstream trees no stage record points at, and
    /// fetched artifacts of other releases.
    pub fn clean_cache(&self) -> Result<CleanSummary, BuildError> {
        let files = self.cache.gc()?;
        let manifest = self.cache.manifest()?;
        let live: Vec<PathBuf> = manifest
            .stages
            .values()
            .filter_map(|s| s.output_path.clone())
            .collect();

        let root = self.cache.cache_dir();
        let mut dirs = 0;
        for subdir in [
            weft_upstream::decompile::DECOMPILED_DIR,
            weft_upstream::linker::UPSTREAM_DIR,
        ] {
            dirs += prune_dirs(&root.join(subdir), |path| live.iter().any(|l| l == path))?;
        }
        let release = self.project.release.as_str();
        dirs += prune_dirs(&root.join(weft_upstream::resolver::ARTIFACT_DIR), |path| {
            path.file_name().is_some_and(|n| n == release)
        })?;
        info!(files, dirs, "cache cleaned");
        Ok(CleanSummary { files, dirs })
    }

    fn package_launcher(&self) -> Result<Artifact, BuildError> {
        let packager = Packager::new(self.project, self.cache);
        let names: Vec<String> = packager
            .launcher_modules()
            .iter()
            .map(|m| m.name.clone())
            .collect();
        self.validate(&names)?.into_result()?;
        packager
            .create_launcher(&self.toolchain.libraries)
            .map_err(|e| StageFailure::from_dist(PROJECT, Stage::Package, &e).into())
    }

    fn package_dev_bundle(&self) -> Result<Artifact, BuildError> {
        self.validate(&[])?.into_result()?;
        Packager::new(self.project, self.cache)
            .generate_dev_bundle()
            .map_err(|e| StageFailure::from_dist(PROJECT, Stage::Package, &e).into())
    }

    fn write(&self, artifact: Artifact) -> Result<PackagedArtifact, BuildError> {
        let dir = Packager::new(self.project, self.cache).dist_dir();
        let path = artifact
            .write_to(&dir)
            .map_err(|e| StageFailure::from_dist(PROJECT, Stage::Package, &e))?;
        info!(artifact = %artifact.coordinates, path = %path.display(), "artifact written");
        Ok(PackagedArtifact { artifact, path })
    }

    /// Puts back trees left half-swapped by an interrupted run.
    fn recover(&self, modules: &[&ResolvedModule]) -> Result<(), BuildError> {
        for module in modules {
            for dir in [&module.output_dir, &module.patch_dir] {
                recover_stale(dir)
                    .map_err(|e| StageFailure::from_patch(&module.name, Stage::Apply, &e))?;
            }
        }
        Ok(())
    }

    fn apply_module(
        &self,
        module: &ResolvedModule,
        inputs: &SharedInputs,
    ) -> Result<ModuleOutcome, StageFailure> {
        let name = module.name.as_str();
        let cache_err = |e: CacheError| StageFailure::from_cache(name, Stage::Apply, &e);

        let stack = PatchStack::load(&module.patch_dir)
            .map_err(|e| StageFailure::from_patch(name, Stage::Apply, &e))?;
        let base = inputs.base_tree(self.project, module)?;
        let key = stack.input_key(&base.hash(), self.project.patches.max_offset);

        let record = self.cache.module(name).map_err(cache_err)?;
        if record.state == ModuleState::Applying {
            warn!(module = name, "previous apply was interrupted, applying again");
        }
        if record.is_ready() && record.input_hash == Some(key) {
            if let Some(expected) = record.output_hash {
                if module.output_dir.is_dir() {
                    let on_disk = TreeHasher::snapshot(&module.output_dir)
                        .map_err(cache_err)?
                        .tree_hash();
                    if on_disk == expected {
                        debug!(module = name, "inputs unchanged, skipping apply");
                        return Ok(ModuleOutcome::UpToDate {
                            output_hash: expected,
                        });
                    }
                    warn!(module = name, "output was edited since the last apply; applying overwrites it");
                }
            }
        }

        self.cache
            .update_module(name, |r| {
                r.state = ModuleState::Applying;
                r.validated = false;
                r.conflict = None;
            })
            .map_err(cache_err)?;
        info!(module = name, patches = stack.len(), "applying patches");

        let outcome = match stack.apply(&base, self.project.patches.max_offset) {
            Ok(outcome) => outcome,
            Err(e) => {
                let conflict = e.as_conflict().map(|report| report.summary());
                let state = if conflict.is_some() {
                    ModuleState::Conflict
                } else {
                    ModuleState::Unapplied
                };
                self.cache
                    .update_module(name, |r| {
                        *r = ModuleRecord {
                            state,
                            conflict,
                            ..ModuleRecord::default()
                        };
                    })
                    .map_err(cache_err)?;
                return Err(StageFailure::from_patch(name, Stage::Apply, &e));
            }
        };

        let output_hash = outcome.output_hash();
        let installed = install_tree(&outcome.tree, &module.output_dir)
            .map_err(|e| StageFailure::from_patch(name, Stage::Apply, &e))
            .and_then(|()| TreeHasher::snapshot(&module.output_dir).map_err(cache_err))
            .and_then(|snapshot| {
                if snapshot.tree_hash() == output_hash {
                    Ok(snapshot)
                } else {
                    Err(StageFailure::new(
                        name,
                        Stage::Apply,
                        FailureKind::Io,
                        format!(
                            "installed output hashes to {}, expected {output_hash}",
                            snapshot.tree_hash()
                        ),
                    ))
                }
            });
        let snapshot = match installed {
            Ok(snapshot) => snapshot,
            Err(failure) => {
                self.cache
                    .update_module(name, |r| *r = ModuleRecord::default())
                    .map_err(cache_err)?;
                return Err(failure);
            }
        };
        let snapshot_key = self.cache.store_snapshot(&snapshot).map_err(cache_err)?;

        self.cache
            .update_module(name, |r| {
                *r = ModuleRecord {
                    state: ModuleState::Applied,
                    input_hash: Some(key),
                    output_hash: Some(output_hash),
                    boundary_hashes: outcome.boundary_hashes.clone(),
                    validated: true,
                    snapshot_key: Some(snapshot_key),
                    conflict: None,
                };
            })
            .map_err(cache_err)?;
        info!(module = name, output = %output_hash.short(), "module applied");
        Ok(ModuleOutcome::Applied {
            patches: stack.len(),
            output_hash,
        })
    }

    fn validate_module(
        &self,
        module: &ResolvedModule,
        inputs: &SharedInputs,
    ) -> Result<ModuleOutcome, StageFailure> {
        let name = module.name.as_str();
        let cache_err = |e: CacheError| StageFailure::from_cache(name, Stage::Validate, &e);
        let record = self.cache.module(name).map_err(cache_err)?;
        let expected = match (record.state, record.output_hash) {
            (ModuleState::Applied, Some(hash)) => hash,
            (state, _) => {
                return Err(StageFailure::new(
                    name,
                    Stage::Validate,
                    FailureKind::ModuleNotReady,
                    format!("module is {state}; apply patches first"),
                ))
            }
        };
        let stack = PatchStack::load(&module.patch_dir)
            .map_err(|e| StageFailure::from_patch(name, Stage::Validate, &e))?;
        let base = inputs.base_tree(self.project, module)?;
        match stack.validate(&base, &expected, self.project.patches.max_offset) {
            Ok(hash) => {
                self.cache
                    .update_module(name, |r| r.validated = true)
                    .map_err(cache_err)?;
                debug!(module = name, output = %hash.short(), "module validated");
                Ok(ModuleOutcome::Validated { output_hash: hash })
            }
            Err(e) => Err(StageFailure::from_patch(name, Stage::Validate, &e)),
        }
    }

    fn rebuild_module(
        &self,
        module: &ResolvedModule,
        inputs: &SharedInputs,
        filter_fuzz: bool,
    ) -> Result<RebuildSummary, StageFailure> {
        let name = module.name.as_str();
        let cache_err = |e: CacheError| StageFailure::from_cache(name, Stage::Rebuild, &e);
        let patch_err =
            |e: PatchError| StageFailure::from_patch(name, Stage::Rebuild, &e);

        let record = self.cache.module(name).map_err(cache_err)?;
        if record.state != ModuleState::Applied || !module.output_dir.is_dir() {
            return Err(StageFailure::new(
                name,
                Stage::Rebuild,
                FailureKind::ModuleNotReady,
                format!("module is {}; apply patches before rebuilding", record.state),
            ));
        }

        let stack = PatchStack::load(&module.patch_dir).map_err(patch_err)?;
        let base = inputs.base_tree(self.project, module)?;
        let working = SourceTree::read(&module.output_dir).map_err(patch_err)?;
        let options = RebuildOptions {
            filter: filter_fuzz || self.project.patches.filter,
            max_offset: self.project.patches.max_offset,
            author: DEFAULT_AUTHOR.to_string(),
        };
        info!(module = name, patches = stack.len(), filter = options.filter, "rebuilding patches");
        let outcome = rebuild(&stack, &base, &working, &record.boundary_hashes, &options)
            .map_err(patch_err)?;
        outcome.commit(&module.patch_dir).map_err(patch_err)?;
        if outcome.tree.hash() != working.hash() {
            install_tree(&outcome.tree, &module.output_dir).map_err(patch_err)?;
        }

        let output_hash = outcome.output_hash();
        let snapshot = TreeHasher::snapshot(&module.output_dir).map_err(cache_err)?;
        let snapshot_key = self.cache.store_snapshot(&snapshot).map_err(cache_err)?;
        let input_hash = outcome
            .stack
            .input_key(&base.hash(), self.project.patches.max_offset);
        self.cache
            .update_module(name, |r| {
                *r = ModuleRecord {
                    state: ModuleState::Applied,
                    input_hash: Some(input_hash),
                    output_hash: Some(output_hash),
                    boundary_hashes: outcome.boundary_hashes.clone(),
                    validated: true,
                    snapshot_key: Some(snapshot_key),
                    conflict: None,
                };
            })
            .map_err(cache_err)?;

        if outcome.is_unchanged() {
            info!(module = name, "patches already match the output");
        }
        Ok(RebuildSummary {
            module: module.name.clone(),
            patches: outcome.stack.len(),
            changed: outcome.changed.clone(),
            reverted: outcome.reverted.clone(),
            output_hash,
        })
    }

    fn drift(&self, module: &ResolvedModule, record: &ModuleRecord) -> Result<Drift, BuildError> {
        if !module.output_dir.is_dir() {
            return Ok(Drift::Missing);
        }
        let Some(recorded) = record
            .snapshot_key
            .as_deref()
            .and_then(|key| self.cache.load_snapshot(key))
        else {
            return Ok(Drift::Unknown);
        };
        let current = TreeHasher::snapshot(&module.output_dir)?;
        let changes = TreeHasher::detect_changes(&current, &recorded);
        Ok(if changes.dirty_count() == 0 {
            Drift::Clean
        } else {
            Drift::Changed(changes)
        })
    }

    /// A failed module can no longer be trusted for packaging.
    fn invalidate_failed(&self, report: &RunReport) {
        for failure in report.failures() {
            if let Err(e) = self.cache.update_module(&failure.module, |r| r.validated = false) {
                warn!(module = %failure.module, error = %e, "could not record failure");
            }
        }
    }

    fn workers(&self, modules: usize) -> usize {
        let configured = if self.project.jobs == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            self.project.jobs
        };
        configured.min(modules).max(1)
    }

    /// Runs `work` for each module on the worker pool, dependencies first.
    ///
    /// The main thread owns the ready queue. When a module fails, every
    /// module that transitively depends on it is reported as not ready
    /// without being dispatched.
    fn schedule<F>(&self, modules: &[&'a ResolvedModule], stage: Stage, work: F) -> RunReport
    where
        F: Fn(&'a ResolvedModule) -> Result<ModuleOutcome, StageFailure> + Sync,
    {
        let total = modules.len();
        let position: HashMap<&str, usize> = modules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.as_str(), i))
            .collect();
        let mut in_degree = vec![0usize; total];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
        for (i, module) in modules.iter().enumerate() {
            for dep in &module.depends_on {
                if let Some(&j) = position.get(dep.as_str()) {
                    in_degree[i] += 1;
                    dependents[j].push(i);
                }
            }
        }
        let mut ready: VecDeque<usize> = (0..total).filter(|&i| in_degree[i] == 0).collect();
        let mut outcomes: Vec<Option<ModuleOutcome>> = vec![None; total];

        let workers = self.workers(total);
        debug!(modules = total, workers, %stage, "scheduling modules");

        let (job_tx, job_rx) = mpsc::channel::<usize>();
        let (result_tx, result_rx) = mpsc::channel::<(usize, Result<ModuleOutcome, StageFailure>)>();
        let job_rx = Mutex::new(job_rx);
        let job_rx_ref = &job_rx;
        let work_ref = &work;

        std::thread::scope(|s| {
            for _ in 0..workers {
                let tx = result_tx.clone();
                s.spawn(move || loop {
                    let job = match job_rx_ref.lock() {
                        Ok(rx) => rx.recv(),
                        Err(_) => break,
                    };
                    let Ok(i) = job else { break };
                    if tx.send((i, work_ref(modules[i]))).is_err() {
                        break;
                    }
                });
            }
            drop(result_tx);

            let mut done = 0usize;
            let mut in_flight = 0usize;
            while done < total {
                while let Some(i) = ready.pop_front() {
                    if job_tx.send(i).is_err() {
                        break;
                    }
                    in_flight += 1;
                }
                if in_flight == 0 {
                    break;
                }
                let Ok((i, result)) = result_rx.recv() else {
                    break;
                };
                in_flight -= 1;
                done += 1;
                match result {
                    Ok(outcome) => {
                        outcomes[i] = Some(outcome);
                        for &d in &dependents[i] {
                            in_degree[d] -= 1;
                            if in_degree[d] == 0 {
                                ready.push_back(d);
                            }
                        }
                    }
                    Err(failure) => {
                        warn!(module = %failure.module, %stage, kind = %failure.kind, "{}", failure.message);
                        let mut pending: Vec<usize> = dependents[i].clone();
                        while let Some(d) = pending.pop() {
                            if outcomes[d].is_some() {
                                continue;
                            }
                            let name = &modules[d].name;
                            outcomes[d] = Some(ModuleOutcome::Failed(StageFailure::new(
                                name,
                                stage,
                                FailureKind::ModuleNotReady,
                                format!(
                                    "depends on '{}', which failed ({})",
                                    failure.module, failure.kind
                                ),
                            )));
                            done += 1;
                            pending.extend(dependents[d].iter().copied());
                        }
                        outcomes[i] = Some(ModuleOutcome::Failed(failure));
                    }
                }
            }
            drop(job_tx);
        });

        let modules = modules
            .iter()
            .zip(outcomes)
            .map(|(module, outcome)| ModuleReport {
                module: module.name.clone(),
                outcome: outcome.unwrap_or_else(|| {
                    ModuleOutcome::Failed(StageFailure::new(
                        &module.name,
                        stage,
                        FailureKind::Io,
                        "module was never scheduled",
                    ))
                }),
            })
            .collect();
        RunReport { modules }
    }
}

/// Removes every subdirectory of `dir` that `keep` rejects. Returns how
/// many were removed.
fn prune_dirs(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<usize, BuildError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(CacheError::io(dir, e).into()),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry.map_err(|e| CacheError::io(dir, e))?.path();
        if !path.is_dir() || keep(&path) {
            continue;
        }
        std::fs::remove_dir_all(&path).map_err(|e| CacheError::io(&path, e))?;
        debug!(path = %path.display(), "removed unreferenced cache directory");
        removed += 1;
    }
    Ok(removed)
}
