//! Shared helpers for CLI commands.
//!
//! Project root resolution, loading the configuration, cache, and
//! toolchain for a run, and the fixed-width status lines every command
//! prints to stderr.

use std::path::{Path, PathBuf};

use tracing::debug;
use weft_build::inputs::PROJECT;
use weft_build::{BuildError, ModuleOutcome, RunReport, Stage, StageFailure, Toolchain};
use weft_cache::BuildCache;
use weft_config::{ConfigError, ResolvedProject, CONFIG_FILE};

use crate::GlobalArgs;

/// Version recorded in the cache manifest; a different version starts a
/// fresh cache.
pub const WEFT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a command needs for one project.
pub struct Session {
    /// The resolved configuration.
    pub project: ResolvedProject,
    /// The build cache.
    pub cache: BuildCache,
    /// External tools and repositories.
    pub toolchain: Toolchain,
}

/// Walks up from `start` looking for the nearest directory containing `weft.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(ConfigError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "could not find {CONFIG_FILE} in {} or any parent directory",
                    start.display()
                ),
            )));
        }
    }
}

/// Resolves the project root directory from global CLI args.
///
/// If `--config` is specified, uses that path (file → parent dir, dir → itself).
/// Otherwise walks up from the current directory looking for `weft.toml`.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, ConfigError> {
    if let Some(ref config_path) = global.config {
        let p = PathBuf::from(config_path);
        if p.is_file() {
            Ok(p.parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")))
        } else {
            Ok(p)
        }
    } else {
        find_project_root(&std::env::current_dir()?)
    }
}

/// Loads the configuration and cache and builds the production toolchain.
pub fn open_session(global: &GlobalArgs) -> Result<Session, BuildError> {
    let root = resolve_project_root(global)?;
    let config = weft_config::load_config(&root)?;
    let mut project = weft_config::resolve_project(&config, &root);
    if let Some(jobs) = global.jobs {
        project.jobs = jobs;
    }
    debug!(
        root = %root.display(),
        modules = project.modules.len(),
        "project loaded"
    );
    let cache = BuildCache::load_or_create(&project.cache_dir, WEFT_VERSION);
    let toolchain = Toolchain::from_project(&project)
        .map_err(|e| StageFailure::from_upstream(PROJECT, Stage::Resolve, &e))?;
    Ok(Session {
        project,
        cache,
        toolchain,
    })
}

/// Prints a right-aligned status line unless `--quiet` was given.
pub fn status(global: &GlobalArgs, verb: &str, message: impl std::fmt::Display) {
    if !global.quiet {
        eprintln!("{verb:>12} {message}");
    }
}

/// Prints a failure with its details, such as the hunks of a conflict.
pub fn print_failure(failure: &StageFailure) {
    eprintln!("error: {failure}");
    if let Some(details) = &failure.details {
        for line in details.lines() {
            eprintln!("       {line}");
        }
    }
}

/// Prints an error that ended a command and returns its exit status.
pub fn report_error(err: &BuildError) -> i32 {
    match err {
        BuildError::Stage(failure) => print_failure(failure),
        BuildError::ModuleFailed { failures } => {
            for failure in failures {
                print_failure(failure);
            }
        }
        other => eprintln!("error: {other}"),
    }
    err.exit_code()
}

/// Prints one line per module of `report` and returns the run's exit status.
pub fn print_report(global: &GlobalArgs, report: &RunReport) -> i32 {
    for entry in &report.modules {
        match &entry.outcome {
            ModuleOutcome::Applied { patches, output_hash } => status(
                global,
                "Applied",
                format!("{} ({patches} patches, {})", entry.module, output_hash.short()),
            ),
            ModuleOutcome::UpToDate { .. } => status(global, "Fresh", &entry.module),
            ModuleOutcome::Validated { output_hash } => status(
                global,
                "Validated",
                format!("{} ({})", entry.module, output_hash.short()),
            ),
            ModuleOutcome::Failed(failure) => print_failure(failure),
        }
    }
    let failed = report.failures().len();
    if failed > 0 {
        eprintln!("error: {failed} of {} module(s) failed", report.modules.len());
    }
    report.exit_code()
}
