//! Failure taxonomy shared by every pipeline stage.
//!
//! Lower crates report rich, crate-specific errors. The orchestrator folds
//! each of them into exactly one [`FailureKind`], which decides the process
//! exit status and how a failure propagates to dependent modules.

use std::fmt;

use weft_cache::CacheError;
use weft_config::ConfigError;
use weft_dist::DistError;
use weft_patch::PatchError;
use weft_upstream::UpstreamError;

/// A pipeline stage, for failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Fetching the binary artifact and mapping.
    Resolve,
    /// Remapping and decompiling the binary.
    Decompile,
    /// Exporting the upstream source revision.
    Link,
    /// Applying a module's patch stack.
    Apply,
    /// Regenerating patches from a modified output.
    Rebuild,
    /// Re-applying a stack in scratch and comparing hashes.
    Validate,
    /// Building the launcher or dev bundle.
    Package,
    /// Uploading artifacts.
    Publish,
}

impl Stage {
    /// Lowercase stage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Decompile => "decompile",
            Stage::Link => "link",
            Stage::Apply => "apply",
            Stage::Rebuild => "rebuild",
            Stage::Validate => "validate",
            Stage::Package => "package",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Binary artifact and mapping disagree, or the artifact is absent.
    ArtifactMismatch,
    /// The decompiler failed.
    DecompileFailed,
    /// The remapper failed.
    RemapFailed,
    /// The upstream ref or a base directory does not exist.
    UnresolvableRef,
    /// A patch does not apply.
    Conflict,
    /// The stack no longer reproduces its recorded boundaries.
    StaleRebuild,
    /// A module (or one it depends on) is not applied and validated.
    ModuleNotReady,
    /// An external tool exceeded its time limit.
    StageTimeout,
    /// Aggregate of several module failures.
    ModuleFailed,
    /// Invalid or incomplete configuration.
    Config,
    /// Filesystem or other internal failure.
    Io,
}

impl FailureKind {
    /// Process exit status for a run whose worst failure is this kind.
    pub fn exit_code(self) -> i32 {
        match self {
            FailureKind::Io | FailureKind::ModuleFailed => 1,
            FailureKind::Conflict | FailureKind::StaleRebuild => 2,
            FailureKind::DecompileFailed | FailureKind::RemapFailed | FailureKind::StageTimeout => 3,
            FailureKind::Config | FailureKind::UnresolvableRef | FailureKind::ArtifactMismatch => 4,
            FailureKind::ModuleNotReady => 5,
        }
    }

    /// Severity used to pick the worst failure of a run.
    ///
    /// Configuration problems outrank tool failures, which outrank patch
    /// conflicts, which outrank not-ready modules, which outrank I/O.
    pub fn rank(self) -> u8 {
        match self {
            FailureKind::Config | FailureKind::UnresolvableRef | FailureKind::ArtifactMismatch => 5,
            FailureKind::DecompileFailed | FailureKind::RemapFailed | FailureKind::StageTimeout => 4,
            FailureKind::Conflict | FailureKind::StaleRebuild => 3,
            FailureKind::ModuleNotReady => 2,
            FailureKind::Io | FailureKind::ModuleFailed => 1,
        }
    }

    /// Name as used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ArtifactMismatch => "ArtifactMismatch",
            FailureKind::DecompileFailed => "DecompileFailed",
            FailureKind::RemapFailed => "RemapFailed",
            FailureKind::UnresolvableRef => "UnresolvableRef",
            FailureKind::Conflict => "Conflict",
            FailureKind::StaleRebuild => "StaleRebuild",
            FailureKind::ModuleNotReady => "ModuleNotReady",
            FailureKind::StageTimeout => "StageTimeout",
            FailureKind::ModuleFailed => "ModuleFailed",
            FailureKind::Config => "Config",
            FailureKind::Io => "Io",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&PatchError> for FailureKind {
    fn from(err: &PatchError) -> Self {
        match err {
            PatchError::Conflict(_) | PatchError::Parse { .. } => FailureKind::Conflict,
            PatchError::StaleRebuild { .. } | PatchError::ValidationMismatch { .. } => {
                FailureKind::StaleRebuild
            }
            PatchError::Io { .. }
            | PatchError::Diff { .. }
            | PatchError::BinaryFile { .. }
            | PatchError::InvalidPath(_)
            | PatchError::Cache(_) => FailureKind::Io,
        }
    }
}

impl From<&UpstreamError> for FailureKind {
    fn from(err: &UpstreamError) -> Self {
        match err {
            UpstreamError::ArtifactMismatch(_) | UpstreamError::NotFound { .. } => {
                FailureKind::ArtifactMismatch
            }
            UpstreamError::RemapFailed(_) => FailureKind::RemapFailed,
            UpstreamError::DecompileFailed(_) => FailureKind::DecompileFailed,
            UpstreamError::StageTimeout { .. } => FailureKind::StageTimeout,
            UpstreamError::UnresolvableRef { .. } => FailureKind::UnresolvableRef,
            UpstreamError::MissingConfig(_) | UpstreamError::Config(_) => FailureKind::Config,
            UpstreamError::Patch(e) => FailureKind::from(e),
            UpstreamError::Io { .. }
            | UpstreamError::Fetch { .. }
            | UpstreamError::Publish { .. }
            | UpstreamError::Cache(_) => FailureKind::Io,
        }
    }
}

impl From<&DistError> for FailureKind {
    fn from(err: &DistError) -> Self {
        match err {
            DistError::ModuleNotReady { .. } => FailureKind::ModuleNotReady,
            DistError::MissingConfig(_) | DistError::Config(_) => FailureKind::Config,
            DistError::Upstream(e) => FailureKind::from(e),
            DistError::Patch(e) => FailureKind::from(e),
            DistError::Archive { .. } | DistError::Io { .. } | DistError::Cache(_) => {
                FailureKind::Io
            }
        }
    }
}

/// The first fatal error of one module's stage chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// Module name, or `*` for project-wide stages.
    pub module: String,
    /// Stage that failed.
    pub stage: Stage,
    /// Classification.
    pub kind: FailureKind,
    /// One-line description.
    pub message: String,
    /// Multi-line detail, such as the hunks of a conflict.
    pub details: Option<String>,
}

impl StageFailure {
    /// Creates a failure without details.
    pub fn new(module: &str, stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            module: module.to_string(),
            stage,
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Folds a patch error; conflicts keep their hunk diff as details.
    pub fn from_patch(module: &str, stage: Stage, err: &PatchError) -> Self {
        let mut failure = Self::new(module, stage, FailureKind::from(err), err.to_string());
        if let Some(report) = err.as_conflict() {
            let details = report.details();
            if !details.is_empty() {
                failure.details = Some(details);
            }
        }
        failure
    }

    /// Folds an upstream error.
    pub fn from_upstream(module: &str, stage: Stage, err: &UpstreamError) -> Self {
        match err {
            UpstreamError::Patch(inner) => Self::from_patch(module, stage, inner),
            other => Self::new(module, stage, FailureKind::from(other), other.to_string()),
        }
    }

    /// Folds a packaging error.
    pub fn from_dist(module: &str, stage: Stage, err: &DistError) -> Self {
        let module = match err {
            DistError::ModuleNotReady { module, .. } => module.as_str(),
            _ => module,
        };
        Self::new(module, stage, FailureKind::from(err), err.to_string())
    }

    /// Folds a cache error.
    pub fn from_cache(module: &str, stage: Stage, err: &CacheError) -> Self {
        Self::new(module, stage, FailureKind::Io, err.to_string())
    }

    /// Copies this failure onto `module`, for modules sharing a failed input.
    pub fn for_module(&self, module: &str) -> Self {
        Self {
            module: module.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed at {} ({}): {}",
            self.module, self.stage, self.kind, self.message
        )
    }
}

impl std::error::Error for StageFailure {}

/// Errors that end a command as a whole.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The build cache could not be read or written.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A single-module operation failed.
    #[error("{0}")]
    Stage(Box<StageFailure>),

    /// One or more modules failed.
    #[error("{} module(s) failed: {}", failures.len(), summarize(failures))]
    ModuleFailed {
        /// Every failure, in module order.
        failures: Vec<StageFailure>,
    },
}

fn summarize(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.module, f.kind))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<StageFailure> for BuildError {
    fn from(failure: StageFailure) -> Self {
        BuildError::Stage(Box::new(failure))
    }
}

impl BuildError {
    /// Classification of this error; for aggregates, of the worst child.
    pub fn kind(&self) -> FailureKind {
        match self {
            BuildError::Config(_) => FailureKind::Config,
            BuildError::Cache(_) => FailureKind::Io,
            BuildError::Stage(f) => f.kind,
            BuildError::ModuleFailed { failures } => worst_kind(failures),
        }
    }

    /// Process exit status.
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

/// Highest-ranked kind among `failures` (`ModuleFailed` when empty).
pub fn worst_kind(failures: &[StageFailure]) -> FailureKind {
    failures
        .iter()
        .map(|f| f.kind)
        .max_by_key(|k| k.rank())
        .unwrap_or(FailureKind::ModuleFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_category() {
        assert_eq!(FailureKind::Conflict.exit_code(), 2);
        assert_eq!(FailureKind::StageTimeout.exit_code(), 3);
        assert_eq!(FailureKind::Config.exit_code(), 4);
        assert_eq!(FailureKind::ModuleNotReady.exit_code(), 5);
        assert_eq!(FailureKind::Io.exit_code(), 1);
    }

    #[test]
    fn worst_kind_follows_rank() {
        let conflict = StageFailure::new("a", Stage::Apply, FailureKind::Conflict, "x");
        let not_ready = StageFailure::new("b", Stage::Apply, FailureKind::ModuleNotReady, "y");
        assert_eq!(worst_kind(&[not_ready.clone(), conflict.clone()]), FailureKind::Conflict);
        let timeout = StageFailure::new("*", Stage::Decompile, FailureKind::StageTimeout, "z");
        assert_eq!(worst_kind(&[conflict, timeout, not_ready]), FailureKind::StageTimeout);
    }

    #[test]
    fn aggregate_uses_worst_child() {
        let err = BuildError::ModuleFailed {
            failures: vec![
                StageFailure::new("api", Stage::Apply, FailureKind::Conflict, "x"),
                StageFailure::new("server", Stage::Apply, FailureKind::ModuleNotReady, "y"),
            ],
        };
        assert_eq!(err.exit_code(), 2);
        assert_eq!(
            err.to_string(),
            "2 module(s) failed: api (Conflict), server (ModuleNotReady)"
        );
    }

    #[test]
    fn upstream_errors_map_to_kinds() {
        let timeout = UpstreamError::StageTimeout {
            tool: "decompiler".to_string(),
            secs: 1,
        };
        assert_eq!(FailureKind::from(&timeout), FailureKind::StageTimeout);
        let mismatch = UpstreamError::ArtifactMismatch("x".to_string());
        assert_eq!(FailureKind::from(&mismatch), FailureKind::ArtifactMismatch);
        let stale = UpstreamError::Patch(PatchError::InvalidPath("x".to_string()));
        assert_eq!(FailureKind::from(&stale), FailureKind::Io);
    }

    #[test]
    fn failure_display_names_module_and_stage() {
        let f = StageFailure::new("server", Stage::Apply, FailureKind::Conflict, "patch 2 does not apply");
        assert_eq!(
            f.to_string(),
            "server failed at apply (Conflict): patch 2 does not apply"
        );
    }
}
