//! Results of orchestrator runs.

use weft_cache::{ChangeSet, ConflictSummary, ModuleState};
use weft_common::ContentHash;

use crate::error::{worst_kind, BuildError, StageFailure};

/// What happened to one module during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// The stack was applied and the output installed.
    Applied {
        /// Number of patches applied.
        patches: usize,
        /// Tree hash of the installed output.
        output_hash: ContentHash,
    },
    /// Inputs and output were unchanged, so nothing was done.
    UpToDate {
        /// Tree hash of the existing output.
        output_hash: ContentHash,
    },
    /// Re-applying the stack in scratch reproduced the recorded output.
    Validated {
        /// The reproduced hash.
        output_hash: ContentHash,
    },
    /// The module's first fatal error.
    Failed(StageFailure),
}

/// One module's line in a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReport {
    /// Module name.
    pub module: String,
    /// Its outcome.
    pub outcome: ModuleOutcome,
}

/// The aggregate result of running a stage over many modules.
///
/// Every module that was selected appears exactly once, in dependency order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Per-module outcomes.
    pub modules: Vec<ModuleReport>,
}

impl RunReport {
    /// Looks up the outcome of `module`.
    pub fn outcome(&self, module: &str) -> Option<&ModuleOutcome> {
        self.modules
            .iter()
            .find(|r| r.module == module)
            .map(|r| &r.outcome)
    }

    /// Every failure, in module order.
    pub fn failures(&self) -> Vec<&StageFailure> {
        self.modules
            .iter()
            .filter_map(|r| match &r.outcome {
                ModuleOutcome::Failed(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Number of modules whose stack was actually applied.
    pub fn applied_count(&self) -> usize {
        self.modules
            .iter()
            .filter(|r| matches!(r.outcome, ModuleOutcome::Applied { .. }))
            .count()
    }

    /// Returns `true` if no module failed.
    pub fn is_success(&self) -> bool {
        self.failures().is_empty()
    }

    /// Process exit status: 0 on success, else that of the worst failure.
    pub fn exit_code(&self) -> i32 {
        let failures: Vec<StageFailure> = self.failures().into_iter().cloned().collect();
        if failures.is_empty() {
            0
        } else {
            worst_kind(&failures).exit_code()
        }
    }

    /// Turns a report with failures into [`BuildError::ModuleFailed`].
    pub fn into_result(self) -> Result<Self, BuildError> {
        let failures: Vec<StageFailure> = self.failures().into_iter().cloned().collect();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(BuildError::ModuleFailed { failures })
        }
    }
}

/// Output directory state relative to the last apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// The output matches the last applied tree.
    Clean,
    /// Files differ from the last applied tree.
    Changed(ChangeSet),
    /// The output directory does not exist.
    Missing,
    /// No applied tree is recorded to compare with.
    Unknown,
}

/// One module's entry in `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStatus {
    /// Module name.
    pub module: String,
    /// Apply state.
    pub state: ModuleState,
    /// Whether the output was verified against the stack.
    pub validated: bool,
    /// Patches currently in the patch directory.
    pub patches: usize,
    /// Tree hash of the last applied output.
    pub output_hash: Option<ContentHash>,
    /// Where the last apply stopped, for modules in conflict.
    pub conflict: Option<ConflictSummary>,
    /// Hand edits since the last apply.
    pub drift: Drift,
}

/// Outcome of regenerating one module's patches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildSummary {
    /// Module name.
    pub module: String,
    /// Patches in the stack after the rebuild.
    pub patches: usize,
    /// Patch files rewritten or created.
    pub changed: Vec<String>,
    /// Files whose whitespace-only edits were discarded.
    pub reverted: Vec<String>,
    /// Tree hash the new stack reproduces.
    pub output_hash: ContentHash,
}
