//! Build orchestration for weft.
//!
//! Sequences the pipeline stages (artifact resolution, decompile/remap,
//! upstream checkout, patch application, validation, packaging) across the
//! project's modules in dependency order, skipping work whose inputs are
//! unchanged, and folds every lower-level error into one [`FailureKind`]
//! that decides the process exit status.

#![warn(missing_docs)]

pub mod error;
pub mod graph;
pub mod inputs;
pub mod orchestrator;
pub mod report;
pub mod toolchain;

pub use error::{worst_kind, BuildError, FailureKind, Stage, StageFailure};
pub use graph::ModuleGraph;
pub use inputs::SharedInputs;
pub use orchestrator::{CleanSummary, Orchestrator, PackagedArtifact, VersionQuery};
pub use report::{Drift, ModuleOutcome, ModuleReport, ModuleStatus, RebuildSummary, RunReport};
pub use toolchain::Toolchain;
