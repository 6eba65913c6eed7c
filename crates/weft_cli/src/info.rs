//! `weft print-version`, `weft status`, and `weft clean-cache`.

use weft_build::{BuildError, Drift, ModuleStatus, Orchestrator, VersionQuery};

use crate::pipeline::{open_session, status as print_status};
use crate::GlobalArgs;

/// Runs `weft print-version [--release | --upstream]`.
///
/// The version goes to stdout so scripts can capture it.
pub fn print_version(release: bool, upstream: bool, global: &GlobalArgs) -> Result<i32, BuildError> {
    let session = open_session(global)?;
    let orchestrator = Orchestrator::new(&session.project, &session.cache, &session.toolchain)?;
    println!("{}", orchestrator.version(version_query(release, upstream)));
    Ok(0)
}

fn version_query(release: bool, upstream: bool) -> VersionQuery {
    if release {
        VersionQuery::Release
    } else if upstream {
        VersionQuery::Upstream
    } else {
        VersionQuery::Project
    }
}

/// Runs `weft status`.
pub fn status(global: &GlobalArgs) -> Result<i32, BuildError> {
    let session = open_session(global)?;
    let orchestrator = Orchestrator::new(&session.project, &session.cache, &session.toolchain)?;
    for entry in orchestrator.status()? {
        println!("{}", format_status(&entry));
    }
    Ok(0)
}

fn format_status(entry: &ModuleStatus) -> String {
    let mut line = format!(
        "{:<16} {:<10} {:>3} patches",
        entry.module,
        entry.state.as_str(),
        entry.patches
    );
    if let Some(hash) = &entry.output_hash {
        line.push_str(&format!("  {}", hash.short()));
    }
    if entry.validated {
        line.push_str("  validated");
    }
    match &entry.drift {
        Drift::Clean | Drift::Unknown => {}
        Drift::Missing => line.push_str("  output missing"),
        Drift::Changed(changes) => line.push_str(&format!(
            "  {} new, {} modified, {} deleted",
            changes.new_files.len(),
            changes.modified_files.len(),
            changes.deleted_files.len()
        )),
    }
    if let Some(conflict) = &entry.conflict {
        line.push_str(&format!("  conflict: {conflict}"));
    }
    line
}

/// Runs `weft clean-cache`.
pub fn clean_cache(global: &GlobalArgs) -> Result<i32, BuildError> {
    let session = open_session(global)?;
    let orchestrator = Orchestrator::new(&session.project, &session.cache, &session.toolchain)?;
    let summary = orchestrator.clean_cache()?;
    print_status(
        global,
        "Removed",
        format!("{} files, {} directories", summary.files, summary.dirs),
    );
    Ok(0)
}
