//! `weft apply-patches`, `weft rebuild-patches`, `weft build`, and
//! `weft validate`.

use weft_build::{BuildError, Orchestrator};

use crate::pipeline::{open_session, print_report, status};
use crate::{GlobalArgs, RebuildArgs};

fn selection(module: Option<String>) -> Vec<String> {
    module.into_iter().collect()
}

/// Runs `weft apply-patches [module]`.
pub fn apply(module: Option<String>, global: &GlobalArgs) -> Result<i32, BuildError> {
    let session = open_session(global)?;
    let orchestrator = Orchestrator::new(&session.project, &session.cache, &session.toolchain)?;
    status(
        global,
        "Applying",
        format!("{} v{}", session.project.name, session.project.version),
    );
    let report = orchestrator.apply(&selection(module))?;
    Ok(print_report(global, &report))
}

/// Runs `weft build`.
pub fn build(global: &GlobalArgs) -> Result<i32, BuildError> {
    let session = open_session(global)?;
    let orchestrator = Orchestrator::new(&session.project, &session.cache, &session.toolchain)?;
    status(
        global,
        "Building",
        format!(
            "{} v{} ({} modules)",
            session.project.name,
            session.project.version,
            orchestrator.graph().len()
        ),
    );
    let report = orchestrator.build()?;
    Ok(print_report(global, &report))
}

/// Runs `weft validate [module]`.
pub fn validate(module: Option<String>, global: &GlobalArgs) -> Result<i32, BuildError> {
    let session = open_session(global)?;
    let orchestrator = Orchestrator::new(&session.project, &session.cache, &session.toolchain)?;
    let report = orchestrator.validate(&selection(module))?;
    Ok(print_report(global, &report))
}

/// Runs `weft rebuild-patches [module] [--filter-fuzz]`.
pub fn rebuild(args: &RebuildArgs, global: &GlobalArgs) -> Result<i32, BuildError> {
    let session = open_session(global)?;
    let orchestrator = Orchestrator::new(&session.project, &session.cache, &session.toolchain)?;
    let summaries = orchestrator.rebuild(&selection(args.module.clone()), args.filter_fuzz)?;

    for summary in &summaries {
        if summary.changed.is_empty() {
            status(global, "Unchanged", &summary.module);
        } else {
            status(
                global,
                "Rebuilt",
                format!(
                    "{} ({} of {} patches)",
                    summary.module,
                    summary.changed.len(),
                    summary.patches
                ),
            );
        }
        if global.verbose {
            for name in &summary.changed {
                eprintln!("             {name}");
            }
        }
        for path in &summary.reverted {
            status(global, "Reverted", format!("{}/{path}", summary.module));
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_of_none_is_everything() {
        assert!(selection(None).is_empty());
        assert_eq!(selection(Some("api".to_string())), vec!["api"]);
    }

    #[test]
    fn apply_without_project_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let global = GlobalArgs {
            quiet: true,
            verbose: false,
            config: Some(dir.path().join("missing").display().to_string()),
            jobs: None,
        };
        let err = apply(None, &global).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
